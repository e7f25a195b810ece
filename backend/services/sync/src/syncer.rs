use chrono::Utc;

use tidemark_common::error::TidemarkError;
use tidemark_common::record::SourceRecord;
use tidemark_config::SyncConfig;
use tidemark_db::TargetStore;

use crate::report::{RunSummary, SyncOutcome, SyncResult};
use crate::salesforce::client::SalesforceClient;
use crate::salesforce::query::build_incremental_query;

/// Drives incremental syncs from Salesforce into a target store, one table at a time.
pub struct DataSyncer<S> {
    client: SalesforceClient,
    store: S,
}

impl<S> DataSyncer<S>
where
    S: TargetStore,
{
    pub fn new(client: SalesforceClient, store: S) -> Self {
        Self { client, store }
    }

    pub fn into_parts(self) -> (SalesforceClient, S) {
        (self.client, self.store)
    }

    /// Sync every table in order. A failing table never stops the ones after it.
    pub async fn sync_all(&mut self, configs: &[SyncConfig]) -> RunSummary {
        let mut results = Vec::with_capacity(configs.len());
        for config in configs {
            results.push(self.sync(config).await);
        }

        let summary = RunSummary::from_results(results);
        tracing::info!(
            tables = configs.len(),
            synced = summary.tables_synced,
            success = summary.success,
            "sync run completed"
        );
        summary
    }

    /// Run one table to completion. Every error ends up in the returned result.
    pub async fn sync(&mut self, config: &SyncConfig) -> SyncResult {
        let table = config.pg_table.as_str();
        let mut result = SyncResult::new(&config.sf_object, table);
        tracing::info!(sf_object = %config.sf_object, table, "starting table sync");

        if let Err(e) = config.validate() {
            tracing::error!(table, error = %e, "invalid sync config");
            return result.fail(e);
        }

        match self.store.table_exists(table).await {
            Ok(true) => {}
            Ok(false) => {
                let e = TidemarkError::TableNotFound(table.to_string());
                tracing::error!(table, "target table does not exist, skipping");
                return result.fail(e);
            }
            Err(e) => {
                tracing::error!(table, error = %e, "failed to inspect target table");
                return result.fail(e);
            }
        }

        let previous = match self.store.get_watermark(table).await {
            Ok(watermark) => watermark,
            Err(e) => {
                tracing::warn!(table, error = %e, "watermark unreadable, running full sync");
                None
            }
        };
        let sync_start = Utc::now();

        let query = match build_incremental_query(&config.soql_query, previous) {
            Ok(query) => query,
            Err(e) => {
                tracing::error!(table, error = %e, "could not build incremental query");
                return result.fail(TidemarkError::Config(format!("{table}: {e}")));
            }
        };

        result.previous_watermark = previous;
        let initial_count = self.count(table).await;

        tracing::info!(
            table,
            watermark = ?previous,
            fields = query.fields().len(),
            filtered = query.filter().is_some(),
            limit = ?query.limit(),
            page_size = config.page_size(),
            %query,
            "extracting"
        );
        let soql = query.to_string();

        let mut extraction_error = None;
        let mut apply_error = None;
        let mut applied_any = false;
        let mut batches = self.client.query_batches(&soql, config.page_size());

        while let Some(batch) = batches.next_batch().await {
            let records = match batch {
                Ok(records) => records,
                Err(e) => {
                    extraction_error = Some(e);
                    break;
                }
            };

            result.batches += 1;
            result.fetched += records.len() as u64;

            let (deleted, active): (Vec<SourceRecord>, Vec<SourceRecord>) =
                records.into_iter().partition(SourceRecord::is_deleted);
            let mut batch_failed = false;

            if !active.is_empty() {
                match self
                    .store
                    .upsert_batch(table, &active, &config.field_mapping, &config.primary_keys)
                    .await
                {
                    Ok(n) => {
                        result.upserted += n;
                        applied_any = true;
                    }
                    Err(e) => {
                        tracing::warn!(
                            table,
                            batch = result.batches,
                            records = active.len(),
                            error = %e,
                            "upsert failed, batch rolled back"
                        );
                        batch_failed = true;
                        apply_error = Some(e);
                    }
                }
            }

            if !deleted.is_empty() {
                match self
                    .store
                    .delete_by_keys(table, &deleted, &config.field_mapping, &config.primary_keys)
                    .await
                {
                    Ok(n) => {
                        result.deleted += n;
                        applied_any = true;
                    }
                    Err(e) => {
                        tracing::warn!(
                            table,
                            batch = result.batches,
                            records = deleted.len(),
                            error = %e,
                            "delete failed, batch rolled back"
                        );
                        batch_failed = true;
                        apply_error = Some(e);
                    }
                }
            }

            if batch_failed {
                result.failed_batches += 1;
            }

            tracing::info!(
                table,
                batch = result.batches,
                active = active.len(),
                deleted = deleted.len(),
                fetched = result.fetched,
                "batch processed"
            );
        }

        let clean = extraction_error.is_none() && result.failed_batches == 0;

        if !clean {
            result.outcome = if applied_any {
                SyncOutcome::Partial
            } else {
                SyncOutcome::Failed
            };
            result.error = match (&extraction_error, &apply_error) {
                (Some(e), _) => Some(e.to_string()),
                (None, Some(e)) => Some(format!(
                    "{} of {} batches failed, last error: {e}",
                    result.failed_batches, result.batches
                )),
                (None, None) => None,
            };
            tracing::warn!(
                table,
                outcome = ?result.outcome,
                error = ?result.error,
                "sync incomplete, watermark left unchanged"
            );
        } else if result.fetched == 0 {
            result.outcome = SyncOutcome::UpToDate;
            tracing::info!(table, "no changes since last watermark");
        } else {
            match self.store.set_watermark(table, sync_start).await {
                Ok(()) => {
                    result.outcome = SyncOutcome::Synced;
                    result.new_watermark = Some(sync_start);
                    tracing::info!(table, watermark = %sync_start, "watermark advanced");
                }
                Err(e) => {
                    tracing::error!(table, error = %e, "failed to persist watermark");
                    result.outcome = SyncOutcome::Partial;
                    result.error = Some(e.to_string());
                }
            }
        }

        let final_count = self.count(table).await;
        result.set_counts(initial_count, final_count);

        tracing::info!(
            table,
            outcome = ?result.outcome,
            fetched = result.fetched,
            upserted = result.upserted,
            deleted = result.deleted,
            batches = result.batches,
            failed_batches = result.failed_batches,
            net_change = ?result.net_change,
            "table sync finished"
        );
        result
    }

    async fn count(&mut self, table: &str) -> Option<i64> {
        match self.store.record_count(table).await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(table, error = %e, "row count unavailable");
                None
            }
        }
    }
}
