use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tidemark_common::error::TidemarkResult;
use tidemark_common::mapping::FieldMapping;
use tidemark_common::record::SourceRecord;

/// Target side of a sync: schema lookup, watermarks and batch apply.
///
/// Implementations own their connection exclusively, hence `&mut self`.
#[async_trait]
pub trait TargetStore: Send {
    /// Whether the target table exists. Authoritative precondition for a sync.
    async fn table_exists(&mut self, table: &str) -> TidemarkResult<bool>;

    /// Last completed sync time for `table`, creating the watermark table if absent.
    async fn get_watermark(&mut self, table: &str) -> TidemarkResult<Option<DateTime<Utc>>>;

    /// Insert or overwrite the watermark for `table` in a single statement.
    async fn set_watermark(&mut self, table: &str, synced_at: DateTime<Utc>) -> TidemarkResult<()>;

    /// Upsert a batch in one transaction. Returns rows written; all-or-nothing.
    async fn upsert_batch(
        &mut self,
        table: &str,
        records: &[SourceRecord],
        mapping: &FieldMapping,
        keys: &[String],
    ) -> TidemarkResult<u64>;

    /// Delete the rows keyed by the batch in one transaction. Returns rows removed.
    async fn delete_by_keys(
        &mut self,
        table: &str,
        records: &[SourceRecord],
        mapping: &FieldMapping,
        keys: &[String],
    ) -> TidemarkResult<u64>;

    /// Unconditional row count, for reporting only.
    async fn record_count(&mut self, table: &str) -> TidemarkResult<i64>;
}
