use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Connection, PgConnection, Row};

use crate::rows::{key_rows, upsert_rows};
use crate::sql::{
    count_statement, create_watermark_table_statement, delete_statement, quote_ident,
    upsert_statement, QualifiedTable, WATERMARK_TABLE,
};
use crate::store::repositories::TargetStore;
use tidemark_common::error::{TidemarkError, TidemarkResult};
use tidemark_common::mapping::FieldMapping;
use tidemark_common::record::SourceRecord;

/// Postgres target store over a single exclusively owned connection.
pub struct PgTargetStore {
    conn: PgConnection,
    watermark_table_ready: bool,
}

impl PgTargetStore {
    /// Open the connection. TLS is governed by the URL (`sslmode=require`).
    pub async fn connect(database_url: &str) -> TidemarkResult<Self> {
        tracing::info!("connecting to target database");
        let conn = PgConnection::connect(database_url)
            .await
            .map_err(|e| TidemarkError::Database(e.to_string()))?;
        Ok(Self {
            conn,
            watermark_table_ready: false,
        })
    }

    /// Close the connection gracefully.
    ///
    /// Dropping the store without calling this still releases the socket.
    pub async fn disconnect(self) {
        match self.conn.close().await {
            Ok(()) => tracing::info!("target database disconnected"),
            Err(e) => tracing::warn!(error = %e, "error while closing target database connection"),
        }
    }

    async fn ensure_watermark_table(&mut self) -> TidemarkResult<()> {
        if self.watermark_table_ready {
            return Ok(());
        }
        sqlx::query(&create_watermark_table_statement())
            .execute(&mut self.conn)
            .await
            .map_err(|e| TidemarkError::Watermark(e.to_string()))?;
        self.watermark_table_ready = true;
        Ok(())
    }

    /// Run one single-parameter batch statement inside its own transaction.
    async fn execute_batch(&mut self, sql: &str, rows: Value) -> TidemarkResult<u64> {
        let mut tx = self
            .conn
            .begin()
            .await
            .map_err(|e| TidemarkError::Apply(e.to_string()))?;

        let result = sqlx::query(sql)
            .bind(rows)
            .execute(&mut *tx)
            .await
            .map_err(|e| TidemarkError::Apply(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| TidemarkError::Apply(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TargetStore for PgTargetStore {
    async fn table_exists(&mut self, table: &str) -> TidemarkResult<bool> {
        let target = QualifiedTable::parse(table);
        let row = sqlx::query(
            "select exists (
               select 1 from information_schema.tables
               where table_schema = $1 and table_name = $2
             ) as present",
        )
        .bind(&target.schema)
        .bind(&target.name)
        .fetch_one(&mut self.conn)
        .await
        .map_err(|e| TidemarkError::Database(e.to_string()))?;

        Ok(row.get::<bool, _>("present"))
    }

    async fn get_watermark(&mut self, table: &str) -> TidemarkResult<Option<DateTime<Utc>>> {
        self.ensure_watermark_table().await?;

        let sql = format!(
            "select last_synced_at from {} where table_name = $1",
            quote_ident(WATERMARK_TABLE)
        );
        let row = sqlx::query(&sql)
            .bind(table)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(|e| TidemarkError::Watermark(e.to_string()))?;

        let watermark = row.map(|r| r.get::<DateTime<Utc>, _>("last_synced_at"));
        match watermark {
            Some(at) => tracing::info!(table, watermark = %at, "watermark found"),
            None => tracing::info!(table, "no watermark found, full sync"),
        }
        Ok(watermark)
    }

    async fn set_watermark(&mut self, table: &str, synced_at: DateTime<Utc>) -> TidemarkResult<()> {
        self.ensure_watermark_table().await?;

        let sql = format!(
            "insert into {} (table_name, last_synced_at)
             values ($1, $2)
             on conflict (table_name) do update set
               last_synced_at = excluded.last_synced_at,
               updated_at = now()",
            quote_ident(WATERMARK_TABLE)
        );
        sqlx::query(&sql)
            .bind(table)
            .bind(synced_at)
            .execute(&mut self.conn)
            .await
            .map_err(|e| TidemarkError::Watermark(e.to_string()))?;

        tracing::info!(table, watermark = %synced_at, "watermark updated");
        Ok(())
    }

    async fn upsert_batch(
        &mut self,
        table: &str,
        records: &[SourceRecord],
        mapping: &FieldMapping,
        keys: &[String],
    ) -> TidemarkResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let target = QualifiedTable::parse(table);
        let columns = mapping.target_columns();
        let sql = upsert_statement(&target, &columns, keys);

        let rows = upsert_rows(records, mapping, keys);
        let payload = Value::Array(rows.into_iter().map(Value::Object).collect());

        let upserted = self.execute_batch(&sql, payload).await?;
        tracing::debug!(table, upserted, "batch upserted");
        Ok(upserted)
    }

    async fn delete_by_keys(
        &mut self,
        table: &str,
        records: &[SourceRecord],
        mapping: &FieldMapping,
        keys: &[String],
    ) -> TidemarkResult<u64> {
        let rows = key_rows(records, mapping, keys);
        if rows.is_empty() {
            return Ok(0);
        }
        if rows.len() < records.len() {
            tracing::warn!(
                table,
                skipped = records.len() - rows.len(),
                "deleted records without a resolvable key were ignored"
            );
        }

        let target = QualifiedTable::parse(table);
        let sql = delete_statement(&target, keys);
        let payload = Value::Array(rows.into_iter().map(Value::Object).collect());

        let deleted = self.execute_batch(&sql, payload).await?;
        tracing::debug!(table, deleted, "batch deleted");
        Ok(deleted)
    }

    async fn record_count(&mut self, table: &str) -> TidemarkResult<i64> {
        let target = QualifiedTable::parse(table);
        let row = sqlx::query(&count_statement(&target))
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| TidemarkError::Database(e.to_string()))?;
        Ok(row.get::<i64, _>("cnt"))
    }
}
