use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidemark_common::error::{TidemarkError, TidemarkResult};
use tidemark_common::mapping::FieldMapping;

pub const DEFAULT_BATCH_SIZE: u32 = 2000;

/// Page size bounds accepted by the source query API.
pub const MIN_PAGE_SIZE: u32 = 200;
pub const MAX_PAGE_SIZE: u32 = 2000;

/// Sync parameters for one source object / target table pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub sf_object: String,
    pub soql_query: String,
    pub pg_table: String,
    pub field_mapping: FieldMapping,
    pub primary_keys: Vec<String>,
    pub batch_size: u32,
}

impl SyncConfig {
    /// Check the mapping and key definition before any I/O happens.
    pub fn validate(&self) -> TidemarkResult<()> {
        if self.batch_size == 0 {
            return Err(TidemarkError::Config(format!(
                "{}: batch_size must be positive",
                self.pg_table
            )));
        }
        if self.field_mapping.is_empty() {
            return Err(TidemarkError::Config(format!(
                "{}: field_mapping is empty",
                self.pg_table
            )));
        }
        if self.primary_keys.is_empty() {
            return Err(TidemarkError::Config(format!(
                "{}: primary_keys is empty",
                self.pg_table
            )));
        }

        let mut seen = HashSet::new();
        for column in self.field_mapping.target_columns() {
            if !seen.insert(column) {
                return Err(TidemarkError::Config(format!(
                    "{}: column '{column}' is mapped more than once",
                    self.pg_table
                )));
            }
        }

        for key in &self.primary_keys {
            if !seen.contains(key.as_str()) {
                return Err(TidemarkError::Config(format!(
                    "{}: key column '{key}' is not produced by field_mapping",
                    self.pg_table
                )));
            }
        }

        Ok(())
    }

    /// Batch size clamped to what the source API accepts as a page size.
    pub fn page_size(&self) -> u32 {
        self.batch_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Deserialize)]
struct TableEntry {
    sf_object: String,
    soql_query: String,
    pg_table: String,
    field_mapping: FieldMapping,
    primary_keys: Vec<String>,
    #[serde(default)]
    batch_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    tables: Vec<Value>,
    #[serde(default)]
    batch_size: Option<u32>,
}

/// Ordered list of tables to sync in one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    pub tables: Vec<SyncConfig>,
    pub batch_size: u32,
}

impl SyncPlan {
    /// Parse the JSON table list.
    ///
    /// Per-table `batch_size` overrides the global one, which defaults to 2000.
    pub fn from_json(raw: &str) -> TidemarkResult<Self> {
        let plan: RawPlan = serde_json::from_str(raw)
            .map_err(|e| TidemarkError::Config(format!("invalid sync plan: {e}")))?;

        let batch_size = plan.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);

        let mut tables = Vec::with_capacity(plan.tables.len());
        for (index, entry) in plan.tables.into_iter().enumerate() {
            let entry: TableEntry = serde_json::from_value(entry).map_err(|e| {
                TidemarkError::Config(format!("tables[{index}] is invalid: {e}"))
            })?;

            tables.push(SyncConfig {
                sf_object: entry.sf_object,
                soql_query: entry.soql_query,
                pg_table: entry.pg_table,
                field_mapping: entry.field_mapping,
                primary_keys: entry.primary_keys,
                batch_size: entry.batch_size.unwrap_or(batch_size),
            });
        }

        if tables.is_empty() {
            return Err(TidemarkError::Config(
                "sync plan contains no tables".to_string(),
            ));
        }

        Ok(Self { tables, batch_size })
    }

    pub fn from_file(path: impl AsRef<Path>) -> TidemarkResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TidemarkError::Config(format!("cannot read sync plan {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "loaded sync plan");
        Self::from_json(&raw)
    }
}
