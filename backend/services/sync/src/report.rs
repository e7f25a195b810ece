use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a single table sync ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// At least one record fetched, every batch applied, watermark advanced.
    Synced,
    /// Nothing changed since the last watermark.
    UpToDate,
    /// Some changes were applied but the run did not complete cleanly.
    Partial,
    /// Nothing was applied.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub sf_object: String,
    pub pg_table: String,
    pub outcome: SyncOutcome,
    pub error: Option<String>,
    pub fetched: u64,
    pub upserted: u64,
    pub deleted: u64,
    pub batches: u64,
    pub failed_batches: u64,
    pub initial_count: Option<i64>,
    pub final_count: Option<i64>,
    pub net_change: Option<i64>,
    pub previous_watermark: Option<DateTime<Utc>>,
    pub new_watermark: Option<DateTime<Utc>>,
}

impl SyncResult {
    pub fn new(sf_object: &str, pg_table: &str) -> Self {
        Self {
            sf_object: sf_object.to_string(),
            pg_table: pg_table.to_string(),
            outcome: SyncOutcome::Failed,
            error: None,
            fetched: 0,
            upserted: 0,
            deleted: 0,
            batches: 0,
            failed_batches: 0,
            initial_count: None,
            final_count: None,
            net_change: None,
            previous_watermark: None,
            new_watermark: None,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Synced | SyncOutcome::UpToDate)
    }

    pub(crate) fn fail(mut self, error: impl ToString) -> Self {
        self.outcome = SyncOutcome::Failed;
        self.error = Some(error.to_string());
        self
    }

    pub(crate) fn set_counts(&mut self, initial: Option<i64>, final_count: Option<i64>) {
        self.initial_count = initial;
        self.final_count = final_count;
        self.net_change = match (initial, final_count) {
            (Some(before), Some(after)) => Some(after - before),
            _ => None,
        };
    }
}

/// Aggregate of one run over every configured table.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub success: bool,
    pub tables_synced: usize,
    pub results: Vec<SyncResult>,
}

impl RunSummary {
    pub fn from_results(results: Vec<SyncResult>) -> Self {
        Self {
            success: results.iter().all(SyncResult::success),
            tables_synced: results.iter().filter(|r| r.success()).count(),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_change_needs_both_counts() {
        let mut result = SyncResult::new("Account", "accounts");
        result.set_counts(Some(10), Some(14));
        assert_eq!(result.net_change, Some(4));

        result.set_counts(Some(10), None);
        assert_eq!(result.net_change, None);
    }

    #[test]
    fn summary_success_is_and_of_tables() {
        let mut ok = SyncResult::new("Account", "accounts");
        ok.outcome = SyncOutcome::Synced;
        let mut idle = SyncResult::new("Contact", "contacts");
        idle.outcome = SyncOutcome::UpToDate;

        let summary = RunSummary::from_results(vec![ok.clone(), idle]);
        assert!(summary.success);
        assert_eq!(summary.tables_synced, 2);

        let mut partial = SyncResult::new("Lead", "leads");
        partial.outcome = SyncOutcome::Partial;
        let summary = RunSummary::from_results(vec![ok, partial]);
        assert!(!summary.success);
        assert_eq!(summary.tables_synced, 1);
    }

    #[test]
    fn empty_run_is_successful() {
        let summary = RunSummary::from_results(Vec::new());
        assert!(summary.success);
        assert_eq!(summary.tables_synced, 0);
    }

    #[test]
    fn serializes_outcome_in_snake_case() {
        let mut result = SyncResult::new("Account", "accounts");
        result.outcome = SyncOutcome::UpToDate;
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "up_to_date");
        assert_eq!(json["sf_object"], "Account");
        assert!(json["new_watermark"].is_null());
    }
}
