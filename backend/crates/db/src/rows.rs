//! Mapping of source records into target rows.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tidemark_common::mapping::FieldMapping;
use tidemark_common::record::SourceRecord;

/// Map a record through the field mapping into a row keyed by target column.
pub fn map_record(record: &SourceRecord, mapping: &FieldMapping) -> Map<String, Value> {
    mapping
        .iter()
        .map(|(source, column)| (column.to_string(), record.resolve(source)))
        .collect()
}

/// Map a batch for upsert, collapsing rows that share a key.
///
/// The last occurrence of a key wins and rows keep their original relative
/// order, so the result matches applying the records one by one.
pub fn upsert_rows(
    records: &[SourceRecord],
    mapping: &FieldMapping,
    keys: &[String],
) -> Vec<Map<String, Value>> {
    let mut seen = HashSet::new();
    let mut rows: Vec<Map<String, Value>> = records
        .iter()
        .rev()
        .map(|r| map_record(r, mapping))
        .filter(|row| seen.insert(key_signature(row, keys)))
        .collect();
    rows.reverse();
    rows
}

/// Resolve the key tuple of each record for a delete.
///
/// Records with any unresolved (missing or null) key value are dropped.
pub fn key_rows(
    records: &[SourceRecord],
    mapping: &FieldMapping,
    keys: &[String],
) -> Vec<Map<String, Value>> {
    records
        .iter()
        .filter_map(|record| {
            let mut row = Map::with_capacity(keys.len());
            for key in keys {
                let value = mapping
                    .source_for(key)
                    .map(|source| record.resolve(source))
                    .unwrap_or(Value::Null);
                if value.is_null() {
                    return None;
                }
                row.insert(key.clone(), value);
            }
            Some(row)
        })
        .collect()
}

fn key_signature(row: &Map<String, Value>, keys: &[String]) -> String {
    let values: Vec<&Value> = keys
        .iter()
        .map(|k| row.get(k).unwrap_or(&Value::Null))
        .collect();
    serde_json::to_string(&values).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> SourceRecord {
        SourceRecord::from(value)
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn map_record_resolves_dotted_paths() {
        let mapping = FieldMapping::new([("Id", "id"), ("Account.Name", "account_name")]);
        let row = map_record(
            &record(json!({"Id": "003", "Account": {"Name": "Acme"}})),
            &mapping,
        );
        assert_eq!(row.get("id"), Some(&json!("003")));
        assert_eq!(row.get("account_name"), Some(&json!("Acme")));
    }

    #[test]
    fn map_record_yields_null_for_null_relationship() {
        let mapping = FieldMapping::new([("Id", "id"), ("Account.Name", "account_name")]);
        let row = map_record(&record(json!({"Id": "003", "Account": null})), &mapping);
        assert_eq!(row.get("account_name"), Some(&Value::Null));
    }

    #[test]
    fn upsert_rows_keeps_last_occurrence_of_duplicate_key() {
        let mapping = FieldMapping::new([("Id", "id"), ("Status__c", "status")]);
        let records = vec![
            record(json!({"Id": "a", "Status__c": "old"})),
            record(json!({"Id": "b", "Status__c": "only"})),
            record(json!({"Id": "a", "Status__c": "new"})),
        ];
        let rows = upsert_rows(&records, &mapping, &keys(&["id"]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&json!("b")));
        assert_eq!(rows[1].get("id"), Some(&json!("a")));
        assert_eq!(rows[1].get("status"), Some(&json!("new")));
    }

    #[test]
    fn upsert_rows_distinguishes_composite_keys() {
        let mapping = FieldMapping::new([("Order__c", "order_id"), ("Line__c", "line_no")]);
        let records = vec![
            record(json!({"Order__c": "o1", "Line__c": 1})),
            record(json!({"Order__c": "o1", "Line__c": 2})),
        ];
        let rows = upsert_rows(&records, &mapping, &keys(&["order_id", "line_no"]));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn key_rows_skips_records_with_unresolved_key() {
        let mapping = FieldMapping::new([("Id", "id"), ("Name", "name")]);
        let records = vec![
            record(json!({"Id": "a", "IsDeleted": true})),
            record(json!({"Name": "no id", "IsDeleted": true})),
            record(json!({"Id": null, "IsDeleted": true})),
        ];
        let rows = key_rows(&records, &mapping, &keys(&["id"]));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&json!("a")));
        assert!(rows[0].get("name").is_none());
    }

    #[test]
    fn key_rows_requires_every_composite_key_part() {
        let mapping = FieldMapping::new([("Order__c", "order_id"), ("Line__c", "line_no")]);
        let records = vec![record(json!({"Order__c": "o1"}))];
        let rows = key_rows(&records, &mapping, &keys(&["order_id", "line_no"]));
        assert!(rows.is_empty());
    }
}
