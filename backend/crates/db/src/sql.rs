//! Statement builders for the target store.
//!
//! Whole batches are bound as a single `jsonb` array and expanded server side
//! with `jsonb_populate_recordset(NULL::<table>, $1)`, so column types come from
//! the target table and every statement has exactly one parameter.

use std::fmt;

pub const WATERMARK_TABLE: &str = "sync_watermarks";

const DEFAULT_SCHEMA: &str = "public";

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A target table name, optionally schema-qualified (`schema.table`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedTable {
    pub schema: String,
    pub name: String,
}

impl QualifiedTable {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('.') {
            Some((schema, name)) => Self {
                schema: schema.to_string(),
                name: name.to_string(),
            },
            None => Self {
                schema: DEFAULT_SCHEMA.to_string(),
                name: raw.to_string(),
            },
        }
    }
}

impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Set-oriented upsert for one batch.
///
/// Every non-key column is overwritten on conflict. When all columns are key
/// columns there is nothing to update and the conflict resolves to `do nothing`.
pub fn upsert_statement(table: &QualifiedTable, columns: &[&str], keys: &[String]) -> String {
    let cols = column_list(columns);
    let conflict = keys
        .iter()
        .map(|k| quote_ident(k))
        .collect::<Vec<_>>()
        .join(", ");

    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !keys.iter().any(|k| k == *c))
        .map(|c| {
            let q = quote_ident(c);
            format!("{q} = excluded.{q}")
        })
        .collect();

    let action = if updates.is_empty() {
        "do nothing".to_string()
    } else {
        format!("do update set {}", updates.join(", "))
    };

    format!(
        "insert into {table} ({cols}) \
         select {cols} from jsonb_populate_recordset(null::{table}, $1) \
         on conflict ({conflict}) {action}"
    )
}

/// Delete every row whose composite key appears in the bound key set.
pub fn delete_statement(table: &QualifiedTable, keys: &[String]) -> String {
    let key_cols = keys
        .iter()
        .map(|k| quote_ident(k))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "delete from {table} where ({key_cols}) in \
         (select {key_cols} from jsonb_populate_recordset(null::{table}, $1))"
    )
}

pub fn count_statement(table: &QualifiedTable) -> String {
    format!("select count(*) as cnt from {table}")
}

pub fn create_watermark_table_statement() -> String {
    format!(
        "create table if not exists {} (
           table_name text primary key,
           last_synced_at timestamptz not null,
           updated_at timestamptz not null default now()
         )",
        quote_ident(WATERMARK_TABLE)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_defaults_to_public_schema() {
        let t = QualifiedTable::parse("inventory");
        assert_eq!(t.schema, "public");
        assert_eq!(t.name, "inventory");
        assert_eq!(t.to_string(), "\"public\".\"inventory\"");
    }

    #[test]
    fn parse_schema_qualified_name() {
        let t = QualifiedTable::parse("crm.contacts");
        assert_eq!(t.schema, "crm");
        assert_eq!(t.name, "contacts");
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn upsert_updates_non_key_columns() {
        let t = QualifiedTable::parse("inventory");
        let sql = upsert_statement(&t, &["unique_id", "serial", "status"], &keys(&["unique_id"]));
        assert_eq!(
            sql,
            "insert into \"public\".\"inventory\" (\"unique_id\", \"serial\", \"status\") \
             select \"unique_id\", \"serial\", \"status\" \
             from jsonb_populate_recordset(null::\"public\".\"inventory\", $1) \
             on conflict (\"unique_id\") \
             do update set \"serial\" = excluded.\"serial\", \"status\" = excluded.\"status\""
        );
    }

    #[test]
    fn upsert_with_composite_key() {
        let t = QualifiedTable::parse("lines");
        let sql = upsert_statement(&t, &["order_id", "line_no", "qty"], &keys(&["order_id", "line_no"]));
        assert!(sql.contains("on conflict (\"order_id\", \"line_no\")"), "got: {sql}");
        assert!(sql.ends_with("do update set \"qty\" = excluded.\"qty\""), "got: {sql}");
    }

    #[test]
    fn upsert_with_only_key_columns_does_nothing_on_conflict() {
        let t = QualifiedTable::parse("links");
        let sql = upsert_statement(&t, &["a_id", "b_id"], &keys(&["a_id", "b_id"]));
        assert!(sql.ends_with("on conflict (\"a_id\", \"b_id\") do nothing"), "got: {sql}");
        assert!(!sql.contains("do update set"));
    }

    #[test]
    fn delete_matches_on_key_tuple() {
        let t = QualifiedTable::parse("lines");
        let sql = delete_statement(&t, &keys(&["order_id", "line_no"]));
        assert_eq!(
            sql,
            "delete from \"public\".\"lines\" where (\"order_id\", \"line_no\") in \
             (select \"order_id\", \"line_no\" \
             from jsonb_populate_recordset(null::\"public\".\"lines\", $1))"
        );
    }

    #[test]
    fn count_statement_quotes_table() {
        let t = QualifiedTable::parse("crm.contacts");
        assert_eq!(
            count_statement(&t),
            "select count(*) as cnt from \"crm\".\"contacts\""
        );
    }
}
