//! DDL for the processing-record table.
//!
//! Both backends share one layout; only the column types differ.

/// Default table name.
pub(crate) const RECORDS_TABLE: &str = "vf_processing_records";

pub(crate) fn sqlite_ddl(table: &str) -> [String; 2] {
    [
        format!(
            r#"CREATE TABLE IF NOT EXISTS {table} (
                correlation_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                first_seen_at INTEGER NOT NULL,
                last_updated_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )"#
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_expires ON {table}(expires_at)"),
    ]
}

pub(crate) fn postgres_ddl(table: &str) -> [String; 2] {
    let index_name = format!("idx_{}_expires", table.replace('.', "_"));
    [
        format!(
            r#"CREATE TABLE IF NOT EXISTS {table} (
                correlation_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                first_seen_at BIGINT NOT NULL,
                last_updated_at BIGINT NOT NULL,
                expires_at BIGINT NOT NULL
            )"#
        ),
        format!("CREATE INDEX IF NOT EXISTS {index_name} ON {table}(expires_at)"),
    ]
}

/// Accept `name` or `schema.name` made of `[A-Za-z0-9_]`.
///
/// Table names are interpolated into SQL, so anything else is rejected.
pub(crate) fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return false;
    }
    parts.iter().all(|part| {
        !part.is_empty()
            && !part.starts_with(|c: char| c.is_ascii_digit())
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}
