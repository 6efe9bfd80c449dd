use crate::error::{DbError, Result};
use std::fmt;
use std::path::PathBuf;

/// Parsed dedup store URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupStoreUrl {
    /// `sqlite:<path>` or `sqlite://<path>`
    Sqlite(PathBuf),
    /// `sqlite::memory:`
    SqliteMemory,
    /// `postgres://...` / `postgresql://...`
    Postgres(String),
}

impl DedupStoreUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == "sqlite::memory:" || raw == "sqlite://:memory:" {
            return Ok(Self::SqliteMemory);
        }
        if let Some(rest) = raw.strip_prefix("sqlite:") {
            let rest = rest.strip_prefix("//").unwrap_or(rest);
            // Connection parameters are owned by the store, drop any the user passed.
            let path = rest.split('?').next().unwrap_or_default().trim();
            if path.is_empty() {
                return Err(DbError::invalid_url(format!("sqlite URL missing path: {raw}")));
            }
            return Ok(Self::Sqlite(PathBuf::from(path)));
        }
        if raw.starts_with("postgres://") || raw.starts_with("postgresql://") {
            return Ok(Self::Postgres(raw.to_string()));
        }
        Err(DbError::invalid_url(format!("Unsupported dedup store URL: {raw}")))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Sqlite(_) | Self::SqliteMemory => "sqlite",
            Self::Postgres(_) => "postgres",
        }
    }
}

impl fmt::Display for DedupStoreUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(path) => write!(f, "sqlite:{}", path.display()),
            Self::SqliteMemory => write!(f, "sqlite::memory:"),
            // Never print credentials.
            Self::Postgres(conn) => match conn.split_once('@') {
                Some((_, host)) => write!(f, "postgres://***@{host}"),
                None => write!(f, "{conn}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sqlite_variants() {
        assert_eq!(
            DedupStoreUrl::parse("sqlite:/tmp/dedup.sqlite").unwrap(),
            DedupStoreUrl::Sqlite(PathBuf::from("/tmp/dedup.sqlite"))
        );
        assert_eq!(
            DedupStoreUrl::parse("sqlite:///tmp/dedup.sqlite?mode=rwc").unwrap(),
            DedupStoreUrl::Sqlite(PathBuf::from("/tmp/dedup.sqlite"))
        );
        assert_eq!(
            DedupStoreUrl::parse("sqlite::memory:").unwrap(),
            DedupStoreUrl::SqliteMemory
        );
        assert!(DedupStoreUrl::parse("sqlite:").is_err());
    }

    #[test]
    fn test_parse_postgres_and_redact() {
        let url = DedupStoreUrl::parse("postgresql://vf:secret@db:5432/vitalflow").unwrap();
        assert_eq!(url.backend_name(), "postgres");
        assert_eq!(url.to_string(), "postgres://***@db:5432/vitalflow");
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        let err = DedupStoreUrl::parse("redis://localhost").unwrap_err();
        assert!(matches!(err, DbError::InvalidUrl(_)));
    }
}
