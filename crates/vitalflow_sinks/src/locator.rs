//! `(bucket, key)` addressing for payload objects.

use crate::error::{StoreError, StoreResult};
use std::fmt;
use std::str::FromStr;

const SCHEMES: [&str; 3] = ["s3://", "gs://", "file://"];

/// Location of one payload object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocator {
    pub bucket: String,
    pub key: String,
}

impl StorageLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse `bucket/key`, optionally prefixed with `s3://`, `gs://` or `file://`.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let trimmed = raw.trim();
        let rest = SCHEMES
            .iter()
            .find_map(|scheme| trimmed.strip_prefix(scheme))
            .unwrap_or(trimmed);
        let rest = rest.trim_start_matches('/');
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| StoreError::InvalidLocator(raw.to_string()))?;
        let key = key.trim_start_matches('/');
        if bucket.is_empty() || key.is_empty() || key.ends_with('/') {
            return Err(StoreError::InvalidLocator(raw.to_string()));
        }
        Ok(Self::new(bucket, key))
    }

    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

impl FromStr for StorageLocator {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
