//! In-process object store with fault injection for tests.

use crate::error::{StoreError, StoreResult};
use crate::store::ObjectStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

type Objects = BTreeMap<(String, String), Vec<u8>>;

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<Objects>,
    /// Puts whose key ends with one of these suffixes fail
    failing_put_suffixes: Mutex<Vec<String>>,
    unavailable: AtomicBool,
    puts: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, Objects> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed an object without going through fault injection.
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.objects()
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    /// Make every later `put` for a key ending with `suffix` fail.
    pub fn fail_puts_ending_with(&self, suffix: impl Into<String>) {
        self.failing_put_suffixes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(suffix.into());
    }

    /// Toggle whole-store unavailability (every call fails).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Successful puts so far.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        self.check_available()?;
        self.objects()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(bucket, key))
    }

    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> StoreResult<()> {
        self.check_available()?;
        let injected = self
            .failing_put_suffixes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|suffix| key.ends_with(suffix.as_str()));
        if injected {
            return Err(StoreError::Unavailable(format!(
                "injected put failure for {}/{}",
                bucket, key
            )));
        }
        self.objects()
            .insert((bucket.to_string(), key.to_string()), data.to_vec());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self
            .objects()
            .remove(&(bucket.to_string(), key.to_string()))
            .is_some())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_available()?;
        Ok(self
            .objects()
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn exists(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self
            .objects()
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }
}
