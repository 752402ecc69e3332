use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use super::{validate_bucket, validate_key, ObjectStore};
use crate::error::StorageError;

/// In-process object store with fault injection.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<(String, String), Vec<u8>>>,
    fail_puts: AtomicBool,
    fail_reads: AtomicBool,
    put_delay: RwLock<Option<Duration>>,
    put_attempts: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put` fail with `Unavailable`.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent `get` and `list` fail with `Unavailable`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delays every `put` before it stores anything.
    pub fn set_put_delay(&self, delay: Option<Duration>) {
        *self.put_delay.write().unwrap_or_else(|p| p.into_inner()) = delay;
    }

    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.objects
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .filter(|(b, _)| b == bucket)
            .count()
    }

    fn check_reads(&self) -> Result<(), StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        self.put_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.put_delay.read().unwrap_or_else(|p| p.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected put failure".to_string()));
        }

        self.objects
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.check_reads()?;
        self.objects
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.check_reads()?;
        // BTreeMap iteration is already in (bucket, key) order.
        Ok(self
            .objects
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.objects
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_listing_order() {
        let store = MemoryObjectStore::new();
        store.put("out", "resultados/b.csv", b"b".to_vec()).await.unwrap();
        store.put("out", "resultados/a.csv", b"a".to_vec()).await.unwrap();
        store.put("in", "facturas/x.pdf", b"x".to_vec()).await.unwrap();

        assert_eq!(store.get("out", "resultados/a.csv").await.unwrap(), b"a");
        assert_eq!(
            store.list("out", "resultados/").await.unwrap(),
            vec!["resultados/a.csv", "resultados/b.csv"]
        );
        assert_eq!(store.object_count("in"), 1);
    }

    #[tokio::test]
    async fn test_injected_put_failure_stores_nothing() {
        let store = MemoryObjectStore::new();
        store.set_fail_puts(true);

        let result = store.put("in", "facturas/x.pdf", b"x".to_vec()).await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert!(!store.contains("in", "facturas/x.pdf"));
        assert_eq!(store.put_attempts(), 1);
    }

    #[tokio::test]
    async fn test_injected_read_failure() {
        let store = MemoryObjectStore::new();
        store.set_fail_reads(true);
        assert!(store.list("out", "").await.is_err());
    }
}
