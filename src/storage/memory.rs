// In-memory object store used by the unit tests.
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{ListingPage, ObjectStore, StoredObject};
use crate::errors::{BackupError, Result};

/// Keys are kept ordered; a continuation token is the last key of the previous
/// page, so deleting while paginating never skips entries.
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    page_size: usize,
    fail_uploads: bool,
    fail_deletes: bool,
    fail_listing: bool,
    short_uploads: bool,
    deleted: Mutex<Vec<String>>,
    delete_attempts: Mutex<usize>,
    pages_served: Mutex<usize>,
}

impl MemoryObjectStore {
    pub fn new(page_size: usize) -> Self {
        MemoryObjectStore {
            objects: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
            fail_uploads: false,
            fail_deletes: false,
            fail_listing: false,
            short_uploads: false,
            deleted: Mutex::new(Vec::new()),
            delete_attempts: Mutex::new(0),
            pages_served: Mutex::new(0),
        }
    }

    /// A store whose uploads read part of the body and then fail.
    pub fn failing_uploads() -> Self {
        MemoryObjectStore { fail_uploads: true, ..Self::new(1000) }
    }

    /// A store that lists normally but refuses every delete.
    pub fn failing_deletes(page_size: usize, keys: &[&str]) -> Self {
        let store = MemoryObjectStore { fail_deletes: true, ..Self::new(page_size) };
        store.insert_all(keys);
        store
    }

    /// A store whose listing requests always fail.
    pub fn failing_listing(keys: &[&str]) -> Self {
        let store = MemoryObjectStore { fail_listing: true, ..Self::new(1000) };
        store.insert_all(keys);
        store
    }

    /// A store that keeps the whole body but reports one byte less than it read.
    pub fn short_counting_uploads() -> Self {
        MemoryObjectStore { short_uploads: true, ..Self::new(1000) }
    }

    pub fn with_keys(page_size: usize, keys: &[&str]) -> Self {
        let store = Self::new(page_size);
        store.insert_all(keys);
        store
    }

    fn insert_all(&self, keys: &[&str]) {
        for key in keys {
            self.insert(key, b"-- dump\n".to_vec());
        }
    }

    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), data);
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn pages_served(&self) -> usize {
        *self.pages_served.lock().unwrap()
    }

    pub fn delete_attempts(&self) -> usize {
        *self.delete_attempts.lock().unwrap()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ListingPage> {
        *self.pages_served.lock().unwrap() += 1;
        if self.fail_listing {
            return Err(BackupError::Storage("listing denied".to_string()));
        }
        let objects = self.objects.lock().unwrap();
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.as_ref().is_none_or(|token| key.as_str() > token.as_str()))
            .map(|(key, data)| StoredObject { key: key.clone(), size: data.len() as u64 });

        let page: Vec<StoredObject> = matching.by_ref().take(self.page_size).collect();
        let more = matching.next().is_some();
        let next = if more { page.last().map(|o| o.key.clone()) } else { None };
        Ok(ListingPage { objects: page, next })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        *self.delete_attempts.lock().unwrap() += 1;
        if self.fail_deletes {
            return Err(BackupError::Storage("denied".to_string()));
        }
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn upload_stream(&self, key: &str, body: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let mut data = Vec::new();
        if self.fail_uploads {
            let mut chunk = [0u8; 16];
            let _ = body.read(&mut chunk).await?;
            return Err(BackupError::Transfer("injected upload failure".to_string()));
        }
        body.read_to_end(&mut data).await?;
        let len = data.len() as u64;
        self.insert(key, data);
        if self.short_uploads {
            return Ok(len.saturating_sub(1));
        }
        Ok(len)
    }

    async fn upload_file(&self, key: &str, path: &Path) -> Result<u64> {
        if self.fail_uploads {
            return Err(BackupError::Transfer("injected upload failure".to_string()));
        }
        let data = tokio::fs::read(path).await?;
        let len = data.len() as u64;
        self.insert(key, data);
        Ok(len)
    }

    fn location(&self) -> String {
        "memory://test".to_string()
    }
}
