// mysqlbackuptool/src/storage/mod.rs
pub(crate) mod s3;
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncRead;

use crate::errors::Result;

pub use s3::S3ObjectStore;

/// One entry of a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
}

/// One page of a paginated listing. `next` carries the continuation token
/// when more pages remain and is `None` on the last page.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub objects: Vec<StoredObject>,
    pub next: Option<String>,
}

/// The object storage operations the backup run needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists one page of objects under `prefix`, resuming from `continuation` if given.
    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ListingPage>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Uploads everything `body` yields until end-of-stream. Returns the bytes stored.
    async fn upload_stream(&self, key: &str, body: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64>;

    /// Uploads an already materialized file. Returns the bytes stored.
    async fn upload_file(&self, key: &str, path: &Path) -> Result<u64>;

    /// Human readable location used in log lines, e.g. `s3://bucket`.
    fn location(&self) -> String;
}
