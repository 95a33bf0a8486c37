//! Object store abstraction
//!
//! Operations talk to storage only through [`ObjectStore`]. Errors are
//! classified at the adapter boundary into [`StoreError`] so the retry layer
//! never has to inspect SDK types.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use ferry_common::ObjectLocator;
use futures::stream::BoxStream;

pub mod config;
pub mod memory;
pub mod s3;

pub use config::StorageConfig;
pub use memory::{Fault, MemoryObjectStore};
pub use s3::S3ObjectStore;

/// Stream of object body chunks
pub type ByteChunks = BoxStream<'static, StoreResult<Bytes>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    /// Lowercase hex MD5, when the store knows it
    pub md5: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub locators: Vec<ObjectLocator>,
    /// `None` on the last page
    pub next_token: Option<String>,
}

/// Progress of one chunked rewrite call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteProgress {
    /// Pass back to continue; `None` once the copy is complete
    pub token: Option<String>,
    pub bytes_rewritten: u64,
    pub total_bytes: u64,
}

impl RewriteProgress {
    pub fn is_done(&self) -> bool {
        self.token.is_none()
    }
}

/// An in-progress multipart upload
#[async_trait]
pub trait MultipartUpload: Send {
    /// Upload the next part; parts are numbered in call order
    async fn put_part(&mut self, data: Bytes) -> StoreResult<()>;

    /// Commit all parts as one object; on failure the upload can still be aborted
    async fn complete(&mut self) -> StoreResult<()>;

    /// Discard all parts
    async fn abort(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, locator: &ObjectLocator) -> StoreResult<Bytes>;

    async fn get_stream(&self, locator: &ObjectLocator) -> StoreResult<ByteChunks>;

    async fn put(&self, locator: &ObjectLocator, data: Bytes) -> StoreResult<()>;

    /// Delete an object; an absent object is not an error
    async fn delete(&self, locator: &ObjectLocator) -> StoreResult<()>;

    async fn head(&self, locator: &ObjectLocator) -> StoreResult<Option<ObjectMeta>>;

    async fn exists(&self, locator: &ObjectLocator) -> StoreResult<bool> {
        Ok(self.head(locator).await?.is_some())
    }

    /// One page of object locators under `prefix`, in key order
    async fn list(&self, prefix: &ObjectLocator, token: Option<&str>) -> StoreResult<ListPage>;

    /// Server-side copy in a single request
    async fn copy(&self, source: &ObjectLocator, target: &ObjectLocator) -> StoreResult<()>;

    /// Copy up to `max_bytes` more of `source` into `target`
    ///
    /// Start with `token = None` and call again with the returned token until
    /// it comes back empty.
    async fn rewrite(
        &self,
        source: &ObjectLocator,
        target: &ObjectLocator,
        token: Option<&str>,
        max_bytes: u64,
    ) -> StoreResult<RewriteProgress>;

    /// Discard a rewrite that will not be continued
    async fn abort_rewrite(&self, _target: &ObjectLocator, _token: &str) -> StoreResult<()> {
        Ok(())
    }

    async fn start_upload(&self, locator: &ObjectLocator) -> StoreResult<Box<dyn MultipartUpload>>;
}

/// Every locator under `prefix`, following continuation tokens
pub async fn list_all(
    store: &dyn ObjectStore,
    prefix: &ObjectLocator,
) -> StoreResult<Vec<ObjectLocator>> {
    let mut locators = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = store.list(prefix, token.as_deref()).await?;
        locators.extend(page.locators);
        match page.next_token {
            Some(next) if token.as_deref() == Some(next.as_str()) => {
                return Err(StoreError::Permanent(format!(
                    "listing of {} returned the same continuation token twice",
                    prefix
                )));
            }
            Some(next) => token = Some(next),
            None => return Ok(locators),
        }
    }
}
