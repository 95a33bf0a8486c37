//! In-memory object store
//!
//! Used by the test suite and for dry runs. Besides plain storage it can
//! inject faults per locator, tamper with written bytes, and count calls.

use super::{ByteChunks, ListPage, MultipartUpload, ObjectMeta, ObjectStore, RewriteProgress};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use ferry_common::{checksum, ObjectLocator};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_LIST_PAGE: usize = 1000;
const STREAM_CHUNK: usize = 64 * 1024;

/// Failure injected for every call touching a locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    Permanent,
    /// The call panics
    Panic,
}

#[derive(Debug, Clone, Copy)]
struct FaultEntry {
    fault: Fault,
    /// Calls left to fail; `None` fails forever
    remaining: Option<u32>,
}

type Tamper = Arc<dyn Fn(&str, &mut Vec<u8>) + Send + Sync>;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    /// Objects assembled from parts have no plain MD5, like S3 multipart ETags
    md5: Option<String>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    /// Partially rewritten targets
    rewrites: HashMap<String, Vec<u8>>,
    faults: HashMap<String, FaultEntry>,
    /// Faults raised only when an upload to the locator completes
    completion_faults: HashMap<String, Fault>,
    calls: HashMap<String, u64>,
    aborted_uploads: HashMap<String, u64>,
}

#[derive(Clone)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<State>>,
    tamper: Option<Tamper>,
    list_page_size: usize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            tamper: None,
            list_page_size: DEFAULT_LIST_PAGE,
        }
    }

    pub fn with_list_page_size(mut self, size: usize) -> Self {
        self.list_page_size = size.max(1);
        self
    }

    /// Rewrite bytes on their way into the store (puts and completed uploads)
    pub fn with_tamper<F>(mut self, tamper: F) -> Self
    where
        F: Fn(&str, &mut Vec<u8>) + Send + Sync + 'static,
    {
        self.tamper = Some(Arc::new(tamper));
        self
    }

    /// Fail every call touching `locator`
    pub fn fail_always(&self, locator: &str, fault: Fault) {
        self.lock().faults.insert(
            locator.to_string(),
            FaultEntry {
                fault,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` calls touching `locator`
    pub fn fail_times(&self, locator: &str, fault: Fault, times: u32) {
        self.lock().faults.insert(
            locator.to_string(),
            FaultEntry {
                fault,
                remaining: Some(times),
            },
        );
    }

    /// Fail multipart uploads to `locator` when they complete
    pub fn fail_completion(&self, locator: &str, fault: Fault) {
        self.lock().completion_faults.insert(locator.to_string(), fault);
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.faults.clear();
        state.completion_faults.clear();
    }

    /// Multipart uploads to `locator` that were aborted
    pub fn aborted_uploads(&self, locator: &str) -> u64 {
        self.lock().aborted_uploads.get(locator).copied().unwrap_or(0)
    }

    /// Calls that touched `locator`, failed ones included
    pub fn calls(&self, locator: &str) -> u64 {
        self.lock().calls.get(locator).copied().unwrap_or(0)
    }

    /// Insert an object directly, bypassing faults and tampering
    pub fn insert(&self, locator: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let md5 = Some(checksum::md5_hex(&data));
        self.lock()
            .objects
            .insert(locator.to_string(), StoredObject { data, md5 });
    }

    pub fn contents(&self, locator: &str) -> Option<Bytes> {
        self.lock().objects.get(locator).map(|o| o.data.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count the call and apply any fault registered for `locator`
    fn touch(&self, locator: &str) -> StoreResult<()> {
        let fault = {
            let mut state = self.lock();
            *state.calls.entry(locator.to_string()).or_default() += 1;

            match state.faults.get_mut(locator) {
                Some(entry) => {
                    let fault = entry.fault;
                    match entry.remaining.as_mut() {
                        Some(0) => None,
                        Some(n) => {
                            *n -= 1;
                            Some(fault)
                        }
                        None => Some(fault),
                    }
                }
                None => None,
            }
        };

        match fault {
            None => Ok(()),
            Some(fault) => raise(fault, locator),
        }
    }

    fn store(&self, locator: &str, data: Vec<u8>, md5_known: bool) {
        let mut data = data;
        if let Some(tamper) = &self.tamper {
            tamper(locator, &mut data);
        }
        let md5 = md5_known.then(|| checksum::md5_hex(&data));
        self.lock().objects.insert(
            locator.to_string(),
            StoredObject {
                data: Bytes::from(data),
                md5,
            },
        );
    }

    fn object(&self, locator: &str) -> StoreResult<StoredObject> {
        self.lock()
            .objects
            .get(locator)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(locator.to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, locator: &ObjectLocator) -> StoreResult<Bytes> {
        let key = locator.to_string();
        self.touch(&key)?;
        Ok(self.object(&key)?.data)
    }

    async fn get_stream(&self, locator: &ObjectLocator) -> StoreResult<ByteChunks> {
        let data = self.get(locator).await?;
        let chunks: Vec<StoreResult<Bytes>> = (0..data.len())
            .step_by(STREAM_CHUNK)
            .map(|start| Ok(data.slice(start..(start + STREAM_CHUNK).min(data.len()))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn put(&self, locator: &ObjectLocator, data: Bytes) -> StoreResult<()> {
        let key = locator.to_string();
        self.touch(&key)?;
        self.store(&key, data.to_vec(), true);
        Ok(())
    }

    async fn delete(&self, locator: &ObjectLocator) -> StoreResult<()> {
        let key = locator.to_string();
        self.touch(&key)?;
        self.lock().objects.remove(&key);
        Ok(())
    }

    async fn head(&self, locator: &ObjectLocator) -> StoreResult<Option<ObjectMeta>> {
        let key = locator.to_string();
        self.touch(&key)?;
        Ok(self.lock().objects.get(&key).map(|o| ObjectMeta {
            size: o.data.len() as u64,
            md5: o.md5.clone(),
        }))
    }

    async fn list(&self, prefix: &ObjectLocator, token: Option<&str>) -> StoreResult<ListPage> {
        let prefix_key = prefix.to_string();
        self.touch(&prefix_key)?;

        let state = self.lock();
        let start = match token {
            Some(after) => std::ops::Bound::Excluded(after.to_string()),
            None => std::ops::Bound::Included(prefix_key.clone()),
        };
        let mut keys = state
            .objects
            .range((start, std::ops::Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(&prefix_key));

        let mut locators = Vec::new();
        let mut last = None;
        for key in keys.by_ref().take(self.list_page_size) {
            locators.push(ObjectLocator::parse(key).map_err(|e| StoreError::Permanent(e.to_string()))?);
            last = Some(key.clone());
        }
        let next_token = if keys.next().is_some() { last } else { None };

        Ok(ListPage {
            locators,
            next_token,
        })
    }

    async fn copy(&self, source: &ObjectLocator, target: &ObjectLocator) -> StoreResult<()> {
        let (src, dst) = (source.to_string(), target.to_string());
        self.touch(&src)?;
        self.touch(&dst)?;
        let object = self.object(&src)?;
        self.store(&dst, object.data.to_vec(), true);
        Ok(())
    }

    async fn rewrite(
        &self,
        source: &ObjectLocator,
        target: &ObjectLocator,
        token: Option<&str>,
        max_bytes: u64,
    ) -> StoreResult<RewriteProgress> {
        let (src, dst) = (source.to_string(), target.to_string());
        self.touch(&src)?;
        self.touch(&dst)?;
        let object = self.object(&src)?;
        let total = object.data.len() as u64;
        let max_bytes = max_bytes.max(1);

        let offset = match token {
            None if total <= max_bytes => {
                self.store(&dst, object.data.to_vec(), true);
                return Ok(RewriteProgress {
                    token: None,
                    bytes_rewritten: total,
                    total_bytes: total,
                });
            }
            None => {
                self.lock().rewrites.insert(dst.clone(), Vec::new());
                0
            }
            Some(token) => token
                .parse::<u64>()
                .map_err(|_| StoreError::Permanent(format!("invalid rewrite token '{}'", token)))?,
        };

        let end = total.min(offset + max_bytes);
        let finished = {
            let mut state = self.lock();
            let partial = state
                .rewrites
                .get_mut(&dst)
                .ok_or_else(|| StoreError::NotFound(format!("no rewrite in progress for {}", dst)))?;
            if partial.len() as u64 != offset {
                return Err(StoreError::Permanent(format!(
                    "rewrite token offset {} does not match progress {}",
                    offset,
                    partial.len()
                )));
            }
            partial.extend_from_slice(&object.data[offset as usize..end as usize]);
            if end == total {
                state.rewrites.remove(&dst)
            } else {
                None
            }
        };

        if let Some(data) = finished {
            self.store(&dst, data, false);
            return Ok(RewriteProgress {
                token: None,
                bytes_rewritten: total,
                total_bytes: total,
            });
        }

        Ok(RewriteProgress {
            token: Some(end.to_string()),
            bytes_rewritten: end,
            total_bytes: total,
        })
    }

    async fn abort_rewrite(&self, target: &ObjectLocator, _token: &str) -> StoreResult<()> {
        self.lock().rewrites.remove(&target.to_string());
        Ok(())
    }

    async fn start_upload(&self, locator: &ObjectLocator) -> StoreResult<Box<dyn MultipartUpload>> {
        let key = locator.to_string();
        self.touch(&key)?;
        Ok(Box::new(MemoryUpload {
            store: self.clone(),
            key,
            data: Vec::new(),
        }))
    }
}

fn raise(fault: Fault, locator: &str) -> StoreResult<()> {
    match fault {
        Fault::Transient => Err(StoreError::Transient(format!("injected fault on {}", locator))),
        Fault::Permanent => Err(StoreError::Permanent(format!("injected fault on {}", locator))),
        Fault::Panic => panic!("injected panic on {}", locator),
    }
}

struct MemoryUpload {
    store: MemoryObjectStore,
    key: String,
    data: Vec<u8>,
}

#[async_trait]
impl MultipartUpload for MemoryUpload {
    async fn put_part(&mut self, data: Bytes) -> StoreResult<()> {
        self.store.touch(&self.key)?;
        self.data.extend_from_slice(&data);
        Ok(())
    }

    async fn complete(&mut self) -> StoreResult<()> {
        self.store.touch(&self.key)?;
        let fault = self.store.lock().completion_faults.get(&self.key).copied();
        if let Some(fault) = fault {
            return raise(fault, &self.key);
        }
        let data = std::mem::take(&mut self.data);
        self.store.store(&self.key, data, false);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        *self.store.lock().aborted_uploads.entry(self.key.clone()).or_default() += 1;
        Ok(())
    }
}
