//! S3 object store (AWS or any S3-compatible endpoint such as MinIO)
//!
//! Chunked rewrites are emulated with a multipart upload fed by
//! `UploadPartCopy`; the continuation token carries the upload id, the copy
//! offset, and the ETags of the parts copied so far.

use super::{ByteChunks, ListPage, MultipartUpload, ObjectMeta, ObjectStore, RewriteProgress, StorageConfig};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{http::HttpResponse, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bytes::Bytes;
use ferry_common::{checksum, ObjectLocator};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

const SCHEME: &str = "s3";
const MAX_PARTS: u64 = 10_000;

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn new(config: StorageConfig) -> anyhow::Result<Self> {
        debug!(endpoint = ?config.endpoint, region = %config.region, "Initializing S3 client");

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials = Credentials::new(access_key, secret_key, None, None, "ferry-storage");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(Region::new(config.region.clone()))
            }
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        builder = builder.force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!(endpoint = ?config.endpoint, "S3 object store initialized");
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    async fn head_meta(&self, locator: &ObjectLocator) -> StoreResult<Option<ObjectMeta>> {
        let (bucket, key) = split(locator)?;
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(out) => Ok(Some(ObjectMeta {
                size: out.content_length().unwrap_or(0).max(0) as u64,
                md5: out.e_tag().and_then(etag_md5),
            })),
            Err(err) => match classify(err, locator) {
                StoreError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
        locator: &ObjectLocator,
    ) -> StoreResult<()> {
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(|e| classify(e, locator))?;
        Ok(())
    }
}

/// Bucket and key of an `s3://` locator
fn split(locator: &ObjectLocator) -> StoreResult<(&str, &str)> {
    if locator.scheme() != SCHEME {
        return Err(StoreError::Permanent(format!(
            "unsupported scheme '{}' for {}",
            locator.scheme(),
            locator
        )));
    }
    Ok((locator.bucket(), locator.key()))
}

/// `x-amz-copy-source` value: bucket plus URL-encoded key segments
fn copy_source(locator: &ObjectLocator) -> String {
    let key: Vec<_> = locator
        .key()
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{}/{}", locator.bucket(), key.join("/"))
}

/// MD5 from an ETag, unless it belongs to a multipart object
fn etag_md5(etag: &str) -> Option<String> {
    let etag = etag.trim_matches('"');
    if etag.contains('-') {
        return None;
    }
    checksum::normalize_md5(etag).ok()
}

fn classify<E>(err: SdkError<E, HttpResponse>, locator: &ObjectLocator) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err.code().map(str::to_string);
    let message = format!("{}: {}", locator, DisplayErrorContext(&err));

    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => StoreError::Transient(message),
        SdkError::ConstructionFailure(_) => StoreError::Permanent(message),
        _ => classify_response(status, code.as_deref(), message),
    }
}

fn classify_response(status: Option<u16>, code: Option<&str>, message: String) -> StoreError {
    match (status, code) {
        (_, Some("NoSuchKey" | "NotFound" | "NoSuchUpload")) | (Some(404), _) => {
            StoreError::NotFound(message)
        }
        (_, Some("SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable" | "Throttling")) => {
            StoreError::Transient(message)
        }
        (Some(429), _) | (Some(500..=599), _) => StoreError::Transient(message),
        // No HTTP response at all: connection dropped mid-flight
        (None, _) => StoreError::Transient(message),
        _ => StoreError::Permanent(message),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RewriteState {
    upload_id: String,
    offset: u64,
    total: u64,
    parts: Vec<(i32, String)>,
}

impl RewriteState {
    fn encode(&self) -> StoreResult<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| StoreError::Permanent(format!("failed to encode rewrite token: {}", e)))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    fn decode(token: &str) -> StoreResult<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| StoreError::Permanent(format!("invalid rewrite token: {}", e)))?;
        serde_json::from_slice(&json)
            .map_err(|e| StoreError::Permanent(format!("invalid rewrite token: {}", e)))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self), fields(locator = %locator))]
    async fn get(&self, locator: &ObjectLocator) -> StoreResult<Bytes> {
        let (bucket, key) = split(locator)?;
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, locator))?;

        let data = out
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Transient(format!("{}: failed to read body: {}", locator, e)))?
            .into_bytes();

        debug!(bytes = data.len(), "Downloaded object");
        Ok(data)
    }

    async fn get_stream(&self, locator: &ObjectLocator) -> StoreResult<ByteChunks> {
        let (bucket, key) = split(locator)?;
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, locator))?;

        let name = locator.to_string();
        let chunks = stream::try_unfold((out.body, name), |(mut body, name)| async move {
            match body.next().await {
                Some(Ok(chunk)) => Ok(Some((chunk, (body, name)))),
                Some(Err(e)) => Err(StoreError::Transient(format!("{}: body stream failed: {}", name, e))),
                None => Ok(None),
            }
        });
        Ok(chunks.boxed())
    }

    #[instrument(skip(self, data), fields(locator = %locator, bytes = data.len()))]
    async fn put(&self, locator: &ObjectLocator, data: Bytes) -> StoreResult<()> {
        let (bucket, key) = split(locator)?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify(e, locator))?;
        Ok(())
    }

    #[instrument(skip(self), fields(locator = %locator))]
    async fn delete(&self, locator: &ObjectLocator) -> StoreResult<()> {
        let (bucket, key) = split(locator)?;
        match self.client.delete_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(()),
            Err(err) => match classify(err, locator) {
                StoreError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn head(&self, locator: &ObjectLocator) -> StoreResult<Option<ObjectMeta>> {
        self.head_meta(locator).await
    }

    async fn list(&self, prefix: &ObjectLocator, token: Option<&str>) -> StoreResult<ListPage> {
        let (bucket, key) = split(prefix)?;
        let out = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(key)
            .set_continuation_token(token.map(str::to_string))
            .send()
            .await
            .map_err(|e| classify(e, prefix))?;

        let locators = out
            .contents()
            .iter()
            .filter_map(|object| object.key())
            .map(|key| prefix.with_key(key))
            .collect();

        let next_token = match out.is_truncated() {
            Some(true) => out.next_continuation_token().map(str::to_string),
            _ => None,
        };

        Ok(ListPage {
            locators,
            next_token,
        })
    }

    #[instrument(skip(self), fields(source = %source, target = %target))]
    async fn copy(&self, source: &ObjectLocator, target: &ObjectLocator) -> StoreResult<()> {
        split(source)?;
        let (bucket, key) = split(target)?;
        self.client
            .copy_object()
            .copy_source(copy_source(source))
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, source))?;
        Ok(())
    }

    #[instrument(skip(self, token), fields(source = %source, target = %target))]
    async fn rewrite(
        &self,
        source: &ObjectLocator,
        target: &ObjectLocator,
        token: Option<&str>,
        max_bytes: u64,
    ) -> StoreResult<RewriteProgress> {
        split(source)?;
        let (bucket, key) = split(target)?;
        let max_bytes = max_bytes.max(1);

        let mut state = match token {
            Some(token) => RewriteState::decode(token)?,
            None => {
                let meta = self
                    .head_meta(source)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(source.to_string()))?;

                if meta.size <= max_bytes {
                    self.copy(source, target).await?;
                    return Ok(RewriteProgress {
                        token: None,
                        bytes_rewritten: meta.size,
                        total_bytes: meta.size,
                    });
                }
                if meta.size.div_ceil(max_bytes) > MAX_PARTS {
                    return Err(StoreError::Permanent(format!(
                        "{} needs more than {} parts at {} bytes per rewrite",
                        source, MAX_PARTS, max_bytes
                    )));
                }

                let out = self
                    .client
                    .create_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| classify(e, target))?;
                let upload_id = out
                    .upload_id()
                    .ok_or_else(|| StoreError::Permanent(format!("{}: no upload id returned", target)))?
                    .to_string();

                RewriteState {
                    upload_id,
                    offset: 0,
                    total: meta.size,
                    parts: Vec::new(),
                }
            }
        };

        let end = state.total.min(state.offset + max_bytes);
        let part_number = state.parts.len() as i32 + 1;
        let out = self
            .client
            .upload_part_copy()
            .bucket(bucket)
            .key(key)
            .upload_id(&state.upload_id)
            .part_number(part_number)
            .copy_source(copy_source(source))
            .copy_source_range(format!("bytes={}-{}", state.offset, end - 1))
            .send()
            .await
            .map_err(|e| classify(e, source))?;

        let etag = out
            .copy_part_result()
            .and_then(|r| r.e_tag())
            .ok_or_else(|| StoreError::Permanent(format!("{}: part copy returned no ETag", target)))?
            .to_string();
        state.parts.push((part_number, etag));
        state.offset = end;

        if state.offset < state.total {
            return Ok(RewriteProgress {
                token: Some(state.encode()?),
                bytes_rewritten: state.offset,
                total_bytes: state.total,
            });
        }

        let parts = state
            .parts
            .iter()
            .map(|(n, etag)| CompletedPart::builder().part_number(*n).e_tag(etag).build())
            .collect();
        self.complete_upload(bucket, key, &state.upload_id, parts, target).await?;

        Ok(RewriteProgress {
            token: None,
            bytes_rewritten: state.total,
            total_bytes: state.total,
        })
    }

    async fn abort_rewrite(&self, target: &ObjectLocator, token: &str) -> StoreResult<()> {
        let (bucket, key) = split(target)?;
        let state = RewriteState::decode(token)?;
        match self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&state.upload_id)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => match classify(err, target) {
                StoreError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn start_upload(&self, locator: &ObjectLocator) -> StoreResult<Box<dyn MultipartUpload>> {
        let (bucket, key) = split(locator)?;
        let out = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, locator))?;
        let upload_id = out
            .upload_id()
            .ok_or_else(|| StoreError::Permanent(format!("{}: no upload id returned", locator)))?
            .to_string();

        debug!(locator = %locator, upload_id = %upload_id, "Started multipart upload");
        Ok(Box::new(S3Upload {
            store: self.clone(),
            locator: locator.clone(),
            upload_id,
            parts: Vec::new(),
        }))
    }
}

struct S3Upload {
    store: S3ObjectStore,
    locator: ObjectLocator,
    upload_id: String,
    parts: Vec<CompletedPart>,
}

#[async_trait]
impl MultipartUpload for S3Upload {
    async fn put_part(&mut self, data: Bytes) -> StoreResult<()> {
        let part_number = self.parts.len() as i32 + 1;
        let out = self
            .store
            .client
            .upload_part()
            .bucket(self.locator.bucket())
            .key(self.locator.key())
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify(e, &self.locator))?;

        let etag = out
            .e_tag()
            .ok_or_else(|| StoreError::Permanent(format!("{}: part upload returned no ETag", self.locator)))?;
        self.parts
            .push(CompletedPart::builder().part_number(part_number).e_tag(etag).build());
        Ok(())
    }

    async fn complete(&mut self) -> StoreResult<()> {
        if self.parts.is_empty() {
            self.put_part(Bytes::new()).await?;
        }
        let parts = std::mem::take(&mut self.parts);
        self.store
            .complete_upload(
                self.locator.bucket(),
                self.locator.key(),
                &self.upload_id,
                parts,
                &self.locator,
            )
            .await?;
        debug!(locator = %self.locator, "Completed multipart upload");
        Ok(())
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        let result = self
            .store
            .client
            .abort_multipart_upload()
            .bucket(self.locator.bucket())
            .key(self.locator.key())
            .upload_id(&self.upload_id)
            .send()
            .await;
        if let Err(err) = result {
            let err = classify(err, &self.locator);
            warn!(locator = %self.locator, error = %err, "Failed to abort multipart upload");
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_source_encodes_key_segments() {
        let loc = ObjectLocator::parse("s3://src/series 1/a+b.dcm").unwrap();
        assert_eq!(copy_source(&loc), "src/series%201/a%2Bb.dcm");
    }

    #[test]
    fn test_etag_md5() {
        assert_eq!(
            etag_md5("\"098F6BCD4621D373CADE4E832627B4F6\"").as_deref(),
            Some("098f6bcd4621d373cade4e832627b4f6")
        );
        assert_eq!(etag_md5("\"d41d8cd98f00b204e9800998ecf8427e-4\""), None);
    }

    #[test]
    fn test_classify_response() {
        let msg = || "m".to_string();
        assert!(matches!(classify_response(Some(404), None, msg()), StoreError::NotFound(_)));
        assert!(matches!(classify_response(Some(400), Some("NoSuchKey"), msg()), StoreError::NotFound(_)));
        assert!(matches!(classify_response(Some(503), Some("SlowDown"), msg()), StoreError::Transient(_)));
        assert!(matches!(classify_response(Some(429), None, msg()), StoreError::Transient(_)));
        assert!(matches!(classify_response(Some(502), None, msg()), StoreError::Transient(_)));
        assert!(matches!(classify_response(None, None, msg()), StoreError::Transient(_)));
        assert!(matches!(classify_response(Some(403), Some("AccessDenied"), msg()), StoreError::Permanent(_)));
    }

    #[test]
    fn test_rewrite_token_round_trip() {
        let state = RewriteState {
            upload_id: "abc".into(),
            offset: 10,
            total: 30,
            parts: vec![(1, "\"etag-1\"".into())],
        };
        let token = state.encode().unwrap();
        assert!(!token.contains('='));
        assert_eq!(RewriteState::decode(&token).unwrap(), state);
        assert!(RewriteState::decode("!!!").is_err());
    }

    #[test]
    fn test_rejects_foreign_scheme() {
        let loc = ObjectLocator::parse("gs://bucket/key").unwrap();
        assert!(matches!(split(&loc), Err(StoreError::Permanent(_))));
    }
}
