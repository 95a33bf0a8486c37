//! Streaming archive creation
//!
//! Every object under the unit's source prefix becomes one stored zip entry.
//! Member bodies stream from the store through [`ZipStreamWriter`] into a
//! multipart upload, one part buffered at a time. After the upload completes
//! the archive is read back with the `zip` crate, which checks each entry's
//! CRC, and every entry's MD5 is compared with the digest taken while
//! streaming the source.

use super::zipstream::{ZipError, ZipStreamWriter, MAX_ENTRIES};
use super::Outcome;
use crate::error::TransferError;
use crate::store::{list_all, MultipartUpload, ObjectStore};
use crate::types::WorkUnit;
use bytes::Bytes;
use chrono::{NaiveDateTime, Utc};
use ferry_common::checksum::{self, Md5Stream};
use ferry_common::ObjectLocator;
use futures::TryStreamExt;
use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Bytes per multipart upload part
    pub part_bytes: u64,
    /// Entry timestamp; current time when `None`
    pub timestamp: Option<NaiveDateTime>,
}

struct Member {
    locator: ObjectLocator,
    name: String,
}

impl From<ZipError> for TransferError {
    fn from(err: ZipError) -> Self {
        TransferError::fatal(format!("Archive error: {}", err))
    }
}

pub(super) async fn create(
    store: &dyn ObjectStore,
    unit: &WorkUnit,
    options: &ArchiveOptions,
) -> Result<Outcome, TransferError> {
    let prefix = unit.source_locator()?;
    let target = unit.required_target()?;

    let members = collect_members(store, &prefix, &target).await?;
    debug!(unit_id = %unit.id, members = members.len(), "Archiving prefix");

    let timestamp = options.timestamp.unwrap_or_else(|| Utc::now().naive_utc());
    let part_bytes = usize::try_from(options.part_bytes)
        .map_err(|_| TransferError::fatal("archive part size does not fit in memory"))?
        .max(1);

    let mut upload = store.start_upload(&target).await?;
    let written = stream_members(store, &members, timestamp, part_bytes, upload.as_mut()).await;
    let (digests, bytes) = match written {
        Ok(written) => written,
        Err(err) => {
            abort_upload(upload, &unit.id).await;
            return Err(err);
        }
    };
    if let Err(err) = upload.complete().await {
        abort_upload(upload, &unit.id).await;
        return Err(err.into());
    }

    if let Err(err) = verify(store, &target, &digests).await {
        if !err.is_retryable() {
            warn!(unit_id = %unit.id, target = %target, error = %err, "Archive failed verification, deleting it");
            if let Err(delete_err) = store.delete(&target).await {
                warn!(unit_id = %unit.id, error = %delete_err, "Failed to delete corrupt archive");
            }
        }
        return Err(err);
    }

    info!(unit_id = %unit.id, entries = digests.len(), bytes, "Archive created and verified");
    Ok(Outcome::Archived {
        entries: digests.len(),
        bytes,
    })
}

async fn abort_upload(upload: Box<dyn MultipartUpload>, unit_id: &str) {
    if let Err(err) = upload.abort().await {
        warn!(unit_id = %unit_id, error = %err, "Failed to abort archive upload");
    }
}

async fn collect_members(
    store: &dyn ObjectStore,
    prefix: &ObjectLocator,
    target: &ObjectLocator,
) -> Result<Vec<Member>, TransferError> {
    let mut locators = list_all(store, prefix).await?;
    locators.retain(|locator| locator != target);
    locators.sort();

    if locators.is_empty() {
        return Err(TransferError::fatal(format!("No objects to archive under {}", prefix)));
    }
    if locators.len() > MAX_ENTRIES {
        return Err(TransferError::fatal(format!(
            "{} objects under {} exceed the zip32 limit of {} entries",
            locators.len(),
            prefix,
            MAX_ENTRIES
        )));
    }

    let mut names = HashSet::new();
    let mut members = Vec::with_capacity(locators.len());
    for locator in locators {
        let name = match locator.relative_to(prefix) {
            Some(relative) if !relative.is_empty() => relative.to_string(),
            _ => locator.file_name().to_string(),
        };
        if !names.insert(name.clone()) {
            return Err(TransferError::fatal(format!("Duplicate archive entry name '{}'", name)));
        }
        members.push(Member { locator, name });
    }
    Ok(members)
}

/// Write every member into the upload; returns entry name to MD5 and total bytes
async fn stream_members(
    store: &dyn ObjectStore,
    members: &[Member],
    timestamp: NaiveDateTime,
    part_bytes: usize,
    upload: &mut dyn MultipartUpload,
) -> Result<(BTreeMap<String, String>, u64), TransferError> {
    let mut writer = ZipStreamWriter::new(timestamp);
    let mut digests = BTreeMap::new();

    for member in members {
        writer.start_entry(&member.name)?;
        let mut md5 = Md5Stream::new();
        let mut body = store.get_stream(&member.locator).await?;

        while let Some(chunk) = body.try_next().await? {
            md5.update(&chunk);
            writer.write(&chunk)?;
            while writer.buffered() >= part_bytes {
                upload.put_part(Bytes::from(writer.take_part(part_bytes))).await?;
            }
        }

        let summary = writer.finish_entry()?;
        debug!(entry = %member.name, size = summary.size, crc = summary.crc, "Archived member");
        digests.insert(member.name.clone(), md5.finish());
    }

    let buffered = writer.buffered() as u64;
    let emitted = writer.bytes_written();
    let mut tail = writer.finish()?;
    let total = emitted + (tail.len() as u64 - buffered);
    while !tail.is_empty() {
        let rest = tail.split_off(part_bytes.min(tail.len()));
        upload.put_part(Bytes::from(std::mem::replace(&mut tail, rest))).await?;
    }

    Ok((digests, total))
}

/// Read the archive back and compare every entry with its source digest
async fn verify(
    store: &dyn ObjectStore,
    target: &ObjectLocator,
    expected: &BTreeMap<String, String>,
) -> Result<(), TransferError> {
    let data = store.get(target).await?;
    let found = tokio::task::spawn_blocking(move || read_digests(data))
        .await
        .map_err(|e| TransferError::fatal(format!("Archive verification task failed: {}", e)))??;

    let missing: Vec<_> = expected.keys().filter(|name| !found.contains_key(*name)).collect();
    let extra: Vec<_> = found.keys().filter(|name| !expected.contains_key(*name)).collect();
    if !missing.is_empty() || !extra.is_empty() {
        return Err(TransferError::fatal(format!(
            "Archive {} entries differ from source: missing {:?}, unexpected {:?}",
            target, missing, extra
        )));
    }

    for (name, digest) in expected {
        let actual = found.get(name).map(String::as_str).unwrap_or_default();
        checksum::verify_md5(digest, actual).map_err(|e| {
            TransferError::fatal(format!(
                "Archive {} entry '{}' does not match its source: {}",
                target, name, e
            ))
        })?;
    }
    Ok(())
}

fn read_digests(data: Bytes) -> Result<BTreeMap<String, String>, TransferError> {
    let corrupt = |e: &dyn std::fmt::Display| TransferError::fatal(format!("Archive is corrupt: {}", e));

    let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(|e| corrupt(&e))?;
    let mut digests = BTreeMap::new();
    let mut buf = vec![0u8; 64 * 1024];

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| corrupt(&e))?;
        let name = entry.name().to_string();
        let mut md5 = Md5Stream::new();
        loop {
            // the reader checks the entry CRC when it reaches the end
            let n = entry.read(&mut buf).map_err(|e| corrupt(&e))?;
            if n == 0 {
                break;
            }
            md5.update(&buf[..n]);
        }
        digests.insert(name, md5.finish());
    }
    Ok(digests)
}
