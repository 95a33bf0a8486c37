//! MD5 checksum utilities for object verification
//!
//! Object stores report MD5 digests in different encodings: S3 returns hex in
//! the ETag of non-multipart objects, GCS returns base64 in `md5Hash`. All
//! comparisons in Ferry go through [`normalize_md5`] so either form works.

use crate::error::{CommonError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Compute the lowercase hex MD5 of bytes
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Normalize an MD5 digest given as hex (any case) or base64 into lowercase hex
pub fn normalize_md5(value: &str) -> Result<String> {
    let trimmed = value.trim().trim_matches('"');

    if trimmed.len() == 32 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(trimmed.to_ascii_lowercase());
    }

    match STANDARD.decode(trimmed) {
        Ok(bytes) if bytes.len() == 16 => Ok(hex::encode(bytes)),
        _ => Err(CommonError::InvalidChecksum(value.to_string())),
    }
}

/// Compare an expected digest against an actual digest, in any supported encoding
pub fn verify_md5(expected: &str, actual: &str) -> Result<()> {
    let expected = normalize_md5(expected)?;
    let actual = normalize_md5(actual)?;
    if expected == actual {
        Ok(())
    } else {
        Err(CommonError::ChecksumMismatch { expected, actual })
    }
}

/// Incremental MD5 for streamed object bodies
pub struct Md5Stream {
    context: md5::Context,
    bytes: u64,
}

impl Md5Stream {
    pub fn new() -> Self {
        Self {
            context: md5::Context::new(),
            bytes: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.context.consume(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Bytes consumed so far
    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Finish and return the lowercase hex digest
    pub fn finish(self) -> String {
        format!("{:x}", self.context.compute())
    }
}

impl Default for Md5Stream {
    fn default() -> Self {
        Self::new()
    }
}
