//! Shared domain types

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Object Locators
// ============================================================================

/// Address of an object (or a key prefix) in an object store.
///
/// The canonical form is `scheme://bucket/key`. The key may be empty, which
/// addresses the bucket root when the locator is used as a listing prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectLocator {
    scheme: String,
    bucket: String,
    key: String,
}

impl ObjectLocator {
    pub fn new(
        scheme: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self> {
        let scheme = scheme.into();
        let bucket = bucket.into();
        let key = key.into();
        let display = format!("{}://{}/{}", scheme, bucket, key);

        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-') {
            return Err(CommonError::invalid_locator(display, "scheme must be alphanumeric"));
        }
        if bucket.is_empty() || bucket.contains('/') {
            return Err(CommonError::invalid_locator(display, "bucket must be non-empty and contain no '/'"));
        }
        if key.contains('\n') || key.contains('\r') {
            return Err(CommonError::invalid_locator(display, "key contains a line break"));
        }

        Ok(Self { scheme, bucket, key })
    }

    /// Parse `scheme://bucket/key`
    pub fn parse(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| CommonError::invalid_locator(s, "missing '://'"))?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        Self::new(scheme, bucket, key)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Locator for `key` in the same bucket
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            scheme: self.scheme.clone(),
            bucket: self.bucket.clone(),
            key: key.into(),
        }
    }

    /// Whether this locator falls under `prefix` (same bucket, key starts with prefix key)
    pub fn starts_with(&self, prefix: &ObjectLocator) -> bool {
        self.scheme == prefix.scheme && self.bucket == prefix.bucket && self.key.starts_with(&prefix.key)
    }

    /// Key relative to `prefix`, without a leading '/'
    ///
    /// Returns `None` when the locator is not under `prefix`.
    pub fn relative_to<'a>(&'a self, prefix: &ObjectLocator) -> Option<&'a str> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(self.key[prefix.key.len()..].trim_start_matches('/'))
    }

    /// Last path segment of the key
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

impl FromStr for ObjectLocator {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectLocator {
    type Error = CommonError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ObjectLocator> for String {
    fn from(locator: ObjectLocator) -> Self {
        locator.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let loc = ObjectLocator::parse("s3://bucket/a/b/c.dcm").unwrap();
        assert_eq!(loc.scheme(), "s3");
        assert_eq!(loc.bucket(), "bucket");
        assert_eq!(loc.key(), "a/b/c.dcm");
        assert_eq!(loc.to_string(), "s3://bucket/a/b/c.dcm");
        assert_eq!(loc.file_name(), "c.dcm");
    }

    #[test]
    fn test_bucket_root() {
        let loc = ObjectLocator::parse("s3://bucket").unwrap();
        assert_eq!(loc.key(), "");
        assert_eq!(loc.to_string(), "s3://bucket/");
        assert_eq!(ObjectLocator::parse("s3://bucket/").unwrap(), loc);
    }

    #[test]
    fn test_invalid_locators() {
        assert!(ObjectLocator::parse("bucket/key").is_err());
        assert!(ObjectLocator::parse("s3:///key").is_err());
        assert!(ObjectLocator::parse("://bucket/key").is_err());
        assert!(ObjectLocator::parse("s3://bucket/line\nbreak").is_err());
    }

    #[test]
    fn test_relative_to() {
        let prefix = ObjectLocator::parse("s3://src/series/1.2.3").unwrap();
        let member = ObjectLocator::parse("s3://src/series/1.2.3/instance-1.dcm").unwrap();
        assert_eq!(member.relative_to(&prefix), Some("instance-1.dcm"));

        let other = ObjectLocator::parse("s3://dst/series/1.2.3/instance-1.dcm").unwrap();
        assert_eq!(other.relative_to(&prefix), None);
    }

    #[test]
    fn test_serde_as_string() {
        let loc = ObjectLocator::parse("gs://b/k").unwrap();
        let json = serde_json::to_string(&loc).unwrap();
        assert_eq!(json, "\"gs://b/k\"");
        let back: ObjectLocator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, loc);
    }
}
