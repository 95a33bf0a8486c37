//! Ferry Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Ferry workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and its result alias
//! - **Checksums**: MD5 digests in the encodings object stores report them in
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Types**: [`ObjectLocator`], the canonical `scheme://bucket/key` address
//!
//! # Example
//!
//! ```
//! use ferry_common::{checksum, ObjectLocator};
//!
//! let locator: ObjectLocator = "s3://archive/series/1.dcm".parse().unwrap();
//! assert_eq!(locator.bucket(), "archive");
//! assert_eq!(checksum::md5_hex(b"test"), "098f6bcd4621d373cade4e832627b4f6");
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use types::ObjectLocator;
