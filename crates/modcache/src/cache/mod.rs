//! HTTP cache storage
//!
//! Two on-disk backends share one interface: the hash-keyed global store
//! and the path-decoded vendor overlay. An in-memory implementation backs
//! tests and embedders that want the fetch pipeline without disk.

pub mod global;
pub mod local;
pub mod memory;
pub mod metadata;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use crate::paths::{checksum, Destination, UnsupportedUrlError};
use metadata::CachedUrlMetadata;

/// Response headers stored with a cache entry, keyed by lowercase name.
pub type HeadersMap = HashMap<String, String>;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache path could not be derived from the URL
    #[error(transparent)]
    UnsupportedUrl(#[from] UnsupportedUrlError),

    /// Malformed metadata sidecar or manifest
    #[error("Failed to parse cache metadata: {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Integrity failure
    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: Url,
        expected: String,
        actual: String,
    },
}

/// A cached response: its sidecar metadata plus the content bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub metadata: CachedUrlMetadata,
    pub content: Vec<u8>,
}

impl CacheEntry {
    /// A redirect record carries a `location` header and an empty body.
    pub fn is_redirect(&self) -> bool {
        self.metadata.is_redirect()
    }
}

/// Storage interface shared by the global, local and in-memory caches.
pub trait HttpCache: Send + Sync + fmt::Debug {
    /// Whether an entry exists for the pair without reading it.
    fn contains(&self, url: &Url, destination: Destination) -> bool;

    /// Read an entry. When `maybe_checksum` is supplied the content digest
    /// is verified before the entry is returned.
    fn get(
        &self,
        url: &Url,
        destination: Destination,
        maybe_checksum: Option<&str>,
    ) -> Result<Option<CacheEntry>, CacheError>;

    /// Read only the stored response headers.
    fn get_headers(
        &self,
        url: &Url,
        destination: Destination,
    ) -> Result<Option<HeadersMap>, CacheError>;

    /// Persist an entry. A no-op for read-only stores.
    fn set(
        &self,
        url: &Url,
        destination: Destination,
        headers: HeadersMap,
        content: &[u8],
    ) -> Result<(), CacheError>;

    /// Modification time of the stored content in seconds since the epoch.
    fn read_modified_time(
        &self,
        url: &Url,
        destination: Destination,
    ) -> Result<Option<u64>, CacheError>;
}

/// Compare `content` against an expected hex SHA-256 digest,
/// case-insensitively.
pub fn verify_checksum(url: &Url, content: &[u8], expected: &str) -> Result<(), CacheError> {
    let actual = checksum(content);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(CacheError::ChecksumMismatch {
            url: url.clone(),
            expected: expected.to_string(),
            actual,
        })
    }
}

pub(crate) fn is_redirect_headers(headers: &HeadersMap) -> bool {
    headers
        .get("location")
        .map(|location| !location.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_checksum_is_case_insensitive() {
        let url = Url::parse("https://example.com/mod.ts").unwrap();
        let digest = checksum(b"body");
        verify_checksum(&url, b"body", &digest).unwrap();
        verify_checksum(&url, b"body", &digest.to_uppercase()).unwrap();
    }

    #[test]
    fn test_verify_checksum_mismatch() {
        let url = Url::parse("https://example.com/mod.ts").unwrap();
        let err = verify_checksum(&url, b"body", "deadbeef").unwrap_err();
        match err {
            CacheError::ChecksumMismatch { expected, actual, .. } => {
                assert_eq!(expected, "deadbeef");
                assert_eq!(actual, checksum(b"body"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_redirect_headers() {
        let mut headers = HeadersMap::new();
        assert!(!is_redirect_headers(&headers));
        headers.insert("location".to_string(), String::new());
        assert!(!is_redirect_headers(&headers));
        headers.insert("location".to_string(), "https://example.com/".to_string());
        assert!(is_redirect_headers(&headers));
    }
}
