//! Metadata sidecars
//!
//! Every content file in the global store is paired with a JSON sidecar
//! holding the original request URL and the response headers observed when
//! the entry was written.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::fs_util;
use crate::paths::Destination;

use super::{CacheError, HeadersMap};

/// Sidecar document stored beside a content file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedUrlMetadata {
    /// Original request URL, including any query string
    pub url: String,

    /// Response headers, keyed by lowercase name
    pub headers: HeadersMap,

    /// Destination tag code; omitted for the default script destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<u8>,
}

impl CachedUrlMetadata {
    pub fn new(url: &Url, headers: HeadersMap, destination: Destination) -> Self {
        Self {
            url: url.to_string(),
            headers,
            destination: match destination {
                Destination::Script => None,
                other => Some(other.as_code()),
            },
        }
    }

    /// A redirect record carries a `location` header and an empty body.
    pub fn is_redirect(&self) -> bool {
        super::is_redirect_headers(&self.headers)
    }
}

/// Derive the sidecar path for a content file: the final extension is
/// replaced with `metadata.json`, or the suffix appended when there is none.
pub fn metadata_path(content_path: &Path) -> PathBuf {
    content_path.with_extension("metadata.json")
}

/// Read and parse a sidecar. Absence means the entry is absent; malformed
/// JSON is a [`CacheError::Parse`].
pub fn read_metadata(path: &Path) -> Result<Option<CachedUrlMetadata>, CacheError> {
    let Some(bytes) = fs_util::read_file_bytes(path)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| CacheError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a sidecar with the same atomic protocol as content files.
pub fn write_metadata(path: &Path, metadata: &CachedUrlMetadata) -> Result<(), CacheError> {
    let json = serde_json::to_string_pretty(metadata).expect("metadata is always serializable");
    fs_util::atomic_write_file(path, json.as_bytes(), fs_util::CACHE_PERM)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_metadata_path_replaces_extension() {
        assert_eq!(
            metadata_path(Path::new("/cache/mod.ts")),
            PathBuf::from("/cache/mod.metadata.json")
        );
    }

    #[test]
    fn test_metadata_path_appends_without_extension() {
        assert_eq!(
            metadata_path(Path::new("/cache/d830075280")),
            PathBuf::from("/cache/d830075280.metadata.json")
        );
    }

    #[test]
    fn test_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("entry.metadata.json");
        let url = Url::parse("https://deno.land/std/http/file_server.ts").unwrap();
        let metadata = CachedUrlMetadata::new(
            &url,
            HeadersMap::from([("etag".to_string(), "\"abc\"".to_string())]),
            Destination::Json,
        );

        write_metadata(&path, &metadata).unwrap();
        let loaded = read_metadata(&path).unwrap().unwrap();

        assert_eq!(loaded, metadata);
        assert_eq!(loaded.destination, Some(1));
    }

    #[test]
    fn test_script_destination_is_omitted() {
        let url = Url::parse("https://deno.land/mod.ts").unwrap();
        let metadata = CachedUrlMetadata::new(&url, HeadersMap::new(), Destination::Script);
        let json = serde_json::to_string_pretty(&metadata).unwrap();
        assert!(!json.contains("destination"));
    }

    #[test]
    fn test_absent_sidecar_is_none() {
        let temp = TempDir::new().unwrap();
        let result = read_metadata(&temp.path().join("missing.metadata.json")).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_malformed_sidecar_is_parse_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.metadata.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = read_metadata(&path).unwrap_err();
        assert!(matches!(err, CacheError::Parse { .. }));
    }
}
