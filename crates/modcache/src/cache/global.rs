//! Global HTTP cache
//!
//! The shared, hash-keyed store under `<root>/remote/`. Entries are a
//! content file named by the URL hash plus a `.metadata.json` sidecar.

use std::path::PathBuf;

use url::Url;

use crate::fs_util;
use crate::paths::{url_to_filename, Destination, UnsupportedUrlError};

use super::metadata::{self, CachedUrlMetadata};
use super::{verify_checksum, CacheEntry, CacheError, HeadersMap, HttpCache};

/// The canonical URL-hash-keyed store.
///
/// Read-only mode is determined once at construction by probing whether the
/// root directory can be created; all mutations short-circuit silently
/// afterwards.
#[derive(Debug)]
pub struct GlobalHttpCache {
    root: PathBuf,
    read_only: bool,
}

impl GlobalHttpCache {
    /// Create a store at an absolute `root`, probing write permission.
    pub fn new(root: PathBuf) -> Self {
        assert!(root.is_absolute());
        let read_only = fs_util::probe_read_only(&root);
        Self { root, read_only }
    }

    /// Create a store that never writes, regardless of permissions.
    pub fn new_read_only(root: PathBuf) -> Self {
        assert!(root.is_absolute());
        Self {
            root,
            read_only: true,
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Absolute path of the content file for a cache key.
    pub fn entry_file_path(
        &self,
        url: &Url,
        destination: Destination,
    ) -> Result<PathBuf, UnsupportedUrlError> {
        Ok(self.root.join(url_to_filename(url, destination)?))
    }
}

impl HttpCache for GlobalHttpCache {
    fn contains(&self, url: &Url, destination: Destination) -> bool {
        let Ok(content_path) = self.entry_file_path(url, destination) else {
            return false;
        };
        fs_util::exists_file(&content_path)
    }

    fn get(
        &self,
        url: &Url,
        destination: Destination,
        maybe_checksum: Option<&str>,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let content_path = self.entry_file_path(url, destination)?;
        let Some(metadata) = metadata::read_metadata(&metadata::metadata_path(&content_path))?
        else {
            return Ok(None);
        };
        let Some(content) = fs_util::read_file_bytes(&content_path)? else {
            return Ok(None);
        };
        if let Some(expected) = maybe_checksum {
            verify_checksum(url, &content, expected)?;
        }
        Ok(Some(CacheEntry { metadata, content }))
    }

    fn get_headers(
        &self,
        url: &Url,
        destination: Destination,
    ) -> Result<Option<HeadersMap>, CacheError> {
        let content_path = self.entry_file_path(url, destination)?;
        Ok(
            metadata::read_metadata(&metadata::metadata_path(&content_path))?
                .map(|metadata| metadata.headers),
        )
    }

    fn set(
        &self,
        url: &Url,
        destination: Destination,
        headers: HeadersMap,
        content: &[u8],
    ) -> Result<(), CacheError> {
        if self.read_only {
            return Ok(());
        }
        let content_path = self.entry_file_path(url, destination)?;
        // sidecar first: a crash between the two renames must never leave
        // content without headers
        metadata::write_metadata(
            &metadata::metadata_path(&content_path),
            &CachedUrlMetadata::new(url, headers, destination),
        )?;
        fs_util::atomic_write_file(&content_path, content, fs_util::CACHE_PERM)?;
        Ok(())
    }

    fn read_modified_time(
        &self,
        url: &Url,
        destination: Destination,
    ) -> Result<Option<u64>, CacheError> {
        let content_path = self.entry_file_path(url, destination)?;
        Ok(fs_util::mtime_seconds(&content_path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache(temp: &TempDir) -> GlobalHttpCache {
        GlobalHttpCache::new(temp.path().join("remote"))
    }

    fn headers(pairs: &[(&str, &str)]) -> HeadersMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let url = Url::parse("https://deno.land/std/http/file_server.ts").unwrap();
        let stored_headers = headers(&[("content-type", "application/typescript")]);

        cache
            .set(&url, Destination::Script, stored_headers.clone(), b"export {}")
            .unwrap();

        let entry = cache.get(&url, Destination::Script, None).unwrap().unwrap();
        assert_eq!(entry.content, b"export {}");
        assert_eq!(entry.metadata.headers, stored_headers);
        assert_eq!(entry.metadata.url, url.as_str());
        assert!(cache.contains(&url, Destination::Script));
    }

    #[test]
    fn test_fragment_maps_to_same_entry() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let url = Url::parse("https://deno.land/mod.ts").unwrap();
        let with_fragment = Url::parse("https://deno.land/mod.ts#part").unwrap();

        cache
            .set(&url, Destination::Script, HeadersMap::new(), b"body")
            .unwrap();

        let entry = cache
            .get(&with_fragment, Destination::Script, None)
            .unwrap()
            .unwrap();
        assert_eq!(entry.content, b"body");
    }

    #[test]
    fn test_destinations_are_disjoint() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let url = Url::parse("https://deno.land/data.json").unwrap();

        cache
            .set(&url, Destination::Script, HeadersMap::new(), b"script view")
            .unwrap();

        assert!(cache.get(&url, Destination::Json, None).unwrap().is_none());
        assert!(cache.get(&url, Destination::Script, None).unwrap().is_some());
    }

    #[test]
    fn test_checksum_verification() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let url = Url::parse("https://deno.land/mod.ts").unwrap();
        cache
            .set(&url, Destination::Script, HeadersMap::new(), b"body")
            .unwrap();

        let digest = crate::paths::checksum(b"body");
        assert!(cache
            .get(&url, Destination::Script, Some(&digest))
            .unwrap()
            .is_some());
        // uppercase digests compare equal
        assert!(cache
            .get(&url, Destination::Script, Some(&digest.to_uppercase()))
            .unwrap()
            .is_some());

        let err = cache
            .get(&url, Destination::Script, Some("invalid"))
            .unwrap_err();
        assert!(matches!(err, CacheError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_read_only_set_is_silent() {
        let temp = TempDir::new().unwrap();
        let cache = GlobalHttpCache::new_read_only(temp.path().join("remote"));
        let url = Url::parse("https://deno.land/mod.ts").unwrap();

        cache
            .set(&url, Destination::Script, HeadersMap::new(), b"body")
            .unwrap();

        assert!(!cache.contains(&url, Destination::Script));
        assert!(!temp.path().join("remote").exists());
    }

    #[test]
    fn test_sidecar_written_next_to_content() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let url = Url::parse("https://deno.land/mod.ts").unwrap();

        cache
            .set(&url, Destination::Script, HeadersMap::new(), b"body")
            .unwrap();

        let content_path = cache.entry_file_path(&url, Destination::Script).unwrap();
        assert!(content_path.is_file());
        assert!(metadata::metadata_path(&content_path).is_file());
    }

    #[test]
    fn test_get_headers_does_not_require_content() {
        let temp = TempDir::new().unwrap();
        let cache = cache(&temp);
        let url = Url::parse("https://deno.land/mod.ts").unwrap();
        let stored_headers = headers(&[("etag", "\"v1\"")]);

        cache
            .set(&url, Destination::Script, stored_headers.clone(), b"body")
            .unwrap();

        let loaded = cache.get_headers(&url, Destination::Script).unwrap().unwrap();
        assert_eq!(loaded, stored_headers);
    }
}
