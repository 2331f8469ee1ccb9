//! In-memory HTTP cache
//!
//! Useful for tests and for embedders that want the fetch pipeline without
//! touching the disk.

use std::collections::HashMap;

use parking_lot::Mutex;
use url::Url;

use crate::paths::Destination;

use super::metadata::CachedUrlMetadata;
use super::{verify_checksum, CacheEntry, CacheError, HeadersMap, HttpCache};

#[derive(Debug, Default)]
pub struct MemoryHttpCache {
    entries: Mutex<HashMap<(String, Destination), CacheEntry>>,
}

impl MemoryHttpCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(url: &Url, destination: Destination) -> (String, Destination) {
        let mut url = url.clone();
        url.set_fragment(None);
        (url.to_string(), destination)
    }
}

impl HttpCache for MemoryHttpCache {
    fn contains(&self, url: &Url, destination: Destination) -> bool {
        self.entries
            .lock()
            .contains_key(&Self::key(url, destination))
    }

    fn get(
        &self,
        url: &Url,
        destination: Destination,
        maybe_checksum: Option<&str>,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let entry = self.entries.lock().get(&Self::key(url, destination)).cloned();
        match entry {
            Some(entry) => {
                if let Some(expected) = maybe_checksum {
                    verify_checksum(url, &entry.content, expected)?;
                }
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn get_headers(
        &self,
        url: &Url,
        destination: Destination,
    ) -> Result<Option<HeadersMap>, CacheError> {
        Ok(self
            .entries
            .lock()
            .get(&Self::key(url, destination))
            .map(|entry| entry.metadata.headers.clone()))
    }

    fn set(
        &self,
        url: &Url,
        destination: Destination,
        headers: HeadersMap,
        content: &[u8],
    ) -> Result<(), CacheError> {
        self.entries.lock().insert(
            Self::key(url, destination),
            CacheEntry {
                metadata: CachedUrlMetadata::new(url, headers, destination),
                content: content.to_vec(),
            },
        );
        Ok(())
    }

    fn read_modified_time(
        &self,
        _url: &Url,
        _destination: Destination,
    ) -> Result<Option<u64>, CacheError> {
        Ok(None)
    }
}
