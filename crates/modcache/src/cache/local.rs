//! Local vendor cache
//!
//! A project-local, human-readable overlay of the global store, suitable
//! for checking in. The layout reproduces host directory structure
//! (`deno.land/x/oak@v10.5.1/mod.ts`); URL pieces that cannot be decoded
//! into a clean path are replaced with `#`-prefixed hash tokens and the
//! original URL is kept in the vendor manifest.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use url::Url;

use crate::fs_util;
use crate::paths::{base_url_to_filename_parts, checksum, Destination, UnsupportedUrlError};

use super::global::GlobalHttpCache;
use super::metadata::CachedUrlMetadata;
use super::{is_redirect_headers, CacheEntry, CacheError, HeadersMap, HttpCache};

/// Vendor overlay over the global cache.
///
/// Reads prefer the local layout; on a miss a writable overlay copies the
/// entry from the global store. Read-only overlays never touch the disk and
/// never copy.
#[derive(Debug)]
pub struct LocalHttpCache {
    path: PathBuf,
    manifest: manifest::LocalCacheManifest,
    global: Arc<GlobalHttpCache>,
    allow_copy_from_global: bool,
    read_only: bool,
}

impl LocalHttpCache {
    /// Create a writable overlay at an absolute `path`, probing write
    /// permission the same way the global store does.
    pub fn new(path: PathBuf, global: Arc<GlobalHttpCache>) -> Self {
        assert!(path.is_absolute());
        let read_only = fs_util::probe_read_only(&path);
        Self::new_internal(path, global, read_only)
    }

    /// Create an overlay that never writes and never copies from the
    /// global store.
    pub fn new_read_only(path: PathBuf, global: Arc<GlobalHttpCache>) -> Self {
        assert!(path.is_absolute());
        Self::new_internal(path, global, true)
    }

    fn new_internal(path: PathBuf, global: Arc<GlobalHttpCache>, read_only: bool) -> Self {
        let manifest = manifest::LocalCacheManifest::new(path.join("manifest.json"));
        Self {
            path,
            manifest,
            global,
            allow_copy_from_global: !read_only,
            read_only,
        }
    }

    pub fn vendor_root(&self) -> &Path {
        &self.path
    }

    /// Metadata for a vendored URL, copying the header record from the
    /// global store when the overlay may be populated opportunistically.
    fn get_url_metadata(
        &self,
        url: &Url,
        destination: Destination,
    ) -> Result<Option<CachedUrlMetadata>, CacheError> {
        if let Some(metadata) = self.manifest.get_metadata(url) {
            return Ok(Some(metadata));
        }
        if !self.allow_copy_from_global {
            return Ok(None);
        }
        let Some(headers) = self.global.get_headers(url, destination)? else {
            return Ok(None);
        };
        let sub_path = url_to_local_sub_path(url, headers_content_type(&headers))?;
        self.manifest
            .insert(url.clone(), &sub_path, headers, destination);
        Ok(self.manifest.get_metadata(url))
    }
}

impl HttpCache for LocalHttpCache {
    fn contains(&self, url: &Url, _destination: Destination) -> bool {
        self.manifest.get_metadata(url).is_some()
    }

    fn get(
        &self,
        url: &Url,
        destination: Destination,
        maybe_checksum: Option<&str>,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let Some(metadata) = self.get_url_metadata(url, destination)? else {
            return Ok(None);
        };
        if metadata.is_redirect() {
            // redirect records carry no content file
            return Ok(Some(CacheEntry {
                metadata,
                content: Vec::new(),
            }));
        }

        let sub_path = url_to_local_sub_path(url, headers_content_type(&metadata.headers))?;
        let file_path = sub_path.as_path_from_root(&self.path);
        if let Some(content) = fs_util::read_file_bytes(&file_path)? {
            // vendored files are trusted; the checksum argument only guards
            // the copy out of the global store
            return Ok(Some(CacheEntry { metadata, content }));
        }

        if !self.allow_copy_from_global {
            return Ok(None);
        }
        let Some(global_entry) = self.global.get(url, destination, maybe_checksum)? else {
            return Ok(None);
        };
        fs_util::atomic_write_file(&file_path, &global_entry.content, fs_util::CACHE_PERM)?;
        Ok(Some(CacheEntry {
            metadata,
            content: global_entry.content,
        }))
    }

    fn get_headers(
        &self,
        url: &Url,
        destination: Destination,
    ) -> Result<Option<HeadersMap>, CacheError> {
        Ok(self
            .get_url_metadata(url, destination)?
            .map(|metadata| metadata.headers))
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
        let sub_path = url_to_local_sub_path(url, headers_content_type(&headers))?;
        if !is_redirect_headers(&headers) {
            let file_path = sub_path.as_path_from_root(&self.path);
            fs_util::atomic_write_file(&file_path, content, fs_util::CACHE_PERM)?;
        }
        self.manifest.insert(url.clone(), &sub_path, headers, destination);
        Ok(())
    }

    fn read_modified_time(
        &self,
        url: &Url,
        destination: Destination,
    ) -> Result<Option<u64>, CacheError> {
        if let Some(metadata) = self.manifest.get_metadata(url) {
            let sub_path = url_to_local_sub_path(url, headers_content_type(&metadata.headers))?;
            let file_path = sub_path.as_path_from_root(&self.path);
            if let Some(modified) = fs_util::mtime_seconds(&file_path)? {
                return Ok(Some(modified));
            }
        }
        self.global.read_modified_time(url, destination)
    }
}

fn headers_content_type(headers: &HeadersMap) -> Option<&str> {
    headers.get("content-type").map(|value| value.as_str())
}

/// Extensions that are allowed to appear verbatim in the vendored layout.
const KNOWN_EXTENSIONS: [&str; 8] = [
    ".js", ".ts", ".jsx", ".tsx", ".mts", ".mjs", ".json", ".wasm",
];

fn media_type_extension(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    match essence.as_str() {
        "application/typescript" | "text/typescript" | "application/x-typescript" => Some(".ts"),
        "application/javascript"
        | "text/javascript"
        | "application/ecmascript"
        | "text/ecmascript" => Some(".js"),
        "application/json" | "text/json" => Some(".json"),
        "application/wasm" => Some(".wasm"),
        "text/jsx" => Some(".jsx"),
        "text/tsx" => Some(".tsx"),
        _ => None,
    }
}

/// Extension the vendored file should end with, derived from the response
/// content type first and the URL path second. Extensionless modules
/// default to `.ts`.
fn extension_for(url: &Url, content_type: Option<&str>) -> &'static str {
    if let Some(ext) = content_type.and_then(media_type_extension) {
        return ext;
    }
    let path = url.path().to_lowercase();
    for ext in KNOWN_EXTENSIONS {
        if path.ends_with(ext) {
            return ext;
        }
    }
    ".ts"
}

pub(crate) struct LocalCacheSubPath {
    pub has_hash: bool,
    pub parts: Vec<String>,
}

impl LocalCacheSubPath {
    pub fn as_path_from_root(&self, root_path: &Path) -> PathBuf {
        let mut path = root_path.to_path_buf();
        for part in &self.parts {
            path.push(part);
        }
        path
    }
}

fn url_path_segments(url: &Url) -> impl Iterator<Item = &str> {
    url.path()
        .strip_prefix('/')
        .unwrap_or(url.path())
        .split('/')
}

fn url_to_local_sub_path(
    url: &Url,
    content_type: Option<&str>,
) -> Result<LocalCacheSubPath, UnsupportedUrlError> {
    // characters that don't work in filenames across platforms
    static FORBIDDEN_CHARS: Lazy<HashSet<char>> = Lazy::new(|| {
        HashSet::from(['?', '<', '>', ':', '*', '|', '\\', '"', '\'', '/'])
    });
    // device names Windows refuses as path components
    static FORBIDDEN_WINDOWS_NAMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
        HashSet::from([
            "con", "prn", "aux", "nul", "com0", "com1", "com2", "com3", "com4", "com5", "com6",
            "com7", "com8", "com9", "lpt0", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6",
            "lpt7", "lpt8", "lpt9",
        ])
    });

    fn has_forbidden_chars(segment: &str) -> bool {
        segment.chars().any(|c| {
            let is_uppercase = c.is_ascii_alphabetic() && !c.is_ascii_lowercase();
            // uppercase letters are rejected so the layout behaves the same
            // on case-insensitive file systems
            FORBIDDEN_CHARS.contains(&c) || is_uppercase
        })
    }

    fn has_known_extension(part: &str) -> bool {
        let part = part.to_lowercase();
        KNOWN_EXTENSIONS.iter().any(|ext| part.ends_with(ext))
    }

    fn short_hash(data: &str, last_ext: Option<&str>) -> String {
        // balances readability against collisions; the hash keeps the
        // token unique, the prefix keeps it recognizable
        let hash = checksum(data.as_bytes());
        const MAX_LENGTH: usize = 20;
        let mut sub = String::with_capacity(MAX_LENGTH);
        for c in data.chars().take(MAX_LENGTH) {
            // the query string participates in the hash only
            if c == '?' {
                break;
            }
            if FORBIDDEN_CHARS.contains(&c) {
                sub.push('_');
            } else {
                sub.extend(c.to_lowercase());
            }
        }
        let sub = match last_ext {
            Some(ext) => sub.strip_suffix(ext).unwrap_or(&sub),
            None => &sub,
        };
        let ext = last_ext.unwrap_or("");
        if sub.is_empty() {
            format!("#{}{}", &hash[..7], ext)
        } else {
            format!("#{}_{}{}", sub, &hash[..5], ext)
        }
    }

    fn should_hash_part(part: &str, last_ext: Option<&str>) -> bool {
        if part.is_empty() || part.len() > 30 {
            // keep short because of the Windows path length limit
            return true;
        }
        let hash_context_specific = if let Some(last_ext) = last_ext {
            // hash a filename that doesn't match the content's extension so
            // deleting the manifest can't change how the file is interpreted
            !has_known_extension(part) || !part.ends_with(last_ext)
        } else {
            // hash a directory with a known extension so it can't collide
            // with a file of the same name
            has_known_extension(part)
        };

        hash_context_specific
            || part.starts_with('#')
            || has_forbidden_chars(part)
            || last_ext.is_none() && FORBIDDEN_WINDOWS_NAMES.contains(part)
            || part.ends_with('.')
    }

    let mut base_parts = base_url_to_filename_parts(url, "_")
        .ok_or_else(|| UnsupportedUrlError::new(url))?;
    if base_parts[0] == "https" {
        base_parts.remove(0);
    } else if base_parts.len() > 1 {
        let scheme = base_parts.remove(0);
        base_parts[0] = format!("{}_{}", scheme, base_parts[0]);
    }

    let mut parts = base_parts
        .into_iter()
        .chain(url_path_segments(url).map(str::to_string))
        .collect::<Vec<_>>();

    // the query participates in the final component's identity
    if let Some(query) = url.query() {
        let last_part = parts.last_mut().unwrap();
        last_part.push('?');
        last_part.push_str(query);
    }

    let mut has_hash = false;
    let parts_len = parts.len();
    let parts = parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| {
            let is_last = i == parts_len - 1;
            let last_ext = if is_last {
                Some(extension_for(url, content_type))
            } else {
                None
            };
            if should_hash_part(&part, last_ext) {
                has_hash = true;
                short_hash(&part, last_ext)
            } else {
                part
            }
        })
        .collect::<Vec<_>>();

    Ok(LocalCacheSubPath { has_hash, parts })
}

// Kept private so nothing outside the overlay can depend on the manifest
// document shape.
mod manifest {
    use std::path::PathBuf;

    use indexmap::IndexMap;
    use parking_lot::RwLock;
    use serde::{Deserialize, Serialize};
    use url::Url;

    use crate::fs_util;
    use crate::paths::Destination;

    use super::super::metadata::CachedUrlMetadata;
    use super::super::HeadersMap;
    use super::{url_path_segments, LocalCacheSubPath};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    struct ManifestModule {
        /// Full response header map; path decoding is lossy, so the
        /// manifest is the source of truth for headers
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        headers: IndexMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<u8>,
    }

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct SerializedManifest {
        /// Mappings from directory URLs to hashed local folder paths
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        folders: IndexMap<Url, String>,
        /// Vendored URLs (including queries) to their stored records
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        modules: IndexMap<Url, ManifestModule>,
    }

    #[derive(Debug)]
    pub(super) struct LocalCacheManifest {
        file_path: PathBuf,
        data: RwLock<SerializedManifest>,
    }

    impl LocalCacheManifest {
        pub fn new(file_path: PathBuf) -> Self {
            let data = fs_util::read_file_bytes(&file_path)
                .ok()
                .flatten()
                .and_then(|bytes| match serde_json::from_slice(&bytes) {
                    Ok(data) => Some(data),
                    Err(err) => {
                        tracing::debug!("Failed deserializing vendor manifest: {:#}", err);
                        None
                    }
                })
                .unwrap_or_default();
            Self {
                file_path,
                data: RwLock::new(data),
            }
        }

        pub fn insert(
            &self,
            url: Url,
            sub_path: &LocalCacheSubPath,
            headers: HeadersMap,
            destination: Destination,
        ) {
            let mut sorted_headers: Vec<(String, String)> = headers.into_iter().collect();
            sorted_headers.sort_by(|a, b| a.0.cmp(&b.0));
            let module = ManifestModule {
                headers: sorted_headers.into_iter().collect(),
                destination: match destination {
                    Destination::Script => None,
                    other => Some(other.as_code()),
                },
            };

            let mut data = self.data.write();
            let mut has_changed = if data.modules.get(&url) == Some(&module) {
                false
            } else {
                data.modules.insert(url.clone(), module);
                true
            };

            if sub_path.has_hash && sub_path.parts.len() >= 2 {
                let url_path_parts: Vec<&str> = url_path_segments(&url).collect();
                let base_url = {
                    let mut base_url = url.clone();
                    base_url.set_path("/");
                    base_url.set_query(None);
                    base_url.set_fragment(None);
                    base_url
                };
                for (i, local_part) in sub_path.parts[1..sub_path.parts.len() - 1]
                    .iter()
                    .enumerate()
                {
                    if local_part.starts_with('#') {
                        let mut folder_url = base_url.clone();
                        folder_url
                            .set_path(&format!("{}/", url_path_parts[..i + 1].join("/")));
                        let local_path = sub_path.parts[..i + 2].join("/");
                        if data.folders.get(&folder_url) != Some(&local_path) {
                            data.folders.insert(folder_url, local_path);
                            has_changed = true;
                        }
                    }
                }
            }

            if has_changed {
                // the manifest's parent directory appears once files land in
                // the overlay, so no need to ensure it here
                let json = serde_json::to_string_pretty(&*data)
                    .expect("manifest is always serializable");
                let result =
                    fs_util::atomic_write_file(&self.file_path, json.as_bytes(), fs_util::CACHE_PERM);
                if let Err(err) = result {
                    tracing::debug!("Failed saving vendor manifest: {:#}", err);
                }
            }
        }

        pub fn get_metadata(&self, url: &Url) -> Option<CachedUrlMetadata> {
            let data = self.data.read();
            let module = data.modules.get(url)?;
            Some(CachedUrlMetadata {
                url: url.to_string(),
                headers: module
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                destination: module.destination,
            })
        }
    }
}
