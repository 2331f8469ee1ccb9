//! Remote module fetching
//!
//! The [`Fetcher`] orchestrates scheme dispatch, cache lookups with
//! conditional revalidation, redirect chasing, retries with backoff,
//! checksum verification and in-process memoization.

mod auth;
mod client;
mod data;

pub use auth::{AuthToken, AuthTokenData, AuthTokens, AUTH_TOKENS_ENV_VAR};
pub use client::{
    DefaultHttpClient, HttpClient, HttpClientError, HttpResponse, REQUEST_TIMEOUT,
};
pub use data::DataUrlDecodeError;

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use thiserror::Error;
use url::Url;

use crate::cache::{verify_checksum, CacheEntry, CacheError, HeadersMap, HttpCache};
use crate::fs_util;
use crate::paths::{Destination, UnsupportedUrlError};

/// Maximum number of redirect hops to follow for one specifier.
const REDIRECT_LIMIT: usize = 10;
/// Maximum retries on transport errors and 5xx responses.
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Indicates how cached source files should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheSetting {
    /// Only cached files may be used; anything not cached is an error
    Only,
    /// Use the cache and populate it on misses (the default)
    Use,
    /// Bypass the cache and refetch everything, rewriting entries
    Reload,
    /// Bypass the cache only for specifiers starting with a listed prefix
    ReloadMatching(Vec<String>),
}

impl CacheSetting {
    /// Whether the cache should be consulted for `specifier`.
    pub fn should_use_for(&self, specifier: &Url) -> bool {
        match self {
            CacheSetting::Only | CacheSetting::Use => true,
            CacheSetting::Reload => false,
            CacheSetting::ReloadMatching(prefixes) => {
                let mut specifier = specifier.clone();
                specifier.set_fragment(None);
                !prefixes
                    .iter()
                    .any(|prefix| specifier.as_str().starts_with(prefix))
            }
        }
    }
}

/// A fetched source file.
///
/// `specifier` is the final URL; for redirected remote files it differs
/// from the requested specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub specifier: Url,
    pub maybe_headers: Option<HeadersMap>,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FileOrRedirect {
    File(File),
    Redirect(Url),
}

impl FileOrRedirect {
    fn from_cache_entry(specifier: &Url, entry: CacheEntry) -> Result<Self, FetchError> {
        match entry.metadata.headers.get("location") {
            Some(location) if !location.is_empty() => {
                let redirect =
                    specifier
                        .join(location)
                        .map_err(|source| FetchError::RedirectResolution {
                            specifier: specifier.clone(),
                            location: location.clone(),
                            source,
                        })?;
                Ok(FileOrRedirect::Redirect(redirect))
            }
            _ => Ok(FileOrRedirect::File(File {
                specifier: specifier.clone(),
                maybe_headers: Some(entry.metadata.headers),
                content: entry.content,
            })),
        }
    }
}

/// Errors that can occur during a fetch
#[derive(Debug, Error)]
pub enum FetchError {
    /// Scheme outside the supported set
    #[error("Unsupported scheme \"{scheme}\" for module \"{specifier}\"")]
    UnsupportedScheme { scheme: String, specifier: Url },

    /// The URL has no cache path
    #[error(transparent)]
    UnsupportedUrl(#[from] UnsupportedUrlError),

    /// Cache-only miss, missing file URL, or remote 404
    #[error("Module not found: {0}")]
    NotFound(Url),

    /// Remote fetching is disabled
    #[error("A remote specifier was requested: \"{0}\", but remote fetching is disabled")]
    PermissionDenied(Url),

    /// Non-404, non-2xx response
    #[error("Fetch '{url}' failed: {status} {status_text}")]
    HttpStatus {
        url: Url,
        status: u16,
        status_text: String,
    },

    /// More than the allowed number of redirect hops
    #[error("Fetch '{0}' failed, too many redirects.")]
    TooManyRedirects(Url),

    /// A cached redirect points at an unparsable location
    #[error("Failed resolving redirect from '{specifier}' to '{location}'.")]
    RedirectResolution {
        specifier: Url,
        location: String,
        #[source]
        source: url::ParseError,
    },

    /// Malformed data URL
    #[error(transparent)]
    DataUrlDecode(#[from] DataUrlDecodeError),

    /// Transport failure after retries were exhausted
    #[error(transparent)]
    Client(#[from] HttpClientError),

    /// Cache failure (IO, parse, checksum)
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// IO error outside the cache (file scheme reads)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lazily constructs the backing cache the first time it is needed.
pub type HttpCacheFactory =
    Box<dyn Fn() -> Result<Arc<dyn HttpCache>, CacheError> + Send + Sync>;

/// Fetcher configuration.
#[derive(Debug)]
pub struct FetcherOptions {
    pub cache_setting: CacheSetting,
    pub allow_remote: bool,
    pub auth_tokens: AuthTokens,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            cache_setting: CacheSetting::Use,
            allow_remote: true,
            auth_tokens: AuthTokens::default(),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions<'a> {
    pub destination: Destination,
    pub maybe_checksum: Option<&'a str>,
    pub maybe_cache_setting: Option<&'a CacheSetting>,
}

/// A structure for resolving, fetching and caching source files.
#[derive(Debug)]
pub struct Fetcher<C: HttpClient> {
    client: C,
    http_cache_factory: HttpCacheFactoryCell,
    memo: Mutex<HashMap<String, File>>,
    cache_setting: CacheSetting,
    allow_remote: bool,
    auth_tokens: AuthTokens,
}

struct HttpCacheFactoryCell {
    factory: HttpCacheFactory,
    cell: OnceCell<Arc<dyn HttpCache>>,
}

impl std::fmt::Debug for HttpCacheFactoryCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCacheFactoryCell")
            .field("initialized", &self.cell.get().is_some())
            .finish()
    }
}

impl<C: HttpClient> Fetcher<C> {
    /// Create a fetcher whose backing cache is produced on first use.
    pub fn new(client: C, http_cache_factory: HttpCacheFactory, options: FetcherOptions) -> Self {
        Self {
            client,
            http_cache_factory: HttpCacheFactoryCell {
                factory: http_cache_factory,
                cell: OnceCell::new(),
            },
            memo: Mutex::new(HashMap::new()),
            cache_setting: options.cache_setting,
            allow_remote: options.allow_remote,
            auth_tokens: options.auth_tokens,
        }
    }

    /// Create a fetcher over an already constructed cache.
    pub fn with_cache(client: C, cache: Arc<dyn HttpCache>, options: FetcherOptions) -> Self {
        Self::new(client, Box::new(move || Ok(cache.clone())), options)
    }

    pub fn cache_setting(&self) -> &CacheSetting {
        &self.cache_setting
    }

    fn http_cache(&self) -> Result<&Arc<dyn HttpCache>, FetchError> {
        self.http_cache_factory
            .cell
            .get_or_try_init(|| (self.http_cache_factory.factory)())
            .map_err(FetchError::Cache)
    }

    /// Fetch a source file, following redirects and memoizing the result
    /// under the originally requested specifier.
    pub fn fetch(&self, specifier: &Url, options: FetchOptions<'_>) -> Result<File, FetchError> {
        tracing::debug!("Fetcher::fetch - specifier: {}", specifier);
        let scheme = specifier.scheme();
        match scheme {
            "file" => self.fetch_local(specifier),
            "data" | "blob" | "http" | "https" => {
                if let Some(file) = self.memo.lock().get(specifier.as_str()) {
                    return Ok(file.clone());
                }
                let file = match scheme {
                    "data" | "blob" => self.fetch_data_or_blob(specifier, &options)?,
                    _ => {
                        if !self.allow_remote {
                            return Err(FetchError::PermissionDenied(specifier.clone()));
                        }
                        self.fetch_remote(specifier, &options)?
                    }
                };
                self.memo
                    .lock()
                    .insert(specifier.to_string(), file.clone());
                Ok(file)
            }
            _ => Err(FetchError::UnsupportedScheme {
                scheme: scheme.to_string(),
                specifier: specifier.clone(),
            }),
        }
    }

    /// Fetch a source file from the local file system.
    ///
    /// A missing file surfaces as `NotFound`, which the loader converts to
    /// absent.
    fn fetch_local(&self, specifier: &Url) -> Result<File, FetchError> {
        let path = specifier
            .to_file_path()
            .map_err(|_| UnsupportedUrlError::new(specifier))?;
        let Some(bytes) = fs_util::read_file_bytes(&path)? else {
            return Err(FetchError::NotFound(specifier.clone()));
        };
        Ok(File {
            specifier: specifier.clone(),
            maybe_headers: None,
            content: strip_hashbang(bytes),
        })
    }

    fn fetch_data_or_blob(
        &self,
        specifier: &Url,
        options: &FetchOptions<'_>,
    ) -> Result<File, FetchError> {
        let cache_setting = options.maybe_cache_setting.unwrap_or(&self.cache_setting);
        let cache = self.http_cache()?;

        if cache_setting.should_use_for(specifier) {
            if let Some(entry) = cache.get(specifier, options.destination, None)? {
                return Ok(File {
                    specifier: specifier.clone(),
                    maybe_headers: Some(entry.metadata.headers),
                    content: entry.content,
                });
            }
        }
        if *cache_setting == CacheSetting::Only {
            return Err(FetchError::NotFound(specifier.clone()));
        }

        let (headers, bytes) = if specifier.scheme() == "data" {
            let decoded = data::parse_data_url(specifier)?;
            let headers =
                HeadersMap::from([("content-type".to_string(), decoded.content_type)]);
            (headers, decoded.bytes)
        } else {
            // blob URLs resolve through the host client, without auth
            let response = self.client.send(specifier, &[])?;
            if response.status == 404 {
                return Err(FetchError::NotFound(specifier.clone()));
            }
            if !response.is_success() {
                return Err(FetchError::HttpStatus {
                    url: specifier.clone(),
                    status: response.status,
                    status_text: response.status_text,
                });
            }
            (response.headers, response.body)
        };

        cache.set(specifier, options.destination, headers.clone(), &bytes)?;
        if let Some(expected) = options.maybe_checksum {
            verify_checksum(specifier, &bytes, expected)?;
        }
        Ok(File {
            specifier: specifier.clone(),
            maybe_headers: Some(headers),
            content: bytes,
        })
    }

    /// Follow up to [`REDIRECT_LIMIT`] redirect hops for a remote
    /// specifier.
    fn fetch_remote(
        &self,
        specifier: &Url,
        options: &FetchOptions<'_>,
    ) -> Result<File, FetchError> {
        let mut specifier = Cow::Borrowed(specifier);
        for _ in 0..REDIRECT_LIMIT {
            match self.fetch_remote_no_follow(&specifier, options)? {
                FileOrRedirect::File(file) => return Ok(file),
                FileOrRedirect::Redirect(redirect) => {
                    specifier = Cow::Owned(redirect);
                }
            }
        }
        Err(FetchError::TooManyRedirects(specifier.into_owned()))
    }

    fn fetch_remote_no_follow(
        &self,
        specifier: &Url,
        options: &FetchOptions<'_>,
    ) -> Result<FileOrRedirect, FetchError> {
        let cache_setting = options.maybe_cache_setting.unwrap_or(&self.cache_setting);
        let cache = self.http_cache()?;

        if cache_setting.should_use_for(specifier) {
            if let Some(entry) =
                cache.get(specifier, options.destination, options.maybe_checksum)?
            {
                return FileOrRedirect::from_cache_entry(specifier, entry);
            }
        }
        if *cache_setting == CacheSetting::Only {
            return Err(FetchError::NotFound(specifier.clone()));
        }

        // a previously cached entry with an etag enables revalidation even
        // when the cache is being bypassed
        let maybe_etag_entry = cache
            .get(specifier, options.destination, options.maybe_checksum)
            .ok()
            .flatten()
            .and_then(|mut entry| {
                entry
                    .metadata
                    .headers
                    .remove("etag")
                    .map(|etag| (entry, etag))
            });

        let mut request_headers: Vec<(String, String)> = Vec::with_capacity(2);
        if let Some((_, etag)) = &maybe_etag_entry {
            request_headers.push(("if-none-match".to_string(), etag.clone()));
        }
        if let Some(token) = self.auth_tokens.get(specifier) {
            request_headers.push(("authorization".to_string(), token.to_string()));
        }

        let response = self.send_with_retries(specifier, &request_headers)?;

        if response.status == 304 {
            let Some((entry, _)) = maybe_etag_entry else {
                return Err(FetchError::HttpStatus {
                    url: specifier.clone(),
                    status: response.status,
                    status_text: response.status_text,
                });
            };
            return FileOrRedirect::from_cache_entry(specifier, entry);
        }
        if response.status == 404 {
            return Err(FetchError::NotFound(specifier.clone()));
        }
        if !response.is_success() {
            return Err(FetchError::HttpStatus {
                url: specifier.clone(),
                status: response.status,
                status_text: response.status_text,
            });
        }

        let requested = {
            // the client never sends the fragment, so it can't witness a
            // redirect either
            let mut requested = specifier.clone();
            requested.set_fragment(None);
            requested
        };
        if response.url != requested {
            // record the redirect edge at the requested URL, then the full
            // entry at the final URL
            tracing::debug!("Redirecting to {:?}...", response.url.as_str());
            let redirect_headers =
                HeadersMap::from([("location".to_string(), response.url.to_string())]);
            cache.set(specifier, options.destination, redirect_headers, &[])?;
            cache.set(
                &response.url,
                options.destination,
                response.headers,
                &response.body,
            )?;
            return Ok(FileOrRedirect::Redirect(response.url));
        }

        cache.set(
            specifier,
            options.destination,
            response.headers.clone(),
            &response.body,
        )?;
        if let Some(expected) = options.maybe_checksum {
            verify_checksum(specifier, &response.body, expected)?;
        }
        Ok(FileOrRedirect::File(File {
            specifier: specifier.clone(),
            maybe_headers: Some(response.headers),
            content: response.body,
        }))
    }

    /// Send a request, retrying transport errors and 5xx responses with
    /// exponential backoff. 4xx responses are never retried.
    fn send_with_retries(
        &self,
        url: &Url,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, FetchError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;
        loop {
            let result = self.client.send(url, headers);
            let retryable = match &result {
                Ok(response) => response.status >= 500,
                Err(_) => true,
            };
            if !retryable || attempt >= MAX_RETRIES {
                return result.map_err(FetchError::Client);
            }
            attempt += 1;
            tracing::warn!(
                "Request to {} failed, retry {} of {} in {:?}",
                url,
                attempt,
                MAX_RETRIES,
                backoff
            );
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

/// Strip a leading `#!` line.
///
/// The newline itself is kept so that stripping is idempotent and line
/// numbers in diagnostics stay stable.
fn strip_hashbang(content: Vec<u8>) -> Vec<u8> {
    if !content.starts_with(b"#!") {
        return content;
    }
    match content.iter().position(|&byte| byte == b'\n') {
        Some(index) => content[index..].to_vec(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_hashbang() {
        assert_eq!(
            strip_hashbang(b"#!/usr/bin/env run\nconst a = 1;".to_vec()),
            b"\nconst a = 1;"
        );
        assert_eq!(strip_hashbang(b"const a = 1;".to_vec()), b"const a = 1;");
        assert_eq!(strip_hashbang(b"#!/usr/bin/env run".to_vec()), b"");
    }

    #[test]
    fn test_strip_hashbang_is_idempotent() {
        let once = strip_hashbang(b"#!/usr/bin/env run\n#!not a hashbang\ncode".to_vec());
        let twice = strip_hashbang(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_should_use_cache() {
        let url = Url::parse("https://deno.land/x/mod.ts").unwrap();
        assert!(CacheSetting::Only.should_use_for(&url));
        assert!(CacheSetting::Use.should_use_for(&url));
        assert!(!CacheSetting::Reload.should_use_for(&url));

        let matching =
            CacheSetting::ReloadMatching(vec!["https://deno.land/x/".to_string()]);
        assert!(!matching.should_use_for(&url));
        let other = Url::parse("https://example.com/mod.ts").unwrap();
        assert!(matching.should_use_for(&other));
    }

    #[test]
    fn test_reload_matching_ignores_fragment() {
        let matching =
            CacheSetting::ReloadMatching(vec!["https://deno.land/x/mod.ts".to_string()]);
        let with_fragment = Url::parse("https://deno.land/x/mod.ts#part").unwrap();
        assert!(!matching.should_use_for(&with_fragment));
    }
}
