//! Content-addressed HTTP module cache
//!
//! This crate provides the on-disk cache and fetch pipeline used when loading
//! remote module sources, including:
//! - Deterministic URL-to-path encoding for cache entries
//! - A shared global store keyed by URL hash
//! - A per-project vendor store that overlays the global one
//! - Atomic persistence of content plus response-header sidecars
//! - A fetcher with redirect chasing, conditional revalidation, retries and
//!   checksum verification
//! - A `load()` façade for module-graph builders

pub mod cache;
pub mod dirs;
pub mod fetch;
pub mod fs_util;
pub mod loader;
pub mod paths;

pub use cache::global::GlobalHttpCache;
pub use cache::local::LocalHttpCache;
pub use cache::memory::MemoryHttpCache;
pub use cache::metadata::CachedUrlMetadata;
pub use cache::{CacheEntry, CacheError, HeadersMap, HttpCache};
pub use dirs::{CacheDir, CacheDirError};
pub use fetch::{
    AuthToken, AuthTokenData, AuthTokens, CacheSetting, DefaultHttpClient, FetchError,
    FetchOptions, Fetcher, FetcherOptions, File, HttpCacheFactory, HttpClient, HttpClientError,
    HttpResponse,
};
pub use loader::{LoadError, LoadResponse, ModuleLoader};
pub use paths::{
    checksum, url_to_disk_filename, url_to_filename, Destination, UnsupportedUrlError,
};
