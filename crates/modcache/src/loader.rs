//! Module loading façade
//!
//! Graph builders call [`ModuleLoader::load`] and receive a tagged
//! response; everything else (caching, redirects, retries) stays behind
//! the fetcher.

use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::cache::HeadersMap;
use crate::fetch::{CacheSetting, FetchError, FetchOptions, Fetcher, HttpClient};
use crate::paths::Destination;

/// Response handed to a module-graph builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadResponse {
    /// A fetched module
    Module {
        specifier: Url,
        maybe_headers: Option<HeadersMap>,
        content: Vec<u8>,
    },
    /// The specifier redirects; re-request against the new specifier
    Redirect { specifier: Url },
    /// The specifier is handled outside the module graph
    External { specifier: Url },
}

/// A load failed for a reason other than the module being absent.
#[derive(Debug, Error)]
#[error("Failed to load '{specifier}'")]
pub struct LoadError {
    pub specifier: Url,
    #[source]
    pub source: FetchError,
}

/// Thin façade over a [`Fetcher`] for module-graph consumers.
#[derive(Debug)]
pub struct ModuleLoader<C: HttpClient> {
    fetcher: Arc<Fetcher<C>>,
    maybe_external_root: Option<Url>,
}

impl<C: HttpClient> ModuleLoader<C> {
    pub fn new(fetcher: Arc<Fetcher<C>>) -> Self {
        Self {
            fetcher,
            maybe_external_root: None,
        }
    }

    /// Specifiers under `root` pass through as [`LoadResponse::External`]
    /// without fetching.
    pub fn with_external_root(mut self, root: Url) -> Self {
        self.maybe_external_root = Some(root);
        self
    }

    /// Load a module.
    ///
    /// Absent modules (including cache-only misses and 404s) are `None`;
    /// all other fetch failures carry a source chain.
    pub fn load(
        &self,
        specifier: &Url,
        _is_dynamic: bool,
        maybe_cache_setting: Option<&CacheSetting>,
        maybe_checksum: Option<&str>,
    ) -> Result<Option<LoadResponse>, LoadError> {
        if let Some(root) = &self.maybe_external_root {
            if specifier.as_str().starts_with(root.as_str()) {
                return Ok(Some(LoadResponse::External {
                    specifier: specifier.clone(),
                }));
            }
        }

        let destination = if specifier.path().ends_with(".json") {
            Destination::Json
        } else {
            Destination::Script
        };

        match self.fetcher.fetch(
            specifier,
            FetchOptions {
                destination,
                maybe_checksum,
                maybe_cache_setting,
            },
        ) {
            Ok(file) => {
                if file.specifier != *specifier {
                    Ok(Some(LoadResponse::Redirect {
                        specifier: file.specifier,
                    }))
                } else {
                    Ok(Some(LoadResponse::Module {
                        specifier: file.specifier,
                        maybe_headers: file.maybe_headers,
                        content: file.content,
                    }))
                }
            }
            Err(FetchError::NotFound(_)) => Ok(None),
            Err(source) => Err(LoadError {
                specifier: specifier.clone(),
                source,
            }),
        }
    }
}
