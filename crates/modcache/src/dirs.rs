//! Cache root discovery
//!
//! Resolves the directory that houses the `remote/` HTTP cache and the
//! `gen/` artifact tree, honoring the `DENO_DIR` override.

use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Environment variable overriding the cache root.
pub const CACHE_ROOT_ENV_VAR: &str = "DENO_DIR";

/// Errors that can occur while resolving the cache root
#[derive(Debug, Error)]
pub enum CacheDirError {
    /// Neither an override nor a platform directory is available
    #[error(
        "Could not resolve cache root directory; set DENO_DIR or ensure a home directory exists"
    )]
    NoCacheOrHomeDir,

    /// The current working directory could not be resolved
    #[error("Could not resolve current working directory")]
    FailedCwd(#[source] std::io::Error),
}

/// The resolved cache root and its well-known subdirectories.
#[derive(Debug, Clone)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    /// Resolve the cache root.
    ///
    /// Precedence: explicit `maybe_custom_root`, the `DENO_DIR` environment
    /// variable, the platform cache directory joined with `deno`, and
    /// finally `$HOME/.deno`. Relative candidates are resolved against the
    /// current working directory.
    pub fn discover(maybe_custom_root: Option<PathBuf>) -> Result<Self, CacheDirError> {
        let maybe_custom_root = maybe_custom_root.or_else(|| {
            env::var_os(CACHE_ROOT_ENV_VAR)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        });

        let root = if let Some(root) = maybe_custom_root {
            root
        } else if let Some(cache_dir) = dirs::cache_dir() {
            cache_dir.join("deno")
        } else if let Some(home_dir) = dirs::home_dir() {
            home_dir.join(".deno")
        } else {
            return Err(CacheDirError::NoCacheOrHomeDir);
        };

        let root = if root.is_absolute() {
            root
        } else {
            env::current_dir()
                .map_err(CacheDirError::FailedCwd)?
                .join(root)
        };

        Ok(Self { root })
    }

    /// Create a cache dir at an explicit, absolute root.
    pub fn new(root: PathBuf) -> Self {
        assert!(root.is_absolute());
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the HTTP cache (content plus sidecars).
    pub fn remote_store_path(&self) -> PathBuf {
        self.root.join("remote")
    }

    /// Location reserved for downstream emitted artifacts.
    pub fn gen_path(&self) -> PathBuf {
        self.root.join("gen")
    }
}
