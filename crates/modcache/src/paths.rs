//! URL to cache path encoding
//!
//! URLs contain characters that cannot appear in filenames ("?", "#", ":"),
//! so cache entries live under deterministic, hash-based relative paths.

use std::path::Component;
use std::path::PathBuf;
use std::path::Prefix;

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Disambiguates cache entries for the same URL when the consumer
/// interprets the bytes differently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Executable module source
    #[default]
    Script,
    /// JSON module source
    Json,
}

impl Destination {
    /// Suffix folded into the path hash so destinations occupy disjoint
    /// entries. `Script` is the common case and contributes nothing.
    pub(crate) fn cache_suffix(&self) -> &'static str {
        match self {
            Destination::Script => "",
            Destination::Json => "json",
        }
    }

    /// Stable integer form used in metadata sidecars.
    pub fn as_code(&self) -> u8 {
        match self {
            Destination::Script => 0,
            Destination::Json => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Destination::Script),
            1 => Some(Destination::Json),
            _ => None,
        }
    }
}

/// The URL cannot be mapped to a cache path
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Can't convert url (\"{url}\") to filename.")]
pub struct UnsupportedUrlError {
    pub url: String,
}

impl UnsupportedUrlError {
    pub fn new(url: &Url) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

/// Compute the lowercase hex SHA-256 digest of `data`.
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Turn a (URL, destination) pair into a relative path inside the HTTP
/// cache.
///
/// The layout is `<scheme>/<host or host_PORT<port>>/<hex sha256>` where the
/// hash covers the URL path, the query when present and the destination
/// suffix. The URL fragment is never part of the key. Only `http`, `https`,
/// `data` and `blob` URLs belong to the HTTP cache; everything else fails
/// with [`UnsupportedUrlError`].
pub fn url_to_filename(
    url: &Url,
    destination: Destination,
) -> Result<PathBuf, UnsupportedUrlError> {
    match url.scheme() {
        "http" | "https" | "data" | "blob" => {
            let mut out = PathBuf::new();
            for part in base_url_to_filename_parts(url, "_PORT")
                .ok_or_else(|| UnsupportedUrlError::new(url))?
            {
                out.push(part);
            }

            let mut rest = url.path().to_string();
            if let Some(query) = url.query() {
                rest.push('?');
                rest.push_str(query);
            }
            // fragment is omitted on purpose - it denotes a part of the
            // resource, not a distinct resource
            rest.push_str(destination.cache_suffix());
            out.push(checksum(rest.as_bytes()));
            Ok(out)
        }
        _ => Err(UnsupportedUrlError::new(url)),
    }
}

/// Turn a (URL, destination) pair into a relative path for artifact stores
/// keyed by source URL (the `gen/` tree).
///
/// Hashed schemes reuse [`url_to_filename`]; `wasm` URLs keep their path
/// components verbatim and `file` URLs are decoded back to a filesystem
/// layout, including UNC hosts and drive letters on Windows.
pub fn url_to_disk_filename(
    url: &Url,
    destination: Destination,
) -> Result<PathBuf, UnsupportedUrlError> {
    match url.scheme() {
        "http" | "https" | "data" | "blob" => url_to_filename(url, destination),
        "wasm" => {
            let mut out = PathBuf::from("wasm");
            out.push(host_port_segment(url).ok_or_else(|| UnsupportedUrlError::new(url))?);
            for segment in url.path().split('/').filter(|s| !s.is_empty()) {
                out.push(segment);
            }
            Ok(out)
        }
        "file" => file_url_to_filename(url),
        _ => Err(UnsupportedUrlError::new(url)),
    }
}

/// Turn the base of a URL (scheme, host, port) into filename parts.
///
/// The port is joined to the host with `port_separator` because ":" cannot
/// be used in filenames on some platforms. Returns `None` for schemes that
/// have no hashed layout.
pub(crate) fn base_url_to_filename_parts(
    url: &Url,
    port_separator: &str,
) -> Option<Vec<String>> {
    let mut out = Vec::with_capacity(2);
    let scheme = url.scheme();
    out.push(scheme.to_string());

    match scheme {
        "http" | "https" => {
            let host = url.host_str()?;
            let host_port = match url.port() {
                // underscores are not allowed in domains, so the separator
                // cannot collide with a real hostname
                Some(port) => format!("{host}{port_separator}{port}"),
                None => host.to_string(),
            };
            out.push(host_port);
        }
        "data" | "blob" => (),
        scheme => {
            tracing::debug!("Don't know how to create cache name for scheme: {}", scheme);
            return None;
        }
    }

    Some(out)
}

fn host_port_segment(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}_PORT{port}"),
        None => host.to_string(),
    })
}

fn file_url_to_filename(url: &Url) -> Result<PathBuf, UnsupportedUrlError> {
    let path = url
        .to_file_path()
        .map_err(|_| UnsupportedUrlError::new(url))?;
    let mut out = PathBuf::from("file");

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => match prefix.kind() {
                Prefix::Disk(letter) | Prefix::VerbatimDisk(letter) => {
                    // drive letter without the trailing colon
                    out.push((letter as char).to_string());
                }
                Prefix::UNC(server, share) | Prefix::VerbatimUNC(server, share) => {
                    out.push("UNC");
                    out.push(server.to_string_lossy().replace(':', "_"));
                    out.push(share.to_string_lossy().to_string());
                }
                _ => return Err(UnsupportedUrlError::new(url)),
            },
            Component::RootDir => {}
            Component::Normal(part) => out.push(part),
            _ => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(url: &str, destination: Destination) -> String {
        let url = Url::parse(url).unwrap();
        url_to_filename(&url, destination)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/")
    }

    #[test]
    fn test_checksum_hello_world() {
        assert_eq!(
            checksum(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_url_without_query() {
        assert_eq!(
            encode("https://cdn.skypack.dev/svelte/internal", Destination::Script),
            "https/cdn.skypack.dev/dae962c780900e18d25c9d22ed772d40dfcd93eb857d43c6e4f383f2c69ae40f"
        );
    }

    #[test]
    fn test_url_with_query() {
        assert_eq!(
            encode(
                "https://cdn.skypack.dev/svelte/compiler?dts",
                Destination::Script
            ),
            "https/cdn.skypack.dev/0f37079a386379010b507f219d5e9e7b661a94f25a4b34742d589cf89847fc47"
        );
    }

    #[test]
    fn test_host_with_port() {
        assert_eq!(
            encode(
                "http://localhost:8000/std/http/file_server.ts",
                Destination::Script
            ),
            "http/localhost_PORT8000/d8300752800fe3f0beda9505dc1c3b5388beb1ee45afd1f1e2c9fc0866df15cf"
        );
    }

    #[test]
    fn test_fragment_is_ignored() {
        assert_eq!(
            encode("https://deno.land/mod.ts?a=1#section", Destination::Script),
            encode("https://deno.land/mod.ts?a=1", Destination::Script),
        );
    }

    #[test]
    fn test_destination_disambiguation() {
        let script = encode(
            "https://deno.land/std/http/file_server.json",
            Destination::Script,
        );
        let json = encode(
            "https://deno.land/std/http/file_server.json",
            Destination::Json,
        );
        assert_ne!(script, json);
        assert!(script.ends_with(
            "57bca9ce6cfb71130ac9ae61b8ba4b277d9379077c15bece949c025df2fa86cf"
        ));
        assert!(json.ends_with(
            "df822def4e5e60d274b133fe0c610583f3b96af9cf87edf3c2184c6613501609"
        ));
    }

    #[test]
    fn test_data_url() {
        let url = Url::parse("data:text/plain,Hello%2C%20Deno!").unwrap();
        let path = url_to_filename(&url, Destination::Script).unwrap();
        let rendered = path.to_string_lossy().replace('\\', "/");
        assert!(rendered.starts_with("data/"));
        assert_eq!(rendered.split('/').count(), 2);
    }

    #[test]
    fn test_wasm_url_is_not_http_cacheable() {
        let url = Url::parse("wasm://wasm/d1c677ea").unwrap();
        assert!(url_to_filename(&url, Destination::Script).is_err());
    }

    #[test]
    fn test_wasm_url_disk_layout() {
        let url = Url::parse("wasm://wasm/d1c677ea").unwrap();
        let path = url_to_disk_filename(&url, Destination::Script).unwrap();
        assert_eq!(path.to_string_lossy().replace('\\', "/"), "wasm/wasm/d1c677ea");
    }

    #[test]
    fn test_unsupported_scheme() {
        let url = Url::parse("ftp://example.com/mod.ts").unwrap();
        assert!(url_to_disk_filename(&url, Destination::Script).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_url_disk_layout() {
        let url = Url::parse("file:///home/user/project/mod.ts").unwrap();
        let path = url_to_disk_filename(&url, Destination::Script).unwrap();
        assert_eq!(
            path.to_string_lossy(),
            "file/home/user/project/mod.ts"
        );
    }

    #[test]
    fn test_destination_codes_round_trip() {
        for destination in [Destination::Script, Destination::Json] {
            assert_eq!(
                Destination::from_code(destination.as_code()),
                Some(destination)
            );
        }
        assert_eq!(Destination::from_code(9), None);
    }
}
