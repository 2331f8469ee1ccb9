//! HTTP client abstraction
//!
//! The fetcher talks to the network through [`HttpClient`]; the default
//! implementation wraps a blocking reqwest client that follows redirects
//! internally.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::cache::HeadersMap;

/// HTTP client configuration
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport-level failure (DNS, connect, TLS, read). Status codes are not
/// errors at this layer; the fetcher interprets them.
#[derive(Debug, Error)]
#[error("HTTP request failed for {url}: {source}")]
pub struct HttpClientError {
    pub url: Url,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

/// A completed exchange. `url` is the final URL after the client followed
/// any redirects; comparing it with the requested URL reveals redirect
/// edges.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: Url,
    pub status: u16,
    pub status_text: String,
    /// Response headers keyed by lowercase name; repeated headers are
    /// joined with commas
    pub headers: HeadersMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait HttpClient: Send + Sync + fmt::Debug {
    /// Perform a GET request with the provided extra headers, following
    /// redirects internally.
    fn send(
        &self,
        url: &Url,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, HttpClientError>;
}

/// Blocking reqwest-backed client.
#[derive(Debug)]
pub struct DefaultHttpClient {
    client: reqwest::blocking::Client,
}

impl Default for DefaultHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultHttpClient {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("modcache/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl HttpClient for DefaultHttpClient {
    fn send(
        &self,
        url: &Url,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, HttpClientError> {
        let mut request = self.client.get(url.as_str());
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().map_err(|err| HttpClientError {
            url: url.clone(),
            source: Box::new(err),
        })?;

        let status = response.status();
        let final_url = response.url().clone();
        let headers = lowercased_headers(response.headers());
        let body = response
            .bytes()
            .map_err(|err| HttpClientError {
                url: url.clone(),
                source: Box::new(err),
            })?
            .to_vec();

        Ok(HttpResponse {
            url: final_url,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

fn lowercased_headers(headers: &reqwest::header::HeaderMap) -> HeadersMap {
    let mut out = HeadersMap::with_capacity(headers.keys_len());
    for key in headers.keys() {
        let values = headers
            .get_all(key)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect::<Vec<_>>()
            .join(",");
        out.insert(key.as_str().to_lowercase(), values);
    }
    out
}
