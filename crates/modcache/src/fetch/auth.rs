//! Authentication tokens for remote hosts
//!
//! Parses the `DENO_AUTH_TOKENS` environment value into per-host
//! credentials and renders `Authorization` header values.

use std::fmt;

use base64::Engine;
use url::Url;

/// Environment variable holding the credential list.
pub const AUTH_TOKENS_ENV_VAR: &str = "DENO_AUTH_TOKENS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthTokenData {
    Bearer(String),
    Basic { username: String, password: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub host: String,
    pub token: AuthTokenData,
}

impl fmt::Display for AuthToken {
    /// Renders the `Authorization` header value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.token {
            AuthTokenData::Bearer(token) => write!(f, "Bearer {token}"),
            AuthTokenData::Basic { username, password } => {
                let credentials = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                write!(f, "Basic {credentials}")
            }
        }
    }
}

/// Parsed credential list, looked up per request host.
#[derive(Debug, Clone, Default)]
pub struct AuthTokens(Vec<AuthToken>);

impl AuthTokens {
    /// Parse a `;`-separated list of `token@host` (Bearer) and
    /// `user:pass@host` (Basic) entries. Splitting uses the last `@` and the
    /// last `:` so literal `@`/`:` characters can appear in secrets.
    /// Malformed entries are discarded with a warning.
    pub fn new(maybe_tokens_str: Option<String>) -> Self {
        let mut tokens = Vec::new();
        if let Some(tokens_str) = maybe_tokens_str {
            for token_str in tokens_str.trim().split(';') {
                if token_str.is_empty() {
                    continue;
                }
                match token_str.rsplit_once('@') {
                    Some((token, host)) if !token.is_empty() && !host.is_empty() => {
                        let host = host.to_lowercase();
                        match token.rsplit_once(':') {
                            Some((username, password)) => tokens.push(AuthToken {
                                host,
                                token: AuthTokenData::Basic {
                                    username: username.to_string(),
                                    password: password.to_string(),
                                },
                            }),
                            None => tokens.push(AuthToken {
                                host,
                                token: AuthTokenData::Bearer(token.to_string()),
                            }),
                        }
                    }
                    _ => {
                        tracing::warn!("Badly formed auth token discarded.");
                    }
                }
            }
        }
        Self(tokens)
    }

    /// Build the token set from the `DENO_AUTH_TOKENS` environment variable.
    pub fn from_env() -> Self {
        Self::new(std::env::var(AUTH_TOKENS_ENV_VAR).ok())
    }

    /// Find the first token whose host is a suffix of the request URL's
    /// hostname. The match is deliberately lenient (no `.` boundary) to
    /// stay compatible with existing configurations.
    pub fn get(&self, url: &Url) -> Option<&AuthToken> {
        let host = url.host_str()?.to_lowercase();
        self.0.iter().find(|token| host.ends_with(&token.host))
    }
}
