//! data: URL decoding
//!
//! RFC 2397: `data:[<mediatype>][;base64],<data>`. Textual payloads are
//! percent-decoded; base64 payloads tolerate whitespace.

use base64::Engine;
use thiserror::Error;
use url::Url;

const DEFAULT_MEDIA_TYPE: &str = "text/plain";
const DEFAULT_CHARSET: &str = "charset=US-ASCII";

/// Errors that can occur while decoding a data URL
#[derive(Debug, Error)]
pub enum DataUrlDecodeError {
    /// The URL has no comma separating metadata from payload
    #[error("Unable to decode data url: missing ','")]
    MissingComma,

    /// The payload claimed base64 but did not decode
    #[error("Unable to decode data url: invalid base64")]
    InvalidBase64,

    /// A percent escape was truncated or non-hex
    #[error("Unable to decode data url: invalid percent encoding")]
    InvalidPercentEncoding,
}

/// Decoded payload plus its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDataUrl {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Decode a data: URL into bytes and a content type.
pub fn parse_data_url(url: &Url) -> Result<DecodedDataUrl, DataUrlDecodeError> {
    let rest = url.as_str().strip_prefix("data:").unwrap_or(url.as_str());
    // the fragment is not part of the payload
    let rest = rest.split('#').next().unwrap_or(rest);
    let (metadata, data) = rest.split_once(',').ok_or(DataUrlDecodeError::MissingComma)?;

    let mut is_base64 = false;
    let mut media_parts = Vec::new();
    for part in metadata.split(';') {
        if part.eq_ignore_ascii_case("base64") {
            is_base64 = true;
        } else {
            media_parts.push(part);
        }
    }

    let content_type = match media_parts.first() {
        None | Some(&"") => {
            if media_parts.len() > 1 {
                // parameters without a media type imply text/plain
                format!("{DEFAULT_MEDIA_TYPE};{}", media_parts[1..].join(";"))
            } else {
                format!("{DEFAULT_MEDIA_TYPE};{DEFAULT_CHARSET}")
            }
        }
        Some(_) => media_parts.join(";"),
    };

    let bytes = if is_base64 {
        decode_base64(data)?
    } else {
        percent_decode(data)?
    };

    Ok(DecodedDataUrl {
        content_type,
        bytes,
    })
}

fn decode_base64(data: &str) -> Result<Vec<u8>, DataUrlDecodeError> {
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .or_else(|_| {
            base64::engine::general_purpose::STANDARD_NO_PAD
                .decode(cleaned.trim_end_matches('=').as_bytes())
        })
        .map_err(|_| DataUrlDecodeError::InvalidBase64)
}

fn percent_decode(data: &str) -> Result<Vec<u8>, DataUrlDecodeError> {
    let input = data.as_bytes();
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'%' => {
                let hi = input.get(i + 1).and_then(|b| (*b as char).to_digit(16));
                let lo = input.get(i + 2).and_then(|b| (*b as char).to_digit(16));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi * 16 + lo) as u8);
                        i += 3;
                    }
                    _ => return Err(DataUrlDecodeError::InvalidPercentEncoding),
                }
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    Ok(out)
}
