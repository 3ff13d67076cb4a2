//! Content-Encoding codec for translated response bodies

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};

use crate::error::ResponseError;

/// Codings the response stage can both decode and re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
}

impl ContentEncoding {
    /// Parse a `Content-Encoding` header value. Absent or empty means identity.
    pub fn from_header(value: Option<&str>) -> Result<Self, ResponseError> {
        let raw = value.unwrap_or("").trim();
        match raw.to_ascii_lowercase().as_str() {
            "" | "identity" => Ok(Self::Identity),
            "gzip" | "x-gzip" => Ok(Self::Gzip),
            "deflate" => Ok(Self::Deflate),
            _ => Err(ResponseError::UnsupportedEncoding(raw.to_string())),
        }
    }

    /// Header value to send back, `None` for identity.
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            Self::Identity => None,
            Self::Gzip => Some("gzip"),
            Self::Deflate => Some("deflate"),
        }
    }

    pub fn decode(self, body: &[u8]) -> Result<Vec<u8>, ResponseError> {
        let mut out = Vec::new();
        let result = match self {
            Self::Identity => return Ok(body.to_vec()),
            Self::Gzip => GzDecoder::new(body).read_to_end(&mut out),
            // HTTP deflate is zlib-wrapped, but some servers send raw deflate
            Self::Deflate => ZlibDecoder::new(body).read_to_end(&mut out).or_else(|_| {
                out.clear();
                DeflateDecoder::new(body).read_to_end(&mut out)
            }),
        };
        result
            .map(|_| out)
            .map_err(|e| ResponseError::Decode(format!("{self:?}: {e}")))
    }

    pub fn encode(self, body: &[u8]) -> Result<Vec<u8>, ResponseError> {
        let result = match self {
            Self::Identity => return Ok(body.to_vec()),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body).and_then(|_| encoder.finish())
            }
            Self::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body).and_then(|_| encoder.finish())
            }
        };
        result.map_err(|e| ResponseError::Decode(format!("failed to encode {self:?}: {e}")))
    }
}

/// Reduce a client `Accept-Encoding` to codings the response stage can
/// re-encode. Falls back to `identity` when nothing usable is left.
pub fn negotiate_accept_encoding(client: Option<&str>) -> String {
    let kept: Vec<&str> = client
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|token| {
            let coding = token.split(';').next().unwrap_or("").trim();
            ["gzip", "deflate", "identity"]
                .iter()
                .any(|c| coding.eq_ignore_ascii_case(c))
        })
        .collect();

    if kept.is_empty() {
        "identity".to_string()
    } else {
        kept.join(", ")
    }
}
