//! Response translation stage
//!
//! Runs only on a 2xx upstream response. Decodes the body, extracts the first
//! completion text and the model, builds the Kobold shape and re-encodes it
//! with the upstream's coding.

use bytes::Bytes;
use openai_api::ChatCompletionResponse;

use crate::encoding::ContentEncoding;
use crate::error::ResponseError;
use crate::kobold::KoboldResponse;

/// Translated body plus the coding it is encoded with.
#[derive(Debug)]
pub struct TranslatedResponse {
    pub body: Bytes,
    pub encoding: ContentEncoding,
}

/// Translate a buffered upstream body.
pub fn translate_response(
    content_encoding: Option<&str>,
    body: &[u8],
) -> Result<TranslatedResponse, ResponseError> {
    let encoding = ContentEncoding::from_header(content_encoding)?;
    let decoded = encoding.decode(body)?;

    let native: ChatCompletionResponse = serde_json::from_slice(&decoded)
        .map_err(|e| ResponseError::MalformedUpstreamResponse(format!("invalid JSON: {e}")))?;
    let text = native.primary_text().ok_or_else(|| {
        ResponseError::MalformedUpstreamResponse("response has no completion text".into())
    })?;

    let legacy = serde_json::to_vec(&KoboldResponse::new(text, native.model.as_str()))
        .map_err(|e| ResponseError::MalformedUpstreamResponse(format!("re-serialize: {e}")))?;

    Ok(TranslatedResponse {
        body: Bytes::from(encoding.encode(&legacy)?),
        encoding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPSTREAM: &[u8] = br#"{"id":"chatcmpl-1","model":"gpt-x","choices":[{"index":0,"message":{"role":"assistant","content":"hello"},"finish_reason":"stop"}]}"#;
    const EXPECTED: &str = r#"{"results":[{"text":"hello"}],"model":"gpt-x"}"#;

    #[test]
    fn gzip_round_trip_keeps_encoding() {
        let packed = ContentEncoding::Gzip.encode(UPSTREAM).unwrap();
        let out = translate_response(Some("gzip"), &packed).unwrap();

        assert_eq!(out.encoding, ContentEncoding::Gzip);
        let plain = ContentEncoding::Gzip.decode(&out.body).unwrap();
        assert_eq!(String::from_utf8(plain).unwrap(), EXPECTED);
    }

    #[test]
    fn deflate_round_trip_keeps_encoding() {
        let packed = ContentEncoding::Deflate.encode(UPSTREAM).unwrap();
        let out = translate_response(Some("deflate"), &packed).unwrap();
        assert_eq!(out.encoding, ContentEncoding::Deflate);
        let plain = ContentEncoding::Deflate.decode(&out.body).unwrap();
        assert_eq!(String::from_utf8(plain).unwrap(), EXPECTED);
    }

    #[test]
    fn identity_passes_plain_json() {
        let out = translate_response(None, UPSTREAM).unwrap();
        assert_eq!(out.encoding, ContentEncoding::Identity);
        assert_eq!(&out.body[..], EXPECTED.as_bytes());
    }

    #[test]
    fn empty_choices_is_malformed() {
        let err = translate_response(None, br#"{"model":"gpt-x","choices":[]}"#).unwrap_err();
        assert!(matches!(err, ResponseError::MalformedUpstreamResponse(_)));
    }

    #[test]
    fn non_json_is_malformed() {
        let err = translate_response(None, b"<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, ResponseError::MalformedUpstreamResponse(_)));
    }

    #[test]
    fn unknown_encoding_is_rejected_before_parsing() {
        let err = translate_response(Some("br"), UPSTREAM).unwrap_err();
        assert!(matches!(err, ResponseError::UnsupportedEncoding(_)));
    }
}
