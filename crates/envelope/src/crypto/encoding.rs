//! Base64 / hex helpers for request and response fields.
//!
//! Decode failures name the offending field so that the caller gets a useful
//! `validation_error` instead of a generic parse failure.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use common::ServiceError;

/// Standard padded base64, used for every envelope field and MAC.
pub fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a standard base64 request field.
///
/// # Errors
///
/// Returns [`ServiceError::Validation`] naming `field` on malformed input.
pub fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, ServiceError> {
    STANDARD
        .decode(value.trim())
        .map_err(|_| ServiceError::Validation(format!("field `{field}` is not valid base64")))
}

/// Decode a hex request field (`message_digest`).
///
/// # Errors
///
/// Returns [`ServiceError::Validation`] naming `field` on malformed input.
pub fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, ServiceError> {
    hex::decode(value.trim())
        .map_err(|_| ServiceError::Validation(format!("field `{field}` is not valid hex")))
}

/// How a provider's signatures are rendered on the wire.
///
/// Fixed per provider: callers of `ecc_verify` must send signatures back in
/// the same encoding `ecc_sign` produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    /// Standard alphabet with `=` padding.
    Base64,
    /// URL-safe alphabet without padding (JOSE style).
    Base64UrlNoPad,
}

impl SignatureEncoding {
    pub fn encode(self, signature: &[u8]) -> String {
        match self {
            SignatureEncoding::Base64 => STANDARD.encode(signature),
            SignatureEncoding::Base64UrlNoPad => URL_SAFE_NO_PAD.encode(signature),
        }
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if `value` is not in this encoding.
    pub fn decode(self, value: &str) -> Result<Vec<u8>, ServiceError> {
        let decoded = match self {
            SignatureEncoding::Base64 => STANDARD.decode(value.trim()),
            SignatureEncoding::Base64UrlNoPad => URL_SAFE_NO_PAD.decode(value.trim()),
        };
        decoded.map_err(|_| {
            ServiceError::Validation(format!("field `signature` is not valid {}", self.describe()))
        })
    }

    fn describe(self) -> &'static str {
        match self {
            SignatureEncoding::Base64 => "base64",
            SignatureEncoding::Base64UrlNoPad => "unpadded base64url",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_base64_names_field() {
        let err = decode_b64("iv", "!!!").unwrap_err();
        assert_eq!(err, ServiceError::Validation("field `iv` is not valid base64".into()));
    }

    #[test]
    fn hex_digest_decodes() {
        assert_eq!(decode_hex("message_digest", "00ff").unwrap(), vec![0x00, 0xff]);
        assert!(decode_hex("message_digest", "0g").is_err());
    }

    #[test]
    fn signature_encodings_differ() {
        let sig = [0xfb, 0xff, 0x01];
        assert_eq!(SignatureEncoding::Base64.encode(&sig), "+/8B");
        assert_eq!(SignatureEncoding::Base64UrlNoPad.encode(&sig), "-_8B");
        assert!(SignatureEncoding::Base64UrlNoPad.decode("+/8B").is_err());
        assert_eq!(SignatureEncoding::Base64.decode("+/8B").unwrap(), sig);
    }
}
