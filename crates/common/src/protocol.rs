//! Request and response types for every crypto operation.
//!
//! These types are serialised as JSON by both the CLI and the HTTP adapter.
//! Binary fields (`ciphertext`, `iv`, `tag`, wrapped keys, signatures) travel as
//! base64 strings; `message_digest` travels as hex.

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

// ---------------------------------------------------------------------------
// Algorithms
// ---------------------------------------------------------------------------

/// ECDSA signing algorithm. Accepts both the KMS and the JOSE spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    #[default]
    #[serde(rename = "ECDSA_SHA_256", alias = "ES256")]
    EcdsaSha256,
    #[serde(rename = "ECDSA_SHA_384", alias = "ES384")]
    EcdsaSha384,
}

impl SigningAlgorithm {
    /// Length in bytes of the digest this algorithm signs.
    pub fn digest_len(self) -> usize {
        match self {
            SigningAlgorithm::EcdsaSha256 => 32,
            SigningAlgorithm::EcdsaSha384 => 48,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SigningAlgorithm::EcdsaSha256 => "ECDSA_SHA_256",
            SigningAlgorithm::EcdsaSha384 => "ECDSA_SHA_384",
        }
    }
}

/// HMAC algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MacAlgorithm {
    #[default]
    #[serde(rename = "HMAC_SHA_256")]
    HmacSha256,
    #[serde(rename = "HMAC_SHA_384")]
    HmacSha384,
}

impl MacAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            MacAlgorithm::HmacSha256 => "HMAC_SHA_256",
            MacAlgorithm::HmacSha384 => "HMAC_SHA_384",
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Operation kinds, spelled as they appear in the `operation` tag and in
/// `/v1/operations/{operation}` paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    AesEncrypt,
    AesDecrypt,
    RsaEncrypt,
    RsaDecrypt,
    EccSign,
    EccVerify,
    HmacGenerate,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::AesEncrypt,
        Operation::AesDecrypt,
        Operation::RsaEncrypt,
        Operation::RsaDecrypt,
        Operation::EccSign,
        Operation::EccVerify,
        Operation::HmacGenerate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::AesEncrypt => "aes_encrypt",
            Operation::AesDecrypt => "aes_decrypt",
            Operation::RsaEncrypt => "rsa_encrypt",
            Operation::RsaDecrypt => "rsa_decrypt",
            Operation::EccSign => "ecc_sign",
            Operation::EccVerify => "ecc_verify",
            Operation::HmacGenerate => "hmac_generate",
        }
    }

    /// Parse an operation name, returning `None` for unknown names.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }
}

/// Request body for `aes_encrypt` and `rsa_encrypt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptRequest {
    /// UTF-8 plaintext. May be empty.
    pub message: String,
    /// Key handle overriding the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// Request body for `aes_decrypt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AesDecryptRequest {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
    /// Data key wrapped by the provider (`GenerateDataKey` ciphertext blob).
    pub encrypted_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// Request body for `rsa_decrypt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaDecryptRequest {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
    /// Data key wrapped with RSAES-OAEP-SHA-256.
    pub encrypted_aes_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// Request body for `ecc_sign`. Exactly one of `message` / `message_digest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Hex-encoded pre-computed digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<SigningAlgorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// Request body for `ecc_verify`. Exactly one of `message` / `message_digest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_digest: Option<String>,
    /// Signature in the provider's encoding (see `ecc_sign`).
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<SigningAlgorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// Request body for `hmac_generate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<MacAlgorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// A crypto request, tagged by the `operation` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum CryptoRequest {
    AesEncrypt(EncryptRequest),
    AesDecrypt(AesDecryptRequest),
    RsaEncrypt(EncryptRequest),
    RsaDecrypt(RsaDecryptRequest),
    EccSign(SignRequest),
    EccVerify(VerifyRequest),
    HmacGenerate(MacRequest),
}

impl CryptoRequest {
    /// The operation kind of this request.
    pub fn operation(&self) -> Operation {
        match self {
            CryptoRequest::AesEncrypt(_) => Operation::AesEncrypt,
            CryptoRequest::AesDecrypt(_) => Operation::AesDecrypt,
            CryptoRequest::RsaEncrypt(_) => Operation::RsaEncrypt,
            CryptoRequest::RsaDecrypt(_) => Operation::RsaDecrypt,
            CryptoRequest::EccSign(_) => Operation::EccSign,
            CryptoRequest::EccVerify(_) => Operation::EccVerify,
            CryptoRequest::HmacGenerate(_) => Operation::HmacGenerate,
        }
    }

    /// Parse a request from raw JSON bytes.
    ///
    /// When `operation` is given (path segment or `--operation` flag) the body
    /// may omit the `operation` tag; if it carries one, the two must agree.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] for invalid JSON, an unknown or
    /// conflicting operation, or missing/mistyped fields.
    pub fn from_json(body: &[u8], operation: Option<&str>) -> Result<Self, ServiceError> {
        let mut value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ServiceError::Validation(format!("request body is not valid JSON: {e}")))?;

        if let Some(name) = operation {
            let op = Operation::parse(name)
                .ok_or_else(|| ServiceError::Validation(format!("unknown operation: {name}")))?;
            let obj = value.as_object_mut().ok_or_else(|| {
                ServiceError::Validation("request body must be a JSON object".into())
            })?;
            match obj.get("operation") {
                Some(existing) if existing.as_str() != Some(op.as_str()) => {
                    return Err(ServiceError::Validation(format!(
                        "operation in body does not match requested operation {name}"
                    )));
                }
                Some(_) => {}
                None => {
                    obj.insert("operation".into(), op.as_str().into());
                }
            }
        }

        serde_json::from_value(value)
            .map_err(|e| ServiceError::Validation(format!("invalid request: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Result of `aes_encrypt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AesEncryptResult {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
    pub encrypted_key: String,
}

/// Result of `rsa_encrypt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaEncryptResult {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
    pub encrypted_aes_key: String,
}

/// Result of `aes_decrypt` and `rsa_decrypt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptResult {
    pub message: String,
}

/// Result of `ecc_sign` and `hmac_generate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResult {
    pub signature: String,
}

/// Result of `ecc_verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub valid: bool,
}

/// Operation-specific output, serialised without a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationOutput {
    AesEncrypted(AesEncryptResult),
    RsaEncrypted(RsaEncryptResult),
    Decrypted(DecryptResult),
    Signature(SignatureResult),
    Verification(VerifyResult),
}

/// Standard error body returned on any failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable error kind (e.g. `"integrity_error"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&ServiceError> for ErrorResponse {
    fn from(err: &ServiceError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// Discriminated outcome: `{"result": {...}}` or `{"error": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CryptoResponse {
    Result(OperationOutput),
    Error(ErrorResponse),
}

impl CryptoResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, CryptoResponse::Error(_))
    }
}

impl From<Result<OperationOutput, ServiceError>> for CryptoResponse {
    fn from(outcome: Result<OperationOutput, ServiceError>) -> Self {
        match outcome {
            Ok(output) => CryptoResponse::Result(output),
            Err(err) => CryptoResponse::Error(ErrorResponse::from(&err)),
        }
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` once the server is accepting requests.
    pub status: String,
    /// Name of the configured key provider (`"aws-kms"`, `"azure-key-vault"`, `"local"`).
    pub provider: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tagged_request_parses() {
        let body = br#"{"operation":"aes_encrypt","message":"hello world"}"#;
        let req = CryptoRequest::from_json(body, None).unwrap();
        assert_eq!(
            req,
            CryptoRequest::AesEncrypt(EncryptRequest {
                message: "hello world".into(),
                key_id: None,
            })
        );
        assert_eq!(req.operation(), Operation::AesEncrypt);
    }

    #[test]
    fn path_operation_fills_missing_tag() {
        let body = br#"{"message_digest":"00","signature":"c2ln"}"#;
        let req = CryptoRequest::from_json(body, Some("ecc_verify")).unwrap();
        assert_eq!(req.operation(), Operation::EccVerify);
    }

    #[test]
    fn conflicting_operation_rejected() {
        let body = br#"{"operation":"aes_encrypt","message":"x"}"#;
        let err = CryptoRequest::from_json(body, Some("rsa_encrypt")).unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn unknown_operation_rejected() {
        let err = CryptoRequest::from_json(br#"{"message":"x"}"#, Some("sha1")).unwrap_err();
        assert!(err.to_string().contains("unknown operation"));

        let err = CryptoRequest::from_json(br#"{"operation":"sha1","message":"x"}"#, None)
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn missing_field_rejected() {
        let err = CryptoRequest::from_json(
            br#"{"operation":"aes_decrypt","ciphertext":"","iv":"","tag":""}"#,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("encrypted_key"));
    }

    #[test]
    fn invalid_json_rejected() {
        let err = CryptoRequest::from_json(b"{not json", None).unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn algorithm_aliases() {
        let req = CryptoRequest::from_json(
            br#"{"operation":"ecc_sign","message":"m","algorithm":"ES384"}"#,
            None,
        )
        .unwrap();
        match req {
            CryptoRequest::EccSign(sign) => {
                assert_eq!(sign.algorithm, Some(SigningAlgorithm::EcdsaSha384))
            }
            other => panic!("unexpected request: {other:?}"),
        }
        assert_eq!(SigningAlgorithm::EcdsaSha384.digest_len(), 48);
    }

    #[test]
    fn response_shapes() {
        let ok = CryptoResponse::from(Ok::<_, ServiceError>(OperationOutput::Verification(
            VerifyResult { valid: true },
        )));
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"result": {"valid": true}}));

        let err = CryptoResponse::from(Err::<OperationOutput, _>(ServiceError::Integrity));
        assert!(err.is_error());
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"error": {"code": "integrity_error", "message": "integrity check failed"}})
        );
    }

    #[test]
    fn rsa_and_aes_results_stay_distinct() {
        let rsa = json!({"result": {
            "ciphertext": "Yw==", "iv": "aXY=", "tag": "dGFn", "encrypted_aes_key": "a2V5"
        }});
        let decoded: CryptoResponse = serde_json::from_value(rsa).unwrap();
        assert!(matches!(
            decoded,
            CryptoResponse::Result(OperationOutput::RsaEncrypted(_))
        ));
    }

    #[test]
    fn operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::parse(op.as_str()), Some(op));
        }
    }
}
