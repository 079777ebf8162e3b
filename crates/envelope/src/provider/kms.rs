//! [`KmsProvider`]: AWS KMS key custody.
//!
//! Signing always sends a locally computed digest (`MessageType::Digest`), so
//! message size is never bounded by the KMS 4 KiB raw-message limit and an
//! empty message signs like any other.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{retry::RetryConfig, timeout::TimeoutConfig, BehaviorVersion};
use aws_sdk_kms::{
    config::http::HttpResponse,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::Blob,
    types::{DataKeySpec, EncryptionAlgorithmSpec, MacAlgorithmSpec, MessageType, SigningAlgorithmSpec},
    Client,
};
use common::protocol::{MacAlgorithm, SigningAlgorithm};
use tracing::debug;

use super::{GeneratedDataKey, KeyHandle, KeyProvider, ProviderError, SignInput, WrapAlgorithm};
use crate::crypto::encoding::SignatureEncoding;
use crate::crypto::DataKey;

/// [`KeyProvider`] backed by an `aws_sdk_kms::Client`.
#[derive(Clone)]
pub struct KmsProvider {
    client: Client,
}

impl KmsProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the standard AWS credential and region chain.
    ///
    /// `operation_timeout` bounds each SDK call including retries;
    /// `max_attempts` counts the first try.
    pub async fn from_env(
        endpoint_url: Option<&str>,
        operation_timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(operation_timeout)
                    .build(),
            )
            .retry_config(RetryConfig::standard().with_max_attempts(max_attempts))
            .load()
            .await;

        let mut builder = aws_sdk_kms::config::Builder::from(&config);
        if let Some(url) = endpoint_url {
            debug!(endpoint = url, "overriding KMS endpoint");
            builder = builder.endpoint_url(url);
        }
        Self::new(Client::from_conf(builder.build()))
    }
}

fn encryption_spec(algorithm: WrapAlgorithm) -> EncryptionAlgorithmSpec {
    match algorithm {
        WrapAlgorithm::SymmetricDefault => EncryptionAlgorithmSpec::SymmetricDefault,
        WrapAlgorithm::RsaesOaepSha256 => EncryptionAlgorithmSpec::RsaesOaepSha256,
    }
}

fn signing_spec(algorithm: SigningAlgorithm) -> SigningAlgorithmSpec {
    match algorithm {
        SigningAlgorithm::EcdsaSha256 => SigningAlgorithmSpec::EcdsaSha256,
        SigningAlgorithm::EcdsaSha384 => SigningAlgorithmSpec::EcdsaSha384,
    }
}

fn mac_spec(algorithm: MacAlgorithm) -> MacAlgorithmSpec {
    match algorithm {
        MacAlgorithm::HmacSha256 => MacAlgorithmSpec::HmacSha256,
        MacAlgorithm::HmacSha384 => MacAlgorithmSpec::HmacSha384,
    }
}

fn error_code<E, R>(err: &SdkError<E, R>) -> Option<&str>
where
    E: ProvideErrorMetadata,
{
    err.as_service_error().and_then(|e| e.code())
}

/// Map an SDK failure onto [`ProviderError`].
fn classify<E>(operation: &'static str, err: SdkError<E, HttpResponse>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let detail = format!("{operation}: {}", DisplayErrorContext(&err));
    match &err {
        SdkError::TimeoutError(_) => ProviderError::Timeout,
        SdkError::DispatchFailure(failure) if failure.is_timeout() => ProviderError::Timeout,
        SdkError::DispatchFailure(_) => ProviderError::Unavailable(detail),
        _ => {
            let status = err.raw_response().map(|r| r.status().as_u16());
            classify_response(error_code(&err), status, detail)
        }
    }
}

/// Classify by error code, treating any unrecognised 5xx answer as an outage.
///
/// Covers unparseable error bodies (an HTML 502 from a proxy) and service
/// errors outside the KMS model.
fn classify_response(code: Option<&str>, status: Option<u16>, detail: String) -> ProviderError {
    match classify_code(code, detail) {
        ProviderError::Rejected(detail) if status.is_some_and(|s| (500..600).contains(&s)) => {
            ProviderError::Unavailable(detail)
        }
        other => other,
    }
}

/// Map a KMS error code onto [`ProviderError`].
fn classify_code(code: Option<&str>, detail: String) -> ProviderError {
    match code {
        Some("NotFoundException") => ProviderError::KeyNotFound(detail),
        Some("AccessDeniedException" | "UnrecognizedClientException" | "ExpiredTokenException") => {
            ProviderError::AccessDenied(detail)
        }
        Some(
            "InvalidKeyUsageException"
            | "DisabledException"
            | "KMSInvalidStateException"
            | "IncorrectKeyException",
        ) => ProviderError::InvalidKeyUsage(detail),
        Some("InvalidCiphertextException") => ProviderError::InvalidCiphertext(detail),
        Some(
            "KMSInternalException"
            | "DependencyTimeoutException"
            | "KeyUnavailableException"
            | "ThrottlingException"
            | "LimitExceededException"
            | "ServiceUnavailable"
            | "InternalFailure",
        ) => ProviderError::Unavailable(detail),
        _ => ProviderError::Rejected(detail),
    }
}

fn required_blob(blob: Option<&Blob>, field: &str) -> Result<Vec<u8>, ProviderError> {
    blob.map(|b| b.as_ref().to_vec())
        .ok_or_else(|| ProviderError::MalformedResponse(format!("{field} missing")))
}

fn data_key_from(blob: Option<&Blob>) -> Result<DataKey, ProviderError> {
    let blob = blob.ok_or_else(|| ProviderError::MalformedResponse("Plaintext missing".into()))?;
    DataKey::from_slice(blob.as_ref()).map_err(|e| ProviderError::MalformedResponse(e.to_string()))
}

#[async_trait]
impl KeyProvider for KmsProvider {
    fn name(&self) -> &'static str {
        "aws-kms"
    }

    fn signature_encoding(&self) -> SignatureEncoding {
        SignatureEncoding::Base64
    }

    async fn generate_data_key(&self, key: &KeyHandle) -> Result<GeneratedDataKey, ProviderError> {
        let out = self
            .client
            .generate_data_key()
            .key_id(key.as_str())
            .key_spec(DataKeySpec::Aes256)
            .send()
            .await
            .map_err(|e| classify("GenerateDataKey", e))?;

        Ok(GeneratedDataKey {
            plaintext: data_key_from(out.plaintext())?,
            wrapped: required_blob(out.ciphertext_blob(), "CiphertextBlob")?,
        })
    }

    async fn wrap_key(
        &self,
        key: &KeyHandle,
        algorithm: WrapAlgorithm,
        data_key: &DataKey,
    ) -> Result<Vec<u8>, ProviderError> {
        let out = self
            .client
            .encrypt()
            .key_id(key.as_str())
            .plaintext(Blob::new(data_key.as_bytes()))
            .encryption_algorithm(encryption_spec(algorithm))
            .send()
            .await
            .map_err(|e| classify("Encrypt", e))?;

        required_blob(out.ciphertext_blob(), "CiphertextBlob")
    }

    async fn unwrap_key(
        &self,
        key: &KeyHandle,
        algorithm: WrapAlgorithm,
        wrapped: &[u8],
    ) -> Result<DataKey, ProviderError> {
        let out = self
            .client
            .decrypt()
            .key_id(key.as_str())
            .ciphertext_blob(Blob::new(wrapped))
            .encryption_algorithm(encryption_spec(algorithm))
            .send()
            .await
            .map_err(|e| classify("Decrypt", e))?;

        data_key_from(out.plaintext())
    }

    async fn sign(
        &self,
        key: &KeyHandle,
        algorithm: SigningAlgorithm,
        input: &SignInput,
    ) -> Result<Vec<u8>, ProviderError> {
        let out = self
            .client
            .sign()
            .key_id(key.as_str())
            .message(Blob::new(input.digest(algorithm)))
            .message_type(MessageType::Digest)
            .signing_algorithm(signing_spec(algorithm))
            .send()
            .await
            .map_err(|e| classify("Sign", e))?;

        required_blob(out.signature(), "Signature")
    }

    async fn verify(
        &self,
        key: &KeyHandle,
        algorithm: SigningAlgorithm,
        input: &SignInput,
        signature: &[u8],
    ) -> Result<bool, ProviderError> {
        let result = self
            .client
            .verify()
            .key_id(key.as_str())
            .message(Blob::new(input.digest(algorithm)))
            .message_type(MessageType::Digest)
            .signature(Blob::new(signature))
            .signing_algorithm(signing_spec(algorithm))
            .send()
            .await;

        match result {
            Ok(out) => Ok(out.signature_valid()),
            // KMS reports a non-matching signature as an error.
            Err(err) if error_code(&err) == Some("KMSInvalidSignatureException") => Ok(false),
            Err(err) => Err(classify("Verify", err)),
        }
    }

    async fn generate_mac(
        &self,
        key: &KeyHandle,
        algorithm: MacAlgorithm,
        message: &[u8],
    ) -> Result<Vec<u8>, ProviderError> {
        let out = self
            .client
            .generate_mac()
            .key_id(key.as_str())
            .message(Blob::new(message))
            .mac_algorithm(mac_spec(algorithm))
            .send()
            .await
            .map_err(|e| classify("GenerateMac", e))?;

        required_blob(out.mac(), "Mac")
    }
}
