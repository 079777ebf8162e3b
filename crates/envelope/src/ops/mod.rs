//! The operation handler shared by the CLI and the HTTP adapter.
//!
//! [`Operations::execute`] takes a parsed [`CryptoRequest`], resolves the key,
//! runs the operation under the provider deadline and returns either an
//! [`OperationOutput`] or a classified [`ServiceError`].

pub mod envelope;
pub mod mac;
pub mod signing;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::protocol::{
    AesEncryptResult, CryptoRequest, CryptoResponse, DecryptResult, MacAlgorithm, OperationOutput,
    RsaEncryptResult, SignatureResult, SigningAlgorithm, VerifyResult,
};
use common::ServiceError;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use self::envelope::{EnvelopeEncryptedMessage, WrapMode};
use crate::crypto::encoding::{decode_b64, encode_b64};
use crate::crypto::SealedMessage;
use crate::provider::{KeyHandle, KeyProvider, ProviderError};

/// Key ids used when a request carries no `key_id`.
///
/// Signing and MAC keys are fixed to one algorithm, so those defaults are kept
/// per algorithm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultKeys {
    pub aes: Option<String>,
    pub rsa: Option<String>,
    pub ecc256: Option<String>,
    pub ecc384: Option<String>,
    pub hmac256: Option<String>,
    pub hmac384: Option<String>,
}

impl DefaultKeys {
    /// Default signing key for `algorithm` and the variable that sets it.
    fn signing(&self, algorithm: SigningAlgorithm) -> (&Option<String>, &'static str) {
        match algorithm {
            SigningAlgorithm::EcdsaSha256 => (&self.ecc256, "ECC_KEY_ID"),
            SigningAlgorithm::EcdsaSha384 => (&self.ecc384, "ECC384_KEY_ID"),
        }
    }

    /// Default MAC key for `algorithm` and the variable that sets it.
    fn mac(&self, algorithm: MacAlgorithm) -> (&Option<String>, &'static str) {
        match algorithm {
            MacAlgorithm::HmacSha256 => (&self.hmac256, "HMAC_KEY_ID"),
            MacAlgorithm::HmacSha384 => (&self.hmac384, "HMAC384_KEY_ID"),
        }
    }
}

/// Log the provider's own error text, then reduce it to a public error.
pub(crate) fn provider_failure(err: ProviderError) -> ServiceError {
    warn!(error = %err, "key provider call failed");
    err.into()
}

/// Stateless operation handler. Cheap to clone.
#[derive(Clone)]
pub struct Operations {
    provider: Arc<dyn KeyProvider>,
    defaults: Arc<DefaultKeys>,
    deadline: Duration,
}

impl Operations {
    pub fn new(provider: Arc<dyn KeyProvider>, defaults: DefaultKeys, deadline: Duration) -> Self {
        Self {
            provider,
            defaults: Arc::new(defaults),
            deadline,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Run one request to completion or until the deadline passes.
    pub async fn execute(&self, request: CryptoRequest) -> Result<OperationOutput, ServiceError> {
        let operation = request.operation();
        let span = info_span!(
            "crypto_operation",
            operation = operation.as_str(),
            provider = self.provider.name(),
            request_id = %Uuid::new_v4(),
        );

        async move {
            let started = Instant::now();
            // Dropping the dispatch future on timeout cancels the in-flight provider call.
            let outcome = match tokio::time::timeout(self.deadline, self.dispatch(request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ServiceError::DeadlineExceeded),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &outcome {
                Ok(_) => info!(elapsed_ms, "operation completed"),
                Err(e) => warn!(elapsed_ms, code = e.code(), error = %e, "operation failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// [`Operations::execute`] folded into the wire response.
    pub async fn respond(&self, request: CryptoRequest) -> CryptoResponse {
        self.execute(request).await.into()
    }

    async fn dispatch(&self, request: CryptoRequest) -> Result<OperationOutput, ServiceError> {
        let provider = self.provider.as_ref();
        match request {
            CryptoRequest::AesEncrypt(req) => {
                let key = resolve_key(req.key_id, &self.defaults.aes, "AES_KEY_ID")?;
                let envelope =
                    envelope::encrypt(provider, &key, WrapMode::ProviderGenerated, req.message.as_bytes())
                        .await?;
                Ok(OperationOutput::AesEncrypted(AesEncryptResult {
                    ciphertext: encode_b64(&envelope.sealed.ciphertext),
                    iv: encode_b64(&envelope.sealed.nonce),
                    tag: encode_b64(&envelope.sealed.tag),
                    encrypted_key: encode_b64(&envelope.wrapped_key),
                }))
            }
            CryptoRequest::AesDecrypt(req) => {
                let key = resolve_key(req.key_id, &self.defaults.aes, "AES_KEY_ID")?;
                let envelope = decode_envelope(
                    &req.ciphertext,
                    &req.iv,
                    &req.tag,
                    ("encrypted_key", req.encrypted_key.as_str()),
                )?;
                let plaintext =
                    envelope::decrypt(provider, &key, WrapMode::ProviderGenerated, &envelope).await?;
                decrypted(plaintext)
            }
            CryptoRequest::RsaEncrypt(req) => {
                let key = resolve_key(req.key_id, &self.defaults.rsa, "RSA_KEY_ID")?;
                let envelope =
                    envelope::encrypt(provider, &key, WrapMode::RsaOaep, req.message.as_bytes()).await?;
                Ok(OperationOutput::RsaEncrypted(RsaEncryptResult {
                    ciphertext: encode_b64(&envelope.sealed.ciphertext),
                    iv: encode_b64(&envelope.sealed.nonce),
                    tag: encode_b64(&envelope.sealed.tag),
                    encrypted_aes_key: encode_b64(&envelope.wrapped_key),
                }))
            }
            CryptoRequest::RsaDecrypt(req) => {
                let key = resolve_key(req.key_id, &self.defaults.rsa, "RSA_KEY_ID")?;
                let envelope = decode_envelope(
                    &req.ciphertext,
                    &req.iv,
                    &req.tag,
                    ("encrypted_aes_key", req.encrypted_aes_key.as_str()),
                )?;
                let plaintext = envelope::decrypt(provider, &key, WrapMode::RsaOaep, &envelope).await?;
                decrypted(plaintext)
            }
            CryptoRequest::EccSign(req) => {
                let algorithm = req.algorithm.unwrap_or_default();
                let (default, env_name) = self.defaults.signing(algorithm);
                let key = resolve_key(req.key_id, default, env_name)?;
                let input = signing::sign_input(req.message, req.message_digest, algorithm)?;
                let signature = signing::sign(provider, &key, algorithm, &input).await?;
                Ok(OperationOutput::Signature(SignatureResult { signature }))
            }
            CryptoRequest::EccVerify(req) => {
                let algorithm = req.algorithm.unwrap_or_default();
                let (default, env_name) = self.defaults.signing(algorithm);
                let key = resolve_key(req.key_id, default, env_name)?;
                let input = signing::sign_input(req.message, req.message_digest, algorithm)?;
                let valid = signing::verify(provider, &key, algorithm, &input, &req.signature).await?;
                Ok(OperationOutput::Verification(VerifyResult { valid }))
            }
            CryptoRequest::HmacGenerate(req) => {
                let algorithm = req.algorithm.unwrap_or_default();
                let (default, env_name) = self.defaults.mac(algorithm);
                let key = resolve_key(req.key_id, default, env_name)?;
                let signature = mac::generate(provider, &key, algorithm, req.message.as_bytes()).await?;
                Ok(OperationOutput::Signature(SignatureResult { signature }))
            }
        }
    }
}

/// Use the request's `key_id` if present, otherwise the configured default.
fn resolve_key(
    requested: Option<String>,
    default: &Option<String>,
    env_name: &str,
) -> Result<KeyHandle, ServiceError> {
    match requested {
        Some(id) if id.trim().is_empty() => {
            Err(ServiceError::Validation("field `key_id` must not be empty".into()))
        }
        Some(id) => Ok(KeyHandle::new(id)),
        None => default.clone().map(KeyHandle::new).ok_or_else(|| {
            ServiceError::Validation(format!("no `key_id` in request and {env_name} is not set"))
        }),
    }
}

fn decode_envelope(
    ciphertext: &str,
    iv: &str,
    tag: &str,
    (wrapped_field, wrapped): (&str, &str),
) -> Result<EnvelopeEncryptedMessage, ServiceError> {
    Ok(EnvelopeEncryptedMessage {
        sealed: SealedMessage {
            ciphertext: decode_b64("ciphertext", ciphertext)?,
            nonce: decode_b64("iv", iv)?,
            tag: decode_b64("tag", tag)?,
        },
        wrapped_key: decode_b64(wrapped_field, wrapped)?,
    })
}

fn decrypted(plaintext: Vec<u8>) -> Result<OperationOutput, ServiceError> {
    let message = String::from_utf8(plaintext)
        .map_err(|_| ServiceError::Validation("decrypted message is not valid UTF-8".into()))?;
    Ok(OperationOutput::Decrypted(DecryptResult { message }))
}

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;
    use common::protocol::{
        AesDecryptRequest, EncryptRequest, MacAlgorithm, MacRequest, SignRequest, SigningAlgorithm,
        VerifyRequest,
    };

    use super::*;
    use crate::crypto::encoding::SignatureEncoding;
    use crate::crypto::DataKey;
    use crate::provider::{
        local, GeneratedDataKey, LocalProvider, MockKeyProvider, SignInput, WrapAlgorithm,
    };

    /// Operations over an ephemeral local provider with the local default keys.
    pub(crate) fn local_operations() -> Operations {
        Operations::new(
            Arc::new(LocalProvider::ephemeral()),
            DefaultKeys {
                aes: Some(local::AES_KEY_NAME.into()),
                rsa: None,
                ecc256: Some(local::ECC256_KEY_NAME.into()),
                ecc384: Some(local::ECC384_KEY_NAME.into()),
                hmac256: Some(local::HMAC_KEY_NAME.into()),
                hmac384: Some(local::HMAC_KEY_NAME.into()),
            },
            Duration::from_secs(5),
        )
    }

    /// Never answers within any reasonable deadline.
    pub(crate) struct SlowProvider;

    #[async_trait]
    impl KeyProvider for SlowProvider {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn signature_encoding(&self) -> SignatureEncoding {
            SignatureEncoding::Base64
        }
        async fn generate_data_key(&self, _: &KeyHandle) -> Result<GeneratedDataKey, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ProviderError::Timeout)
        }
        async fn wrap_key(
            &self,
            _: &KeyHandle,
            _: WrapAlgorithm,
            _: &DataKey,
        ) -> Result<Vec<u8>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ProviderError::Timeout)
        }
        async fn unwrap_key(
            &self,
            _: &KeyHandle,
            _: WrapAlgorithm,
            _: &[u8],
        ) -> Result<DataKey, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ProviderError::Timeout)
        }
        async fn sign(
            &self,
            _: &KeyHandle,
            _: SigningAlgorithm,
            _: &SignInput,
        ) -> Result<Vec<u8>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ProviderError::Timeout)
        }
        async fn verify(
            &self,
            _: &KeyHandle,
            _: SigningAlgorithm,
            _: &SignInput,
            _: &[u8],
        ) -> Result<bool, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ProviderError::Timeout)
        }
        async fn generate_mac(
            &self,
            _: &KeyHandle,
            _: MacAlgorithm,
            _: &[u8],
        ) -> Result<Vec<u8>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ProviderError::Timeout)
        }
    }

    fn encrypt_request(message: &str) -> CryptoRequest {
        CryptoRequest::AesEncrypt(EncryptRequest {
            message: message.into(),
            key_id: None,
        })
    }

    #[tokio::test]
    async fn aes_encrypt_then_decrypt() {
        let ops = local_operations();
        let encrypted = match ops.execute(encrypt_request("hello world")).await.unwrap() {
            OperationOutput::AesEncrypted(result) => result,
            other => panic!("unexpected output: {other:?}"),
        };

        let decrypted = ops
            .execute(CryptoRequest::AesDecrypt(AesDecryptRequest {
                ciphertext: encrypted.ciphertext,
                iv: encrypted.iv,
                tag: encrypted.tag,
                encrypted_key: encrypted.encrypted_key,
                key_id: None,
            }))
            .await
            .unwrap();
        assert_eq!(
            decrypted,
            OperationOutput::Decrypted(DecryptResult {
                message: "hello world".into()
            })
        );
    }

    #[tokio::test]
    async fn tampered_ciphertext_is_integrity_error() {
        let ops = local_operations();
        let encrypted = match ops.execute(encrypt_request("hello world")).await.unwrap() {
            OperationOutput::AesEncrypted(result) => result,
            other => panic!("unexpected output: {other:?}"),
        };
        let mut ciphertext = decode_b64("ciphertext", &encrypted.ciphertext).unwrap();
        ciphertext[3] ^= 0x10;

        let err = ops
            .execute(CryptoRequest::AesDecrypt(AesDecryptRequest {
                ciphertext: encode_b64(&ciphertext),
                iv: encrypted.iv,
                tag: encrypted.tag,
                encrypted_key: encrypted.encrypted_key,
                key_id: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Integrity);
    }

    #[tokio::test]
    async fn sign_verify_and_mac() {
        let ops = local_operations();
        let signature = match ops
            .execute(CryptoRequest::EccSign(SignRequest {
                message: Some("hello world".into()),
                message_digest: None,
                algorithm: None,
                key_id: None,
            }))
            .await
            .unwrap()
        {
            OperationOutput::Signature(result) => result.signature,
            other => panic!("unexpected output: {other:?}"),
        };

        let verify = |message: &str| {
            CryptoRequest::EccVerify(VerifyRequest {
                message: Some(message.into()),
                message_digest: None,
                signature: signature.clone(),
                algorithm: Some(SigningAlgorithm::EcdsaSha256),
                key_id: None,
            })
        };
        assert_eq!(
            ops.execute(verify("hello world")).await.unwrap(),
            OperationOutput::Verification(VerifyResult { valid: true })
        );
        assert_eq!(
            ops.execute(verify("goodbye world")).await.unwrap(),
            OperationOutput::Verification(VerifyResult { valid: false })
        );

        let mac = |message: &str| {
            CryptoRequest::HmacGenerate(MacRequest {
                message: message.into(),
                algorithm: None,
                key_id: None,
            })
        };
        assert_eq!(
            ops.execute(mac("hello world")).await.unwrap(),
            ops.execute(mac("hello world")).await.unwrap()
        );
    }

    #[tokio::test]
    async fn missing_default_key_is_validation_error() {
        let ops = local_operations();
        let err = ops
            .execute(CryptoRequest::RsaEncrypt(EncryptRequest {
                message: "m".into(),
                key_id: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert!(err.to_string().contains("RSA_KEY_ID"));
    }

    #[tokio::test]
    async fn rsa_on_local_provider_is_unsupported() {
        let ops = local_operations();
        let err = ops
            .execute(CryptoRequest::RsaEncrypt(EncryptRequest {
                message: "m".into(),
                key_id: Some(local::AES_KEY_NAME.into()),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unsupported_algorithm");
    }

    #[tokio::test]
    async fn bad_base64_field_is_named() {
        let ops = local_operations();
        let err = ops
            .execute(CryptoRequest::AesDecrypt(AesDecryptRequest {
                ciphertext: "AAAA".into(),
                iv: "not base64!".into(),
                tag: "AAAA".into(),
                encrypted_key: "AAAA".into(),
                key_id: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Validation("field `iv` is not valid base64".into()));
    }

    #[tokio::test]
    async fn non_utf8_plaintext_is_validation_error() {
        let provider = LocalProvider::ephemeral();
        let key = KeyHandle::new(local::AES_KEY_NAME);
        let envelope = envelope::encrypt(&provider, &key, WrapMode::ProviderGenerated, &[0xff, 0xfe])
            .await
            .unwrap();
        let ops = Operations::new(Arc::new(provider), DefaultKeys::default(), Duration::from_secs(5));

        let err = ops
            .execute(CryptoRequest::AesDecrypt(AesDecryptRequest {
                ciphertext: encode_b64(&envelope.sealed.ciphertext),
                iv: encode_b64(&envelope.sealed.nonce),
                tag: encode_b64(&envelope.sealed.tag),
                encrypted_key: encode_b64(&envelope.wrapped_key),
                key_id: Some(local::AES_KEY_NAME.into()),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn slow_provider_hits_deadline() {
        let ops = Operations::new(
            Arc::new(SlowProvider),
            DefaultKeys {
                aes: Some("k".into()),
                ..DefaultKeys::default()
            },
            Duration::from_millis(100),
        );
        let err = ops.execute(encrypt_request("m")).await.unwrap_err();
        assert_eq!(err, ServiceError::DeadlineExceeded);
        assert_eq!(err.http_status(), 504);
    }

    #[tokio::test]
    async fn provider_outage_is_unavailable() {
        let mut provider = MockKeyProvider::new();
        provider.expect_name().return_const("mock");
        provider
            .expect_generate_data_key()
            .returning(|_| Err(ProviderError::Unavailable("dns error: kms.eu-west-1".into())));
        let ops = Operations::new(
            Arc::new(provider),
            DefaultKeys {
                aes: Some("k".into()),
                ..DefaultKeys::default()
            },
            Duration::from_secs(5),
        );

        let response = ops.respond(encrypt_request("m")).await;
        match response {
            CryptoResponse::Error(body) => {
                assert_eq!(body.code, "key_provider_unavailable");
                assert!(!body.message.contains("dns error"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hmac_sha384_is_longer() {
        let ops = local_operations();
        let tag = |algorithm| {
            CryptoRequest::HmacGenerate(MacRequest {
                message: String::new(),
                algorithm: Some(algorithm),
                key_id: None,
            })
        };
        let short = match ops.execute(tag(MacAlgorithm::HmacSha256)).await.unwrap() {
            OperationOutput::Signature(r) => decode_b64("signature", &r.signature).unwrap(),
            other => panic!("unexpected output: {other:?}"),
        };
        let long = match ops.execute(tag(MacAlgorithm::HmacSha384)).await.unwrap() {
            OperationOutput::Signature(r) => decode_b64("signature", &r.signature).unwrap(),
            other => panic!("unexpected output: {other:?}"),
        };
        assert_eq!(short.len(), 32);
        assert_eq!(long.len(), 48);
    }

    #[tokio::test]
    async fn ecdsa_sha384_signs_with_the_p384_default() {
        let ops = local_operations();
        let signature = match ops
            .execute(CryptoRequest::EccSign(SignRequest {
                message: Some("hello world".into()),
                message_digest: None,
                algorithm: Some(SigningAlgorithm::EcdsaSha384),
                key_id: None,
            }))
            .await
            .unwrap()
        {
            OperationOutput::Signature(result) => result.signature,
            other => panic!("unexpected output: {other:?}"),
        };

        let verified = ops
            .execute(CryptoRequest::EccVerify(VerifyRequest {
                message: Some("hello world".into()),
                message_digest: None,
                signature,
                algorithm: Some(SigningAlgorithm::EcdsaSha384),
                key_id: Some(local::ECC384_KEY_NAME.into()),
            }))
            .await
            .unwrap();
        assert_eq!(verified, OperationOutput::Verification(VerifyResult { valid: true }));
    }

    #[tokio::test]
    async fn mac_default_key_follows_algorithm() {
        let mut provider = MockKeyProvider::new();
        provider.expect_name().return_const("mock");
        provider
            .expect_generate_mac()
            .withf(|key, alg, _| key.as_str() == "mac-384" && *alg == MacAlgorithm::HmacSha384)
            .times(1)
            .returning(|_, _, _| Ok(vec![0; 48]));
        let ops = Operations::new(
            Arc::new(provider),
            DefaultKeys {
                hmac256: Some("mac-256".into()),
                hmac384: Some("mac-384".into()),
                ..DefaultKeys::default()
            },
            Duration::from_secs(5),
        );

        ops.execute(CryptoRequest::HmacGenerate(MacRequest {
            message: "m".into(),
            algorithm: Some(MacAlgorithm::HmacSha384),
            key_id: None,
        }))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn missing_p384_default_names_its_variable() {
        let ops = Operations::new(
            Arc::new(LocalProvider::ephemeral()),
            DefaultKeys {
                ecc256: Some(local::ECC256_KEY_NAME.into()),
                ..DefaultKeys::default()
            },
            Duration::from_secs(5),
        );
        let err = ops
            .execute(CryptoRequest::EccSign(SignRequest {
                message: Some("m".into()),
                message_digest: None,
                algorithm: Some(SigningAlgorithm::EcdsaSha384),
                key_id: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert!(err.to_string().contains("ECC384_KEY_ID"));
    }
}
