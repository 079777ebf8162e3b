//! Key-custody providers: the only code that talks to AWS KMS or Azure Key Vault.
//!
//! Every operation handler receives an `Arc<dyn KeyProvider>`; nothing in this
//! crate holds a global client.
//!
//! # Security invariants
//!
//! - Master and signing keys never leave the provider. The only plaintext key
//!   material crossing this boundary is the per-message [`DataKey`].
//! - Provider error text is logged, never returned to callers.

pub mod key_vault;
pub mod kms;
pub mod local;

pub use key_vault::KeyVaultProvider;
pub use kms::KmsProvider;
pub use local::LocalProvider;

use std::sync::Arc;

use async_trait::async_trait;
use common::protocol::{MacAlgorithm, SigningAlgorithm};
use common::ServiceError;
use sha2::{Digest, Sha256, Sha384};
use thiserror::Error;
use tracing::info;

use crate::config::{Config, ProviderKind};
use crate::crypto::encoding::SignatureEncoding;
use crate::crypto::DataKey;

/// Opaque reference to a provider-held key: KMS key id / ARN / alias, Key Vault
/// `name` or `name/version`, or a local key name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyHandle(String);

impl KeyHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Algorithm used to wrap a data key under the master key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapAlgorithm {
    /// Provider-native symmetric wrapping (KMS `SYMMETRIC_DEFAULT`).
    SymmetricDefault,
    /// RSAES-OAEP with SHA-256 under an RSA key pair.
    RsaesOaepSha256,
}

impl WrapAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            WrapAlgorithm::SymmetricDefault => "SYMMETRIC_DEFAULT",
            WrapAlgorithm::RsaesOaepSha256 => "RSAES_OAEP_SHA_256",
        }
    }
}

/// What gets signed: the raw message or a digest computed by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInput {
    Message(Vec<u8>),
    Digest(Vec<u8>),
}

impl SignInput {
    /// The digest the signing algorithm operates on, hashing the message if needed.
    pub fn digest(&self, algorithm: SigningAlgorithm) -> Vec<u8> {
        match self {
            SignInput::Digest(digest) => digest.clone(),
            SignInput::Message(message) => match algorithm {
                SigningAlgorithm::EcdsaSha256 => Sha256::digest(message).to_vec(),
                SigningAlgorithm::EcdsaSha384 => Sha384::digest(message).to_vec(),
            },
        }
    }
}

/// A fresh data key together with its wrapped form.
#[derive(Debug)]
pub struct GeneratedDataKey {
    pub plaintext: DataKey,
    pub wrapped: Vec<u8>,
}

/// Errors reported by a key provider.
///
/// The `String` payloads carry provider detail for logs only.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("key does not permit this operation: {0}")]
    InvalidKeyUsage(String),

    #[error("wrapped key could not be unwrapped: {0}")]
    InvalidCiphertext(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider call timed out")]
    Timeout,

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::KeyNotFound(_) => ServiceError::KeyProvider("key not found".into()),
            ProviderError::AccessDenied(_) => {
                ServiceError::KeyProvider("access to key denied".into())
            }
            ProviderError::InvalidKeyUsage(_) => {
                ServiceError::KeyProvider("key does not permit this operation".into())
            }
            ProviderError::InvalidCiphertext(_) => {
                ServiceError::KeyProvider("provider could not unwrap the data key".into())
            }
            ProviderError::Rejected(_) => {
                ServiceError::KeyProvider("provider rejected the request".into())
            }
            ProviderError::MalformedResponse(_) => {
                ServiceError::KeyProvider("provider returned a malformed response".into())
            }
            ProviderError::UnsupportedAlgorithm(what) => ServiceError::UnsupportedAlgorithm(what),
            ProviderError::Unavailable(_) => ServiceError::KeyProviderUnavailable(
                "key provider is unreachable or throttling".into(),
            ),
            ProviderError::Timeout => ServiceError::DeadlineExceeded,
        }
    }
}

/// Operations a key-custody provider performs on keys it never exports.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Short provider name for logs and `/health`.
    fn name(&self) -> &'static str;

    /// Wire encoding of signatures produced by [`KeyProvider::sign`].
    fn signature_encoding(&self) -> SignatureEncoding;

    /// Generate a 256-bit data key and return it in plaintext and wrapped under `key`.
    async fn generate_data_key(&self, key: &KeyHandle) -> Result<GeneratedDataKey, ProviderError>;

    /// Wrap `data_key` under `key`.
    async fn wrap_key(
        &self,
        key: &KeyHandle,
        algorithm: WrapAlgorithm,
        data_key: &DataKey,
    ) -> Result<Vec<u8>, ProviderError>;

    /// Recover a data key wrapped by [`KeyProvider::wrap_key`] or
    /// [`KeyProvider::generate_data_key`].
    async fn unwrap_key(
        &self,
        key: &KeyHandle,
        algorithm: WrapAlgorithm,
        wrapped: &[u8],
    ) -> Result<DataKey, ProviderError>;

    async fn sign(
        &self,
        key: &KeyHandle,
        algorithm: SigningAlgorithm,
        input: &SignInput,
    ) -> Result<Vec<u8>, ProviderError>;

    /// Returns `Ok(false)` for a well-formed signature that does not verify.
    async fn verify(
        &self,
        key: &KeyHandle,
        algorithm: SigningAlgorithm,
        input: &SignInput,
        signature: &[u8],
    ) -> Result<bool, ProviderError>;

    async fn generate_mac(
        &self,
        key: &KeyHandle,
        algorithm: MacAlgorithm,
        message: &[u8],
    ) -> Result<Vec<u8>, ProviderError>;
}

/// Build the provider selected by `cfg.provider`.
///
/// # Errors
///
/// Returns an error if provider-specific configuration is invalid (bad local
/// key material, malformed vault URL).
pub async fn from_config(cfg: &Config) -> anyhow::Result<Arc<dyn KeyProvider>> {
    let provider: Arc<dyn KeyProvider> = match cfg.provider {
        ProviderKind::Aws => Arc::new(
            KmsProvider::from_env(
                cfg.aws_endpoint_url_kms.as_deref(),
                cfg.provider_timeout(),
                cfg.provider_max_attempts,
            )
            .await,
        ),
        ProviderKind::Azure => Arc::new(KeyVaultProvider::from_config(cfg)?),
        ProviderKind::Local => Arc::new(LocalProvider::from_config(cfg)?),
    };
    info!(provider = provider.name(), "key provider initialised");
    Ok(provider)
}
