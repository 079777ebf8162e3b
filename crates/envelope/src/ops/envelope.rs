//! Envelope encryption: a one-time data key wrapped by the provider, the
//! message sealed locally under it.

use common::ServiceError;

use super::provider_failure;
use crate::crypto::cipher;
use crate::crypto::{CipherError, DataKey, SealedMessage};
use crate::provider::{KeyHandle, KeyProvider, WrapAlgorithm};

/// How the data key is produced and wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    /// The provider generates the data key and its wrapped copy
    /// (`GenerateDataKey`, unwrapped with `Decrypt`).
    ProviderGenerated,
    /// The data key is generated locally and wrapped with RSA-OAEP-SHA-256.
    RsaOaep,
}

impl WrapMode {
    fn algorithm(self) -> WrapAlgorithm {
        match self {
            WrapMode::ProviderGenerated => WrapAlgorithm::SymmetricDefault,
            WrapMode::RsaOaep => WrapAlgorithm::RsaesOaepSha256,
        }
    }
}

/// Everything needed to decrypt a message, given access to the wrapping key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeEncryptedMessage {
    pub sealed: SealedMessage,
    pub wrapped_key: Vec<u8>,
}

impl From<CipherError> for ServiceError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::AuthenticationFailed => ServiceError::Integrity,
            CipherError::InvalidNonceLength(n) => {
                ServiceError::Validation(format!("field `iv` must be 12 or 16 bytes, got {n}"))
            }
            CipherError::InvalidTagLength(n) => {
                ServiceError::Validation(format!("field `tag` must be 16 bytes, got {n}"))
            }
            CipherError::InvalidKeyLength(_) => {
                ServiceError::KeyProvider("provider returned a malformed data key".into())
            }
            CipherError::AeadFailure => ServiceError::Validation("message is too long".into()),
        }
    }
}

/// Seal `message` under a fresh data key wrapped by `key`.
///
/// # Errors
///
/// Provider failures map per [`crate::provider::ProviderError`]; a message
/// beyond the GCM length limit is a validation error.
pub async fn encrypt(
    provider: &dyn KeyProvider,
    key: &KeyHandle,
    mode: WrapMode,
    message: &[u8],
) -> Result<EnvelopeEncryptedMessage, ServiceError> {
    let (data_key, wrapped_key) = match mode {
        WrapMode::ProviderGenerated => {
            let generated = provider
                .generate_data_key(key)
                .await
                .map_err(provider_failure)?;
            (generated.plaintext, generated.wrapped)
        }
        WrapMode::RsaOaep => {
            let data_key = DataKey::generate();
            let wrapped = provider
                .wrap_key(key, mode.algorithm(), &data_key)
                .await
                .map_err(provider_failure)?;
            (data_key, wrapped)
        }
    };

    let sealed = cipher::seal(message, &data_key)?;
    Ok(EnvelopeEncryptedMessage { sealed, wrapped_key })
}

/// Unwrap the data key through the provider and open the message.
///
/// Nonce and tag lengths are checked before the provider is called.
///
/// # Errors
///
/// Returns [`ServiceError::Integrity`] if authentication fails; no plaintext
/// is released in that case.
pub async fn decrypt(
    provider: &dyn KeyProvider,
    key: &KeyHandle,
    mode: WrapMode,
    envelope: &EnvelopeEncryptedMessage,
) -> Result<Vec<u8>, ServiceError> {
    let sealed = &envelope.sealed;
    if sealed.tag.len() != cipher::TAG_LEN {
        return Err(CipherError::InvalidTagLength(sealed.tag.len()).into());
    }
    if ![cipher::NONCE_LEN, cipher::LEGACY_NONCE_LEN].contains(&sealed.nonce.len()) {
        return Err(CipherError::InvalidNonceLength(sealed.nonce.len()).into());
    }
    if envelope.wrapped_key.is_empty() {
        return Err(ServiceError::Validation("wrapped data key is empty".into()));
    }

    let data_key = provider
        .unwrap_key(key, mode.algorithm(), &envelope.wrapped_key)
        .await
        .map_err(provider_failure)?;

    Ok(cipher::open(sealed, &data_key)?)
}
