//! Remote ECDSA signing and verification.

use common::protocol::SigningAlgorithm;
use common::ServiceError;

use super::provider_failure;
use crate::crypto::encoding::decode_hex;
use crate::provider::{KeyHandle, KeyProvider, SignInput};

/// Build the sign input from exactly one of `message` / hex `message_digest`.
///
/// # Errors
///
/// Returns [`ServiceError::Validation`] if both or neither are given, the
/// digest is not hex, or its length does not match `algorithm`.
pub fn sign_input(
    message: Option<String>,
    message_digest: Option<String>,
    algorithm: SigningAlgorithm,
) -> Result<SignInput, ServiceError> {
    match (message, message_digest) {
        (Some(message), None) => Ok(SignInput::Message(message.into_bytes())),
        (None, Some(digest)) => {
            let digest = decode_hex("message_digest", &digest)?;
            if digest.len() != algorithm.digest_len() {
                return Err(ServiceError::Validation(format!(
                    "field `message_digest` must be {} bytes for {}, got {}",
                    algorithm.digest_len(),
                    algorithm.as_str(),
                    digest.len()
                )));
            }
            Ok(SignInput::Digest(digest))
        }
        (Some(_), Some(_)) => Err(ServiceError::Validation(
            "provide either `message` or `message_digest`, not both".into(),
        )),
        (None, None) => Err(ServiceError::Validation(
            "one of `message` or `message_digest` is required".into(),
        )),
    }
}

/// Sign and render the signature in the provider's encoding.
pub async fn sign(
    provider: &dyn KeyProvider,
    key: &KeyHandle,
    algorithm: SigningAlgorithm,
    input: &SignInput,
) -> Result<String, ServiceError> {
    let signature = provider
        .sign(key, algorithm, input)
        .await
        .map_err(provider_failure)?;
    Ok(provider.signature_encoding().encode(&signature))
}

/// Decode `signature` in the provider's encoding and verify it.
///
/// A signature that decodes but does not match yields `Ok(false)`.
pub async fn verify(
    provider: &dyn KeyProvider,
    key: &KeyHandle,
    algorithm: SigningAlgorithm,
    input: &SignInput,
    signature: &str,
) -> Result<bool, ServiceError> {
    let signature = provider.signature_encoding().decode(signature)?;
    if signature.is_empty() {
        return Err(ServiceError::Validation("field `signature` is empty".into()));
    }
    provider
        .verify(key, algorithm, input, &signature)
        .await
        .map_err(provider_failure)
}
