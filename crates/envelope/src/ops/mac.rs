//! Remote HMAC generation.

use common::protocol::MacAlgorithm;
use common::ServiceError;

use super::provider_failure;
use crate::crypto::encoding::encode_b64;
use crate::provider::{KeyHandle, KeyProvider};

/// Compute the MAC of `message` under `key`, base64 encoded.
pub async fn generate(
    provider: &dyn KeyProvider,
    key: &KeyHandle,
    algorithm: MacAlgorithm,
    message: &[u8],
) -> Result<String, ServiceError> {
    let mac = provider
        .generate_mac(key, algorithm, message)
        .await
        .map_err(provider_failure)?;
    Ok(encode_b64(&mac))
}
