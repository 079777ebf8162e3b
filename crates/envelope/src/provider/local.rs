//! [`LocalProvider`]: software keys held in process memory.
//!
//! For development and tests only. Data keys are wrapped with AES-256-GCM under
//! a local master key (`nonce || ciphertext || tag`). There are no RSA keys, so
//! the `rsa_*` operations report `unsupported_algorithm`.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::protocol::{MacAlgorithm, SigningAlgorithm};
use hmac::{Hmac, Mac};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use sha2::{Sha256, Sha384};
use tracing::debug;

use super::{GeneratedDataKey, KeyHandle, KeyProvider, ProviderError, SignInput, WrapAlgorithm};
use crate::config::Config;
use crate::crypto::cipher::{self, NONCE_LEN, TAG_LEN};
use crate::crypto::encoding::SignatureEncoding;
use crate::crypto::{DataKey, SealedMessage, KEY_LEN};

pub const AES_KEY_NAME: &str = "local-aes";
pub const ECC256_KEY_NAME: &str = "local-ecc256";
pub const ECC384_KEY_NAME: &str = "local-ecc384";
pub const HMAC_KEY_NAME: &str = "local-hmac";

/// Key material of one local key.
pub enum LocalKey {
    Symmetric(DataKey),
    EcdsaP256(p256::ecdsa::SigningKey),
    EcdsaP384(p384::ecdsa::SigningKey),
    Hmac(Vec<u8>),
}

impl LocalKey {
    pub fn symmetric(material: &[u8]) -> Result<Self> {
        DataKey::from_slice(material)
            .map(LocalKey::Symmetric)
            .context("local master key must be 32 bytes")
    }

    pub fn ecdsa_p256(scalar: &[u8]) -> Result<Self> {
        p256::ecdsa::SigningKey::from_slice(scalar)
            .map(LocalKey::EcdsaP256)
            .map_err(|_| anyhow::anyhow!("invalid P-256 private scalar"))
    }

    pub fn ecdsa_p384(scalar: &[u8]) -> Result<Self> {
        p384::ecdsa::SigningKey::from_slice(scalar)
            .map(LocalKey::EcdsaP384)
            .map_err(|_| anyhow::anyhow!("invalid P-384 private scalar"))
    }

    pub fn hmac(material: &[u8]) -> Result<Self> {
        if material.is_empty() {
            anyhow::bail!("local HMAC key must not be empty");
        }
        Ok(LocalKey::Hmac(material.to_vec()))
    }

    fn kind(&self) -> &'static str {
        match self {
            LocalKey::Symmetric(_) => "symmetric",
            LocalKey::EcdsaP256(_) => "ecdsa-p256",
            LocalKey::EcdsaP384(_) => "ecdsa-p384",
            LocalKey::Hmac(_) => "hmac",
        }
    }
}

/// In-memory [`KeyProvider`].
#[derive(Default)]
pub struct LocalProvider {
    keys: HashMap<String, LocalKey>,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` under `name`, replacing any previous key of that name.
    pub fn with_key(mut self, name: impl Into<String>, key: LocalKey) -> Self {
        self.keys.insert(name.into(), key);
        self
    }

    /// A provider with freshly generated keys under the well-known names.
    pub fn ephemeral() -> Self {
        Self::new()
            .with_key(AES_KEY_NAME, LocalKey::Symmetric(DataKey::generate()))
            .with_key(
                ECC256_KEY_NAME,
                LocalKey::EcdsaP256(p256::ecdsa::SigningKey::random(&mut aes_gcm::aead::OsRng)),
            )
            .with_key(
                ECC384_KEY_NAME,
                LocalKey::EcdsaP384(p384::ecdsa::SigningKey::random(&mut aes_gcm::aead::OsRng)),
            )
            .with_key(HMAC_KEY_NAME, LocalKey::Hmac(DataKey::generate().as_bytes().to_vec()))
    }

    /// Build from `LOCAL_*` hex key material, generating anything not supplied.
    ///
    /// Keys are registered under the configured key ids when present and the
    /// well-known local names otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if supplied key material is not valid hex or has the
    /// wrong shape.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let mut provider = Self::ephemeral();

        if let Some(hex_key) = &cfg.local_master_key {
            let key = LocalKey::symmetric(&decode_key_hex(hex_key, "LOCAL_MASTER_KEY")?)?;
            provider = provider.with_key(AES_KEY_NAME, key);
        }
        if let Some(hex_key) = &cfg.local_hmac_key {
            let key = LocalKey::hmac(&decode_key_hex(hex_key, "LOCAL_HMAC_KEY")?)?;
            provider = provider.with_key(HMAC_KEY_NAME, key);
        }
        if let Some(hex_key) = &cfg.local_ecc256_key {
            let key = LocalKey::ecdsa_p256(&decode_key_hex(hex_key, "LOCAL_ECC256_KEY")?)?;
            provider = provider.with_key(ECC256_KEY_NAME, key);
        }
        if let Some(hex_key) = &cfg.local_ecc384_key {
            let key = LocalKey::ecdsa_p384(&decode_key_hex(hex_key, "LOCAL_ECC384_KEY")?)?;
            provider = provider.with_key(ECC384_KEY_NAME, key);
        }

        // One HMAC key serves both algorithms; register it under the 384 id too.
        if let Some(id) = &cfg.hmac384_key_id {
            if let Some(LocalKey::Hmac(material)) = provider.keys.get(HMAC_KEY_NAME) {
                let copy = LocalKey::Hmac(material.clone());
                provider.keys.insert(id.clone(), copy);
            }
        }

        // Expose the same keys under any configured ids.
        for (configured, well_known) in [
            (&cfg.aes_key_id, AES_KEY_NAME),
            (&cfg.ecc_key_id, ECC256_KEY_NAME),
            (&cfg.ecc384_key_id, ECC384_KEY_NAME),
            (&cfg.hmac_key_id, HMAC_KEY_NAME),
        ] {
            if let Some(id) = configured.as_deref().filter(|id| *id != well_known) {
                if let Some(key) = provider.keys.remove(well_known) {
                    provider.keys.insert(id.to_owned(), key);
                }
            }
        }

        debug!(keys = provider.keys.len(), "local key provider ready");
        Ok(provider)
    }

    fn key(&self, handle: &KeyHandle) -> Result<&LocalKey, ProviderError> {
        self.keys
            .get(handle.as_str())
            .ok_or_else(|| ProviderError::KeyNotFound(handle.to_string()))
    }

    fn master_key(&self, handle: &KeyHandle, algorithm: WrapAlgorithm) -> Result<&DataKey, ProviderError> {
        if algorithm != WrapAlgorithm::SymmetricDefault {
            return Err(ProviderError::UnsupportedAlgorithm(format!(
                "{} is not available on the local provider",
                algorithm.as_str()
            )));
        }
        match self.key(handle)? {
            LocalKey::Symmetric(master) => Ok(master),
            other => Err(wrong_kind(handle, other)),
        }
    }
}

fn decode_key_hex(value: &str, name: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim()).with_context(|| format!("{name} must be hex encoded"))
}

fn wrong_kind(handle: &KeyHandle, key: &LocalKey) -> ProviderError {
    ProviderError::InvalidKeyUsage(format!("{handle} is a {} key", key.kind()))
}

#[async_trait]
impl KeyProvider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    fn signature_encoding(&self) -> SignatureEncoding {
        SignatureEncoding::Base64
    }

    async fn generate_data_key(&self, key: &KeyHandle) -> Result<GeneratedDataKey, ProviderError> {
        let plaintext = DataKey::generate();
        let wrapped = self
            .wrap_key(key, WrapAlgorithm::SymmetricDefault, &plaintext)
            .await?;
        Ok(GeneratedDataKey { plaintext, wrapped })
    }

    async fn wrap_key(
        &self,
        key: &KeyHandle,
        algorithm: WrapAlgorithm,
        data_key: &DataKey,
    ) -> Result<Vec<u8>, ProviderError> {
        let master = self.master_key(key, algorithm)?;
        let sealed = cipher::seal(data_key.as_bytes(), master)
            .map_err(|e| ProviderError::Rejected(e.to_string()))?;

        let mut wrapped = Vec::with_capacity(NONCE_LEN + KEY_LEN + TAG_LEN);
        wrapped.extend_from_slice(&sealed.nonce);
        wrapped.extend_from_slice(&sealed.ciphertext);
        wrapped.extend_from_slice(&sealed.tag);
        Ok(wrapped)
    }

    async fn unwrap_key(
        &self,
        key: &KeyHandle,
        algorithm: WrapAlgorithm,
        wrapped: &[u8],
    ) -> Result<DataKey, ProviderError> {
        let master = self.master_key(key, algorithm)?;
        if wrapped.len() < NONCE_LEN + TAG_LEN {
            return Err(ProviderError::InvalidCiphertext(format!(
                "wrapped key is {} bytes",
                wrapped.len()
            )));
        }
        let (nonce, rest) = wrapped.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
        let sealed = SealedMessage {
            nonce: nonce.to_vec(),
            ciphertext: ciphertext.to_vec(),
            tag: tag.to_vec(),
        };

        let mut plaintext = cipher::open(&sealed, master)
            .map_err(|e| ProviderError::InvalidCiphertext(e.to_string()))?;
        let data_key = DataKey::from_slice(&plaintext)
            .map_err(|e| ProviderError::InvalidCiphertext(e.to_string()));
        plaintext.iter_mut().for_each(|b| *b = 0);
        data_key
    }

    async fn sign(
        &self,
        key: &KeyHandle,
        algorithm: SigningAlgorithm,
        input: &SignInput,
    ) -> Result<Vec<u8>, ProviderError> {
        let digest = input.digest(algorithm);
        let der = match (self.key(key)?, algorithm) {
            (LocalKey::EcdsaP256(signing), SigningAlgorithm::EcdsaSha256) => {
                let signature: p256::ecdsa::Signature = signing
                    .sign_prehash(&digest)
                    .map_err(|e| ProviderError::Rejected(e.to_string()))?;
                signature.to_der().as_bytes().to_vec()
            }
            (LocalKey::EcdsaP384(signing), SigningAlgorithm::EcdsaSha384) => {
                let signature: p384::ecdsa::Signature = signing
                    .sign_prehash(&digest)
                    .map_err(|e| ProviderError::Rejected(e.to_string()))?;
                signature.to_der().as_bytes().to_vec()
            }
            (other, _) => return Err(wrong_kind(key, other)),
        };
        Ok(der)
    }

    async fn verify(
        &self,
        key: &KeyHandle,
        algorithm: SigningAlgorithm,
        input: &SignInput,
        signature: &[u8],
    ) -> Result<bool, ProviderError> {
        let digest = input.digest(algorithm);
        let valid = match (self.key(key)?, algorithm) {
            (LocalKey::EcdsaP256(signing), SigningAlgorithm::EcdsaSha256) => {
                match p256::ecdsa::Signature::from_der(signature) {
                    Ok(sig) => signing.verifying_key().verify_prehash(&digest, &sig).is_ok(),
                    Err(_) => false,
                }
            }
            (LocalKey::EcdsaP384(signing), SigningAlgorithm::EcdsaSha384) => {
                match p384::ecdsa::Signature::from_der(signature) {
                    Ok(sig) => signing.verifying_key().verify_prehash(&digest, &sig).is_ok(),
                    Err(_) => false,
                }
            }
            (other, _) => return Err(wrong_kind(key, other)),
        };
        Ok(valid)
    }

    async fn generate_mac(
        &self,
        key: &KeyHandle,
        algorithm: MacAlgorithm,
        message: &[u8],
    ) -> Result<Vec<u8>, ProviderError> {
        let secret = match self.key(key)? {
            LocalKey::Hmac(secret) => secret,
            other => return Err(wrong_kind(key, other)),
        };
        let tag = match algorithm {
            MacAlgorithm::HmacSha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(secret)
                    .map_err(|e| ProviderError::Rejected(e.to_string()))?;
                mac.update(message);
                mac.finalize().into_bytes().to_vec()
            }
            MacAlgorithm::HmacSha384 => {
                let mut mac = Hmac::<Sha384>::new_from_slice(secret)
                    .map_err(|e| ProviderError::Rejected(e.to_string()))?;
                mac.update(message);
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str) -> KeyHandle {
        KeyHandle::new(name)
    }

    #[tokio::test]
    async fn data_key_wrap_round_trip() {
        let provider = LocalProvider::ephemeral();
        let generated = provider.generate_data_key(&handle(AES_KEY_NAME)).await.unwrap();
        assert_eq!(generated.wrapped.len(), NONCE_LEN + KEY_LEN + TAG_LEN);

        let unwrapped = provider
            .unwrap_key(&handle(AES_KEY_NAME), WrapAlgorithm::SymmetricDefault, &generated.wrapped)
            .await
            .unwrap();
        assert_eq!(unwrapped.as_bytes(), generated.plaintext.as_bytes());
    }

    #[tokio::test]
    async fn tampered_wrapped_key_is_rejected() {
        let provider = LocalProvider::ephemeral();
        let mut wrapped = provider
            .generate_data_key(&handle(AES_KEY_NAME))
            .await
            .unwrap()
            .wrapped;
        wrapped[NONCE_LEN] ^= 0x01;

        let err = provider
            .unwrap_key(&handle(AES_KEY_NAME), WrapAlgorithm::SymmetricDefault, &wrapped)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidCiphertext(_)));
    }

    #[tokio::test]
    async fn rsa_wrapping_is_unsupported() {
        let provider = LocalProvider::ephemeral();
        let err = provider
            .wrap_key(&handle(AES_KEY_NAME), WrapAlgorithm::RsaesOaepSha256, &DataKey::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedAlgorithm(_)));
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let provider = LocalProvider::ephemeral();
        let err = provider.generate_data_key(&handle("nope")).await.unwrap_err();
        assert!(matches!(err, ProviderError::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn sign_then_verify_p256_and_p384() {
        let provider = LocalProvider::ephemeral();
        let message = SignInput::Message(b"hello world".to_vec());

        for (name, alg) in [
            (ECC256_KEY_NAME, SigningAlgorithm::EcdsaSha256),
            (ECC384_KEY_NAME, SigningAlgorithm::EcdsaSha384),
        ] {
            let signature = provider.sign(&handle(name), alg, &message).await.unwrap();
            assert!(provider.verify(&handle(name), alg, &message, &signature).await.unwrap());

            let other = SignInput::Message(b"hello world!".to_vec());
            assert!(!provider.verify(&handle(name), alg, &other, &signature).await.unwrap());
        }
    }

    #[tokio::test]
    async fn digest_and_message_inputs_agree() {
        let provider = LocalProvider::ephemeral();
        let message = SignInput::Message(b"hello world".to_vec());
        let digest = SignInput::Digest(message.digest(SigningAlgorithm::EcdsaSha256));

        let signature = provider
            .sign(&handle(ECC256_KEY_NAME), SigningAlgorithm::EcdsaSha256, &message)
            .await
            .unwrap();
        assert!(provider
            .verify(&handle(ECC256_KEY_NAME), SigningAlgorithm::EcdsaSha256, &digest, &signature)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn garbage_signature_verifies_false() {
        let provider = LocalProvider::ephemeral();
        let valid = provider
            .verify(
                &handle(ECC256_KEY_NAME),
                SigningAlgorithm::EcdsaSha256,
                &SignInput::Message(b"m".to_vec()),
                b"not a der signature",
            )
            .await
            .unwrap();
        assert!(!valid);
    }

    #[tokio::test]
    async fn curve_algorithm_mismatch_is_key_usage_error() {
        let provider = LocalProvider::ephemeral();
        let err = provider
            .sign(
                &handle(ECC256_KEY_NAME),
                SigningAlgorithm::EcdsaSha384,
                &SignInput::Message(b"m".to_vec()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidKeyUsage(_)));
    }

    #[tokio::test]
    async fn hmac_matches_known_answer() {
        // RFC 4231 test case 2.
        let provider = LocalProvider::new().with_key("k", LocalKey::hmac(b"Jefe").unwrap());
        let tag = provider
            .generate_mac(&handle("k"), MacAlgorithm::HmacSha256, b"what do ya want for nothing?")
            .await
            .unwrap();
        assert_eq!(
            hex::encode(tag),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[tokio::test]
    async fn hmac_is_deterministic() {
        let provider = LocalProvider::ephemeral();
        let a = provider
            .generate_mac(&handle(HMAC_KEY_NAME), MacAlgorithm::HmacSha256, b"")
            .await
            .unwrap();
        let b = provider
            .generate_mac(&handle(HMAC_KEY_NAME), MacAlgorithm::HmacSha256, b"")
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn from_config_uses_supplied_material_and_ids() {
        let cfg = Config {
            hmac_key_id: Some("payments-mac".into()),
            local_hmac_key: Some(hex::encode(b"Jefe")),
            ..crate::config::tests::local_config()
        };
        let provider = LocalProvider::from_config(&cfg).unwrap();
        assert!(matches!(provider.keys.get("payments-mac"), Some(LocalKey::Hmac(k)) if k == b"Jefe"));
        assert!(!provider.keys.contains_key(HMAC_KEY_NAME));
        assert!(provider.keys.contains_key(AES_KEY_NAME));
    }

    #[test]
    fn from_config_registers_per_algorithm_ids() {
        let cfg = Config {
            ecc384_key_id: Some("signer-384".into()),
            hmac384_key_id: Some("mac-384".into()),
            local_hmac_key: Some(hex::encode(b"Jefe")),
            ..crate::config::tests::local_config()
        };
        let provider = LocalProvider::from_config(&cfg).unwrap();
        assert!(matches!(provider.keys.get("signer-384"), Some(LocalKey::EcdsaP384(_))));
        assert!(!provider.keys.contains_key(ECC384_KEY_NAME));
        assert!(matches!(provider.keys.get("mac-384"), Some(LocalKey::Hmac(k)) if k == b"Jefe"));
        assert!(provider.keys.contains_key(HMAC_KEY_NAME));
    }

    #[test]
    fn from_config_rejects_bad_hex() {
        let cfg = Config {
            local_master_key: Some("zz".into()),
            ..crate::config::tests::local_config()
        };
        assert!(LocalProvider::from_config(&cfg).is_err());

        let cfg = Config {
            local_master_key: Some("00ff".into()),
            ..crate::config::tests::local_config()
        };
        assert!(LocalProvider::from_config(&cfg).is_err());
    }
}
