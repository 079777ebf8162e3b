//! AES-256-GCM encryption and decryption of a single message under a one-time
//! data key.
//!
//! The authentication tag is kept apart from the ciphertext so that it can be
//! returned as its own field. Decryption verifies the tag before any plaintext
//! is released; on mismatch the caller gets [`CipherError::AuthenticationFailed`]
//! and nothing else.

use aes_gcm::{
    aead::{consts::U16, generic_array::GenericArray, rand_core::RngCore, AeadInPlace, KeyInit, OsRng},
    aes::Aes256,
    Aes256Gcm, AesGcm,
};
use thiserror::Error;

/// Byte length of an AES-256 data key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of the nonce generated for every new message (96 bits).
pub const NONCE_LEN: usize = 12;

/// Nonce length written by older OpenSSL-based producers. Accepted on decrypt only.
pub const LEGACY_NONCE_LEN: usize = 16;

/// Byte length of the GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// AES-256-GCM with a 128-bit nonce.
type Aes256Gcm128 = AesGcm<Aes256, U16>;

/// Errors produced by the cipher layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// The data key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid data key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The nonce is neither [`NONCE_LEN`] nor [`LEGACY_NONCE_LEN`] bytes.
    #[error("invalid nonce length: {0} bytes")]
    InvalidNonceLength(usize),

    /// The tag is not [`TAG_LEN`] bytes.
    #[error("invalid tag length: {0} bytes")]
    InvalidTagLength(usize),

    /// Tag verification failed (wrong key or tampered nonce/ciphertext/tag).
    #[error("authentication tag mismatch")]
    AuthenticationFailed,

    /// AES-GCM encryption failed (message too long).
    #[error("aead operation failed")]
    AeadFailure,
}

/// A one-time 256-bit data key.
///
/// When this type is dropped, the memory is overwritten with zeroes to
/// minimise the window during which plaintext key material lives in RAM.
pub struct DataKey(Box<[u8; KEY_LEN]>);

impl DataKey {
    /// Draw a fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut buf = Box::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut buf[..]);
        Self(buf)
    }

    /// Copy key material returned by a provider.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKeyLength`] if `bytes` is not [`KEY_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidKeyLength(bytes.len()));
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("DataKey([REDACTED])")
    }
}

/// Output of [`seal`]: nonce, ciphertext and detached tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Encrypt `plaintext` under `key` with a fresh random 96-bit nonce.
///
/// # Errors
///
/// Returns [`CipherError::AeadFailure`] if the message exceeds the GCM length limit.
pub fn seal(plaintext: &[u8], key: &DataKey) -> Result<SealedMessage, CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| CipherError::InvalidKeyLength(key.as_bytes().len()))?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut buffer)
        .map_err(|_| CipherError::AeadFailure)?;

    Ok(SealedMessage {
        nonce: nonce.to_vec(),
        ciphertext: buffer,
        tag: tag.to_vec(),
    })
}

/// Verify and decrypt a [`SealedMessage`].
///
/// # Errors
///
/// Returns [`CipherError::InvalidNonceLength`] / [`CipherError::InvalidTagLength`]
/// for malformed input and [`CipherError::AuthenticationFailed`] if the tag
/// does not verify.
pub fn open(sealed: &SealedMessage, key: &DataKey) -> Result<Vec<u8>, CipherError> {
    if sealed.tag.len() != TAG_LEN {
        return Err(CipherError::InvalidTagLength(sealed.tag.len()));
    }
    let tag = GenericArray::from_slice(&sealed.tag);
    let mut buffer = sealed.ciphertext.clone();

    let outcome = match sealed.nonce.len() {
        NONCE_LEN => Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| CipherError::InvalidKeyLength(key.as_bytes().len()))?
            .decrypt_in_place_detached(GenericArray::from_slice(&sealed.nonce), b"", &mut buffer, tag),
        LEGACY_NONCE_LEN => Aes256Gcm128::new_from_slice(key.as_bytes())
            .map_err(|_| CipherError::InvalidKeyLength(key.as_bytes().len()))?
            .decrypt_in_place_detached(GenericArray::from_slice(&sealed.nonce), b"", &mut buffer, tag),
        n => return Err(CipherError::InvalidNonceLength(n)),
    };

    outcome.map_err(|_| CipherError::AuthenticationFailed)?;
    Ok(buffer)
}
