//! Local symmetric cryptography and field encodings.
//!
//! This module is intentionally free of provider and HTTP dependencies. It
//! holds the only code that ever touches a plaintext data key.

pub mod cipher;
pub mod encoding;

pub use cipher::{CipherError, DataKey, SealedMessage, KEY_LEN};
