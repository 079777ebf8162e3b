//! Wire protocol and error taxonomy shared across `kms-envelope` crates.

pub mod error;
pub mod protocol;

pub use error::ServiceError;
