//! Error types for the Keywarden service.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Keywarden operations.
#[derive(Error, Debug)]
pub enum KeywardenError {
    /// No record exists for the presented key.
    #[error("invalid API key")]
    InvalidKey,

    /// Key store failures. Transient ones are retryable by the caller's own
    /// policy; the engine never turns them into an admit or a deny.
    #[error("key store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Keywarden operations.
pub type Result<T> = std::result::Result<T, KeywardenError>;
