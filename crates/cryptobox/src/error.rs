//! Error types for the cryptobox

use proteus::ProteusError;
use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for box operations
pub type Result<T> = std::result::Result<T, CryptoboxError>;

/// Errors that can occur in box operations
#[derive(Debug, Error)]
pub enum CryptoboxError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Proteus(#[from] ProteusError),

    /// A supplied pre-key bundle could not be decoded
    #[error("Invalid pre-key format: {0}")]
    InvalidPreKeyFormat(String),

    /// Ciphertext rejected at the box boundary
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// No local identity in memory or in the store
    #[error("Missing local identity")]
    MissingIdentity,

    /// The store holds no last-resort pre-key
    #[error("Missing last-resort pre-key")]
    MissingLastResortPreKey,

    /// Requested pre-key is not stored
    #[error("Pre-key {0} not found")]
    PreKeyNotFound(u16),

    /// No session under this id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Storage error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Export or import format error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<base64::DecodeError> for CryptoboxError {
    fn from(err: base64::DecodeError) -> Self {
        CryptoboxError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for CryptoboxError {
    fn from(err: serde_json::Error) -> Self {
        CryptoboxError::Serialization(err.to_string())
    }
}
