//! Error types for the Proteus protocol

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProteusError>;

/// Malformed binary input
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Object declared a different number of fields than its schema
    #[error("Unexpected number of properties: expected {expected}, got {actual}")]
    UnexpectedPropertyCount { expected: usize, actual: usize },

    /// Fixed-size byte string had the wrong length
    #[error("Invalid array length: expected {expected}, got {actual}")]
    InvalidArrayLen { expected: usize, actual: usize },

    /// Value had a different CBOR type than expected
    #[error("Invalid type: expected {0}")]
    InvalidType(&'static str),

    /// Mandatory field absent from an object
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Message type discriminator is neither cipher nor pre-key
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),

    /// Serialized session belongs to another local identity
    #[error("Local identity changed")]
    LocalIdentityChanged,

    /// Key bytes do not describe a valid key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Underlying CBOR reader failed
    #[error("CBOR error: {0}")]
    Cbor(String),
}

/// Failures while decrypting a received envelope
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecryptError {
    /// Message key already consumed
    #[error("Duplicate message")]
    DuplicateMessage,

    /// Envelope MAC does not verify
    #[error("Invalid signature")]
    InvalidSignature,

    /// No matching session state or unexpected message kind
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Pre-key message carries an identity other than the pinned one
    #[error("Remote identity changed: expected {expected}, got {actual}")]
    RemoteIdentityChanged { expected: String, actual: String },

    /// Consumed pre-key could not be removed from the store
    #[error("Pre-key not found: {0}")]
    PrekeyNotFound(String),

    /// Counter skips further ahead than the receive window allows
    #[error("Message too far in the future: gap {gap} exceeds {max}")]
    TooDistantFuture { gap: u32, max: u32 },
}

/// Errors that can occur in the Proteus protocol
#[derive(Debug, Error)]
pub enum ProteusError {
    /// Decoding error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Decryption error
    #[error("Decrypt error: {0}")]
    Decrypt(#[from] DecryptError),

    /// The session has no state for its current tag
    #[error("No session for tag: {0}")]
    SessionStateNotFound(String),

    /// A handshake referenced a pre-key the store does not hold
    #[error("Pre-key {0} not found")]
    PreKeyNotFound(u16),

    /// Pre-key store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Primitive crypto failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Value could not be written as CBOR
    #[error("Encode error: {0}")]
    Encode(String),
}

impl ProteusError {
    /// Whether a pre-key message should fall back to a fresh handshake
    /// after failing against an existing state with this error
    pub fn starts_new_session(&self) -> bool {
        matches!(
            self,
            ProteusError::Decrypt(DecryptError::InvalidSignature)
                | ProteusError::Decrypt(DecryptError::InvalidMessage(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_fallback_kinds() {
        assert!(ProteusError::from(DecryptError::InvalidSignature).starts_new_session());
        assert!(ProteusError::from(DecryptError::InvalidMessage("x".into())).starts_new_session());
        assert!(!ProteusError::from(DecryptError::DuplicateMessage).starts_new_session());
        assert!(!ProteusError::PreKeyNotFound(3).starts_new_session());
    }
}
