//! # Proteus
//!
//! Asynchronous end-to-end encryption based on the Double Ratchet.
//!
//! ## Security Features
//!
//! - **Forward Secrecy**: message keys are single-use and erased after
//!   decryption
//! - **Break-in Recovery**: every reply performs a fresh Diffie-Hellman
//!   ratchet step
//! - **Asynchronous Setup**: sessions start from published pre-keys through
//!   a triple Diffie-Hellman handshake
//!
//! ## Core Components
//!
//! - [`keys`]: identity keys, pre-keys and pre-key bundles
//! - [`message`]: cipher and pre-key messages, MAC-bound envelopes
//! - [`session`]: the ratchet state machine and per-peer sessions
//! - [`derived`]: HKDF, HMAC and AEAD key material
//! - [`csprng`]: the HMAC-DRBG generator handle
//! - [`store`]: the pre-key store consumed by sessions

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod cbor;
pub mod csprng;
pub mod derived;
pub mod error;
pub mod keys;
pub mod message;
pub mod session;
pub mod store;

pub use error::{DecodeError, DecryptError, ProteusError, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::csprng::Csprng;
    pub use crate::error::{DecodeError, DecryptError, ProteusError, Result};
    pub use crate::keys::{
        IdentityKey, IdentityKeyPair, KeyPair, PreKey, PreKeyAuth, PreKeyBundle, PublicKey,
        MAX_PREKEY_ID,
    };
    pub use crate::message::{CipherMessage, Envelope, Message, PreKeyMessage, SessionTag};
    pub use crate::session::{Session, SessionState};
    pub use crate::store::PreKeyStore;
}
