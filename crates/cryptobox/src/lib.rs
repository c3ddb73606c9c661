//! # Cryptobox
//!
//! High-level session management on top of [`proteus`].
//!
//! A [`Cryptobox`] owns one local identity and persists it, its pre-keys
//! and its sessions through a pluggable [`CrudEngine`]. It keeps the
//! pre-key pool topped up, caches hot sessions and runs operations on the
//! same session one after another.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cryptobox::prelude::*;
//!
//! # async fn run() -> cryptobox::Result<()> {
//! let alice = Cryptobox::new(Arc::new(MemoryEngine::new()), CryptoboxConfig::default())?;
//! let bob = Cryptobox::new(Arc::new(MemoryEngine::new()), CryptoboxConfig::default())?;
//! alice.create().await?;
//! bob.create().await?;
//!
//! let bundle = bob.get_serialized_last_resort_prekey()?;
//! let bundle = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, bundle.key)?;
//! let ciphertext = alice.encrypt("to-bob", b"Hello", Some(&bundle)).await?;
//! let plaintext = bob.decrypt("to-alice", &ciphertext).await?;
//! assert_eq!(plaintext, b"Hello");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod cryptobox;
pub mod error;
pub mod event;
pub mod queue;
pub mod serialized;
pub mod session;
pub mod store;

pub use config::CryptoboxConfig;
pub use cryptobox::Cryptobox;
pub use error::{CryptoboxError, Result};
pub use event::CryptoboxEvent;
pub use serialized::{SerializedCryptobox, SerializedPreKeyBundle};
pub use session::CryptoboxSession;
pub use store::memory::MemoryEngine;
pub use store::{CrudEngine, CryptoboxStore, StoreError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::CryptoboxConfig;
    pub use crate::cryptobox::Cryptobox;
    pub use crate::error::{CryptoboxError, Result};
    pub use crate::event::CryptoboxEvent;
    pub use crate::serialized::{SerializedCryptobox, SerializedPreKeyBundle};
    pub use crate::session::CryptoboxSession;
    pub use crate::store::memory::MemoryEngine;
    pub use crate::store::{CrudEngine, StoreError};
}
