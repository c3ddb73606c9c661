//! Pre-key storage seam consumed by [`Session`](crate::session::Session)

use async_trait::async_trait;

use crate::error::Result;
use crate::keys::PreKey;

/// Pre-key lookup and consumption
#[async_trait]
pub trait PreKeyStore: Send + Sync {
    /// Load a pre-key by id
    async fn load_prekey(&self, prekey_id: u16) -> Result<Option<PreKey>>;

    /// Remove a consumed pre-key; `false` if it was not present
    async fn delete_prekey(&self, prekey_id: u16) -> Result<bool>;
}

/// In-memory pre-key store
pub mod memory {
    use std::collections::HashMap;

    use parking_lot::RwLock;

    use super::*;

    /// Pre-keys held in a map
    #[derive(Default)]
    pub struct MemoryPreKeyStore {
        prekeys: RwLock<HashMap<u16, PreKey>>,
    }

    impl MemoryPreKeyStore {
        /// Store holding the given pre-keys
        pub fn new(prekeys: impl IntoIterator<Item = PreKey>) -> Self {
            Self {
                prekeys: RwLock::new(prekeys.into_iter().map(|p| (p.key_id, p)).collect()),
            }
        }

        /// Whether a pre-key with this id is held
        pub fn contains(&self, prekey_id: u16) -> bool {
            self.prekeys.read().contains_key(&prekey_id)
        }
    }

    #[async_trait]
    impl PreKeyStore for MemoryPreKeyStore {
        async fn load_prekey(&self, prekey_id: u16) -> Result<Option<PreKey>> {
            Ok(self.prekeys.read().get(&prekey_id).cloned())
        }

        async fn delete_prekey(&self, prekey_id: u16) -> Result<bool> {
            Ok(self.prekeys.write().remove(&prekey_id).is_some())
        }
    }
}
