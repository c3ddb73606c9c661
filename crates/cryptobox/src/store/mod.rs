//! Storage for identities, pre-keys and sessions
//!
//! Backends implement the table-oriented [`CrudEngine`]. [`CryptoboxStore`]
//! maps box records onto three tables on top of any engine.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use proteus::keys::{IdentityKeyPair, PreKey};
use proteus::session::Session;
use proteus::store::PreKeyStore;
use proteus::ProteusError;
use thiserror::Error;

use crate::error::{CryptoboxError, Result};

/// Errors raised by storage engines
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// `create` hit an existing key
    #[error("Record \"{key}\" already exists in table \"{table}\"")]
    RecordAlreadyExists {
        /// Table name
        table: String,
        /// Record key
        key: String,
    },

    /// Backend-specific failure
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Table-oriented CRUD storage
#[async_trait]
pub trait CrudEngine: Send + Sync {
    /// Insert a new record; fails if the key exists
    async fn create(
        &self,
        table: &str,
        key: &str,
        value: Vec<u8>,
    ) -> std::result::Result<(), StoreError>;

    /// Read one record
    async fn read(
        &self,
        table: &str,
        key: &str,
    ) -> std::result::Result<Option<Vec<u8>>, StoreError>;

    /// Read every record of a table
    async fn read_all(
        &self,
        table: &str,
    ) -> std::result::Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Insert or replace a record
    async fn update(
        &self,
        table: &str,
        key: &str,
        value: Vec<u8>,
    ) -> std::result::Result<(), StoreError>;

    /// Delete one record; `false` if it was not present
    async fn delete(&self, table: &str, key: &str) -> std::result::Result<bool, StoreError>;

    /// Delete every record of a table
    async fn delete_all(&self, table: &str) -> std::result::Result<(), StoreError>;
}

/// Table names used by the box
pub mod tables {
    /// Identity table
    pub const KEYS: &str = "keys";
    /// Pre-key table, keyed by decimal id
    pub const PREKEYS: &str = "prekeys";
    /// Session table, keyed by session id
    pub const SESSIONS: &str = "sessions";
    /// Key of the local identity record
    pub const LOCAL_IDENTITY: &str = "local_identity";
}

/// Box records on top of a [`CrudEngine`]
#[derive(Clone)]
pub struct CryptoboxStore {
    engine: Arc<dyn CrudEngine>,
}

impl CryptoboxStore {
    /// Wrap a storage engine
    pub fn new(engine: Arc<dyn CrudEngine>) -> Self {
        Self { engine }
    }

    /// Wipe identity, pre-keys and sessions
    pub async fn delete_all(&self) -> Result<()> {
        self.engine.delete_all(tables::KEYS).await?;
        self.engine.delete_all(tables::PREKEYS).await?;
        self.engine.delete_all(tables::SESSIONS).await?;
        Ok(())
    }

    /// Load the local identity
    pub async fn load_identity(&self) -> Result<Option<IdentityKeyPair>> {
        match self.engine.read(tables::KEYS, tables::LOCAL_IDENTITY).await? {
            Some(bytes) => Ok(Some(IdentityKeyPair::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store the local identity, replacing any previous one
    pub async fn save_identity(&self, identity: &IdentityKeyPair) -> Result<()> {
        self.engine
            .update(tables::KEYS, tables::LOCAL_IDENTITY, identity.to_bytes()?)
            .await?;
        Ok(())
    }

    /// Remove the local identity
    pub async fn delete_identity(&self) -> Result<bool> {
        Ok(self.engine.delete(tables::KEYS, tables::LOCAL_IDENTITY).await?)
    }

    /// Load one pre-key
    pub async fn load_prekey(&self, prekey_id: u16) -> Result<Option<PreKey>> {
        match self.engine.read(tables::PREKEYS, &prekey_id.to_string()).await? {
            Some(bytes) => Ok(Some(PreKey::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load every pre-key, sorted by id
    pub async fn load_prekeys(&self) -> Result<Vec<PreKey>> {
        let mut prekeys = self
            .engine
            .read_all(tables::PREKEYS)
            .await?
            .into_iter()
            .map(|(_, bytes)| PreKey::from_bytes(&bytes).map_err(CryptoboxError::from))
            .collect::<Result<Vec<_>>>()?;
        prekeys.sort_by_key(|p| p.key_id);
        Ok(prekeys)
    }

    /// Insert new pre-keys
    pub async fn save_prekeys(&self, prekeys: &[PreKey]) -> Result<()> {
        for prekey in prekeys {
            self.engine
                .create(tables::PREKEYS, &prekey.key_id.to_string(), prekey.to_bytes()?)
                .await?;
        }
        Ok(())
    }

    /// Remove a pre-key
    pub async fn delete_prekey(&self, prekey_id: u16) -> Result<bool> {
        Ok(self.engine.delete(tables::PREKEYS, &prekey_id.to_string()).await?)
    }

    /// Insert a new session
    pub async fn create_session(&self, session_id: &str, session: &Session) -> Result<()> {
        self.engine
            .create(tables::SESSIONS, session_id, session.to_bytes()?)
            .await?;
        Ok(())
    }

    /// Insert or replace a session
    pub async fn update_session(&self, session_id: &str, session: &Session) -> Result<()> {
        self.engine
            .update(tables::SESSIONS, session_id, session.to_bytes()?)
            .await?;
        Ok(())
    }

    /// Load a session belonging to `identity`
    pub async fn read_session(
        &self,
        session_id: &str,
        identity: Arc<IdentityKeyPair>,
    ) -> Result<Option<Session>> {
        match self.engine.read(tables::SESSIONS, session_id).await? {
            Some(bytes) => Ok(Some(Session::from_bytes(identity, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Raw serialized sessions by id
    pub async fn read_session_records(&self) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self.engine.read_all(tables::SESSIONS).await?)
    }

    /// Remove a session
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        Ok(self.engine.delete(tables::SESSIONS, session_id).await?)
    }
}

fn to_proteus(err: CryptoboxError) -> ProteusError {
    match err {
        CryptoboxError::Proteus(e) => e,
        other => ProteusError::Store(other.to_string()),
    }
}

#[async_trait]
impl PreKeyStore for CryptoboxStore {
    async fn load_prekey(&self, prekey_id: u16) -> proteus::Result<Option<PreKey>> {
        CryptoboxStore::load_prekey(self, prekey_id).await.map_err(to_proteus)
    }

    async fn delete_prekey(&self, prekey_id: u16) -> proteus::Result<bool> {
        CryptoboxStore::delete_prekey(self, prekey_id).await.map_err(to_proteus)
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryEngine;
    use super::*;
    use proteus::csprng::Csprng;

    fn store() -> CryptoboxStore {
        CryptoboxStore::new(Arc::new(MemoryEngine::new()))
    }

    #[tokio::test]
    async fn test_identity_roundtrip() {
        let store = store();
        assert!(store.load_identity().await.unwrap().is_none());

        let ident = IdentityKeyPair::new(&mut Csprng::new());
        store.save_identity(&ident).await.unwrap();
        let loaded = store.load_identity().await.unwrap().unwrap();
        assert_eq!(loaded.public_key.fingerprint(), ident.public_key.fingerprint());

        assert!(store.delete_identity().await.unwrap());
        assert!(store.load_identity().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prekeys_sorted_and_unique() {
        let store = store();
        let mut rng = Csprng::new();
        let prekeys = vec![
            PreKey::new(10, &mut rng),
            PreKey::new(2, &mut rng),
            PreKey::last_resort(&mut rng),
        ];
        store.save_prekeys(&prekeys).await.unwrap();

        let ids: Vec<u16> = store.load_prekeys().await.unwrap().iter().map(|p| p.key_id).collect();
        assert_eq!(ids, vec![2, 10, 0xFFFF]);

        let err = store.save_prekeys(&prekeys[..1]).await.err();
        assert!(matches!(
            err,
            Some(CryptoboxError::Store(StoreError::RecordAlreadyExists { .. }))
        ));
    }

    #[tokio::test]
    async fn test_prekey_store_seam() {
        let store = store();
        let rng = &mut Csprng::new();
        store.save_prekeys(&[PreKey::new(4, rng)]).await.unwrap();

        let seam: &dyn PreKeyStore = &store;
        assert!(seam.load_prekey(4).await.unwrap().is_some());
        assert!(seam.delete_prekey(4).await.unwrap());
        assert!(!seam.delete_prekey(4).await.unwrap());
        assert!(seam.load_prekey(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_all() {
        let store = store();
        let mut rng = Csprng::new();
        store.save_identity(&IdentityKeyPair::new(&mut rng)).await.unwrap();
        store.save_prekeys(&[PreKey::new(1, &mut rng)]).await.unwrap();

        store.delete_all().await.unwrap();
        assert!(store.load_identity().await.unwrap().is_none());
        assert!(store.load_prekeys().await.unwrap().is_empty());
    }
}
