//! The box: identity, pre-key lifecycle and sessions over one store
//!
//! Every operation on a session id goes through that id's queue, so two
//! operations on the same session never interleave. Sessions are cloned out
//! of the cache, advanced and only written back once the store accepted them.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use proteus::csprng::Csprng;
use proteus::keys::{IdentityKeyPair, PreKey, PreKeyBundle, MAX_PREKEY_ID};
use proteus::message::Envelope;
use proteus::session::Session;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::config::CryptoboxConfig;
use crate::error::{CryptoboxError, Result};
use crate::event::CryptoboxEvent;
use crate::queue::SessionQueues;
use crate::serialized::{SerializedCryptobox, SerializedPreKeyBundle};
use crate::session::CryptoboxSession;
use crate::store::{CrudEngine, CryptoboxStore};

/// Session orchestration over a storage engine
pub struct Cryptobox {
    config: CryptoboxConfig,
    store: CryptoboxStore,
    rng: Csprng,
    identity: RwLock<Option<Arc<IdentityKeyPair>>>,
    last_resort: RwLock<Option<PreKey>>,
    sessions: Mutex<LruCache<String, CryptoboxSession>>,
    queues: SessionQueues,
    refill: AsyncMutex<()>,
    events: broadcast::Sender<CryptoboxEvent>,
}

impl Cryptobox {
    /// Create a box over `engine`. Call [`create`](Self::create) or
    /// [`load`](Self::load) before use.
    pub fn new(engine: Arc<dyn CrudEngine>, config: CryptoboxConfig) -> Result<Self> {
        Self::with_rng(engine, config, Csprng::new())
    }

    /// Create a box drawing randomness from `rng`
    pub fn with_rng(
        engine: Arc<dyn CrudEngine>,
        config: CryptoboxConfig,
        rng: Csprng,
    ) -> Result<Self> {
        config.validate().map_err(CryptoboxError::Config)?;
        let capacity = NonZeroUsize::new(config.session_cache_capacity).ok_or_else(|| {
            CryptoboxError::Config("session_cache_capacity must be greater than 0".to_string())
        })?;
        let (events, _) = broadcast::channel(config.event_channel_capacity);

        Ok(Self {
            store: CryptoboxStore::new(engine),
            rng,
            identity: RwLock::new(None),
            last_resort: RwLock::new(None),
            sessions: Mutex::new(LruCache::new(capacity)),
            queues: SessionQueues::new(config.queue_cache_capacity),
            refill: AsyncMutex::new(()),
            events,
            config,
        })
    }

    /// Box configuration
    pub fn config(&self) -> &CryptoboxConfig {
        &self.config
    }

    /// Receive box events
    pub fn subscribe(&self) -> broadcast::Receiver<CryptoboxEvent> {
        self.events.subscribe()
    }

    /// Mix caller-supplied entropy into the generator
    pub fn add_entropy(&self, entropy: &[u8]) -> Result<()> {
        Ok(self.rng.seed(entropy)?)
    }

    /// The local identity
    pub fn identity(&self) -> Result<Arc<IdentityKeyPair>> {
        self.identity.read().clone().ok_or(CryptoboxError::MissingIdentity)
    }

    /// The last-resort pre-key
    pub fn last_resort_prekey(&self) -> Result<PreKey> {
        self.last_resort
            .read()
            .clone()
            .ok_or(CryptoboxError::MissingLastResortPreKey)
    }

    /// Wipe the store and start over with a fresh identity.
    ///
    /// Returns every stored pre-key. No event is published.
    pub async fn create(&self) -> Result<Vec<PreKey>> {
        self.delete_data().await?;
        let mut rng = self.rng.clone();

        let identity = IdentityKeyPair::new(&mut rng);
        self.store.save_identity(&identity).await?;
        info!("Created identity {}", identity.public_key.fingerprint());
        *self.identity.write() = Some(Arc::new(identity));

        let last_resort = PreKey::last_resort(&mut rng);
        self.store.save_prekeys(std::slice::from_ref(&last_resort)).await?;
        *self.last_resort.write() = Some(last_resort);

        self.init(false).await
    }

    /// Resume from the identity and pre-keys already in the store.
    ///
    /// Returns every stored pre-key; replacements for missing pre-keys are
    /// published.
    pub async fn load(&self) -> Result<Vec<PreKey>> {
        let identity = self
            .store
            .load_identity()
            .await?
            .ok_or(CryptoboxError::MissingIdentity)?;

        let mut seed = identity.to_bytes()?;
        self.rng.seed(&seed)?;
        seed.zeroize();

        info!("Loaded identity {}", identity.public_key.fingerprint());
        *self.identity.write() = Some(Arc::new(identity));

        let last_resort = self
            .store
            .load_prekey(MAX_PREKEY_ID)
            .await?
            .ok_or(CryptoboxError::MissingLastResortPreKey)?;
        *self.last_resort.write() = Some(last_resort);

        self.init(true).await
    }

    async fn init(&self, publish: bool) -> Result<Vec<PreKey>> {
        self.refill_prekeys(publish).await?;
        self.store.load_prekeys().await
    }

    /// Top the store up to `minimum_prekeys` and return the new pre-keys.
    ///
    /// New ids continue after the highest regular id, wrap within the
    /// regular id space and skip ids already in use.
    pub async fn refill_prekeys(&self, publish: bool) -> Result<Vec<PreKey>> {
        let _refill = self.refill.lock().await;

        let prekeys = self.store.load_prekeys().await?;
        let missing = usize::from(self.config.minimum_prekeys).saturating_sub(prekeys.len());
        if missing == 0 {
            return Ok(Vec::new());
        }

        let used: HashSet<u16> = prekeys.iter().map(|p| p.key_id).collect();
        let start = prekeys
            .iter()
            .filter(|p| !p.is_last_resort())
            .map(|p| p.key_id)
            .max()
            .map_or(0, |id| id.wrapping_add(1) % MAX_PREKEY_ID);

        let fresh = PreKey::generate_prekeys(
            start,
            u16::try_from(missing).unwrap_or(u16::MAX),
            |id| used.contains(&id),
            &mut self.rng.clone(),
        );

        self.store.save_prekeys(&fresh).await?;
        info!("Generated {} new pre-keys", fresh.len());

        if publish && !fresh.is_empty() {
            // Nobody listening is fine
            let _ = self.events.send(CryptoboxEvent::NewPreKeys(fresh.clone()));
        }
        Ok(fresh)
    }

    /// Reuse the session stored under `session_id` or start one from the
    /// serialized pre-key bundle
    pub async fn session_from_prekey(
        &self,
        session_id: &str,
        prekey_bundle: &[u8],
    ) -> Result<CryptoboxSession> {
        match self.session_load(session_id).await {
            Ok(session) => return Ok(session),
            Err(CryptoboxError::SessionNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let bundle = PreKeyBundle::from_bytes(prekey_bundle)
            .map_err(|e| CryptoboxError::InvalidPreKeyFormat(e.to_string()))?;
        let session = Session::init_from_prekey(&mut self.rng.clone(), self.identity()?, &bundle)?;
        let session = CryptoboxSession::new(session_id, session);

        self.session_save(&session).await?;
        debug!("Started session {} from pre-key {}", session_id, bundle.prekey_id);
        Ok(session)
    }

    /// Start a session from a received pre-key message and decrypt it.
    ///
    /// The consumed pre-key is removed from the store. The session itself is
    /// not persisted.
    pub async fn session_from_message(
        &self,
        session_id: &str,
        envelope: &[u8],
    ) -> Result<(CryptoboxSession, Vec<u8>)> {
        let envelope = Envelope::from_bytes(envelope)?;
        let mut rng = self.rng.clone();
        let (session, plaintext) =
            Session::init_from_message(&mut rng, self.identity()?, &self.store, &envelope).await?;
        Ok((CryptoboxSession::new(session_id, session), plaintext))
    }

    /// Session by id, from the cache or the store
    pub async fn session_load(&self, session_id: &str) -> Result<CryptoboxSession> {
        let cached = self.sessions.lock().get(session_id).cloned();
        if let Some(session) = cached {
            return Ok(session);
        }

        let session = self
            .store
            .read_session(session_id, self.identity()?)
            .await?
            .ok_or_else(|| CryptoboxError::SessionNotFound(session_id.to_string()))?;
        let session = CryptoboxSession::new(session_id, session);
        self.sessions.lock().put(session_id.to_string(), session.clone());
        Ok(session)
    }

    /// Persist a new session and cache it
    pub async fn session_save(&self, session: &CryptoboxSession) -> Result<()> {
        self.store.create_session(&session.id, &session.session).await?;
        self.sessions.lock().put(session.id.clone(), session.clone());
        Ok(())
    }

    /// Persist an advanced session and cache it
    pub async fn session_update(&self, session: &CryptoboxSession) -> Result<()> {
        self.store.update_session(&session.id, &session.session).await?;
        self.sessions.lock().put(session.id.clone(), session.clone());
        Ok(())
    }

    /// Forget a session; `false` if the store did not hold it
    pub async fn session_delete(&self, session_id: &str) -> Result<bool> {
        self.sessions.lock().pop(session_id);
        self.store.delete_session(session_id).await
    }

    /// Encrypt for `session_id`, starting the session from `prekey_bundle`
    /// when one is given
    pub async fn encrypt(
        &self,
        session_id: &str,
        plaintext: &[u8],
        prekey_bundle: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        self.queues
            .run(session_id, async {
                let mut session = match prekey_bundle {
                    Some(bundle) => self.session_from_prekey(session_id, bundle).await?,
                    None => self.session_load(session_id).await?,
                };
                let ciphertext = session.encrypt(plaintext)?;
                self.session_update(&session).await?;
                Ok::<_, CryptoboxError>(ciphertext)
            })
            .await
    }

    /// Decrypt a message for `session_id`.
    ///
    /// An unknown session id is treated as the start of a new session.
    /// Pre-keys are refilled afterwards.
    pub async fn decrypt(&self, session_id: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() {
            return Err(CryptoboxError::Decryption("Cannot decrypt an empty buffer".to_string()));
        }

        let plaintext = self
            .queues
            .run(session_id, async {
                match self.session_load(session_id).await {
                    Ok(mut session) => {
                        let mut rng = self.rng.clone();
                        let plaintext = session.decrypt(&mut rng, &self.store, ciphertext).await?;
                        self.session_update(&session).await?;
                        Ok::<_, CryptoboxError>(plaintext)
                    }
                    Err(CryptoboxError::SessionNotFound(_)) => {
                        let (session, plaintext) =
                            self.session_from_message(session_id, ciphertext).await?;
                        self.session_save(&session).await?;
                        info!("New session {} from {}", session_id, session.fingerprint_remote());
                        let event = CryptoboxEvent::NewSession(session_id.to_string());
                        let _ = self.events.send(event);
                        Ok(plaintext)
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;

        self.refill_prekeys(true).await?;
        Ok(plaintext)
    }

    /// Bundle for a stored pre-key
    pub async fn get_prekey_bundle(&self, prekey_id: u16) -> Result<PreKeyBundle> {
        let prekey = self
            .store
            .load_prekey(prekey_id)
            .await?
            .ok_or(CryptoboxError::PreKeyNotFound(prekey_id))?;
        Ok(PreKeyBundle::new(self.identity()?.public_key, &prekey))
    }

    /// Publishable bundle for `prekey`
    pub fn serialize_prekey(&self, prekey: &PreKey) -> Result<SerializedPreKeyBundle> {
        let bundle = PreKeyBundle::new(self.identity()?.public_key, prekey);
        Ok(SerializedPreKeyBundle {
            id: prekey.key_id,
            key: BASE64.encode(bundle.to_bytes()?),
        })
    }

    /// Publishable bundle of the last-resort pre-key
    pub fn get_serialized_last_resort_prekey(&self) -> Result<SerializedPreKeyBundle> {
        self.serialize_prekey(&self.last_resort_prekey()?)
    }

    /// Publishable bundles of every regular pre-key
    pub async fn get_serialized_standard_prekeys(&self) -> Result<Vec<SerializedPreKeyBundle>> {
        let prekeys = self.store.load_prekeys().await?;
        prekeys
            .iter()
            .filter(|p| !p.is_last_resort())
            .map(|p| self.serialize_prekey(p))
            .collect()
    }

    /// Export identity, pre-keys and sessions
    pub async fn serialize(&self) -> Result<SerializedCryptobox> {
        let identity = BASE64.encode(self.identity()?.to_bytes()?);

        let mut snapshot = SerializedCryptobox {
            identity,
            ..Default::default()
        };
        for prekey in self.store.load_prekeys().await? {
            snapshot.prekeys.insert(prekey.key_id, BASE64.encode(prekey.to_bytes()?));
        }
        for (id, bytes) in self.store.read_session_records().await? {
            snapshot.sessions.insert(id, BASE64.encode(bytes));
        }
        Ok(snapshot)
    }

    /// Replace the whole box with an exported snapshot.
    ///
    /// Returns every stored pre-key after the import and a refill.
    pub async fn deserialize(&self, snapshot: &SerializedCryptobox) -> Result<Vec<PreKey>> {
        self.delete_data().await?;

        let mut bytes = BASE64.decode(&snapshot.identity)?;
        let identity = Arc::new(IdentityKeyPair::from_bytes(&bytes)?);
        bytes.zeroize();
        self.store.save_identity(&identity).await?;
        *self.identity.write() = Some(identity.clone());

        let mut prekeys = Vec::with_capacity(snapshot.prekeys.len());
        for encoded in snapshot.prekeys.values() {
            let prekey = PreKey::from_bytes(&BASE64.decode(encoded)?)?;
            if prekey.is_last_resort() {
                *self.last_resort.write() = Some(prekey.clone());
            }
            prekeys.push(prekey);
        }
        self.store.save_prekeys(&prekeys).await?;
        self.last_resort_prekey()?;

        for (id, encoded) in &snapshot.sessions {
            let session = Session::from_bytes(identity.clone(), &BASE64.decode(encoded)?)?;
            self.store.create_session(id, &session).await?;
        }

        info!(
            "Imported identity {} with {} pre-keys and {} sessions",
            identity.public_key.fingerprint(),
            prekeys.len(),
            snapshot.sessions.len()
        );
        self.init(true).await
    }

    async fn delete_data(&self) -> Result<()> {
        self.sessions.lock().clear();
        self.queues.clear();
        *self.identity.write() = None;
        *self.last_resort.write() = None;
        self.store.delete_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryEngine;

    fn cryptobox(minimum_prekeys: u16) -> Cryptobox {
        Cryptobox::new(
            Arc::new(MemoryEngine::new()),
            CryptoboxConfig::with_minimum_prekeys(minimum_prekeys),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_refill_continues_after_highest_id() {
        let cbox = cryptobox(4);
        let prekeys = cbox.create().await.unwrap();
        let ids: Vec<u16> = prekeys.iter().map(|p| p.key_id).collect();
        assert_eq!(ids, vec![0, 1, 2, MAX_PREKEY_ID]);

        cbox.store.delete_prekey(0).await.unwrap();
        let fresh = cbox.refill_prekeys(false).await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].key_id, 3);
    }

    #[tokio::test]
    async fn test_refill_wraps_and_skips_used_ids() {
        let cbox = cryptobox(4);
        cbox.create().await.unwrap();
        cbox.store.delete_prekey(1).await.unwrap();
        cbox.store.delete_prekey(2).await.unwrap();
        let mut rng = Csprng::new();
        cbox.store
            .save_prekeys(&[PreKey::new(MAX_PREKEY_ID - 1, &mut rng)])
            .await
            .unwrap();

        // Ids 0, 65534 and the last-resort key remain
        let fresh = cbox.refill_prekeys(false).await.unwrap();
        let ids: Vec<u16> = fresh.iter().map(|p| p.key_id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let cbox = cryptobox(1);
        cbox.create().await.unwrap();
        assert!(matches!(
            cbox.session_load("nobody").await,
            Err(CryptoboxError::SessionNotFound(_))
        ));
        assert!(matches!(
            cbox.encrypt("nobody", b"hi", None).await,
            Err(CryptoboxError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_operations_require_identity() {
        let cbox = cryptobox(1);
        assert!(matches!(cbox.identity(), Err(CryptoboxError::MissingIdentity)));
        assert!(matches!(
            cbox.get_serialized_last_resort_prekey(),
            Err(CryptoboxError::MissingIdentity) | Err(CryptoboxError::MissingLastResortPreKey)
        ));
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let config = CryptoboxConfig {
            session_cache_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            Cryptobox::new(Arc::new(MemoryEngine::new()), config),
            Err(CryptoboxError::Config(_))
        ));
    }
}
