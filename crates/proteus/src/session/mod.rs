//! Sessions
//!
//! A [`Session`] is the per-peer-device object. It owns one
//! [`SessionState`] per session tag and routes messages to the right one.
//!
//! # State discipline
//!
//! Decryption always runs against a clone of the stored state. The clone
//! replaces the stored state only once decryption succeeded, so a failed
//! decrypt can be retried against the untouched original.

mod chain;
mod keys;
mod state;

pub use chain::{RecvChain, SendChain, MAX_COUNTER_GAP};
pub use keys::{ChainKey, MessageKeys, RootKey};
pub use state::{SessionState, MAX_RECV_CHAINS};

use std::collections::HashMap;
use std::sync::Arc;

use ciborium::value::Value;
use rand_core::CryptoRngCore;
use tracing::debug;

use crate::cbor::{self, Fields};
use crate::error::{DecodeError, DecryptError, ProteusError, Result};
use crate::keys::{
    IdentityKey, IdentityKeyPair, KeyPair, PreKeyBundle, PublicKey, MAX_PREKEY_ID,
};
use crate::message::{CipherMessage, Envelope, Message, PreKeyMessage, SessionTag};
use crate::store::PreKeyStore;

/// Maximum number of session states kept per session
pub const MAX_SESSION_STATES: usize = 100;

#[derive(Clone, Debug)]
struct IndexedState {
    idx: u64,
    state: SessionState,
}

/// Ratchet session with one remote device
#[derive(Clone, Debug)]
pub struct Session {
    version: u8,
    session_tag: SessionTag,
    counter: u64,
    local_identity: Arc<IdentityKeyPair>,
    remote_identity: IdentityKey,
    pending_prekey: Option<(u16, PublicKey)>,
    session_states: HashMap<SessionTag, IndexedState>,
}

impl Session {
    fn empty(
        local_identity: Arc<IdentityKeyPair>,
        remote_identity: IdentityKey,
        session_tag: SessionTag,
        pending_prekey: Option<(u16, PublicKey)>,
    ) -> Self {
        Self {
            version: 1,
            session_tag,
            counter: 0,
            local_identity,
            remote_identity,
            pending_prekey,
            session_states: HashMap::new(),
        }
    }

    /// Start a session from the remote party's pre-key bundle.
    ///
    /// Messages are sent as pre-key messages until the peer answers.
    pub fn init_from_prekey<R: CryptoRngCore + ?Sized>(
        rng: &mut R,
        alice: Arc<IdentityKeyPair>,
        bob: &PreKeyBundle,
    ) -> Result<Self> {
        let alice_base = KeyPair::new(rng);
        let state = SessionState::init_as_alice(rng, &alice, &alice_base, bob)?;
        let session_tag = SessionTag::new(rng);

        let mut session = Self::empty(
            alice,
            bob.identity_key,
            session_tag,
            Some((bob.prekey_id, alice_base.public_key)),
        );
        session.insert_session_state(session_tag, state);
        Ok(session)
    }

    /// Create the session a received pre-key message asks for and decrypt it
    pub async fn init_from_message<R, S>(
        rng: &mut R,
        ours: Arc<IdentityKeyPair>,
        store: &S,
        envelope: &Envelope,
    ) -> Result<(Self, Vec<u8>)>
    where
        R: CryptoRngCore + Send + ?Sized,
        S: PreKeyStore + ?Sized,
    {
        match envelope.message() {
            Message::Cipher(_) => Err(DecryptError::InvalidMessage(
                "Can't initialise a session from a CipherMessage".to_string(),
            )
            .into()),
            Message::PreKey(pkmsg) => {
                let mut session =
                    Self::empty(ours, pkmsg.identity_key, pkmsg.message.session_tag, None);
                let plaintext = session
                    .decrypt_prekey_message(rng, store, envelope, pkmsg)
                    .await?;
                Ok((session, plaintext))
            }
        }
    }

    /// Encrypt under the current session tag
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Envelope> {
        let tag = self.session_tag;
        let entry = self
            .session_states
            .get_mut(&tag)
            .ok_or_else(|| ProteusError::SessionStateNotFound(tag.to_string()))?;
        entry
            .state
            .encrypt(&self.local_identity.public_key, self.pending_prekey, tag, plaintext)
    }

    /// Decrypt a received envelope.
    ///
    /// Pre-key messages are tried against an existing state for their tag
    /// first and only start a new state when that fails with
    /// `InvalidSignature` or `InvalidMessage`.
    pub async fn decrypt<R, S>(
        &mut self,
        rng: &mut R,
        store: &S,
        envelope: &Envelope,
    ) -> Result<Vec<u8>>
    where
        R: CryptoRngCore + Send + ?Sized,
        S: PreKeyStore + ?Sized,
    {
        match envelope.message() {
            Message::Cipher(msg) => self.decrypt_cipher_message(rng, envelope, msg),
            Message::PreKey(msg) => self.decrypt_prekey_message(rng, store, envelope, msg).await,
        }
    }

    async fn decrypt_prekey_message<R, S>(
        &mut self,
        rng: &mut R,
        store: &S,
        envelope: &Envelope,
        msg: &PreKeyMessage,
    ) -> Result<Vec<u8>>
    where
        R: CryptoRngCore + Send + ?Sized,
        S: PreKeyStore + ?Sized,
    {
        let expected = self.remote_identity.fingerprint();
        let actual = msg.identity_key.fingerprint();
        if actual != expected {
            return Err(DecryptError::RemoteIdentityChanged { expected, actual }.into());
        }

        match self.decrypt_cipher_message(rng, envelope, &msg.message) {
            Err(e) if e.starts_new_session() => {}
            other => return other,
        }

        let mut state = self.new_state(store, msg).await?;
        let plaintext = state.decrypt(rng, envelope, &msg.message)?;

        if msg.prekey_id != MAX_PREKEY_ID {
            match store.delete_prekey(msg.prekey_id).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(DecryptError::PrekeyNotFound(format!(
                        "Could not delete pre-key {}",
                        msg.prekey_id
                    ))
                    .into())
                }
                Err(e) => return Err(DecryptError::PrekeyNotFound(e.to_string()).into()),
            }
        }

        debug!(
            tag = %msg.message.session_tag,
            prekey_id = msg.prekey_id,
            "New session state from pre-key message"
        );
        self.insert_session_state(msg.message.session_tag, state);
        self.pending_prekey = None;
        Ok(plaintext)
    }

    fn decrypt_cipher_message<R: CryptoRngCore + ?Sized>(
        &mut self,
        rng: &mut R,
        envelope: &Envelope,
        msg: &CipherMessage,
    ) -> Result<Vec<u8>> {
        let mut state = self
            .session_states
            .get(&msg.session_tag)
            .map(|entry| entry.state.clone())
            .ok_or_else(|| {
                DecryptError::InvalidMessage(format!(
                    "No session state for tag {}",
                    msg.session_tag
                ))
            })?;

        let plaintext = state.decrypt(rng, envelope, msg)?;
        self.pending_prekey = None;
        self.insert_session_state(msg.session_tag, state);
        Ok(plaintext)
    }

    async fn new_state<S: PreKeyStore + ?Sized>(
        &self,
        store: &S,
        msg: &PreKeyMessage,
    ) -> Result<SessionState> {
        let prekey = store
            .load_prekey(msg.prekey_id)
            .await?
            .ok_or(ProteusError::PreKeyNotFound(msg.prekey_id))?;
        SessionState::init_as_bob(
            &self.local_identity,
            &prekey.key_pair,
            &msg.identity_key,
            &msg.base_key,
        )
    }

    fn insert_session_state(&mut self, tag: SessionTag, state: SessionState) {
        match self.session_states.get_mut(&tag) {
            Some(entry) => entry.state = state,
            None => {
                let idx = self.counter;
                self.counter += 1;
                self.session_states.insert(tag, IndexedState { idx, state });
            }
        }
        self.session_tag = tag;

        if self.session_states.len() <= MAX_SESSION_STATES {
            return;
        }

        let oldest = self
            .session_states
            .iter()
            .filter(|(t, _)| **t != self.session_tag)
            .min_by_key(|(_, entry)| entry.idx)
            .map(|(t, _)| *t);

        if let Some(evicted) = oldest {
            self.session_states.remove(&evicted);
            debug!(tag = %evicted, "Evicted session state");
        }
    }

    /// Current session tag
    pub fn session_tag(&self) -> SessionTag {
        self.session_tag
    }

    /// Our identity
    pub fn local_identity(&self) -> &IdentityKeyPair {
        &self.local_identity
    }

    /// Peer identity pinned for this session
    pub fn remote_identity(&self) -> &IdentityKey {
        &self.remote_identity
    }

    /// Pre-key id and base key of an unacknowledged handshake
    pub fn pending_prekey(&self) -> Option<(u16, PublicKey)> {
        self.pending_prekey
    }

    /// State stored for `tag`
    pub fn session_state(&self, tag: &SessionTag) -> Option<&SessionState> {
        self.session_states.get(tag).map(|entry| &entry.state)
    }

    /// Number of stored session states
    pub fn session_state_count(&self) -> usize {
        self.session_states.len()
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let pending = match &self.pending_prekey {
            Some((id, base)) => cbor::object([cbor::uint_value(*id), base.encode()]),
            None => Value::Null,
        };

        let mut states: Vec<_> = self.session_states.iter().collect();
        states.sort_by_key(|(_, entry)| entry.idx);
        let states = Value::Map(
            states
                .into_iter()
                .map(|(tag, entry)| (tag.encode(), entry.state.encode()))
                .collect(),
        );

        cbor::to_vec(&cbor::object([
            cbor::uint_value(self.version),
            self.session_tag.encode(),
            self.local_identity.public_key.encode(),
            self.remote_identity.encode(),
            pending,
            states,
        ]))
    }

    /// Deserialize a session belonging to `local_identity`
    pub fn from_bytes(local_identity: Arc<IdentityKeyPair>, bytes: &[u8]) -> Result<Self> {
        let mut f = Fields::open(cbor::from_slice(bytes)?)?;

        let version = cbor::u8(f.take(0, "version")?)?;
        let session_tag = SessionTag::decode(f.take(1, "session_tag")?)?;

        let local = IdentityKey::decode(f.take(2, "local_identity")?)?;
        if local.fingerprint() != local_identity.public_key.fingerprint() {
            return Err(DecodeError::LocalIdentityChanged.into());
        }

        let remote_identity = IdentityKey::decode(f.take(3, "remote_identity")?)?;

        let pending_prekey = match f.take_opt(4) {
            None | Some(Value::Null) => None,
            Some(v) => {
                let mut p = Fields::fixed(v, 2)?;
                let id = cbor::u16(p.take(0, "prekey_id")?)?;
                let base = PublicKey::decode(p.take(1, "base_key")?)?;
                Some((id, base))
            }
        };

        let entries = f
            .take(5, "session_states")?
            .into_map()
            .map_err(|_| DecodeError::InvalidType("object"))?;
        let mut session_states = HashMap::with_capacity(entries.len());
        for (idx, (tag, state)) in entries.into_iter().enumerate() {
            session_states.insert(
                SessionTag::decode(tag)?,
                IndexedState {
                    idx: idx as u64,
                    state: SessionState::decode(state)?,
                },
            );
        }

        Ok(Self {
            version,
            session_tag,
            counter: session_states.len() as u64,
            local_identity,
            remote_identity,
            pending_prekey,
            session_states,
        })
    }
}
