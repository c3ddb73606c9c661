//! Double Ratchet state of one session branch

use std::cmp::Ordering;
use std::collections::VecDeque;

use ciborium::value::Value;
use rand_core::CryptoRngCore;
use tracing::trace;
use zeroize::Zeroizing;

use super::chain::{RecvChain, SendChain};
use super::keys::{ChainKey, RootKey};
use crate::cbor::{self, Fields};
use crate::derived::DerivedSecrets;
use crate::error::{DecodeError, DecryptError, Result};
use crate::keys::{IdentityKey, IdentityKeyPair, KeyPair, PreKeyBundle, PublicKey};
use crate::message::{CipherMessage, Envelope, Message, PreKeyMessage, SessionTag};

/// Maximum number of receiving chains kept per state
pub const MAX_RECV_CHAINS: usize = 5;

/// Root key, one sending chain and the most recent receiving chains
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionState {
    recv_chains: VecDeque<RecvChain>,
    send_chain: SendChain,
    root_key: RootKey,
    prev_counter: u32,
}

/// `DH(a, A) ‖ DH(b, B) ‖ DH(c, C)` through the salt-less "handshake" KDF
fn handshake(secrets: [Zeroizing<[u8; 32]>; 3]) -> Result<(RootKey, ChainKey)> {
    let mut master = Zeroizing::new(Vec::with_capacity(96));
    for s in &secrets {
        master.extend_from_slice(s.as_slice());
    }
    let dsecs = DerivedSecrets::kdf_without_salt(&master, b"handshake")?;
    Ok((
        RootKey::from_cipher_key(dsecs.cipher_key),
        ChainKey::from_mac_key(dsecs.mac_key, 0),
    ))
}

impl SessionState {
    /// State of the initiator, who holds the peer's pre-key bundle
    pub fn init_as_alice<R: CryptoRngCore + ?Sized>(
        rng: &mut R,
        alice_ident: &IdentityKeyPair,
        alice_base: &KeyPair,
        bob: &PreKeyBundle,
    ) -> Result<Self> {
        let (root_key, chain_key) = handshake([
            alice_ident.secret_key.shared_secret(&bob.public_key),
            alice_base.secret_key.shared_secret(&bob.identity_key.public_key),
            alice_base.secret_key.shared_secret(&bob.public_key),
        ])?;

        let recv_chains = VecDeque::from([RecvChain::new(chain_key, bob.public_key)]);

        let send_ratchet = KeyPair::new(rng);
        let (root_key, send_chain_key) = root_key.dh_ratchet(&send_ratchet, &bob.public_key)?;

        Ok(Self {
            recv_chains,
            send_chain: SendChain::new(send_chain_key, send_ratchet),
            root_key,
            prev_counter: 0,
        })
    }

    /// State of the responder, rebuilt from a received pre-key message
    pub fn init_as_bob(
        bob_ident: &IdentityKeyPair,
        bob_prekey: &KeyPair,
        alice_ident: &IdentityKey,
        alice_base: &PublicKey,
    ) -> Result<Self> {
        let (root_key, chain_key) = handshake([
            bob_prekey.secret_key.shared_secret(&alice_ident.public_key),
            bob_ident.secret_key.shared_secret(alice_base),
            bob_prekey.secret_key.shared_secret(alice_base),
        ])?;

        Ok(Self {
            recv_chains: VecDeque::new(),
            send_chain: SendChain::new(chain_key, bob_prekey.clone()),
            root_key,
            prev_counter: 0,
        })
    }

    /// DH ratchet step towards the peer's new ratchet key
    pub fn ratchet<R: CryptoRngCore + ?Sized>(
        &mut self,
        rng: &mut R,
        ratchet_key: PublicKey,
    ) -> Result<()> {
        let new_ratchet = KeyPair::new(rng);

        let (recv_root, recv_chain) = self
            .root_key
            .dh_ratchet(&self.send_chain.ratchet_key, &ratchet_key)?;
        let (send_root, send_chain) = recv_root.dh_ratchet(&new_ratchet, &ratchet_key)?;

        self.root_key = send_root;
        self.prev_counter = self.send_chain.chain_key.idx();
        self.send_chain = SendChain::new(send_chain, new_ratchet);
        self.recv_chains.push_front(RecvChain::new(recv_chain, ratchet_key));
        self.recv_chains.truncate(MAX_RECV_CHAINS);

        trace!(
            prev_counter = self.prev_counter,
            recv_chains = self.recv_chains.len(),
            "DH ratchet step"
        );
        Ok(())
    }

    /// Encrypt `plaintext`, wrapping it in a pre-key message while a
    /// handshake is pending. The send chain advances only on success.
    pub fn encrypt(
        &mut self,
        identity_key: &IdentityKey,
        pending: Option<(u16, PublicKey)>,
        tag: SessionTag,
        plaintext: &[u8],
    ) -> Result<Envelope> {
        let msgkeys = self.send_chain.chain_key.message_keys()?;

        let message = CipherMessage {
            session_tag: tag,
            counter: self.send_chain.chain_key.idx(),
            prev_counter: self.prev_counter,
            ratchet_key: self.send_chain.ratchet_key.public_key,
            cipher_text: msgkeys.encrypt(plaintext)?,
        };

        let message = match pending {
            Some((prekey_id, base_key)) => Message::PreKey(PreKeyMessage {
                prekey_id,
                base_key,
                identity_key: *identity_key,
                message,
            }),
            None => Message::Cipher(message),
        };

        let envelope = Envelope::new(&msgkeys.mac_key, message)?;
        self.send_chain.chain_key = self.send_chain.chain_key.next()?;
        Ok(envelope)
    }

    /// Decrypt `msg`, ratcheting first if its ratchet key is new.
    ///
    /// The state may be partially advanced when this fails; callers decrypt
    /// against a copy.
    pub fn decrypt<R: CryptoRngCore + ?Sized>(
        &mut self,
        rng: &mut R,
        envelope: &Envelope,
        msg: &CipherMessage,
    ) -> Result<Vec<u8>> {
        let existing = self
            .recv_chains
            .iter()
            .position(|c| c.ratchet_key == msg.ratchet_key);
        let idx = match existing {
            Some(idx) => idx,
            None => {
                self.ratchet(rng, msg.ratchet_key)?;
                0
            }
        };

        let rc = &mut self.recv_chains[idx];
        match msg.counter.cmp(&rc.chain_key.idx()) {
            Ordering::Less => rc.try_message_keys(envelope, msg),
            Ordering::Equal => {
                let mks = rc.chain_key.message_keys()?;
                if !envelope.verify(&mks.mac_key) {
                    return Err(DecryptError::InvalidSignature.into());
                }
                let plaintext = mks.decrypt(&msg.cipher_text)?;
                rc.chain_key = rc.chain_key.next()?;
                Ok(plaintext)
            }
            Ordering::Greater => {
                let (chk, mk, skipped) = rc.stage_message_keys(msg)?;
                if !envelope.verify(&mk.mac_key) {
                    return Err(DecryptError::InvalidSignature.into());
                }
                let plaintext = mk.decrypt(&msg.cipher_text)?;
                rc.chain_key = chk.next()?;
                rc.commit_message_keys(skipped);
                Ok(plaintext)
            }
        }
    }

    /// Number of tracked receiving chains
    pub fn recv_chain_count(&self) -> usize {
        self.recv_chains.len()
    }

    /// Send-chain index at the last ratchet step
    pub fn prev_counter(&self) -> u32 {
        self.prev_counter
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        cbor::to_vec(&self.encode())
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::decode(cbor::from_slice(bytes)?)?)
    }

    pub(crate) fn encode(&self) -> Value {
        cbor::object([
            Value::Array(self.recv_chains.iter().map(RecvChain::encode).collect()),
            self.send_chain.encode(),
            self.root_key.encode(),
            cbor::uint_value(self.prev_counter),
        ])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 4)?;
        let recv_chains = cbor::list(f.take(0, "recv_chains")?)?
            .into_iter()
            .map(RecvChain::decode)
            .collect::<std::result::Result<VecDeque<_>, _>>()?;
        Ok(Self {
            recv_chains,
            send_chain: SendChain::decode(f.take(1, "send_chain")?)?,
            root_key: RootKey::decode(f.take(2, "root_key")?)?,
            prev_counter: cbor::u32(f.take(3, "prev_counter")?)?,
        })
    }
}
