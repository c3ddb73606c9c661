//! Sending and receiving chains

use std::collections::VecDeque;

use ciborium::value::Value;

use super::keys::{ChainKey, MessageKeys};
use crate::cbor::{self, Fields};
use crate::error::{DecodeError, DecryptError, Result};
use crate::keys::{KeyPair, PublicKey};
use crate::message::{CipherMessage, Envelope};

/// Maximum number of message keys skipped at once and retained per chain
pub const MAX_COUNTER_GAP: u32 = 1000;

/// Our sending chain and the ratchet key advertised with it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendChain {
    /// Current chain key
    pub chain_key: ChainKey,
    /// Our ratchet key pair
    pub ratchet_key: KeyPair,
}

impl SendChain {
    /// New sending chain
    pub fn new(chain_key: ChainKey, ratchet_key: KeyPair) -> Self {
        Self { chain_key, ratchet_key }
    }

    pub(crate) fn encode(&self) -> Value {
        cbor::object([self.chain_key.encode(), self.ratchet_key.encode()])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 2)?;
        Ok(Self {
            chain_key: ChainKey::decode(f.take(0, "chain_key")?)?,
            ratchet_key: KeyPair::decode(f.take(1, "ratchet_key")?)?,
        })
    }
}

/// A peer's sending chain as seen by us, with buffered skipped keys
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecvChain {
    /// Next expected chain key
    pub chain_key: ChainKey,
    /// Peer ratchet public key this chain belongs to
    pub ratchet_key: PublicKey,
    /// Keys of skipped messages, oldest first
    pub message_keys: VecDeque<MessageKeys>,
}

impl RecvChain {
    /// New receiving chain with an empty skip buffer
    pub fn new(chain_key: ChainKey, ratchet_key: PublicKey) -> Self {
        Self {
            chain_key,
            ratchet_key,
            message_keys: VecDeque::new(),
        }
    }

    /// Decrypt a message older than the chain head using a buffered key.
    ///
    /// The key is removed once it has been used.
    pub fn try_message_keys(
        &mut self,
        envelope: &Envelope,
        msg: &CipherMessage,
    ) -> Result<Vec<u8>> {
        let pos = self
            .message_keys
            .iter()
            .position(|mk| mk.counter == msg.counter)
            .ok_or(DecryptError::DuplicateMessage)?;

        if !envelope.verify(&self.message_keys[pos].mac_key) {
            return Err(DecryptError::InvalidSignature.into());
        }

        let plaintext = self.message_keys[pos].decrypt(&msg.cipher_text)?;
        self.message_keys.remove(pos);
        Ok(plaintext)
    }

    /// Derive keys for every index skipped before `msg.counter`.
    ///
    /// Returns the chain key at `msg.counter`, its message keys and the
    /// skipped keys. Nothing is committed to the chain.
    pub fn stage_message_keys(
        &self,
        msg: &CipherMessage,
    ) -> Result<(ChainKey, MessageKeys, Vec<MessageKeys>)> {
        let gap = msg.counter.saturating_sub(self.chain_key.idx());
        if gap > MAX_COUNTER_GAP {
            return Err(DecryptError::TooDistantFuture {
                gap,
                max: MAX_COUNTER_GAP,
            }
            .into());
        }

        let mut skipped = Vec::with_capacity(gap as usize);
        let mut chk = self.chain_key.clone();
        for _ in 0..gap {
            skipped.push(chk.message_keys()?);
            chk = chk.next()?;
        }

        let mk = chk.message_keys()?;
        Ok((chk, mk, skipped))
    }

    /// Append skipped keys, dropping the oldest beyond the buffer bound
    pub fn commit_message_keys(&mut self, keys: Vec<MessageKeys>) {
        self.message_keys.extend(keys);
        let excess = self.message_keys.len().saturating_sub(MAX_COUNTER_GAP as usize);
        self.message_keys.drain(..excess);
    }

    pub(crate) fn encode(&self) -> Value {
        cbor::object([
            self.chain_key.encode(),
            self.ratchet_key.encode(),
            Value::Array(self.message_keys.iter().map(MessageKeys::encode).collect()),
        ])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 3)?;
        let chain_key = ChainKey::decode(f.take(0, "chain_key")?)?;
        let ratchet_key = PublicKey::decode(f.take(1, "ratchet_key")?)?;
        let message_keys = cbor::list(f.take(2, "message_keys")?)?
            .into_iter()
            .map(MessageKeys::decode)
            .collect::<std::result::Result<_, _>>()?;
        Ok(Self {
            chain_key,
            ratchet_key,
            message_keys,
        })
    }
}
