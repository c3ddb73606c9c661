//! Ratchet messages and their wire format
//!
//! A serialized message is a type discriminator (`1` cipher, `2` pre-key)
//! followed by the message object.

mod envelope;

pub use envelope::Envelope;

use std::fmt;

use ciborium::value::Value;
use rand_core::CryptoRngCore;

use crate::cbor::{self, Fields};
use crate::error::{DecodeError, Result};
use crate::keys::{IdentityKey, PublicKey};

/// Random identifier of one ratchet branch between two parties
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionTag {
    tag: [u8; 16],
}

impl SessionTag {
    /// Fresh random tag
    pub fn new<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Self {
        let mut tag = [0u8; 16];
        rng.fill_bytes(&mut tag);
        Self { tag }
    }

    /// Tag bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.tag
    }

    pub(crate) fn encode(&self) -> Value {
        Value::Bytes(self.tag.to_vec())
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            tag: cbor::array(value)?,
        })
    }
}

impl From<[u8; 16]> for SessionTag {
    fn from(tag: [u8; 16]) -> Self {
        Self { tag }
    }
}

impl fmt::Display for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.tag))
    }
}

impl fmt::Debug for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionTag({self})")
    }
}

/// Ratchet message carrying one ciphertext
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherMessage {
    /// Ratchet branch this message belongs to
    pub session_tag: SessionTag,
    /// Index of the message in the sending chain
    pub counter: u32,
    /// Length of the sender's previous sending chain
    pub prev_counter: u32,
    /// Sender's current ratchet public key
    pub ratchet_key: PublicKey,
    /// Encrypted payload
    pub cipher_text: Vec<u8>,
}

impl CipherMessage {
    pub(crate) fn encode(&self) -> Value {
        cbor::object([
            self.session_tag.encode(),
            cbor::uint_value(self.counter),
            cbor::uint_value(self.prev_counter),
            self.ratchet_key.encode(),
            Value::Bytes(self.cipher_text.clone()),
        ])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 5)?;
        Ok(Self {
            session_tag: SessionTag::decode(f.take(0, "session_tag")?)?,
            counter: cbor::u32(f.take(1, "counter")?)?,
            prev_counter: cbor::u32(f.take(2, "prev_counter")?)?,
            ratchet_key: PublicKey::decode(f.take(3, "ratchet_key")?)?,
            cipher_text: cbor::bytes(f.take(4, "cipher_text")?)?,
        })
    }
}

/// Handshake message wrapping the first cipher message of a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyMessage {
    /// Id of the recipient pre-key used
    pub prekey_id: u16,
    /// Sender's ephemeral base key
    pub base_key: PublicKey,
    /// Sender's identity
    pub identity_key: IdentityKey,
    /// Embedded cipher message
    pub message: CipherMessage,
}

impl PreKeyMessage {
    pub(crate) fn encode(&self) -> Value {
        cbor::object([
            cbor::uint_value(self.prekey_id),
            self.base_key.encode(),
            self.identity_key.encode(),
            self.message.encode(),
        ])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 4)?;
        Ok(Self {
            prekey_id: cbor::u16(f.take(0, "prekey_id")?)?,
            base_key: PublicKey::decode(f.take(1, "base_key")?)?,
            identity_key: IdentityKey::decode(f.take(2, "identity_key")?)?,
            message: CipherMessage::decode(f.take(3, "message")?)?,
        })
    }
}

/// Either kind of ratchet message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Regular ratchet message
    Cipher(CipherMessage),
    /// Session-establishing message
    PreKey(PreKeyMessage),
}

const CIPHER_MESSAGE_TYPE: u8 = 1;
const PREKEY_MESSAGE_TYPE: u8 = 2;

impl Message {
    /// Serialize with the type discriminator
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let (kind, body) = match self {
            Message::Cipher(m) => (CIPHER_MESSAGE_TYPE, m.encode()),
            Message::PreKey(m) => (PREKEY_MESSAGE_TYPE, m.encode()),
        };
        let mut out = Vec::new();
        cbor::write(&cbor::uint_value(kind), &mut out)?;
        cbor::write(&body, &mut out)?;
        Ok(out)
    }

    /// Deserialize, dispatching on the type discriminator
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let kind = match cbor::read(&mut input)? {
            Value::Integer(i) => {
                u64::try_from(i).map_err(|_| DecodeError::InvalidType("message type"))?
            }
            _ => return Err(DecodeError::InvalidType("message type").into()),
        };
        let message = match kind {
            k if k == u64::from(CIPHER_MESSAGE_TYPE) => {
                Message::Cipher(CipherMessage::decode(cbor::read(&mut input)?)?)
            }
            k if k == u64::from(PREKEY_MESSAGE_TYPE) => {
                Message::PreKey(PreKeyMessage::decode(cbor::read(&mut input)?)?)
            }
            other => return Err(DecodeError::UnknownMessageType(other).into()),
        };
        Ok(message)
    }

    /// The cipher message, unwrapped from a pre-key message if needed
    pub fn cipher_message(&self) -> &CipherMessage {
        match self {
            Message::Cipher(m) => m,
            Message::PreKey(m) => &m.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProteusError;
    use crate::keys::{IdentityKeyPair, KeyPair};
    use rand::rngs::OsRng;

    fn cipher_message() -> CipherMessage {
        CipherMessage {
            session_tag: SessionTag::new(&mut OsRng),
            counter: 42,
            prev_counter: 3,
            ratchet_key: KeyPair::new(&mut OsRng).public_key,
            cipher_text: b"ciphertext".to_vec(),
        }
    }

    #[test]
    fn test_cipher_message_reencodes_identically() {
        let msg = Message::Cipher(cipher_message());
        let bytes = msg.to_bytes().unwrap();
        let copy = Message::from_bytes(&bytes).unwrap();
        assert_eq!(copy, msg);
        assert_eq!(copy.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_prekey_message_reencodes_identically() {
        let msg = Message::PreKey(PreKeyMessage {
            prekey_id: 7,
            base_key: KeyPair::new(&mut OsRng).public_key,
            identity_key: IdentityKeyPair::new(&mut OsRng).public_key,
            message: cipher_message(),
        });
        let bytes = msg.to_bytes().unwrap();
        let copy = Message::from_bytes(&bytes).unwrap();
        assert_eq!(copy, msg);
        assert_eq!(copy.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_unknown_message_type() {
        let mut bytes = Vec::new();
        cbor::write(&cbor::uint_value(9u8), &mut bytes).unwrap();
        cbor::write(&cipher_message().encode(), &mut bytes).unwrap();

        let err = Message::from_bytes(&bytes).err();
        assert!(matches!(
            err,
            Some(ProteusError::Decode(DecodeError::UnknownMessageType(9)))
        ));
    }

    #[test]
    fn test_session_tag_length_checked() {
        let mut value = cipher_message().encode();
        if let Value::Map(entries) = &mut value {
            entries[0].1 = Value::Bytes(vec![0; 15]);
        }
        let err = CipherMessage::decode(value).err();
        assert_eq!(err, Some(DecodeError::InvalidArrayLen { expected: 16, actual: 15 }));
    }
}
