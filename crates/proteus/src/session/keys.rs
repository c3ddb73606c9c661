//! Symmetric ratchet keys

use ciborium::value::Value;

use crate::cbor::{self, Fields};
use crate::derived::{CipherKey, DerivedSecrets, MacKey};
use crate::error::{DecodeError, ProteusError, Result};
use crate::keys::{KeyPair, PublicKey};

/// Key of one sending or receiving chain at a given index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainKey {
    key: MacKey,
    idx: u32,
}

impl ChainKey {
    /// Chain key from raw MAC key material
    pub fn from_mac_key(key: MacKey, idx: u32) -> Self {
        Self { key, idx }
    }

    /// Current index
    pub fn idx(&self) -> u32 {
        self.idx
    }

    /// Next chain key: `HMAC(key, "1")` at `idx + 1`
    pub fn next(&self) -> Result<ChainKey> {
        let idx = self
            .idx
            .checked_add(1)
            .ok_or_else(|| ProteusError::Crypto("Chain key index exhausted".to_string()))?;
        Ok(Self {
            key: MacKey::new(self.key.sign(b"1")?),
            idx,
        })
    }

    /// Message keys for the current index
    pub fn message_keys(&self) -> Result<MessageKeys> {
        let base = zeroize::Zeroizing::new(self.key.sign(b"0")?);
        let dsecs = DerivedSecrets::kdf_without_salt(base.as_slice(), b"hash_ratchet")?;
        Ok(MessageKeys {
            cipher_key: dsecs.cipher_key,
            mac_key: dsecs.mac_key,
            counter: self.idx,
        })
    }

    pub(crate) fn encode(&self) -> Value {
        cbor::object([self.key.encode(), cbor::uint_value(self.idx)])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 2)?;
        Ok(Self {
            key: MacKey::decode(f.take(0, "key")?)?,
            idx: cbor::u32(f.take(1, "idx")?)?,
        })
    }
}

/// Single-use keys for one message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageKeys {
    /// Payload encryption key
    pub cipher_key: CipherKey,
    /// Envelope authentication key
    pub mac_key: MacKey,
    /// Index of the message in its chain
    pub counter: u32,
}

impl MessageKeys {
    fn nonce(&self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&self.counter.to_be_bytes());
        nonce
    }

    /// Encrypt a message payload
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher_key.encrypt(plaintext, &self.nonce())
    }

    /// Decrypt a message payload
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.cipher_key.decrypt(ciphertext, &self.nonce())
    }

    pub(crate) fn encode(&self) -> Value {
        cbor::object([
            self.cipher_key.encode(),
            self.mac_key.encode(),
            cbor::uint_value(self.counter),
        ])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 3)?;
        Ok(Self {
            cipher_key: CipherKey::decode(f.take(0, "cipher_key")?)?,
            mac_key: MacKey::decode(f.take(1, "mac_key")?)?,
            counter: cbor::u32(f.take(2, "counter")?)?,
        })
    }
}

/// Root of the DH ratchet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootKey {
    key: CipherKey,
}

impl RootKey {
    /// Root key from raw cipher key material
    pub fn from_cipher_key(key: CipherKey) -> Self {
        Self { key }
    }

    /// Mix a fresh DH output into the root, yielding the next root and a
    /// new chain key at index 0
    pub fn dh_ratchet(&self, ours: &KeyPair, theirs: &PublicKey) -> Result<(RootKey, ChainKey)> {
        let secret = ours.secret_key.shared_secret(theirs);
        let dsecs = DerivedSecrets::kdf(secret.as_slice(), self.key.as_bytes(), b"dh_ratchet")?;
        Ok((
            RootKey::from_cipher_key(dsecs.cipher_key),
            ChainKey::from_mac_key(dsecs.mac_key, 0),
        ))
    }

    pub(crate) fn encode(&self) -> Value {
        cbor::object([self.key.encode()])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 1)?;
        Ok(Self::from_cipher_key(CipherKey::decode(f.take(0, "key")?)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_chain_key_steps() {
        let ck = ChainKey::from_mac_key(MacKey::new([1; 32]), 0);
        let next = ck.next().unwrap();
        assert_eq!(next.idx(), 1);
        assert_ne!(next.key, ck.key);

        let mk0 = ck.message_keys().unwrap();
        let mk1 = next.message_keys().unwrap();
        assert_eq!(mk0.counter, 0);
        assert_eq!(mk1.counter, 1);
        assert_ne!(mk0.cipher_key, mk1.cipher_key);
        // Deterministic
        assert_eq!(ck.message_keys().unwrap(), mk0);
    }

    #[test]
    fn test_chain_key_exhaustion() {
        let ck = ChainKey::from_mac_key(MacKey::new([1; 32]), u32::MAX);
        assert!(ck.next().is_err());
    }

    #[test]
    fn test_message_keys_single_counter() {
        let mk = ChainKey::from_mac_key(MacKey::new([2; 32]), 3).message_keys().unwrap();
        let ct = mk.encrypt(b"payload").unwrap();
        assert_eq!(mk.decrypt(&ct).unwrap(), b"payload");

        let mut other = mk.clone();
        other.counter = 4;
        assert!(other.decrypt(&ct).is_err());
    }

    #[test]
    fn test_dh_ratchet_agrees() {
        let root = RootKey::from_cipher_key(CipherKey::new([9; 32]));
        let a = KeyPair::new(&mut OsRng);
        let b = KeyPair::new(&mut OsRng);

        let (ra, ca) = root.dh_ratchet(&a, &b.public_key).unwrap();
        let (rb, cb) = root.dh_ratchet(&b, &a.public_key).unwrap();
        assert_eq!(ra, rb);
        assert_eq!(ca, cb);
        assert_eq!(ca.idx(), 0);
    }
}
