//! Pre-keys and pre-key bundles

use ciborium::value::Value;
use ed25519_dalek::Signature;
use rand_core::CryptoRngCore;

use super::{IdentityKey, IdentityKeyPair, KeyPair, PublicKey};
use crate::cbor::{self, Fields};
use crate::error::{DecodeError, Result};

/// Reserved id of the last-resort pre-key
pub const MAX_PREKEY_ID: u16 = 0xFFFF;

/// Ephemeral key pair published ahead of time for session setup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKey {
    /// Encoding version
    pub version: u8,
    /// Pre-key id
    pub key_id: u16,
    /// Key material
    pub key_pair: KeyPair,
}

impl PreKey {
    /// Generate a pre-key with the given id
    pub fn new<R: CryptoRngCore + ?Sized>(key_id: u16, rng: &mut R) -> Self {
        Self {
            version: 1,
            key_id,
            key_pair: KeyPair::new(rng),
        }
    }

    /// Generate the non-consumable last-resort pre-key
    pub fn last_resort<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Self {
        Self::new(MAX_PREKEY_ID, rng)
    }

    /// Whether this is the last-resort pre-key
    pub fn is_last_resort(&self) -> bool {
        self.key_id == MAX_PREKEY_ID
    }

    /// Generate up to `size` pre-keys with sequential ids starting at `start`.
    ///
    /// Ids wrap modulo [`MAX_PREKEY_ID`], so the reserved id is never
    /// produced. Ids for which `in_use` holds are skipped; fewer than `size`
    /// keys come back only once the regular id space is exhausted.
    pub fn generate_prekeys<R, F>(start: u16, size: u16, in_use: F, rng: &mut R) -> Vec<PreKey>
    where
        R: CryptoRngCore + ?Sized,
        F: Fn(u16) -> bool,
    {
        let start = u32::from(start) % u32::from(MAX_PREKEY_ID);
        (0..u32::from(MAX_PREKEY_ID))
            // below MAX_PREKEY_ID, so always fits
            .map(|i| ((start + i) % u32::from(MAX_PREKEY_ID)) as u16)
            .filter(|id| !in_use(*id))
            .take(usize::from(size))
            .map(|id| PreKey::new(id, rng))
            .collect()
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
            cbor::uint_value(self.version),
            cbor::uint_value(self.key_id),
            self.key_pair.encode(),
        ])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 3)?;
        Ok(Self {
            version: cbor::u8(f.take(0, "version")?)?,
            key_id: cbor::u16(f.take(1, "key_id")?)?,
            key_pair: KeyPair::decode(f.take(2, "key_pair")?)?,
        })
    }
}

/// Outcome of checking a bundle signature
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreKeyAuth {
    /// Signature verifies under the bundled identity
    Valid,
    /// Signature present but does not verify
    Invalid,
    /// Bundle is unsigned
    Unknown,
}

/// Public material a peer needs to start a session with us
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyBundle {
    /// Encoding version
    pub version: u8,
    /// Id of the bundled pre-key
    pub prekey_id: u16,
    /// Bundled pre-key public key
    pub public_key: PublicKey,
    /// Identity of the bundle owner
    pub identity_key: IdentityKey,
    /// Identity signature over the pre-key, if signed
    pub signature: Option<Signature>,
}

impl PreKeyBundle {
    /// Unsigned bundle
    pub fn new(identity_key: IdentityKey, prekey: &PreKey) -> Self {
        Self {
            version: 1,
            prekey_id: prekey.key_id,
            public_key: prekey.key_pair.public_key,
            identity_key,
            signature: None,
        }
    }

    /// Bundle signed by the identity secret key
    pub fn signed(identity: &IdentityKeyPair, prekey: &PreKey) -> Self {
        let mut bundle = Self::new(identity.public_key, prekey);
        bundle.signature = Some(identity.secret_key.sign(&bundle.signed_payload()));
        bundle
    }

    fn signed_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(34);
        payload.extend_from_slice(self.public_key.as_bytes());
        payload.extend_from_slice(&self.prekey_id.to_be_bytes());
        payload
    }

    /// Check the bundle signature
    pub fn verify(&self) -> PreKeyAuth {
        match &self.signature {
            None => PreKeyAuth::Unknown,
            Some(sig) if self.identity_key.public_key.verify(sig, &self.signed_payload()) => {
                PreKeyAuth::Valid
            }
            Some(_) => PreKeyAuth::Invalid,
        }
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
        let signature = match &self.signature {
            Some(sig) => Value::Bytes(sig.to_bytes().to_vec()),
            None => Value::Null,
        };
        cbor::object([
            cbor::uint_value(self.version),
            cbor::uint_value(self.prekey_id),
            self.public_key.encode(),
            self.identity_key.encode(),
            signature,
        ])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::open(value)?;
        let signature = match f.take_opt(4) {
            None | Some(Value::Null) => None,
            Some(v) => Some(Signature::from_bytes(&cbor::array::<64>(v)?)),
        };
        Ok(Self {
            version: cbor::u8(f.take(0, "version")?)?,
            prekey_id: cbor::u16(f.take(1, "prekey_id")?)?,
            public_key: PublicKey::decode(f.take(2, "public_key")?)?,
            identity_key: IdentityKey::decode(f.take(3, "identity_key")?)?,
            signature,
        })
    }
}
