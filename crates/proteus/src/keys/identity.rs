//! Long-term device identity

use ciborium::value::Value;
use rand_core::CryptoRngCore;

use super::{KeyPair, PublicKey, SecretKey};
use crate::cbor::{self, Fields};
use crate::error::{DecodeError, Result};

/// Public identity of a device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentityKey {
    /// Identity public key
    pub public_key: PublicKey,
}

impl IdentityKey {
    /// Wrap a public key as an identity
    pub fn new(public_key: PublicKey) -> Self {
        Self { public_key }
    }

    /// Hex fingerprint of the identity key
    pub fn fingerprint(&self) -> String {
        self.public_key.fingerprint()
    }

    pub(crate) fn encode(&self) -> Value {
        cbor::object([self.public_key.encode()])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 1)?;
        Ok(Self::new(PublicKey::decode(f.take(0, "public_key")?)?))
    }
}

/// Long-term signing and key agreement pair of a device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityKeyPair {
    /// Encoding version
    pub version: u8,
    /// Identity secret key
    pub secret_key: SecretKey,
    /// Identity public key
    pub public_key: IdentityKey,
}

impl IdentityKeyPair {
    /// Generate a fresh identity
    pub fn new<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Self {
        let kp = KeyPair::new(rng);
        Self {
            version: 1,
            secret_key: kp.secret_key,
            public_key: IdentityKey::new(kp.public_key),
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
        cbor::object([
            cbor::uint_value(self.version),
            self.secret_key.encode(),
            self.public_key.encode(),
        ])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 3)?;
        Ok(Self {
            version: cbor::u8(f.take(0, "version")?)?,
            secret_key: SecretKey::decode(f.take(1, "secret_key")?)?,
            public_key: IdentityKey::decode(f.take(2, "public_key")?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_identity_reencodes_identically() {
        let ident = IdentityKeyPair::new(&mut OsRng);
        let bytes = ident.to_bytes().unwrap();
        let copy = IdentityKeyPair::from_bytes(&bytes).unwrap();

        assert_eq!(copy, ident);
        assert_eq!(copy.public_key.fingerprint(), ident.public_key.fingerprint());
        assert_eq!(copy.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_identity_wrong_field_count() {
        let ident = IdentityKeyPair::new(&mut OsRng);
        let value = cbor::object([cbor::uint_value(1u8), ident.secret_key.encode()]);
        let bytes = cbor::to_vec(&value).unwrap();

        let err = IdentityKeyPair::from_bytes(&bytes).err();
        assert!(matches!(
            err,
            Some(crate::ProteusError::Decode(DecodeError::UnexpectedPropertyCount {
                expected: 3,
                actual: 2
            }))
        ));
    }
}
