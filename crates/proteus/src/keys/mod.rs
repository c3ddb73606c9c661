//! Key types
//!
//! All long-lived keys are Ed25519 key pairs. Diffie-Hellman uses their
//! Curve25519 forms, derived once when the key is created or decoded.

mod identity;
mod prekey;

pub use identity::{IdentityKey, IdentityKeyPair};
pub use prekey::{PreKey, PreKeyAuth, PreKeyBundle, MAX_PREKEY_ID};

use ciborium::value::Value;
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::CryptoRngCore;
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};
use zeroize::Zeroizing;

use crate::cbor::{self, Fields};
use crate::error::DecodeError;

/// Public half of an Ed25519 key pair with its Curve25519 form
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub_edward: VerifyingKey,
    pub_curve: X25519PublicKey,
}

impl PublicKey {
    /// Parse raw Ed25519 public key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, DecodeError> {
        let pub_edward = VerifyingKey::from_bytes(bytes)
            .map_err(|e| DecodeError::InvalidKey(e.to_string()))?;
        let pub_curve = ed25519_pk_to_x25519_pk(bytes)?;
        Ok(Self { pub_edward, pub_curve })
    }

    /// Raw Ed25519 public key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.pub_edward.as_bytes()
    }

    /// Check an Ed25519 signature over `msg`
    pub fn verify(&self, signature: &Signature, msg: &[u8]) -> bool {
        self.pub_edward.verify(msg, signature).is_ok()
    }

    /// Lowercase hex of the public key bytes
    pub fn fingerprint(&self) -> String {
        hex::encode(self.as_bytes())
    }

    pub(crate) fn curve(&self) -> &X25519PublicKey {
        &self.pub_curve
    }

    pub(crate) fn encode(&self) -> Value {
        cbor::object([Value::Bytes(self.as_bytes().to_vec())])
    }

    pub(crate) fn decode(value: Value) -> Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 1)?;
        Self::from_bytes(&cbor::array(f.take(0, "pub_edward")?)?)
    }
}

/// Map an Edwards point onto its birationally equivalent Montgomery point
fn ed25519_pk_to_x25519_pk(bytes: &[u8; 32]) -> Result<X25519PublicKey, DecodeError> {
    let edwards = CompressedEdwardsY(*bytes)
        .decompress()
        .ok_or_else(|| DecodeError::InvalidKey("Could not decompress point".to_string()))?;
    Ok(X25519PublicKey::from(edwards.to_montgomery().to_bytes()))
}

/// Secret half of an Ed25519 key pair with its Curve25519 form
#[derive(Clone)]
pub struct SecretKey {
    sec_edward: SigningKey,
    sec_curve: X25519StaticSecret,
}

impl SecretKey {
    fn from_signing_key(sec_edward: SigningKey) -> Self {
        let sec_curve = derive_x25519_from_ed25519(&sec_edward);
        Self { sec_edward, sec_curve }
    }

    /// Ed25519 signature over `msg`
    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.sec_edward.sign(msg)
    }

    /// X25519 shared secret with `their` public key
    pub fn shared_secret(&self, their: &PublicKey) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.sec_curve.diffie_hellman(their.curve()).to_bytes())
    }

    pub(crate) fn encode(&self) -> Value {
        let keypair = Zeroizing::new(self.sec_edward.to_keypair_bytes());
        cbor::object([Value::Bytes(keypair.to_vec())])
    }

    pub(crate) fn decode(value: Value) -> Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 1)?;
        let keypair = Zeroizing::new(cbor::array::<64>(f.take(0, "sec_edward")?)?);
        let sec_edward = SigningKey::from_keypair_bytes(&keypair)
            .map_err(|e| DecodeError::InvalidKey(e.to_string()))?;
        Ok(Self::from_signing_key(sec_edward))
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.sec_edward.to_bytes() == other.sec_edward.to_bytes()
    }
}

impl Eq for SecretKey {}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Clamped lower half of SHA-512 over the Ed25519 seed
fn derive_x25519_from_ed25519(signing_key: &SigningKey) -> X25519StaticSecret {
    let hash = Sha512::digest(signing_key.to_bytes());
    let mut x25519_bytes = Zeroizing::new([0u8; 32]);
    x25519_bytes.copy_from_slice(&hash[..32]);

    x25519_bytes[0] &= 248;
    x25519_bytes[31] &= 127;
    x25519_bytes[31] |= 64;

    X25519StaticSecret::from(*x25519_bytes)
}

/// Ed25519 key pair usable for signing and Diffie-Hellman
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    /// Secret half
    pub secret_key: SecretKey,
    /// Public half
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair
    pub fn new<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Self {
        let signing_key = SigningKey::generate(rng);
        let verifying_key = signing_key.verifying_key();
        let secret_key = SecretKey::from_signing_key(signing_key);
        // Curve form of a*B equals the X25519 public key of the clamped scalar a
        let public_key = PublicKey {
            pub_edward: verifying_key,
            pub_curve: X25519PublicKey::from(&secret_key.sec_curve),
        };
        Self { secret_key, public_key }
    }

    pub(crate) fn encode(&self) -> Value {
        cbor::object([self.secret_key.encode(), self.public_key.encode()])
    }

    pub(crate) fn decode(value: Value) -> Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 2)?;
        let secret_key = SecretKey::decode(f.take(0, "secret_key")?)?;
        let public_key = PublicKey::decode(f.take(1, "public_key")?)?;
        if secret_key.sec_edward.verifying_key() != public_key.pub_edward {
            return Err(DecodeError::InvalidKey("Key pair halves do not match".to_string()));
        }
        Ok(Self { secret_key, public_key })
    }
}
