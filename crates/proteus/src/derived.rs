//! Derived symmetric key material
//!
//! HKDF-SHA256 splits input key material into a ChaCha20-Poly1305 cipher key
//! and an HMAC-SHA256 MAC key.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ciborium::value::Value;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cbor::{self, Fields};
use crate::error::{DecodeError, ProteusError, Result};

/// HMAC-SHA256 for envelope authentication and chain stepping
pub type HmacSha256 = Hmac<Sha256>;

/// Symmetric encryption key
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CipherKey {
    key: [u8; 32],
}

impl CipherKey {
    /// Wrap raw key bytes
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Encrypt `plaintext` under a 12-byte nonce
    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8; 12]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| ProteusError::Crypto("Encryption failed".to_string()))
    }

    /// Decrypt and authenticate `ciphertext`
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; 12]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProteusError::Crypto("Decryption failed".to_string()))
    }

    pub(crate) fn encode(&self) -> Value {
        cbor::object([Value::Bytes(self.key.to_vec())])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 1)?;
        Ok(Self::new(cbor::array(f.take(0, "key")?)?))
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CipherKey(..)")
    }
}

/// Message authentication key
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MacKey {
    key: [u8; 32],
}

impl MacKey {
    /// Wrap raw key bytes
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn hmac(&self) -> Result<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(&self.key)
            .map_err(|e| ProteusError::Crypto(e.to_string()))
    }

    /// HMAC-SHA256 tag over `msg`
    pub fn sign(&self, msg: &[u8]) -> Result<[u8; 32]> {
        let mut mac = self.hmac()?;
        mac.update(msg);
        Ok(mac.finalize().into_bytes().into())
    }

    /// Constant-time check of `signature` against `msg`
    pub fn verify(&self, signature: &[u8], msg: &[u8]) -> bool {
        match self.hmac() {
            Ok(mut mac) => {
                mac.update(msg);
                mac.verify_slice(signature).is_ok()
            }
            Err(_) => false,
        }
    }

    pub(crate) fn encode(&self) -> Value {
        cbor::object([Value::Bytes(self.key.to_vec())])
    }

    pub(crate) fn decode(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut f = Fields::fixed(value, 1)?;
        Ok(Self::new(cbor::array(f.take(0, "key")?)?))
    }
}

impl std::fmt::Debug for MacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MacKey(..)")
    }
}

/// Cipher and MAC key pair produced by one HKDF expansion
#[derive(Debug)]
pub struct DerivedSecrets {
    /// First 32 bytes of the expansion
    pub cipher_key: CipherKey,
    /// Last 32 bytes of the expansion
    pub mac_key: MacKey,
}

impl DerivedSecrets {
    /// HKDF-SHA256 over `input` with the given salt and context label
    pub fn kdf(input: &[u8], salt: &[u8], info: &[u8]) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(Some(salt), input);
        let mut okm = [0u8; 64];
        hk.expand(info, &mut okm)
            .map_err(|_| ProteusError::Crypto("HKDF expansion failed".to_string()))?;

        let mut cipher = [0u8; 32];
        let mut mac = [0u8; 32];
        cipher.copy_from_slice(&okm[..32]);
        mac.copy_from_slice(&okm[32..]);
        okm.zeroize();

        Ok(Self {
            cipher_key: CipherKey::new(cipher),
            mac_key: MacKey::new(mac),
        })
    }

    /// HKDF-SHA256 with an empty salt
    pub fn kdf_without_salt(input: &[u8], info: &[u8]) -> Result<Self> {
        Self::kdf(input, &[], info)
    }
}
