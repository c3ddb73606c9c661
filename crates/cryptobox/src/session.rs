//! Box-level session handle

use proteus::csprng::Csprng;
use proteus::message::Envelope;
use proteus::session::Session;
use proteus::store::PreKeyStore;

use crate::error::{CryptoboxError, Result};

/// A [`Session`] together with the id the box stores it under
#[derive(Clone, Debug)]
pub struct CryptoboxSession {
    /// Session id
    pub id: String,
    /// Protocol session
    pub session: Session,
}

impl CryptoboxSession {
    /// Wrap a session
    pub fn new(id: impl Into<String>, session: Session) -> Self {
        Self {
            id: id.into(),
            session,
        }
    }

    /// Encrypt and serialize an envelope.
    ///
    /// The session only advances once the envelope is serialized.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut next = self.session.clone();
        let bytes = next.encrypt(plaintext)?.to_bytes()?;
        self.session = next;
        Ok(bytes)
    }

    /// Decrypt a serialized envelope
    pub async fn decrypt<S>(
        &mut self,
        rng: &mut Csprng,
        store: &S,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>>
    where
        S: PreKeyStore + ?Sized,
    {
        if ciphertext.is_empty() {
            return Err(CryptoboxError::Decryption("Cannot decrypt an empty buffer".to_string()));
        }
        let envelope = Envelope::from_bytes(ciphertext)?;
        Ok(self.session.decrypt(rng, store, &envelope).await?)
    }

    /// Fingerprint of our identity
    pub fn fingerprint_local(&self) -> String {
        self.session.local_identity().public_key.fingerprint()
    }

    /// Fingerprint of the peer identity
    pub fn fingerprint_remote(&self) -> String {
        self.session.remote_identity().fingerprint()
    }
}
