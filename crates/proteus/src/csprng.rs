//! HMAC-DRBG (SHA-256) random number generator
//!
//! [`Csprng`] is the generator handle passed to every key-generating
//! operation. It seeds itself from the OS on first use, accepts extra
//! entropy through [`Csprng::seed`] and mixes fresh OS randomness into each
//! request as additional input.

use std::sync::Arc;

use hmac::Mac;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand_core::{CryptoRng, RngCore};
use tracing::{trace, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::derived::HmacSha256;
use crate::error::{ProteusError, Result};

/// Largest number of bytes a single generate call may return
pub const MAX_REQUEST_LEN: usize = 1 << 16;

/// Generate calls allowed between reseeds
pub const RESEED_INTERVAL: u64 = 1 << 48;

/// HMAC-DRBG state over SHA-256
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct HmacDrbg {
    k: [u8; 32],
    v: [u8; 32],
    reseed_counter: u64,
}

fn hmac(key: &[u8; 32], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| ProteusError::Crypto(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

impl HmacDrbg {
    /// Instantiate from entropy, nonce and personalization input
    pub fn instantiate(entropy: &[u8], nonce: &[u8], personalization: &[u8]) -> Result<Self> {
        let mut drbg = Self {
            k: [0u8; 32],
            v: [1u8; 32],
            reseed_counter: 0,
        };
        drbg.update(&[entropy, nonce, personalization])?;
        drbg.reseed_counter = 1;
        Ok(drbg)
    }

    /// Mix new entropy into the state
    pub fn reseed(&mut self, entropy: &[u8], additional: &[u8]) -> Result<()> {
        self.update(&[entropy, additional])?;
        self.reseed_counter = 1;
        Ok(())
    }

    fn update(&mut self, provided: &[&[u8]]) -> Result<()> {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(provided.len() + 2);
        parts.push(&self.v);
        parts.push(&[0x00]);
        parts.extend_from_slice(provided);
        let k = hmac(&self.k, &parts)?;
        let v = hmac(&k, &[&self.v])?;
        self.k = k;
        self.v = v;

        if provided.iter().all(|p| p.is_empty()) {
            return Ok(());
        }

        let mut parts: Vec<&[u8]> = Vec::with_capacity(provided.len() + 2);
        parts.push(&self.v);
        parts.push(&[0x01]);
        parts.extend_from_slice(provided);
        let k = hmac(&self.k, &parts)?;
        let v = hmac(&k, &[&self.v])?;
        self.k = k;
        self.v = v;
        Ok(())
    }

    /// Whether the generator must be reseeded before the next request
    pub fn needs_reseed(&self) -> bool {
        self.reseed_counter > RESEED_INTERVAL
    }

    /// Fill `out` with output, mixing in `additional`
    pub fn generate(&mut self, out: &mut [u8], additional: &[u8]) -> Result<()> {
        if out.len() > MAX_REQUEST_LEN {
            return Err(ProteusError::Crypto(format!(
                "Requested {} bytes, at most {} allowed",
                out.len(),
                MAX_REQUEST_LEN
            )));
        }
        if self.needs_reseed() {
            return Err(ProteusError::Crypto("Generator needs reseeding".to_string()));
        }

        if !additional.is_empty() {
            self.update(&[additional])?;
        }
        for chunk in out.chunks_mut(32) {
            self.v = hmac(&self.k, &[&self.v])?;
            chunk.copy_from_slice(&self.v[..chunk.len()]);
        }
        self.update(&[additional])?;
        self.reseed_counter += 1;
        Ok(())
    }
}

struct Inner {
    drbg: Option<HmacDrbg>,
    mix_os_entropy: bool,
}

/// Shared handle to a seeded HMAC-DRBG
#[derive(Clone)]
pub struct Csprng {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Csprng {
    fn default() -> Self {
        Self::new()
    }
}

impl Csprng {
    /// Generator that seeds itself from the OS on first use
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                drbg: None,
                mix_os_entropy: true,
            })),
        }
    }

    /// Reproducible generator driven only by `seed`. Intended for tests.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                drbg: Some(HmacDrbg::instantiate(seed, &[], &[])?),
                mix_os_entropy: false,
            })),
        })
    }

    /// Seed with `entropy`; instantiates on first call, reseeds afterwards
    pub fn seed(&self, entropy: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.drbg.as_mut() {
            Some(drbg) => drbg.reseed(entropy, &[])?,
            None => inner.drbg = Some(HmacDrbg::instantiate(entropy, &[], &[])?),
        }
        trace!(len = entropy.len(), "Seeded generator");
        Ok(())
    }

    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let mix = inner.mix_os_entropy;

        if inner.drbg.is_none() {
            let mut entropy = [0u8; 32];
            OsRng.fill_bytes(&mut entropy);
            inner.drbg = Some(HmacDrbg::instantiate(&entropy, &[], &[])?);
            entropy.zeroize();
        }
        let drbg = inner
            .drbg
            .as_mut()
            .ok_or_else(|| ProteusError::Crypto("Generator not instantiated".to_string()))?;

        for chunk in dest.chunks_mut(MAX_REQUEST_LEN) {
            let mut additional = [0u8; 32];
            if mix || drbg.needs_reseed() {
                OsRng.fill_bytes(&mut additional);
            }
            if drbg.needs_reseed() {
                drbg.reseed(&additional, &[])?;
            }
            let input: &[u8] = if mix { &additional } else { &[] };
            drbg.generate(chunk, input)?;
            additional.zeroize();
        }
        Ok(())
    }
}

impl RngCore for Csprng {
    fn next_u32(&mut self) -> u32 {
        rand_core::impls::next_u32_via_fill(self)
    }

    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if let Err(e) = self.fill(dest) {
            warn!(error = %e, "Generator failed, falling back to OS randomness");
            OsRng.fill_bytes(dest);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand_core::Error> {
        self.fill(dest).map_err(rand_core::Error::new)
    }
}

impl CryptoRng for Csprng {}
