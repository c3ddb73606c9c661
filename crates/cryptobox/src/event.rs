//! Box notifications

use proteus::keys::PreKey;

/// Events published by a [`Cryptobox`](crate::Cryptobox)
#[derive(Clone, Debug)]
pub enum CryptoboxEvent {
    /// Freshly generated pre-keys, never previously announced
    NewPreKeys(Vec<PreKey>),
    /// A session was created from an incoming pre-key message
    NewSession(String),
}

impl CryptoboxEvent {
    /// Stable topic name of the event
    pub fn topic(&self) -> &'static str {
        match self {
            CryptoboxEvent::NewPreKeys(_) => "new-prekeys",
            CryptoboxEvent::NewSession(_) => "new-session",
        }
    }
}
