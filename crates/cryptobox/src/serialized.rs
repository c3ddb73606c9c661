//! Export formats

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Portable snapshot of a box: base64 values keyed by record id
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedCryptobox {
    /// Serialized identity key pair
    pub identity: String,
    /// Serialized pre-keys by id
    pub prekeys: BTreeMap<u16, String>,
    /// Serialized sessions by session id
    pub sessions: BTreeMap<String, String>,
}

/// A pre-key bundle ready for publication
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedPreKeyBundle {
    /// Pre-key id
    pub id: u16,
    /// Base64 of the serialized bundle
    pub key: String,
}
