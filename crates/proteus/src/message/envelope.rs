//! MAC-authenticated message envelope

use ciborium::value::Value;

use super::Message;
use crate::cbor::{self, Fields};
use crate::derived::MacKey;
use crate::error::Result;

/// Serialized message bound to a MAC over its exact bytes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    version: u8,
    mac: [u8; 32],
    message: Message,
    message_enc: Vec<u8>,
}

impl Envelope {
    /// Serialize `message` and authenticate it under `mac_key`
    pub fn new(mac_key: &MacKey, message: Message) -> Result<Self> {
        let message_enc = message.to_bytes()?;
        let mac = mac_key.sign(&message_enc)?;
        Ok(Self {
            version: 1,
            mac,
            message,
            message_enc,
        })
    }

    /// Encoding version
    pub fn version(&self) -> u8 {
        self.version
    }

    /// The wrapped message
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Check the MAC against the serialized message bytes
    pub fn verify(&self, mac_key: &MacKey) -> bool {
        mac_key.verify(&self.mac, &self.message_enc)
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let value = cbor::object([
            cbor::uint_value(self.version),
            cbor::object([Value::Bytes(self.mac.to_vec())]),
            Value::Bytes(self.message_enc.clone()),
        ]);
        cbor::to_vec(&value)
    }

    /// Deserialize from bytes, keeping the raw message bytes for verification
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut f = Fields::fixed(cbor::from_slice(bytes)?, 3)?;
        let version = cbor::u8(f.take(0, "version")?)?;
        let mut mac_fields = Fields::fixed(f.take(1, "mac")?, 1)?;
        let mac = cbor::array(mac_fields.take(0, "mac")?)?;
        let message_enc = cbor::bytes(f.take(2, "message")?)?;
        let message = Message::from_bytes(&message_enc)?;
        Ok(Self {
            version,
            mac,
            message,
            message_enc,
        })
    }
}
