//! CBOR object framing
//!
//! Every protocol object is a CBOR map whose keys are small unsigned
//! integers. Fixed-schema objects must declare exactly the expected number
//! of entries; open objects skip keys they do not understand.

use ciborium::value::{Integer, Value};

use crate::error::{DecodeError, ProteusError, Result};

/// Build an object from its fields, keyed `0..n` in order.
pub(crate) fn object<I>(fields: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    Value::Map(
        fields
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::Integer(Integer::from(i as u64)), v))
            .collect(),
    )
}

/// Decoded object entries awaiting extraction by key.
pub(crate) struct Fields {
    entries: Vec<(u64, Value)>,
}

impl Fields {
    /// Object with a fixed schema of exactly `expected` entries.
    pub(crate) fn fixed(value: Value, expected: usize) -> std::result::Result<Self, DecodeError> {
        let map = into_map(value)?;
        if map.len() != expected {
            return Err(DecodeError::UnexpectedPropertyCount {
                expected,
                actual: map.len(),
            });
        }
        let mut entries = Vec::with_capacity(map.len());
        for (k, v) in map {
            entries.push((uint(k)?, v));
        }
        Ok(Self { entries })
    }

    /// Object that tolerates additional, unknown entries.
    pub(crate) fn open(value: Value) -> std::result::Result<Self, DecodeError> {
        let entries = into_map(value)?
            .into_iter()
            .filter_map(|(k, v)| uint(k).ok().map(|k| (k, v)))
            .collect();
        Ok(Self { entries })
    }

    /// Remove the value stored under `key`, if any.
    pub(crate) fn take_opt(&mut self, key: u64) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.swap_remove(pos).1)
    }

    /// Remove the mandatory value stored under `key`.
    pub(crate) fn take(
        &mut self,
        key: u64,
        name: &'static str,
    ) -> std::result::Result<Value, DecodeError> {
        self.take_opt(key).ok_or(DecodeError::MissingField(name))
    }
}

fn into_map(value: Value) -> std::result::Result<Vec<(Value, Value)>, DecodeError> {
    value.into_map().map_err(|_| DecodeError::InvalidType("object"))
}

fn uint(value: Value) -> std::result::Result<u64, DecodeError> {
    match value {
        Value::Integer(i) => {
            u64::try_from(i).map_err(|_| DecodeError::InvalidType("unsigned integer"))
        }
        _ => Err(DecodeError::InvalidType("unsigned integer")),
    }
}

pub(crate) fn u8(value: Value) -> std::result::Result<u8, DecodeError> {
    u8::try_from(uint(value)?).map_err(|_| DecodeError::InvalidType("u8"))
}

pub(crate) fn u16(value: Value) -> std::result::Result<u16, DecodeError> {
    u16::try_from(uint(value)?).map_err(|_| DecodeError::InvalidType("u16"))
}

pub(crate) fn u32(value: Value) -> std::result::Result<u32, DecodeError> {
    u32::try_from(uint(value)?).map_err(|_| DecodeError::InvalidType("u32"))
}

pub(crate) fn bytes(value: Value) -> std::result::Result<Vec<u8>, DecodeError> {
    value.into_bytes().map_err(|_| DecodeError::InvalidType("byte string"))
}

/// Byte string of exactly `N` bytes.
pub(crate) fn array<const N: usize>(value: Value) -> std::result::Result<[u8; N], DecodeError> {
    let raw = bytes(value)?;
    let actual = raw.len();
    raw.try_into().map_err(|_| DecodeError::InvalidArrayLen { expected: N, actual })
}

pub(crate) fn list(value: Value) -> std::result::Result<Vec<Value>, DecodeError> {
    value.into_array().map_err(|_| DecodeError::InvalidType("array"))
}

pub(crate) fn uint_value<T: Into<Integer>>(n: T) -> Value {
    Value::Integer(n.into())
}

/// Append the CBOR encoding of `value` to `out`.
pub(crate) fn write(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    ciborium::ser::into_writer(value, out).map_err(|e| ProteusError::Encode(e.to_string()))
}

pub(crate) fn to_vec(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write(value, &mut out)?;
    Ok(out)
}

/// Read one item from the front of `input`, advancing it.
pub(crate) fn read(input: &mut &[u8]) -> std::result::Result<Value, DecodeError> {
    ciborium::de::from_reader(input).map_err(|e| DecodeError::Cbor(e.to_string()))
}

pub(crate) fn from_slice(mut input: &[u8]) -> std::result::Result<Value, DecodeError> {
    read(&mut input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_rejects_wrong_count() {
        let value = object([uint_value(1u8), uint_value(2u8)]);
        let err = Fields::fixed(value, 3).err();
        assert_eq!(
            err,
            Some(DecodeError::UnexpectedPropertyCount { expected: 3, actual: 2 })
        );
    }

    #[test]
    fn test_open_skips_unknown_keys() {
        let value = Value::Map(vec![
            (Value::Text("extra".into()), Value::Null),
            (uint_value(7u8), Value::Bool(true)),
            (uint_value(0u8), uint_value(42u16)),
        ]);
        let mut fields = Fields::open(value).unwrap();
        assert_eq!(u16(fields.take(0, "id").unwrap()).unwrap(), 42);
        assert!(fields.take(1, "missing").is_err());
    }

    #[test]
    fn test_array_length_checked() {
        let err = array::<16>(Value::Bytes(vec![0; 15])).err();
        assert_eq!(err, Some(DecodeError::InvalidArrayLen { expected: 16, actual: 15 }));
    }

    #[test]
    fn test_read_consecutive_items() {
        let mut buf = Vec::new();
        write(&uint_value(2u8), &mut buf).unwrap();
        write(&Value::Bytes(vec![1, 2, 3]), &mut buf).unwrap();

        let mut input = buf.as_slice();
        assert_eq!(u8(read(&mut input).unwrap()).unwrap(), 2);
        assert_eq!(bytes(read(&mut input).unwrap()).unwrap(), vec![1, 2, 3]);
        assert!(input.is_empty());
    }
}
