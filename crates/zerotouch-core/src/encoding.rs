//! CBOR wire encoding shared by every packet and parameter type.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Encode a value as CBOR bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| Error::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decode a value from CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| Error::Decode(e.to_string()))
}

/// Decode into a generic CBOR value, for content inspected field by field.
pub fn decode_value(bytes: &[u8]) -> Result<ciborium::Value> {
    decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_garbage_is_error() {
        let err = decode::<Vec<String>>(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn test_value_keeps_map_shape() {
        let bytes = encode(&std::collections::BTreeMap::from([("a", 1u8)])).unwrap();
        assert!(matches!(decode_value(&bytes).unwrap(), ciborium::Value::Map(_)));
    }
}
