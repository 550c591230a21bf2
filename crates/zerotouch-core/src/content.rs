//! Probe response content.
//!
//! A device answers a probe with its name and the addresses it can be reached
//! at. The two fields are decoded independently so that the prober can tell a
//! bad name from a bad address list.

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::encoding;
use crate::error::{Error, Result};
use crate::name::Name;

const NAME_FIELD: &str = "name";
const URIS_FIELD: &str = "uris";

/// Content of a device's answer to a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResponse {
    /// The device's name
    pub name: Name,
    /// Addresses the device can be reached at
    pub uris: Vec<String>,
}

impl ProbeResponse {
    /// Wire encoding
    pub fn encode(&self) -> Result<Vec<u8>> {
        encoding::encode(self)
    }

    /// Decode only the device name
    pub fn decode_name(content: &[u8]) -> Result<Name> {
        field(content, NAME_FIELD)?
            .deserialized()
            .map_err(|e| Error::Decode(format!("device name: {e}")))
    }

    /// Decode only the address list
    pub fn decode_uris(content: &[u8]) -> Result<Vec<String>> {
        field(content, URIS_FIELD)?
            .deserialized()
            .map_err(|e| Error::Decode(format!("device uris: {e}")))
    }
}

fn field(content: &[u8], key: &'static str) -> Result<Value> {
    let Value::Map(entries) = encoding::decode_value(content)? else {
        return Err(Error::Decode("probe response is not a map".into()));
    };
    entries
        .into_iter()
        .find(|(k, _)| matches!(k, Value::Text(t) if t == key))
        .map(|(_, v)| v)
        .ok_or(Error::MissingField(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_decode_fields() {
        let resp = ProbeResponse {
            name: "/home/dev1".parse().unwrap(),
            uris: vec!["tcp4://10.0.0.5".into()],
        };
        let bytes = resp.encode().unwrap();
        assert_eq!(ProbeResponse::decode_name(&bytes).unwrap(), resp.name);
        assert_eq!(ProbeResponse::decode_uris(&bytes).unwrap(), resp.uris);
    }

    #[test]
    fn test_bad_uris_with_good_name() {
        let mut map = BTreeMap::new();
        map.insert("name", Value::serialized(&"/home/dev1".parse::<Name>().unwrap()).unwrap());
        map.insert("uris", Value::Integer(7.into()));
        let bytes = encoding::encode(&map).unwrap();

        assert!(ProbeResponse::decode_name(&bytes).is_ok());
        assert!(ProbeResponse::decode_uris(&bytes).is_err());
    }

    #[test]
    fn test_garbage_fails_name_first() {
        assert!(ProbeResponse::decode_name(b"not cbor at all").is_err());
    }
}
