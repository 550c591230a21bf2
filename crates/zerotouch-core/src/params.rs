//! Command parameters and responses.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::encoding;
use crate::error::{Error, Result};
use crate::name::Name;
use crate::packet::{signed_interest, Interest};

/// Parameters carried inside a command interest.
///
/// Each field appears at most once on the wire; decoding rejects duplicates.
/// An absent field and a present-but-empty field are distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<Name>,

    #[serde(rename = "pin", default, skip_serializing_if = "Option::is_none")]
    pin_code: Option<String>,

    #[serde(
        rename = "key",
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_bytes"
    )]
    public_key: Option<Vec<u8>>,
}

impl ControlParameters {
    /// Create an empty parameter bag
    #[must_use]
    pub const fn new() -> Self {
        Self {
            name: None,
            pin_code: None,
            public_key: None,
        }
    }

    /// Read the parameters out of a command interest.
    pub fn from_command_interest(interest: &Interest) -> Result<Self> {
        let name = interest.name();
        if name.len() < signed_interest::MIN_COMMAND_SIZE {
            return Err(Error::ShortCommand(name.len()));
        }
        let component = name
            .get(signed_interest::POS_PARAMETERS)
            .ok_or(Error::MissingField("parameters"))?;
        Self::wire_decode(component.as_bytes())
    }

    /// Wire encoding
    pub fn wire_encode(&self) -> Result<Vec<u8>> {
        encoding::encode(self)
    }

    /// Decode from wire
    pub fn wire_decode(bytes: &[u8]) -> Result<Self> {
        encoding::decode(bytes)
    }

    /// Returns true if a name is set
    #[must_use]
    pub const fn has_name(&self) -> bool {
        self.name.is_some()
    }

    /// The name field
    #[must_use]
    pub const fn name(&self) -> Option<&Name> {
        self.name.as_ref()
    }

    /// Set the name field
    #[must_use]
    pub fn set_name(mut self, name: Name) -> Self {
        self.name = Some(name);
        self
    }

    /// Returns true if a PIN code is set
    #[must_use]
    pub const fn has_pin_code(&self) -> bool {
        self.pin_code.is_some()
    }

    /// The PIN code field
    #[must_use]
    pub fn pin_code(&self) -> Option<&str> {
        self.pin_code.as_deref()
    }

    /// Set the PIN code field
    #[must_use]
    pub fn set_pin_code(mut self, pin: impl Into<String>) -> Self {
        self.pin_code = Some(pin.into());
        self
    }

    /// Remove the PIN code field
    #[must_use]
    pub fn unset_pin_code(mut self) -> Self {
        self.pin_code = None;
        self
    }

    /// Returns true if a public key is set
    #[must_use]
    pub const fn has_public_key(&self) -> bool {
        self.public_key.is_some()
    }

    /// The raw public key bytes
    #[must_use]
    pub fn public_key(&self) -> Option<&[u8]> {
        self.public_key.as_deref()
    }

    /// Set the public key field
    #[must_use]
    pub fn set_public_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.public_key = Some(key.into());
        self
    }
}

impl fmt::Display for ControlParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControlParameters(")?;
        let mut sep = "";
        if let Some(name) = &self.name {
            write!(f, "Name: {name}")?;
            sep = ", ";
        }
        if self.pin_code.is_some() {
            write!(f, "{sep}PinCode: ******")?;
            sep = ", ";
        }
        if let Some(key) = &self.public_key {
            write!(f, "{sep}PublicKey: {} bytes", key.len())?;
        }
        write!(f, ")")
    }
}

/// Status reply to a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    code: u32,
    text: String,
}

impl ControlResponse {
    /// Malformed or invalid request
    pub const INVALID_PARAMETERS: u32 = 0;
    /// Probe broadcast or response verification failed
    pub const BROADCAST_FAILED: u32 = 1;
    /// Device name in the probe response could not be decoded
    pub const BAD_DEVICE_NAME: u32 = 2;
    /// Device address list in the probe response could not be decoded
    pub const BAD_DEVICE_URIS: u32 = 3;
    /// None of the advertised addresses could be connected to
    pub const NO_REACHABLE_ADDRESS: u32 = 4;
    /// Success
    pub const OK: u32 = 200;
    /// Management status: the face already exists
    pub const FACE_EXISTS: u32 = 409;

    /// Create a response
    #[must_use]
    pub fn new(code: u32, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Create a `200 ok` response
    #[must_use]
    pub fn ok() -> Self {
        Self::new(Self::OK, "ok")
    }

    /// The status code
    #[must_use]
    pub const fn code(&self) -> u32 {
        self.code
    }

    /// The human-readable text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns true for code 200
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code == Self::OK
    }

    /// Wire encoding
    pub fn wire_encode(&self) -> Result<Vec<u8>> {
        encoding::encode(self)
    }

    /// Decode from wire
    pub fn wire_decode(bytes: &[u8]) -> Result<Self> {
        encoding::decode(bytes)
    }
}

impl fmt::Display for ControlResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControlResponse({} {})", self.code, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_and_empty_are_distinct() {
        let empty_pin = ControlParameters::new().set_pin_code("");
        let decoded = ControlParameters::wire_decode(&empty_pin.wire_encode().unwrap()).unwrap();
        assert!(decoded.has_pin_code());
        assert_eq!(decoded.pin_code(), Some(""));

        let none = ControlParameters::wire_decode(&ControlParameters::new().wire_encode().unwrap())
            .unwrap();
        assert!(!none.has_pin_code());
        assert!(!none.has_name());
        assert!(!none.has_public_key());
    }

    #[test]
    fn test_duplicate_field_is_rejected() {
        // Hand-built CBOR map with the "pin" key twice.
        let map = ciborium::Value::Map(vec![
            (ciborium::Value::Text("pin".into()), ciborium::Value::Text("a".into())),
            (ciborium::Value::Text("pin".into()), ciborium::Value::Text("b".into())),
        ]);
        let bytes = encoding::encode(&map).unwrap();
        assert!(ControlParameters::wire_decode(&bytes).is_err());
    }

    #[test]
    fn test_unset_pin_code() {
        let params = ControlParameters::new()
            .set_pin_code("1234")
            .set_name("/home/as".parse().unwrap())
            .unset_pin_code();
        assert!(!params.has_pin_code());
        assert!(params.has_name());
    }

    #[test]
    fn test_display_hides_pin() {
        let params = ControlParameters::new()
            .set_name("/dev".parse().unwrap())
            .set_pin_code("secret")
            .set_public_key(vec![0u8; 32]);
        let shown = params.to_string();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("/dev"));
        assert!(shown.contains("32 bytes"));
    }

    #[test]
    fn test_short_interest_has_no_parameters() {
        let interest = Interest::new("/localhost/add-device".parse().unwrap());
        let err = ControlParameters::from_command_interest(&interest).unwrap_err();
        assert!(matches!(err, Error::ShortCommand(2)));
    }

    #[test]
    fn test_response_codes() {
        assert!(ControlResponse::ok().is_success());
        let resp = ControlResponse::new(ControlResponse::NO_REACHABLE_ADDRESS, "none");
        assert!(!resp.is_success());
        let decoded = ControlResponse::wire_decode(&resp.wire_encode().unwrap()).unwrap();
        assert_eq!(decoded, resp);
    }
}
