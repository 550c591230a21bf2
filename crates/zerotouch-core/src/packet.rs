//! Interest and Data packets.
//!
//! Signed interests carry their signature in the last two name components:
//!
//! ```text
//! <prefix>/<parameters>/<timestamp>/<nonce>/<SignatureInfo>/<SignatureValue>
//! ```
//!
//! The signed portion is the CBOR encoding of every component before the
//! signature value. Data packets sign the encoding of `(name, content,
//! signature info)`.

use std::time::Duration;

use chrono::Utc;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::cert::ValidityPeriod;
use crate::encoding;
use crate::error::{Error, Result};
use crate::name::{Component, Name};
use crate::params::ControlParameters;

/// Default lifetime of an interest.
pub const DEFAULT_INTEREST_LIFETIME: Duration = Duration::from_secs(4);

/// Positions of the signed-interest components, counted from the end.
pub mod signed_interest {
    /// Signature value
    pub const POS_SIG_VALUE: isize = -1;
    /// Encoded signature info
    pub const POS_SIG_INFO: isize = -2;
    /// Random nonce
    pub const POS_NONCE: isize = -3;
    /// Millisecond timestamp
    pub const POS_TIMESTAMP: isize = -4;
    /// Encoded command parameters
    pub const POS_PARAMETERS: isize = -5;
    /// Smallest name that can carry a signature
    pub const MIN_SIZE: usize = 4;
    /// Smallest name that can carry command parameters
    pub const MIN_COMMAND_SIZE: usize = 5;
}

/// Signature algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureType {
    /// Ed25519 signature by an identity key
    Ed25519,
    /// HMAC-SHA256 keyed by a shared PIN
    HmacSha256,
}

/// Signature metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInfo {
    /// Algorithm that produced the signature value
    pub signature_type: SignatureType,

    /// Name of the key (or certificate) that signed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_locator: Option<Name>,

    /// Validity period, present on certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<ValidityPeriod>,
}

impl SignatureInfo {
    /// Signature info for a shared-secret HMAC
    #[must_use]
    pub const fn hmac() -> Self {
        Self {
            signature_type: SignatureType::HmacSha256,
            key_locator: None,
            validity: None,
        }
    }

    /// Signature info for an Ed25519 signature located by `key_locator`
    #[must_use]
    pub const fn ed25519(key_locator: Name) -> Self {
        Self {
            signature_type: SignatureType::Ed25519,
            key_locator: Some(key_locator),
            validity: None,
        }
    }

    /// Attach a validity period
    #[must_use]
    pub fn with_validity(mut self, validity: ValidityPeriod) -> Self {
        self.validity = Some(validity);
        self
    }
}

/// A signature over a data packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Signature metadata
    pub info: SignatureInfo,

    /// Raw signature bytes
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

/// Link-layer cache directive attached to outgoing data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachePolicy {
    /// Forwarders must not cache the packet
    NoCache,
}

/// A named request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    name: Name,
    lifetime: Duration,
    must_be_fresh: bool,
}

impl Interest {
    /// Create an interest with the default lifetime
    #[must_use]
    pub const fn new(name: Name) -> Self {
        Self {
            name,
            lifetime: DEFAULT_INTEREST_LIFETIME,
            must_be_fresh: false,
        }
    }

    /// Build an unsigned command interest: `prefix/<params>/<timestamp>/<nonce>`.
    ///
    /// The result must be signed before it is sent.
    pub fn command(prefix: Name, params: &ControlParameters) -> Result<Self> {
        let mut nonce = [0u8; 8];
        SystemRandom::new()
            .fill(&mut nonce)
            .map_err(|_| Error::Crypto("nonce generation failed".into()))?;
        let timestamp = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);

        let name = prefix
            .append(Component::new(params.wire_encode()?))
            .append(Component::from_number(timestamp))
            .append(Component::new(nonce.to_vec()));

        Ok(Self::new(name).with_must_be_fresh(true))
    }

    /// The interest name
    #[must_use]
    pub const fn name(&self) -> &Name {
        &self.name
    }

    /// The interest lifetime
    #[must_use]
    pub const fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Whether cached data is acceptable
    #[must_use]
    pub const fn must_be_fresh(&self) -> bool {
        self.must_be_fresh
    }

    /// Set the lifetime
    #[must_use]
    pub const fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the freshness requirement
    #[must_use]
    pub const fn with_must_be_fresh(mut self, must_be_fresh: bool) -> Self {
        self.must_be_fresh = must_be_fresh;
        self
    }

    /// Returns true if `data` answers this interest
    #[must_use]
    pub fn matches_data(&self, data: &Data) -> bool {
        self.name.is_prefix_of(data.name())
    }

    /// Append `info` and the signature computed over the signed portion.
    pub fn sign_with<F>(self, info: &SignatureInfo, signer: F) -> Result<Self>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>>,
    {
        let name = self.name.clone().append(Component::new(encoding::encode(info)?));
        let value = signer(&encoding::encode(&name)?)?;
        Ok(Self {
            name: name.append(Component::new(value)),
            ..self
        })
    }

    /// Decode the signature info carried in the name
    pub fn signature_info(&self) -> Result<SignatureInfo> {
        if self.name.len() < signed_interest::MIN_SIZE {
            return Err(Error::ShortCommand(self.name.len()));
        }
        let component = self
            .name
            .get(signed_interest::POS_SIG_INFO)
            .ok_or(Error::MissingField("signature info"))?;
        encoding::decode(component.as_bytes())
    }

    /// Signature value carried in the last component
    #[must_use]
    pub fn signature_value(&self) -> Option<&[u8]> {
        if self.name.len() < signed_interest::MIN_SIZE {
            return None;
        }
        self.name.get(signed_interest::POS_SIG_VALUE).map(Component::as_bytes)
    }

    /// Bytes covered by the signature
    pub fn signed_portion(&self) -> Result<Vec<u8>> {
        encoding::encode(&self.name.prefix(signed_interest::POS_SIG_VALUE))
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

/// A named, signed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    name: Name,
    #[serde(with = "serde_bytes")]
    content: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<Signature>,
    /// Hop-by-hop tag, outside the signed portion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cache_policy: Option<CachePolicy>,
}

/// Borrowed view of the fields covered by a data signature.
#[derive(Serialize)]
struct SignedPortion<'a> {
    name: &'a Name,
    #[serde(with = "serde_bytes")]
    content: &'a [u8],
    info: &'a SignatureInfo,
}

impl Data {
    /// Create an unsigned data packet with empty content
    #[must_use]
    pub const fn new(name: Name) -> Self {
        Self {
            name,
            content: Vec::new(),
            signature: None,
            cache_policy: None,
        }
    }

    /// Set the content (builder style)
    #[must_use]
    pub fn with_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = content.into();
        self.signature = None;
        self
    }

    /// The data name
    #[must_use]
    pub const fn name(&self) -> &Name {
        &self.name
    }

    /// The content bytes
    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// The signature, if signed
    #[must_use]
    pub const fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Key locator of the signature, if any
    #[must_use]
    pub fn key_locator(&self) -> Option<&Name> {
        self.signature.as_ref()?.info.key_locator.as_ref()
    }

    /// The cache policy tag
    #[must_use]
    pub const fn cache_policy(&self) -> Option<CachePolicy> {
        self.cache_policy
    }

    /// Tag the packet with a cache policy
    pub fn set_cache_policy(&mut self, policy: CachePolicy) {
        self.cache_policy = Some(policy);
    }

    /// Bytes covered by a signature carrying `info`
    pub fn signed_portion_for(&self, info: &SignatureInfo) -> Result<Vec<u8>> {
        encoding::encode(&SignedPortion {
            name: &self.name,
            content: &self.content,
            info,
        })
    }

    /// Bytes covered by the current signature
    pub fn signed_portion(&self) -> Result<Vec<u8>> {
        let signature = self.signature.as_ref().ok_or(Error::MissingField("signature"))?;
        self.signed_portion_for(&signature.info)
    }

    /// Sign the packet with `info`, replacing any previous signature
    pub fn sign_with<F>(&mut self, info: SignatureInfo, signer: F) -> Result<()>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>>,
    {
        let value = signer(&self.signed_portion_for(&info)?)?;
        self.signature = Some(Signature { info, value });
        Ok(())
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
