//! Certificates.
//!
//! A certificate is a data packet named
//! `/<identity>/KEY/<key-id>/<issuer>/<version>` whose content is the raw
//! public key and whose signature info carries a validity period. The key
//! name is the certificate name without its last two components.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::name::{Component, Name};
use crate::packet::Data;

/// Component that separates the identity from the key id.
pub const KEY_COMPONENT: &str = "KEY";

/// Issuer component of certificates issued during bootstrapping.
pub const ISSUED_CERT_MARKER: &str = "NDNCERT";

/// Issuer component of self-signed certificates.
pub const SELF_ISSUER: &str = "self";

/// Validity of a freshly created self-signed certificate, in days.
pub const SELF_SIGNED_VALIDITY_DAYS: i64 = 20 * 365;

/// Time window in which a certificate is valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityPeriod {
    /// Not valid before
    pub not_before: DateTime<Utc>,
    /// Not valid after
    pub not_after: DateTime<Utc>,
}

impl ValidityPeriod {
    /// A period starting now and lasting `days`
    #[must_use]
    pub fn days_from_now(days: i64) -> Self {
        let now = Utc::now();
        Self {
            not_before: now,
            not_after: now + Duration::days(days),
        }
    }

    /// Returns true if `at` falls inside the period
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

/// Build a key name: `/<identity>/KEY/<key-id>`
#[must_use]
pub fn key_name(identity: &Name, key_id: &str) -> Name {
    identity.clone().append(KEY_COMPONENT).append(key_id)
}

/// A certificate wrapping its data packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    data: Data,
}

impl Certificate {
    /// Interpret a data packet as a certificate
    pub fn from_data(data: Data) -> Result<Self> {
        let name = data.name();
        if name.len() < 4 || name.get(-4) != Some(&Component::from(KEY_COMPONENT)) {
            return Err(Error::InvalidCertificate(format!("{name} is not a certificate name")));
        }
        let signature = data
            .signature()
            .ok_or_else(|| Error::InvalidCertificate(format!("{name} is unsigned")))?;
        if signature.info.validity.is_none() {
            return Err(Error::InvalidCertificate(format!("{name} has no validity period")));
        }
        if data.content().is_empty() {
            return Err(Error::InvalidCertificate(format!("{name} has no public key")));
        }
        Ok(Self { data })
    }

    /// Decode a certificate from its wire encoding
    pub fn wire_decode(bytes: &[u8]) -> Result<Self> {
        Self::from_data(Data::wire_decode(bytes)?)
    }

    /// Wire encoding
    pub fn wire_encode(&self) -> Result<Vec<u8>> {
        self.data.wire_encode()
    }

    /// Certificate name
    #[must_use]
    pub const fn name(&self) -> &Name {
        self.data.name()
    }

    /// Name of the certified key
    #[must_use]
    pub fn key_name(&self) -> Name {
        self.data.name().prefix(-2)
    }

    /// Identity that owns the key
    #[must_use]
    pub fn identity(&self) -> Name {
        self.data.name().prefix(-4)
    }

    /// Raw public key bytes
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        self.data.content()
    }

    /// Validity period from the signature info
    #[must_use]
    pub fn validity(&self) -> Option<ValidityPeriod> {
        self.data.signature().and_then(|s| s.info.validity)
    }

    /// Name of the key or certificate that signed this certificate
    #[must_use]
    pub fn issuer(&self) -> Option<&Name> {
        self.data.key_locator()
    }

    /// The underlying data packet
    #[must_use]
    pub const fn data(&self) -> &Data {
        &self.data
    }

    /// Consume into the underlying data packet
    #[must_use]
    pub fn into_data(self) -> Data {
        self.data
    }
}
