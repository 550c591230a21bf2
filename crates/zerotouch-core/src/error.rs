use thiserror::Error;

use crate::name::Name;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building, encoding or signing protocol objects
#[derive(Error, Debug)]
pub enum Error {
    /// Name could not be parsed from its URI form
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Wire content could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Value could not be encoded
    #[error("encode error: {0}")]
    Encode(String),

    /// Command interest is too short to carry parameters
    #[error("command interest is too short: {0} components")]
    ShortCommand(usize),

    /// A required field is absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Data packet is not a well-formed certificate
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Face URI is malformed or uses an unsupported scheme
    #[error("invalid face URI: {0}")]
    InvalidFaceUri(String),

    /// Signing or key generation failed
    #[error("crypto error: {0}")]
    Crypto(String),

    /// No identity with this name in the key chain
    #[error("identity not found: {0}")]
    IdentityNotFound(Name),

    /// No key with this name in the key chain
    #[error("key not found: {0}")]
    KeyNotFound(Name),

    /// No certificate with this name in the key chain
    #[error("certificate not found: {0}")]
    CertificateNotFound(Name),
}

impl Error {
    /// Returns true if the error came from decoding wire content
    #[must_use]
    pub const fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::ShortCommand(_) | Self::InvalidCertificate(_)
        )
    }

    /// Returns true if the error is a key chain lookup miss
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::IdentityNotFound(_) | Self::KeyNotFound(_) | Self::CertificateNotFound(_)
        )
    }
}
