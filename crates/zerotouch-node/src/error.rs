use thiserror::Error;
use zerotouch_core::ControlResponse;

use crate::transport::{ExpressError, FaceStatus};

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Management status reported when a command times out
pub const STATUS_TIMEOUT: u32 = 10060;

/// Management status reported when a command is nacked
pub const STATUS_NACK: u32 = 10800;

/// Errors raised by a running node
#[derive(Error, Debug)]
pub enum NodeError {
    /// The network rejected an interest
    #[error("Nack: {0}")]
    Nack(String),

    /// No data arrived within the interest lifetime
    #[error("Timeout")]
    Timeout,

    /// Forwarder management command failed
    #[error("management error ({code}): {text}")]
    Management {
        /// Status code from the forwarder
        code: u32,
        /// Status text from the forwarder
        text: String,
    },

    /// Face creation found an existing face toward the same remote
    #[error("face {} already exists", .0.face_id)]
    FaceExists(Box<FaceStatus>),

    /// A face URI could not be put in canonical form
    #[error("cannot canonize {uri}: {reason}")]
    Canonize {
        /// URI as given
        uri: String,
        /// Why it failed
        reason: String,
    },

    /// A response did not match or did not verify
    #[error("{0}")]
    Verification(String),

    /// No multi-access face to broadcast on
    #[error("no multi-access face available")]
    NoMulticastFaces,

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure (packet trace, config file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding, decoding or key chain failure
    #[error(transparent)]
    Core(#[from] zerotouch_core::Error),
}

impl NodeError {
    /// Returns true if the error is an interest timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns the management status code, if the error carries one
    #[must_use]
    pub const fn status_code(&self) -> Option<u32> {
        match self {
            Self::Management { code, .. } => Some(*code),
            Self::FaceExists(_) => Some(ControlResponse::FACE_EXISTS),
            Self::Timeout => Some(STATUS_TIMEOUT),
            Self::Nack(_) => Some(STATUS_NACK),
            _ => None,
        }
    }

    /// The status reply that forwards this failure to a peer
    #[must_use]
    pub fn to_control_response(&self) -> ControlResponse {
        match self {
            Self::Management { code, text } => ControlResponse::new(*code, text.clone()),
            other => ControlResponse::new(
                other
                    .status_code()
                    .unwrap_or(ControlResponse::INVALID_PARAMETERS),
                other.to_string(),
            ),
        }
    }
}

impl From<ExpressError> for NodeError {
    fn from(err: ExpressError) -> Self {
        match err {
            ExpressError::Nack(reason) => Self::Nack(reason),
            ExpressError::Timeout => Self::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_management_error_is_forwarded_verbatim() {
        let err = NodeError::Management {
            code: 403,
            text: "not authorized".into(),
        };
        let resp = err.to_control_response();
        assert_eq!(resp.code(), 403);
        assert_eq!(resp.text(), "not authorized");
    }

    #[test]
    fn test_transport_failures() {
        let timeout = NodeError::from(ExpressError::Timeout);
        assert!(timeout.is_timeout());
        assert_eq!(timeout.to_string(), "Timeout");
        assert_eq!(timeout.status_code(), Some(STATUS_TIMEOUT));

        let nack = NodeError::from(ExpressError::Nack("NoRoute".into()));
        assert_eq!(nack.to_string(), "Nack: NoRoute");
        assert!(!nack.is_timeout());
    }
}
