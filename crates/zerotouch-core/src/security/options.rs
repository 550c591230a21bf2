//! Per-command authorization policy.

use std::fmt;

/// A shared secret typed in by the operator on both ends
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Pin(String);

impl Pin {
    /// Wrap a secret
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The secret as a string
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// The secret as HMAC key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(******)")
    }
}

impl From<&str> for Pin {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Pin {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One acceptable way for a requester to prove who it is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    /// HMAC over the request keyed by a shared PIN
    SharedSecret(Pin),
    /// Signature by a key whose certificate chains to a trust anchor
    Identity,
}

/// How the reply to an authorized request is signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signing {
    /// The node's own default key
    Identity,
    /// HMAC keyed by the shared PIN
    SharedSecret(Pin),
}

/// The verification mode that actually let a request through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationType {
    /// No verification was required
    Open,
    /// The request carried a valid shared-secret HMAC
    SharedSecret,
    /// The request was signed by a key chaining to a trust anchor
    Identity,
}

impl fmt::Display for VerificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::SharedSecret => "shared-secret",
            Self::Identity => "identity",
        };
        f.write_str(s)
    }
}

/// Authorization policy attached to a registered command.
///
/// Holds an ordered list of accepted policies; an empty list means the
/// command is open to anyone. Policies are only ever added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityOptions {
    accepted: Vec<Policy>,
    signing: Option<Signing>,
}

impl SecurityOptions {
    /// No verification, replies signed with the node's key
    #[must_use]
    pub const fn open() -> Self {
        Self {
            accepted: Vec::new(),
            signing: None,
        }
    }

    /// Accept only requests signed with `pin`, and sign replies with it
    #[must_use]
    pub fn shared_secret(pin: impl Into<Pin>) -> Self {
        Self::open().require_shared_secret(pin)
    }

    /// Accept only identity-signed requests
    #[must_use]
    pub fn identity() -> Self {
        Self::open().require_identity()
    }

    /// Add shared-secret verification and signing with `pin`.
    ///
    /// A later PIN replaces an earlier one.
    #[must_use]
    pub fn require_shared_secret(mut self, pin: impl Into<Pin>) -> Self {
        let pin = pin.into();
        self.accepted.retain(|p| !matches!(p, Policy::SharedSecret(_)));
        self.accepted.insert(0, Policy::SharedSecret(pin.clone()));
        self.signing = Some(Signing::SharedSecret(pin));
        self
    }

    /// Add identity verification
    #[must_use]
    pub fn require_identity(mut self) -> Self {
        if !self.accepted.contains(&Policy::Identity) {
            self.accepted.push(Policy::Identity);
        }
        self
    }

    /// Accepted policies, in the order they are tried
    #[must_use]
    pub fn accepted(&self) -> &[Policy] {
        &self.accepted
    }

    /// Returns true if no verification is required
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.accepted.is_empty()
    }

    /// The shared PIN, if shared-secret verification is accepted
    #[must_use]
    pub fn pin(&self) -> Option<&Pin> {
        self.accepted.iter().find_map(|p| match p {
            Policy::SharedSecret(pin) => Some(pin),
            Policy::Identity => None,
        })
    }

    /// How replies to this command are signed
    #[must_use]
    pub fn signing(&self) -> Signing {
        self.signing.clone().unwrap_or(Signing::Identity)
    }

    /// Attach the verification mode that matched a request
    #[must_use]
    pub fn resolve(self, resolved: VerificationType) -> Authorization {
        Authorization {
            options: self,
            resolved,
        }
    }
}

/// Options of a command together with the mode that authorized one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    options: SecurityOptions,
    resolved: VerificationType,
}

impl Authorization {
    /// The command's options
    #[must_use]
    pub const fn options(&self) -> &SecurityOptions {
        &self.options
    }

    /// The single mode that let this request through
    #[must_use]
    pub const fn resolved_verification_type(&self) -> VerificationType {
        self.resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_by_default() {
        let options = SecurityOptions::default();
        assert!(options.is_open());
        assert!(options.pin().is_none());
        assert_eq!(options.signing(), Signing::Identity);
    }

    #[test]
    fn test_shared_secret_sets_both_sides() {
        let options = SecurityOptions::shared_secret("1234");
        assert!(!options.is_open());
        assert_eq!(options.pin().unwrap().expose(), "1234");
        assert_eq!(options.signing(), Signing::SharedSecret(Pin::from("1234")));
    }

    #[test]
    fn test_policies_are_additive() {
        let options = SecurityOptions::identity().require_shared_secret("1234");
        assert_eq!(
            options.accepted(),
            &[Policy::SharedSecret(Pin::from("1234")), Policy::Identity]
        );

        let options = options.require_shared_secret("5678").require_identity();
        assert_eq!(options.accepted().len(), 2);
        assert_eq!(options.pin().unwrap().expose(), "5678");
    }

    #[test]
    fn test_resolved_type() {
        let auth = SecurityOptions::shared_secret("1234").resolve(VerificationType::SharedSecret);
        assert_eq!(auth.resolved_verification_type(), VerificationType::SharedSecret);
        assert!(auth.options().pin().is_some());
    }

    #[test]
    fn test_pin_debug_is_redacted() {
        assert_eq!(format!("{:?}", Pin::from("abc123")), "Pin(******)");
    }
}
