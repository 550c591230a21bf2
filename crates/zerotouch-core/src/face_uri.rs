//! Face URIs such as `udp4://10.0.0.5:6363` or `tcp6://[fe80::1%25eth0]`.
//!
//! A canonical face URI has an explicit address family in its scheme
//! (`udp4`, `udp6`, `tcp4`, `tcp6`), an IP literal host and a port.
//! IPv6 literals may carry a zone (`%25eth0`, or the bare `%eth0`), which
//! is kept apart from the host and written back percent-encoded.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use url::Url;

use crate::error::{Error, Result};

/// Port used when a URI does not name one.
pub const DEFAULT_PORT: u16 = 6363;

/// Transport protocol of a face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Datagram
    Udp,
    /// Stream
    Tcp,
}

impl Transport {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        }
    }
}

/// Address family pinned by the scheme, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Family {
    Any,
    V4,
    V6,
}

impl Family {
    const fn accepts(self, addr: &IpAddr) -> bool {
        match self {
            Self::Any => true,
            Self::V4 => addr.is_ipv4(),
            Self::V6 => addr.is_ipv6(),
        }
    }
}

/// A parsed face URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FaceUri {
    scheme: String,
    host: String,
    zone: Option<String>,
    port: Option<u16>,
}

/// Cut the zone out of a bracketed IPv6 host, since `url` rejects it
fn split_zone(input: &str) -> Result<(String, Option<String>)> {
    let Some(open) = input.find('[') else {
        return Ok((input.to_string(), None));
    };
    let Some(close) = input[open..].find(']').map(|at| open + at) else {
        return Ok((input.to_string(), None));
    };
    let Some(percent) = input[open..close].find('%').map(|at| open + at) else {
        return Ok((input.to_string(), None));
    };

    let raw = &input[percent + 1..close];
    let zone = raw.strip_prefix("25").unwrap_or(raw);
    if zone.is_empty() || zone.contains(['%', '/', '[', ']']) {
        return Err(Error::InvalidFaceUri(format!("{input}: invalid zone")));
    }
    Ok((
        format!("{}{}", &input[..percent], &input[close..]),
        Some(zone.to_string()),
    ))
}

impl FaceUri {
    /// Parse a URI of the form `scheme://host[:port]`
    pub fn parse(input: &str) -> Result<Self> {
        let (unzoned, zone) = split_zone(input)?;
        let url = Url::parse(&unzoned).map_err(|e| Error::InvalidFaceUri(format!("{input}: {e}")))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidFaceUri(format!("{input}: missing host")))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if zone.is_some() && !host.parse::<IpAddr>().is_ok_and(|addr| addr.is_ipv6()) {
            return Err(Error::InvalidFaceUri(format!("{input}: zone on a non-IPv6 host")));
        }

        Ok(Self {
            scheme: url.scheme().to_ascii_lowercase(),
            host: host.to_string(),
            zone,
            port: url.port(),
        })
    }

    /// URI scheme, lowercase
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host without IPv6 brackets
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// IPv6 zone, without the `%`
    #[must_use]
    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    /// Explicit port, if any
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Port, falling back to [`DEFAULT_PORT`]
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Host as an IP literal, if it is one
    #[must_use]
    pub fn ip_literal(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Transport named by the scheme; fails for unsupported schemes
    pub fn transport(&self) -> Result<Transport> {
        self.split_scheme().map(|(t, _)| t)
    }

    /// Returns true if the URI is already in canonical form
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        let Ok((_, family)) = self.split_scheme() else {
            return false;
        };
        family != Family::Any
            && self.port.is_some()
            && self.ip_literal().is_some_and(|addr| family.accepts(&addr))
    }

    /// Canonical form of this URI once its host resolves to `addr`.
    ///
    /// Fails if the scheme is unsupported or pins a family that `addr`
    /// does not belong to.
    pub fn canonical_with(&self, addr: IpAddr) -> Result<Self> {
        let (transport, family) = self.split_scheme()?;
        if !family.accepts(&addr) {
            return Err(Error::InvalidFaceUri(format!(
                "{self}: {addr} does not match the scheme's address family"
            )));
        }
        let suffix = if addr.is_ipv4() { '4' } else { '6' };
        let zone = self
            .zone
            .clone()
            .filter(|_| self.ip_literal() == Some(addr));
        Ok(Self {
            scheme: format!("{}{suffix}", transport.as_str()),
            host: addr.to_string(),
            zone,
            port: Some(self.port_or_default()),
        })
    }

    /// Returns true if a resolved `addr` is usable for this URI's scheme
    #[must_use]
    pub fn accepts_address(&self, addr: &IpAddr) -> bool {
        self.split_scheme().is_ok_and(|(_, family)| family.accepts(addr))
    }

    fn split_scheme(&self) -> Result<(Transport, Family)> {
        let parsed = match self.scheme.as_str() {
            "udp" => (Transport::Udp, Family::Any),
            "udp4" => (Transport::Udp, Family::V4),
            "udp6" => (Transport::Udp, Family::V6),
            "tcp" => (Transport::Tcp, Family::Any),
            "tcp4" => (Transport::Tcp, Family::V4),
            "tcp6" => (Transport::Tcp, Family::V6),
            other => {
                return Err(Error::InvalidFaceUri(format!("unsupported scheme {other:?}")));
            }
        };
        Ok(parsed)
    }
}

impl fmt::Display for FaceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(zone) = &self.zone {
            write!(f, "[{}%25{zone}]", self.host)?;
        } else if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            write!(f, "{}", self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

impl FromStr for FaceUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let uri = FaceUri::parse("tcp4://10.0.0.5:6363").unwrap();
        assert_eq!(uri.scheme(), "tcp4");
        assert_eq!(uri.host(), "10.0.0.5");
        assert_eq!(uri.port(), Some(6363));
        assert!(uri.is_canonical());
        assert_eq!(uri.to_string(), "tcp4://10.0.0.5:6363");
    }

    #[test]
    fn test_parse_ipv6_brackets() {
        let uri = FaceUri::parse("udp6://[fe80::1]:56363").unwrap();
        assert_eq!(uri.host(), "fe80::1");
        assert!(uri.is_canonical());
        assert_eq!(uri.to_string(), "udp6://[fe80::1]:56363");
    }

    #[test]
    fn test_ipv6_zone() {
        let uri = FaceUri::parse("tcp6://[fe80::1%25eth0]").unwrap();
        assert_eq!(uri.host(), "fe80::1");
        assert_eq!(uri.zone(), Some("eth0"));
        assert_eq!(uri.port(), None);
        assert_eq!(uri.to_string(), "tcp6://[fe80::1%25eth0]");

        let bare = FaceUri::parse("udp6://[fe80::1%eth0]:56363").unwrap();
        assert_eq!(bare.zone(), Some("eth0"));
        assert!(bare.is_canonical());
        assert_eq!(bare.to_string(), "udp6://[fe80::1%25eth0]:56363");

        let canonical = uri.canonical_with("fe80::1".parse().unwrap()).unwrap();
        assert_eq!(canonical.to_string(), "tcp6://[fe80::1%25eth0]:6363");
        assert_eq!(FaceUri::parse(&canonical.to_string()).unwrap(), canonical);
    }

    #[test]
    fn test_bad_zones() {
        assert!(FaceUri::parse("tcp6://[fe80::1%]").is_err());
        assert!(FaceUri::parse("tcp6://[fe80::1%25]").is_err());
        assert!(FaceUri::parse("tcp4://[10.0.0.1%25eth0]").is_err());
    }

    #[test]
    fn test_canonical_with_defaults_port() {
        let uri = FaceUri::parse("tcp://10.0.0.5").unwrap();
        assert!(!uri.is_canonical());
        let canonical = uri.canonical_with("10.0.0.5".parse().unwrap()).unwrap();
        assert_eq!(canonical.to_string(), "tcp4://10.0.0.5:6363");

        let v6 = uri.canonical_with("::1".parse().unwrap()).unwrap();
        assert_eq!(v6.to_string(), "tcp6://[::1]:6363");
    }

    #[test]
    fn test_family_mismatch() {
        let uri = FaceUri::parse("udp4://host.example").unwrap();
        assert!(uri.canonical_with("::1".parse().unwrap()).is_err());
        assert!(!uri.accepts_address(&"::1".parse().unwrap()));
    }

    #[test]
    fn test_unsupported_scheme() {
        let uri = FaceUri::parse("dev://eth0").unwrap();
        assert!(uri.transport().is_err());
        assert!(!uri.is_canonical());
        assert!(uri.canonical_with("10.0.0.1".parse().unwrap()).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(FaceUri::parse("not a uri").is_err());
        assert!(FaceUri::parse("tcp4://").is_err());
    }
}
