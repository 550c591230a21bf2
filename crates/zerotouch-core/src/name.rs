//! Hierarchical names.
//!
//! A [`Name`] is an ordered list of opaque byte [`Component`]s, written in
//! URI form as `/a/b/c`. Bytes outside the unreserved URI set are
//! percent-encoded. Version components use the `0xFD` marker followed by a
//! big-endian number.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Marker byte that prefixes a version component.
const VERSION_MARKER: u8 = 0xFD;

static LAST_VERSION: AtomicU64 = AtomicU64::new(0);

/// Next version number: the current time in milliseconds, forced strictly
/// above every version handed out before in this process.
pub fn next_version() -> u64 {
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    let mut last = LAST_VERSION.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_VERSION.compare_exchange_weak(last, candidate, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return candidate,
            Err(observed) => last = observed,
        }
    }
}

/// One opaque name component.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Component(#[serde(with = "serde_bytes")] Vec<u8>);

impl Component {
    /// Create a component from raw bytes
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Create a version component
    #[must_use]
    pub fn from_version(version: u64) -> Self {
        let mut bytes = Vec::with_capacity(9);
        bytes.push(VERSION_MARKER);
        bytes.extend_from_slice(&version.to_be_bytes());
        Self(bytes)
    }

    /// Create a component holding a big-endian number
    #[must_use]
    pub fn from_number(number: u64) -> Self {
        Self(number.to_be_bytes().to_vec())
    }

    /// Read this component as a version, if it is one
    #[must_use]
    pub fn to_version(&self) -> Option<u64> {
        match self.0.split_first() {
            Some((&VERSION_MARKER, rest)) => rest.try_into().ok().map(u64::from_be_bytes),
            _ => None,
        }
    }

    /// Raw bytes of the component
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Component {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Component {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

const fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(version) = self.to_version() {
            return write!(f, "v={version}");
        }
        for &b in &self.0 {
            if is_unreserved(b) {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "%{b:02X}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for Component {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(v) = s.strip_prefix("v=") {
            if let Ok(version) = v.parse::<u64>() {
                return Ok(Self::from_version(version));
            }
        }

        let bytes = s.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' {
                let hex = s
                    .get(i + 1..i + 3)
                    .ok_or_else(|| Error::InvalidName(format!("truncated escape in {s:?}")))?;
                let b = u8::from_str_radix(hex, 16)
                    .map_err(|_| Error::InvalidName(format!("bad escape %{hex} in {s:?}")))?;
                out.push(b);
                i += 3;
            } else {
                out.push(bytes[i]);
                i += 1;
            }
        }
        Ok(Self(out))
    }
}

/// A hierarchical name.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name(Vec<Component>);

impl Name {
    /// Create an empty name (`/`)
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Number of components
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty name
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the components
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.0.iter()
    }

    /// Component at `index`; negative indexes count from the end
    #[must_use]
    pub fn get(&self, index: isize) -> Option<&Component> {
        let i = self.resolve(index)?;
        self.0.get(i)
    }

    /// First `n` components; a negative `n` drops that many from the end
    #[must_use]
    pub fn prefix(&self, n: isize) -> Self {
        let end = if n < 0 {
            self.0.len().saturating_sub(n.unsigned_abs())
        } else {
            n.unsigned_abs().min(self.0.len())
        };
        Self(self.0[..end].to_vec())
    }

    /// Append a component (builder style)
    #[must_use]
    pub fn append(mut self, component: impl Into<Component>) -> Self {
        self.0.push(component.into());
        self
    }

    /// Append every component of `other`
    #[must_use]
    pub fn append_name(mut self, other: &Self) -> Self {
        self.0.extend(other.0.iter().cloned());
        self
    }

    /// Append a fresh, process-monotonic version component
    #[must_use]
    pub fn append_version(self) -> Self {
        self.append(Component::from_version(next_version()))
    }

    /// Push a component in place
    pub fn push(&mut self, component: impl Into<Component>) {
        self.0.push(component.into());
    }

    /// Returns true if this name is a prefix of (or equal to) `other`
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a == b)
    }

    fn resolve(&self, index: isize) -> Option<usize> {
        if index < 0 {
            self.0.len().checked_sub(index.unsigned_abs())
        } else {
            Some(index.unsigned_abs())
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for c in &self.0 {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({self})")
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("ndn:").unwrap_or(s);
        if !s.is_empty() && !s.starts_with('/') {
            return Err(Error::InvalidName(format!("{s:?} does not start with '/'")));
        }
        s.split('/')
            .filter(|part| !part.is_empty())
            .map(Component::from_str)
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

impl From<Component> for Name {
    fn from(component: Component) -> Self {
        Self(vec![component])
    }
}

impl From<&str> for Name {
    /// Build a single-component name from a label (not a URI).
    fn from(label: &str) -> Self {
        Self(vec![Component::from(label)])
    }
}
