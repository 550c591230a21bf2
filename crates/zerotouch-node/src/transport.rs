//! Seams toward the forwarder.
//!
//! [`Face`] moves packets between an application and its local forwarder;
//! [`Controller`] speaks the forwarder's management protocol. A node only
//! ever talks to the network through these two traits.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;
use zerotouch_core::{Data, FaceUri, Interest, Name};

use crate::error::{NodeError, Result};

/// Forwarder-assigned face identifier
pub type FaceId = u64;

/// Strategy that fans interests out over every next hop
pub const MULTICAST_STRATEGY: &str = "/localhost/nfd/strategy/multicast";

/// Why an interest produced no data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressError {
    /// The network rejected the interest
    #[error("Nack: {0}")]
    Nack(String),

    /// Nothing came back within the interest lifetime
    #[error("Timeout")]
    Timeout,
}

/// Whether a face leaves the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaceScope {
    /// Application or management face
    Local,
    /// Network face
    NonLocal,
}

/// Lifetime management of a face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacePersistency {
    /// Created on demand by an incoming connection
    OnDemand,
    /// Created by a management command
    Persistent,
    /// Never closed
    Permanent,
}

/// Shape of the link under a face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// Exactly one peer
    PointToPoint,
    /// Broadcast medium
    MultiAccess,
}

/// One row of the forwarder's face table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceStatus {
    /// Face id
    pub face_id: FaceId,
    /// Remote endpoint
    pub remote_uri: String,
    /// Local endpoint
    pub local_uri: String,
    /// Local or non-local
    pub scope: FaceScope,
    /// Persistency
    pub persistency: FacePersistency,
    /// Link type
    pub link_type: LinkType,
}

/// Face table query; unset fields match anything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaceQueryFilter {
    /// Required link type
    pub link_type: Option<LinkType>,
    /// Required scope
    pub scope: Option<FaceScope>,
}

impl FaceQueryFilter {
    /// Match every face
    #[must_use]
    pub const fn new() -> Self {
        Self {
            link_type: None,
            scope: None,
        }
    }

    /// Only multi-access faces
    #[must_use]
    pub const fn multi_access(mut self) -> Self {
        self.link_type = Some(LinkType::MultiAccess);
        self
    }

    /// Only non-local faces
    #[must_use]
    pub const fn non_local(mut self) -> Self {
        self.scope = Some(FaceScope::NonLocal);
        self
    }

    /// Returns true if `face` passes the filter
    #[must_use]
    pub fn matches(&self, face: &FaceStatus) -> bool {
        self.link_type.map_or(true, |t| t == face.link_type)
            && self.scope.map_or(true, |s| s == face.scope)
    }
}

/// Kind of face table change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaceEventKind {
    /// Face added
    Created,
    /// Face removed
    Destroyed,
}

/// Face table change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceEventNotification {
    /// What happened
    pub kind: FaceEventKind,
    /// Face id
    pub face_id: FaceId,
    /// Scope
    pub scope: FaceScope,
    /// Persistency
    pub persistency: FacePersistency,
    /// Link type
    pub link_type: LinkType,
    /// Remote endpoint
    pub remote_uri: String,
    /// Local endpoint
    pub local_uri: String,
}

impl fmt::Display for FaceEventNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} face {} ({} -> {}, {:?}, {:?})",
            self.kind, self.face_id, self.local_uri, self.remote_uri, self.scope, self.persistency
        )
    }
}

/// Route registration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteParameters {
    /// Prefix to route
    pub name: Name,
    /// Next hop
    pub face_id: FaceId,
    /// Route cost
    pub cost: u64,
    /// Expiration; `None` never expires
    pub expiration: Option<Duration>,
}

impl RouteParameters {
    /// A route that never expires
    #[must_use]
    pub const fn new(name: Name, face_id: FaceId, cost: u64) -> Self {
        Self {
            name,
            face_id,
            cost,
            expiration: None,
        }
    }
}

/// Packet exchange with the local forwarder.
///
/// Incoming interests for registered prefixes are delivered separately, on
/// the receiver handed to [`crate::Entity::run`].
#[async_trait]
pub trait Face: Send + Sync {
    /// Send an interest and wait for the first matching data
    async fn express_interest(&self, interest: Interest) -> std::result::Result<Data, ExpressError>;

    /// Answer a previously received interest
    async fn put_data(&self, data: Data) -> Result<()>;

    /// Ask the forwarder to deliver interests under `prefix` to this face
    async fn register_prefix(&self, prefix: &Name) -> Result<()>;
}

/// Forwarder management.
#[async_trait]
pub trait Controller: Send + Sync {
    /// List faces passing `filter`
    async fn query_faces(&self, filter: &FaceQueryFilter) -> Result<Vec<FaceStatus>>;

    /// Create a face toward a canonical URI.
    ///
    /// If an equivalent face exists the error is [`NodeError::FaceExists`]
    /// carrying that face.
    async fn create_face(&self, uri: &FaceUri) -> Result<FaceStatus>;

    /// Destroy a face
    async fn destroy_face(&self, face_id: FaceId) -> Result<()>;

    /// Add a route
    async fn register_route(&self, route: &RouteParameters) -> Result<()>;

    /// Choose the forwarding strategy for a prefix
    async fn set_strategy(&self, prefix: &Name, strategy: &Name) -> Result<()>;

    /// Subscribe to face table changes from now on
    fn face_events(&self) -> broadcast::Receiver<FaceEventNotification>;

    /// Put `uri` in canonical form, resolving host names within `timeout`
    async fn canonize(&self, uri: &FaceUri, timeout: Duration) -> Result<FaceUri> {
        if uri.is_canonical() {
            return Ok(uri.clone());
        }
        let fail = |reason: String| NodeError::Canonize {
            uri: uri.to_string(),
            reason,
        };
        uri.transport().map_err(|e| fail(e.to_string()))?;

        let addr = if let Some(addr) = uri.ip_literal() {
            addr
        } else {
            let lookup = tokio::net::lookup_host((uri.host(), uri.port_or_default()));
            let addrs = tokio::time::timeout(timeout, lookup)
                .await
                .map_err(|_| fail("resolution timed out".into()))?
                .map_err(|e| fail(e.to_string()))?;
            let found: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
            debug!(uri = %uri, ?found, "resolved face URI host");
            found
                .into_iter()
                .find(|a| uri.accepts_address(a))
                .ok_or_else(|| fail("no address of the required family".into()))?
        };
        uri.canonical_with(addr).map_err(|e| fail(e.to_string()))
    }
}
