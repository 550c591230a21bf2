use std::net::IpAddr;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use zerotouch_core::{FaceUri, Name};

use super::{lock, Link, NetFace, NodeId, SimNetwork};
use crate::error::{NodeError, Result};
use crate::transport::{
    Controller, FaceEventKind, FaceEventNotification, FaceId, FacePersistency, FaceQueryFilter,
    FaceScope, FaceStatus, LinkType, RouteParameters,
};

const CODE_FORBIDDEN: u32 = 403;
const CODE_NOT_CANONICAL: u32 = 406;
const CODE_UNREACHABLE: u32 = 408;
const CODE_NO_FACE: u32 = 410;

fn management(code: u32, text: impl Into<String>) -> NodeError {
    NodeError::Management {
        code,
        text: text.into(),
    }
}

/// Forwarder management of a simulated host
#[derive(Debug)]
pub struct SimController {
    network: SimNetwork,
    node: NodeId,
}

impl SimController {
    pub(super) const fn new(network: SimNetwork, node: NodeId) -> Self {
        Self { network, node }
    }
}

#[async_trait]
impl Controller for SimController {
    async fn query_faces(&self, filter: &FaceQueryFilter) -> Result<Vec<FaceStatus>> {
        let state = lock(&self.network.state);
        let node = state.node(self.node);
        if let Some((code, text)) = &node.faults.face_query {
            return Err(management(*code, text.clone()));
        }
        Ok(node
            .faces
            .values()
            .map(|f| &f.status)
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    async fn create_face(&self, uri: &FaceUri) -> Result<FaceStatus> {
        let mut state = lock(&self.network.state);
        state.node_mut(self.node).create_face_log.push(uri.to_string());

        let Some(addr) = uri.ip_literal().filter(|_| uri.is_canonical()) else {
            return Err(management(CODE_NOT_CANONICAL, format!("{uri} is not canonical")));
        };
        let Some(peer) = state
            .nodes
            .iter()
            .position(|n| IpAddr::V4(n.address) == addr)
        else {
            return Err(management(CODE_UNREACHABLE, format!("connection to {uri} timed out")));
        };
        if peer == self.node {
            return Err(management(CODE_NOT_CANONICAL, "cannot create a face to self"));
        }

        let existing = state
            .node(self.node)
            .faces
            .values()
            .find(|f| matches!(f.link, Link::Unicast { peer: p, .. } if p == peer))
            .map(|f| f.status.clone());
        if let Some(status) = existing {
            debug!(face = status.face_id, uri = %uri, "face already exists");
            return Err(NodeError::FaceExists(Box::new(status)));
        }

        let local_id = state.allocate_face_id();
        let peer_id = state.allocate_face_id();
        let own_uri = format!(
            "{}://{}:{}",
            uri.scheme(),
            state.node(self.node).address,
            uri.port_or_default()
        );

        let local = FaceStatus {
            face_id: local_id,
            remote_uri: uri.to_string(),
            local_uri: own_uri.clone(),
            scope: FaceScope::NonLocal,
            persistency: FacePersistency::Persistent,
            link_type: LinkType::PointToPoint,
        };
        let remote = FaceStatus {
            face_id: peer_id,
            remote_uri: own_uri,
            local_uri: uri.to_string(),
            scope: FaceScope::NonLocal,
            persistency: FacePersistency::OnDemand,
            link_type: LinkType::PointToPoint,
        };

        let node = state.node_mut(self.node);
        node.faces.insert(
            local_id,
            NetFace {
                status: local.clone(),
                link: Link::Unicast {
                    peer,
                    peer_face: peer_id,
                },
            },
        );
        node.announce(FaceEventKind::Created, &local);

        let other = state.node_mut(peer);
        other.faces.insert(
            peer_id,
            NetFace {
                status: remote.clone(),
                link: Link::Unicast {
                    peer: self.node,
                    peer_face: local_id,
                },
            },
        );
        other.announce(FaceEventKind::Created, &remote);

        Ok(local)
    }

    async fn destroy_face(&self, face_id: FaceId) -> Result<()> {
        let mut state = lock(&self.network.state);
        let node = state.node_mut(self.node);
        let Some(face) = node.faces.remove(&face_id) else {
            return Ok(());
        };
        node.fib.retain(|r| r.face_id != face_id);
        node.announce(FaceEventKind::Destroyed, &face.status);

        if let Link::Unicast { peer, peer_face } = face.link {
            let other = state.node_mut(peer);
            if let Some(face) = other.faces.remove(&peer_face) {
                other.fib.retain(|r| r.face_id != peer_face);
                other.announce(FaceEventKind::Destroyed, &face.status);
            }
        }
        Ok(())
    }

    async fn register_route(&self, route: &RouteParameters) -> Result<()> {
        let mut state = lock(&self.network.state);
        let node = state.node_mut(self.node);
        if !node.faces.contains_key(&route.face_id) {
            return Err(management(CODE_NO_FACE, format!("face {} not found", route.face_id)));
        }
        if node.faults.refused_route_faces.contains(&route.face_id) {
            return Err(management(CODE_FORBIDDEN, "route refused"));
        }
        node.fib
            .retain(|r| !(r.name == route.name && r.face_id == route.face_id));
        node.fib.push(route.clone());
        Ok(())
    }

    async fn set_strategy(&self, prefix: &Name, strategy: &Name) -> Result<()> {
        lock(&self.network.state)
            .node_mut(self.node)
            .strategies
            .insert(prefix.clone(), strategy.clone());
        Ok(())
    }

    fn face_events(&self) -> broadcast::Receiver<FaceEventNotification> {
        lock(&self.network.state).node(self.node).events.subscribe()
    }
}
