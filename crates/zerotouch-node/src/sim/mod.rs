//! In-memory network for tests and demos.
//!
//! A [`SimNetwork`] holds hosts ([`SimNode`]) that share multicast segments.
//! Each host runs a tiny forwarder: a face table, a FIB with per-prefix
//! strategies, and the applications attached to it. Interests from an
//! application reach other local applications whose prefixes match, and
//! leave over the longest-prefix FIB entry (every next hop under the
//! multicast strategy, the cheapest one otherwise). An interest that finds
//! neither is nacked with `NoRoute`. Hosts that receive an interest from the
//! network hand it to their matching applications only.
//!
//! Data goes back to the requester that is still waiting for it, first reply
//! wins. Face creation toward another host adds an on-demand face on the
//! passive side and announces it on that host's face event channel.

mod controller;
mod face;

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::debug;
use zerotouch_core::{Data, Interest, Name};

pub use controller::SimController;
pub use face::SimFace;

use crate::transport::{
    ExpressError, FaceEventKind, FaceEventNotification, FaceId, FacePersistency, FaceScope,
    FaceStatus, LinkType, RouteParameters, MULTICAST_STRATEGY,
};

/// Remote URI of every multicast face
pub const MULTICAST_GROUP_URI: &str = "udp4://224.0.23.170:56363";

/// Port of multicast faces
pub const MULTICAST_PORT: u16 = 56363;

/// Port of unicast faces
pub const UNICAST_PORT: u16 = 6363;

const FIRST_FACE_ID: FaceId = 256;
const EVENT_CAPACITY: usize = 64;

type NodeId = usize;
type AppId = usize;

#[derive(Debug, Clone, Copy)]
enum Link {
    Segment(u32),
    Unicast { peer: NodeId, peer_face: FaceId },
    App(AppId),
}

#[derive(Debug)]
struct NetFace {
    status: FaceStatus,
    link: Link,
}

#[derive(Debug)]
struct Pending {
    interest: Interest,
    reply: mpsc::UnboundedSender<Data>,
    expires: Instant,
}

#[derive(Debug)]
struct AppState {
    id: AppId,
    prefixes: Vec<Name>,
    incoming: mpsc::UnboundedSender<Interest>,
    pending: Vec<Pending>,
}

impl AppState {
    fn wants(&self, name: &Name) -> bool {
        self.prefixes.iter().any(|p| p.is_prefix_of(name))
    }

    fn deliver(&mut self, interest: &Interest, reply: &mpsc::UnboundedSender<Data>, expires: Instant) {
        let now = Instant::now();
        self.pending
            .retain(|p| p.expires >= now && !p.reply.is_closed());
        self.pending.push(Pending {
            interest: interest.clone(),
            reply: reply.clone(),
            expires,
        });
        if self.incoming.send(interest.clone()).is_err() {
            debug!(app = self.id, "application is gone, interest dropped");
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    refused_route_faces: BTreeSet<FaceId>,
    face_query: Option<(u32, String)>,
}

#[derive(Debug)]
struct NodeState {
    label: String,
    address: Ipv4Addr,
    faces: BTreeMap<FaceId, NetFace>,
    fib: Vec<RouteParameters>,
    strategies: BTreeMap<Name, Name>,
    apps: Vec<AppState>,
    events: broadcast::Sender<FaceEventNotification>,
    faults: Faults,
    create_face_log: Vec<String>,
}

impl NodeState {
    fn announce(&self, kind: FaceEventKind, status: &FaceStatus) {
        // No subscriber is fine.
        let _ = self.events.send(FaceEventNotification {
            kind,
            face_id: status.face_id,
            scope: status.scope,
            persistency: status.persistency,
            link_type: status.link_type,
            remote_uri: status.remote_uri.clone(),
            local_uri: status.local_uri.clone(),
        });
    }

    fn uses_multicast(&self, name: &Name) -> bool {
        self.strategies
            .iter()
            .filter(|(prefix, _)| prefix.is_prefix_of(name))
            .max_by_key(|(prefix, _)| prefix.len())
            .is_some_and(|(_, strategy)| strategy.to_string() == MULTICAST_STRATEGY)
    }

    fn next_hops(&self, name: &Name) -> Vec<FaceId> {
        let Some(longest) = self
            .fib
            .iter()
            .filter(|r| r.name.is_prefix_of(name))
            .map(|r| r.name.len())
            .max()
        else {
            return Vec::new();
        };
        let mut routes: Vec<&RouteParameters> = self
            .fib
            .iter()
            .filter(|r| r.name.len() == longest && r.name.is_prefix_of(name))
            .collect();
        if self.uses_multicast(name) {
            return routes.iter().map(|r| r.face_id).collect();
        }
        routes.sort_by_key(|r| r.cost);
        routes.first().map(|r| vec![r.face_id]).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct NetState {
    nodes: Vec<NodeState>,
    next_face_id: FaceId,
    next_app_id: AppId,
}

impl NetState {
    fn allocate_face_id(&mut self) -> FaceId {
        self.next_face_id = self.next_face_id.max(FIRST_FACE_ID) + 1;
        self.next_face_id
    }

    fn node(&self, id: NodeId) -> &NodeState {
        &self.nodes[id]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut NodeState {
        &mut self.nodes[id]
    }

    fn app_mut(&mut self, node: NodeId, app: AppId) -> Option<&mut AppState> {
        self.nodes[node].apps.iter_mut().find(|a| a.id == app)
    }

    /// Send an interest from an application into its host's forwarder.
    fn forward(
        &mut self,
        node: NodeId,
        from: AppId,
        interest: &Interest,
        reply: &mpsc::UnboundedSender<Data>,
    ) -> Result<(), ExpressError> {
        let name = interest.name();
        let expires = Instant::now() + interest.lifetime();
        let mut sent = false;

        for app in &mut self.nodes[node].apps {
            if app.id != from && app.wants(name) {
                app.deliver(interest, reply, expires);
                sent = true;
            }
        }

        for face_id in self.nodes[node].next_hops(name) {
            let Some(link) = self.nodes[node].faces.get(&face_id).map(|f| f.link) else {
                continue;
            };
            self.transmit(node, link, interest, reply, expires);
            sent = true;
        }

        if sent {
            Ok(())
        } else {
            debug!(node = %self.nodes[node].label, name = %name, "no route");
            Err(ExpressError::Nack("NoRoute".into()))
        }
    }

    fn transmit(
        &mut self,
        from: NodeId,
        link: Link,
        interest: &Interest,
        reply: &mpsc::UnboundedSender<Data>,
        expires: Instant,
    ) {
        match link {
            Link::Segment(segment) => {
                let receivers: Vec<NodeId> = self
                    .nodes
                    .iter()
                    .enumerate()
                    .filter(|(id, n)| {
                        *id != from
                            && n.faces
                                .values()
                                .any(|f| matches!(f.link, Link::Segment(s) if s == segment))
                    })
                    .map(|(id, _)| id)
                    .collect();
                for id in receivers {
                    self.receive(id, interest, reply, expires);
                }
            }
            Link::Unicast { peer, .. } => self.receive(peer, interest, reply, expires),
            Link::App(app) => {
                if let Some(app) = self.app_mut(from, app) {
                    app.deliver(interest, reply, expires);
                }
            }
        }
    }

    fn receive(
        &mut self,
        node: NodeId,
        interest: &Interest,
        reply: &mpsc::UnboundedSender<Data>,
        expires: Instant,
    ) {
        for app in &mut self.nodes[node].apps {
            if app.wants(interest.name()) {
                app.deliver(interest, reply, expires);
            }
        }
    }

    /// Hand data from an application to everyone waiting for it.
    fn satisfy(&mut self, node: NodeId, app: AppId, data: &Data) -> usize {
        let Some(app) = self.app_mut(node, app) else {
            return 0;
        };
        let now = Instant::now();
        let mut satisfied = 0;
        app.pending.retain(|p| {
            if p.expires < now {
                return false;
            }
            if p.interest.matches_data(data) {
                if p.reply.send(data.clone()).is_ok() {
                    satisfied += 1;
                }
                return false;
            }
            true
        });
        satisfied
    }
}

fn lock(state: &Mutex<NetState>) -> MutexGuard<'_, NetState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A set of simulated hosts
#[derive(Debug, Clone, Default)]
pub struct SimNetwork {
    state: Arc<Mutex<NetState>>,
}

impl SimNetwork {
    /// Create an empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host with one multicast face on segment 0
    pub fn add_node(&self, label: &str) -> SimNode {
        let node = self.add_isolated_node(label);
        node.add_multicast_face(0);
        node
    }

    /// Add a host without any network face
    pub fn add_isolated_node(&self, label: &str) -> SimNode {
        let mut state = lock(&self.state);
        let id = state.nodes.len();
        let host = u8::try_from(id + 1).unwrap_or(u8::MAX);
        state.nodes.push(NodeState {
            label: label.to_string(),
            address: Ipv4Addr::new(10, 0, 0, host),
            faces: BTreeMap::new(),
            fib: Vec::new(),
            strategies: BTreeMap::new(),
            apps: Vec::new(),
            events: broadcast::channel(EVENT_CAPACITY).0,
            faults: Faults::default(),
            create_face_log: Vec::new(),
        });
        SimNode {
            network: self.clone(),
            id,
        }
    }
}

/// Handle to one simulated host
#[derive(Debug, Clone)]
pub struct SimNode {
    network: SimNetwork,
    id: NodeId,
}

impl SimNode {
    fn state(&self) -> MutexGuard<'_, NetState> {
        lock(&self.network.state)
    }

    /// Host label
    pub fn label(&self) -> String {
        self.state().node(self.id).label.clone()
    }

    /// Host address
    pub fn address(&self) -> Ipv4Addr {
        self.state().node(self.id).address
    }

    /// Attach an application. Interests for prefixes it registers arrive on
    /// the returned receiver.
    pub fn attach_app(&self) -> (Arc<SimFace>, mpsc::UnboundedReceiver<Interest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        let app = state.next_app_id;
        state.next_app_id += 1;
        let face_id = state.allocate_face_id();

        let node = state.node_mut(self.id);
        node.apps.push(AppState {
            id: app,
            prefixes: Vec::new(),
            incoming: tx,
            pending: Vec::new(),
        });
        node.faces.insert(
            face_id,
            NetFace {
                status: FaceStatus {
                    face_id,
                    remote_uri: format!("internal://app/{app}"),
                    local_uri: "internal://".into(),
                    scope: FaceScope::Local,
                    persistency: FacePersistency::Persistent,
                    link_type: LinkType::PointToPoint,
                },
                link: Link::App(app),
            },
        );
        drop(state);

        (Arc::new(SimFace::new(self.network.clone(), self.id, app)), rx)
    }

    /// Management interface of this host's forwarder
    #[must_use]
    pub fn controller(&self) -> Arc<SimController> {
        Arc::new(SimController::new(self.network.clone(), self.id))
    }

    /// Add a multicast face on `segment`
    pub fn add_multicast_face(&self, segment: u32) -> FaceId {
        let mut state = self.state();
        let face_id = state.allocate_face_id();
        let node = state.node_mut(self.id);
        let status = FaceStatus {
            face_id,
            remote_uri: MULTICAST_GROUP_URI.into(),
            local_uri: format!("udp4://{}:{MULTICAST_PORT}", node.address),
            scope: FaceScope::NonLocal,
            persistency: FacePersistency::Permanent,
            link_type: LinkType::MultiAccess,
        };
        node.faces.insert(
            face_id,
            NetFace {
                status,
                link: Link::Segment(segment),
            },
        );
        face_id
    }

    /// Face table
    pub fn faces(&self) -> Vec<FaceStatus> {
        self.state()
            .node(self.id)
            .faces
            .values()
            .map(|f| f.status.clone())
            .collect()
    }

    /// FIB entries
    pub fn routes(&self) -> Vec<RouteParameters> {
        self.state().node(self.id).fib.clone()
    }

    /// Strategy chosen for exactly `prefix`
    pub fn strategy(&self, prefix: &Name) -> Option<Name> {
        self.state().node(self.id).strategies.get(prefix).cloned()
    }

    /// URIs of every face creation requested on this host, in order
    pub fn create_face_log(&self) -> Vec<String> {
        self.state().node(self.id).create_face_log.clone()
    }

    /// Make route registrations toward `face_id` fail
    pub fn refuse_routes_on(&self, face_id: FaceId) {
        self.state()
            .node_mut(self.id)
            .faults
            .refused_route_faces
            .insert(face_id);
    }

    /// Make face queries fail with `code` and `text`
    pub fn fail_face_queries(&self, code: u32, text: &str) {
        self.state().node_mut(self.id).faults.face_query = Some((code, text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Controller, Face};
    use std::time::Duration;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_no_route_is_nacked() {
        let net = SimNetwork::new();
        let node = net.add_node("a");
        let (face, _rx) = node.attach_app();
        let err = face
            .express_interest(Interest::new(name("/nowhere")))
            .await
            .unwrap_err();
        assert_eq!(err, ExpressError::Nack("NoRoute".into()));
    }

    #[tokio::test]
    async fn test_local_apps_exchange_packets() {
        let net = SimNetwork::new();
        let node = net.add_node("a");
        let (server, mut incoming) = node.attach_app();
        let (client, _rx) = node.attach_app();
        server.register_prefix(&name("/svc")).await.unwrap();

        let request = tokio::spawn(async move {
            client
                .express_interest(Interest::new(name("/svc/x")))
                .await
        });
        let interest = incoming.recv().await.unwrap();
        server
            .put_data(Data::new(interest.name().clone().append_version()))
            .await
            .unwrap();

        let data = request.await.unwrap().unwrap();
        assert!(name("/svc/x").is_prefix_of(data.name()));
    }

    #[tokio::test]
    async fn test_unanswered_interests_do_not_pile_up() {
        let net = SimNetwork::new();
        let node = net.add_node("a");
        let (server, _incoming) = node.attach_app();
        let (client, _rx) = node.attach_app();
        server.register_prefix(&name("/svc")).await.unwrap();

        for i in 0..5 {
            let interest = Interest::new(name("/svc").append(format!("{i}").as_str()))
                .with_lifetime(Duration::from_millis(10));
            assert_eq!(client.express_interest(interest).await.unwrap_err(), ExpressError::Timeout);
        }
        assert_eq!(lock(&net.state).nodes[0].apps[0].pending.len(), 1);
    }

    #[tokio::test]
    async fn test_multicast_reaches_segment_and_times_out() {
        let net = SimNetwork::new();
        let a = net.add_node("a");
        let b = net.add_node("b");
        let (face_a, _rx_a) = a.attach_app();
        let (face_b, mut incoming_b) = b.attach_app();
        face_b.register_prefix(&name("/localhop")).await.unwrap();

        let ctl = a.controller();
        let mcast = ctl
            .query_faces(&crate::transport::FaceQueryFilter::new().multi_access())
            .await
            .unwrap();
        ctl.register_route(&RouteParameters::new(name("/localhop"), mcast[0].face_id, 1))
            .await
            .unwrap();

        let interest = Interest::new(name("/localhop/probe")).with_lifetime(Duration::from_millis(50));
        let outcome = face_a.express_interest(interest).await;
        assert_eq!(outcome.unwrap_err(), ExpressError::Timeout);
        assert_eq!(incoming_b.recv().await.unwrap().name(), &name("/localhop/probe"));
    }
}
