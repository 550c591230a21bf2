//! The device role.
//!
//! A device knows its PIN and nothing else. It answers probes signed with
//! that PIN by telling the prober its name and the addresses it can be
//! reached on, then waits for the prober to connect. Once a matching face
//! shows up it applies for a certificate over that face, trusts the anchor
//! that comes back and fetches the certificate issued for its key.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use zerotouch_core::security::keychain;
use zerotouch_core::{
    hmac, Authorization, Certificate, ControlParameters, ControlResponse, Interest, Name, Pin,
    ProbeResponse, SecurityOptions, Signing, VerificationType,
};

use crate::entity::{CommandHandler, Entity, Responder};
use crate::error::{NodeError, Result};
use crate::server::{APPLY_CERT, PROBE_DEVICE_PREFIX};
use crate::transport::{
    FaceEventKind, FaceEventNotification, FaceId, FacePersistency, FaceQueryFilter, FaceScope,
    FaceStatus,
};

/// Prefix the probe handler listens on
pub const PROBE_PREFIX: &str = "/localhop";
/// Subname of the probe handler
pub const PROBE_DEVICE: &str = "probe-device";

/// Progress of the device side
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceState {
    /// Waiting for a probe
    Idle,
    /// Answered a probe
    Probed,
    /// Waiting for the prober's face
    AwaitingFace,
    /// Applying for a certificate
    Applying,
    /// Fetching the issued certificate
    FetchingCertificate,
    /// Certificate installed
    Done,
    /// Gave up
    Failed,
}

impl DeviceState {
    /// Returns true once nothing more will happen
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Rewrite the local URIs of `faces` into addresses a prober can connect
/// to: the port is dropped and UDP becomes TCP. Empty URIs are skipped.
#[must_use]
pub fn package_accessible_uris(faces: &[FaceStatus]) -> Vec<String> {
    faces
        .iter()
        .filter_map(|face| {
            let uri = face.local_uri.as_str();
            let host = uri.rfind(':').map_or(uri, |at| &uri[..at]);
            if host.is_empty() {
                return None;
            }
            let uri = if host != uri && host.contains(':') { host } else { uri };
            Some(match uri.strip_prefix("udp") {
                Some(rest) => format!("tcp{rest}"),
                None => uri.to_string(),
            })
        })
        .collect()
}

/// The device side of bootstrapping
#[derive(Clone)]
pub struct DeviceController {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    entity: Entity,
    pin: Pin,
    state: watch::Sender<DeviceState>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceController {
    /// Listen for probes signed with `pin`.
    ///
    /// With `enable_discovery` the probe prefix is also routed over this
    /// node's multicast faces, so probes can be relayed through it.
    pub async fn start(entity: Entity, pin: Pin, enable_discovery: bool) -> Result<Self> {
        let device = Self {
            inner: Arc::new(DeviceInner {
                entity,
                pin,
                state: watch::channel(DeviceState::Idle).0,
                monitor: Mutex::new(None),
            }),
        };
        let entity = &device.inner.entity;

        if enable_discovery {
            let prefix: Name = PROBE_DEVICE_PREFIX.parse()?;
            if let Err(e) = entity.agent().register_top_prefix(&prefix).await {
                warn!(prefix = %prefix, error = %e, "discovery is not enabled");
            }
        }

        entity
            .register_command_handler(
                &PROBE_PREFIX.parse()?,
                &Name::from(PROBE_DEVICE),
                Arc::new(Probe(Arc::downgrade(&device.inner))),
                SecurityOptions::shared_secret(device.inner.pin.clone()),
            )
            .await?;
        info!(name = %entity.name(), "device is waiting for a probe");
        Ok(device)
    }

    /// The device's node
    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.inner.entity
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> DeviceState {
        *self.inner.state.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.inner.state.subscribe()
    }

    fn advance(&self, next: DeviceState) {
        self.inner.state.send_if_modified(|current| {
            if current.is_terminal() || next == *current {
                return false;
            }
            debug!(from = ?*current, to = ?next, "device state");
            *current = next;
            true
        });
    }

    /// Answer a probe: our name and reachable addresses.
    ///
    /// A probe verified by the shared secret also starts watching for the
    /// prober's face, before the answer leaves.
    pub async fn handle_probe(
        &self,
        params: &ControlParameters,
        auth: &Authorization,
    ) -> std::result::Result<ProbeResponse, ControlResponse> {
        let Some(prober) = params.name() else {
            return Err(ControlResponse::new(
                ControlResponse::INVALID_PARAMETERS,
                "probe carries no prober name",
            ));
        };
        info!(prober = %prober, "probed");

        let entity = self.entity();
        let filter = FaceQueryFilter::new().multi_access().non_local();
        let faces = match entity.controller().query_faces(&filter).await {
            Ok(faces) => faces,
            Err(e) => {
                warn!(error = %e, "cannot list faces");
                return Err(e.to_control_response());
            }
        };
        let uris = package_accessible_uris(&faces);
        debug!(?uris, "reachable addresses");

        self.advance(DeviceState::Probed);
        if auth.resolved_verification_type() == VerificationType::SharedSecret {
            self.monitor_face_creation(prober.clone());
        }
        Ok(ProbeResponse {
            name: entity.name().clone(),
            uris,
        })
    }

    fn monitor_face_creation(&self, prober: Name) {
        let events = BroadcastStream::new(self.entity().controller().face_events());
        let weak = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            tokio::pin!(events);
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "face events lost");
                        continue;
                    }
                };
                if !is_prober_face(&event) {
                    debug!(%event, "ignoring face event");
                    continue;
                }
                if let Some(inner) = weak.upgrade() {
                    let device = Self { inner };
                    let entity = device.entity().clone();
                    let flow = tokio::spawn(async move { device.bootstrap_over(event, prober).await });
                    entity.abort_on_shutdown(flow.abort_handle());
                }
                return;
            }
        });

        self.entity().abort_on_shutdown(task.abort_handle());
        let previous = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        self.advance(DeviceState::AwaitingFace);
    }

    /// Stop watching for the prober's face and shut the node down
    pub async fn shutdown(&self) {
        let monitor = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(monitor) = monitor {
            monitor.abort();
        }
        self.entity().shutdown().await;
        info!(name = %self.entity().name(), "device stopped");
    }

    async fn bootstrap_over(&self, event: FaceEventNotification, prober: Name) {
        info!(%event, prober = %prober, "prober connected");
        match self.apply_over(event.face_id, &prober).await {
            Ok(certificate) => {
                info!(certificate = %certificate.name(), "new certificate installed");
                self.advance(DeviceState::Done);
            }
            Err(e) => {
                warn!(prober = %prober, error = %e, "bootstrapping failed");
                self.advance(DeviceState::Failed);
            }
        }
    }

    async fn apply_over(&self, face_id: FaceId, prober: &Name) -> Result<Certificate> {
        let entity = self.entity();
        entity.record_created_face(face_id);
        entity.register_route_on_face(prober, face_id).await?;

        self.advance(DeviceState::Applying);
        let key = entity.default_key()?;
        let params = ControlParameters::new()
            .set_name(key.name().clone())
            .set_public_key(key.public_key().to_vec());
        let prefix = prober.clone().append(APPLY_CERT).append_name(entity.name());
        let pin = &self.inner.pin;
        let command = entity.make_command(prefix, &params, &Signing::SharedSecret(pin.clone()))?;
        let content = entity
            .issue_command(command, |data| hmac::verify_data(data, pin))
            .await?;

        self.handle_apply_response(key.name(), face_id, &content).await
    }

    /// Trust the anchor in an apply-cert reply, then fetch and install the
    /// certificate it issued for `key_name`.
    ///
    /// Any failure ends bootstrapping: the device moves to
    /// [`DeviceState::Failed`].
    pub async fn handle_apply_response(
        &self,
        key_name: &Name,
        face_id: FaceId,
        content: &[u8],
    ) -> Result<Certificate> {
        let outcome = self.install_issued_certificate(key_name, face_id, content).await;
        if let Err(e) = &outcome {
            debug!(key = %key_name, error = %e, "certificate application failed");
            self.advance(DeviceState::Failed);
        }
        outcome
    }

    async fn install_issued_certificate(
        &self,
        key_name: &Name,
        face_id: FaceId,
        content: &[u8],
    ) -> Result<Certificate> {
        let entity = self.entity();
        let anchor = Certificate::wire_decode(content)?;
        info!(anchor = %anchor.name(), "received trust anchor");
        entity.add_trust_anchor(anchor.clone());
        entity.register_route_on_face(key_name, face_id).await?;

        self.advance(DeviceState::FetchingCertificate);
        let interest = Interest::new(key_name.clone()).with_lifetime(entity.config().cert_fetch_lifetime());
        let certificate = Certificate::from_data(entity.fetch(interest).await?)?;
        if certificate.key_name() != *key_name {
            return Err(NodeError::Verification(format!(
                "certificate {} is not for {key_name}",
                certificate.name()
            )));
        }
        if certificate.issuer() != Some(anchor.name())
            || !keychain::verify_data(certificate.data(), anchor.public_key())
        {
            return Err(NodeError::Verification(format!(
                "certificate {} is not signed by {}",
                certificate.name(),
                anchor.name()
            )));
        }

        entity.install_certificate(certificate.clone())?;
        Ok(certificate)
    }
}

impl std::fmt::Debug for DeviceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceController")
            .field("entity", &self.inner.entity)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn is_prober_face(event: &FaceEventNotification) -> bool {
    event.kind == FaceEventKind::Created
        && event.scope == FaceScope::NonLocal
        && event.persistency == FacePersistency::OnDemand
}

struct Probe(Weak<DeviceInner>);

#[async_trait]
impl CommandHandler for Probe {
    async fn handle(&self, params: ControlParameters, auth: Authorization, responder: Responder) {
        let Some(inner) = self.0.upgrade() else { return };
        let content = match (DeviceController { inner }).handle_probe(&params, &auth).await {
            Ok(response) => response.encode(),
            Err(status) => status.wire_encode(),
        };
        let sent = match content {
            Ok(content) => responder.reply(content).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            warn!(error = %e, "cannot answer probe");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LinkType;
    use zerotouch_core::FaceUri;

    fn face(local_uri: &str) -> FaceStatus {
        FaceStatus {
            face_id: 300,
            remote_uri: "udp4://224.0.23.170:56363".into(),
            local_uri: local_uri.into(),
            scope: FaceScope::NonLocal,
            persistency: FacePersistency::Permanent,
            link_type: LinkType::MultiAccess,
        }
    }

    #[test]
    fn test_uris_lose_port_and_become_tcp() {
        let uris = package_accessible_uris(&[
            face("udp4://10.0.0.2:56363"),
            face("udp6://[fe80::1%25eth0]:56363"),
            face("tcp4://10.0.0.3:6363"),
        ]);
        assert_eq!(
            uris,
            vec!["tcp4://10.0.0.2", "tcp6://[fe80::1%25eth0]", "tcp4://10.0.0.3"]
        );
    }

    #[test]
    fn test_packaged_uris_parse_back() {
        let uris = package_accessible_uris(&[
            face("udp4://10.0.0.2:56363"),
            face("udp6://[fe80::1%25eth0]:56363"),
            face("udp6://[fe80::2%eth1]:56363"),
        ]);
        for uri in &uris {
            let parsed = FaceUri::parse(uri).unwrap();
            assert!(parsed.transport().is_ok(), "{uri}");
            assert!(parsed.ip_literal().is_some(), "{uri}");
        }
        let zoned = FaceUri::parse(&uris[1]).unwrap();
        assert_eq!(zoned.zone(), Some("eth0"));
        assert_eq!(zoned.to_string(), uris[1]);
        assert_eq!(FaceUri::parse(&uris[2]).unwrap().zone(), Some("eth1"));
    }

    #[test]
    fn test_portless_and_empty_uris() {
        let uris = package_accessible_uris(&[face("udp4://10.0.0.2"), face("")]);
        assert_eq!(uris, vec!["tcp4://10.0.0.2"]);
    }

    #[test]
    fn test_prober_face_filter() {
        let mut event = FaceEventNotification {
            kind: FaceEventKind::Created,
            face_id: 1,
            scope: FaceScope::NonLocal,
            persistency: FacePersistency::OnDemand,
            link_type: LinkType::PointToPoint,
            remote_uri: "tcp4://10.0.0.1:6363".into(),
            local_uri: "tcp4://10.0.0.2:6363".into(),
        };
        assert!(is_prober_face(&event));
        event.persistency = FacePersistency::Persistent;
        assert!(!is_prober_face(&event));
        event.persistency = FacePersistency::OnDemand;
        event.kind = FaceEventKind::Destroyed;
        assert!(!is_prober_face(&event));
    }
}
