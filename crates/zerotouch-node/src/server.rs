//! The authentication server role.
//!
//! An operator asks the server to add a device by handing it the device's
//! PIN over `/localhost/add-device`. The server then
//!
//! 1. broadcasts an HMAC-signed probe under `/localhop/probe-device`,
//! 2. reads the device name and addresses out of the first verified reply,
//! 3. opens a certificate channel `<server>/apply-cert/<device>` gated by the
//!    same PIN,
//! 4. connects to one of the device addresses and routes the device name
//!    over that face,
//!
//! and answers the operator with the outcome. The device later applies for a
//! certificate on the channel and receives the server's trust anchor in
//! return; the certificate issued for its key is served on request.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use zerotouch_core::cert::ISSUED_CERT_MARKER;
use zerotouch_core::{
    hmac, Authorization, Certificate, ControlParameters, ControlResponse, Data, FaceUri, Name, Pin,
    ProbeResponse, SecurityOptions, Signing,
};

use crate::entity::{CommandHandler, Entity, Responder};
use crate::error::{NodeError, Result};
use crate::transport::FaceStatus;

/// Prefix of the operator command
pub const ADD_DEVICE_PREFIX: &str = "/localhost";
/// Subname of the operator command
pub const ADD_DEVICE: &str = "add-device";
/// Prefix the probe is broadcast under
pub const PROBE_DEVICE_PREFIX: &str = "/localhop/probe-device";
/// Component of the certificate channel
pub const APPLY_CERT: &str = "apply-cert";

/// Progress of one add-device request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BootstrapState {
    /// Nothing sent yet
    Idle,
    /// Probe broadcast, waiting for the device
    Probing,
    /// Device answered, connecting to it
    AwaitingFace,
    /// Connected, routing the device name
    RegisteringCertChannel,
    /// Operator answered, waiting for the device to apply
    AwaitingCertApplication,
    /// Certificate issued
    Done,
    /// Gave up
    Failed,
}

impl BootstrapState {
    /// Returns true once nothing more will happen
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// One add-device request and the device it found
#[derive(Debug)]
pub struct Attempt {
    id: usize,
    device: Mutex<Option<Name>>,
    state: watch::Sender<BootstrapState>,
}

impl Attempt {
    fn new(id: usize) -> Self {
        Self {
            id,
            device: Mutex::new(None),
            state: watch::channel(BootstrapState::Idle).0,
        }
    }

    /// Sequence number, starting at 0
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Device name, once the probe was answered
    pub fn device(&self) -> Option<Name> {
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> BootstrapState {
        *self.state.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    fn set_device(&self, name: Name) {
        *self.device.lock().unwrap_or_else(PoisonError::into_inner) = Some(name);
    }

    /// Move forward; terminal states stick
    fn advance(&self, next: BootstrapState) {
        let id = self.id;
        self.state.send_if_modified(|current| {
            if current.is_terminal() || (next <= *current && next != BootstrapState::Failed) {
                return false;
            }
            debug!(attempt = id, from = ?*current, to = ?next, "bootstrap state");
            *current = next;
            true
        });
    }
}

/// Walks a candidate address list from the back
struct Connector {
    candidates: Vec<String>,
    remaining: usize,
}

impl Connector {
    fn new(candidates: Vec<String>) -> Self {
        let remaining = candidates.len();
        Self {
            candidates,
            remaining,
        }
    }
}

impl Iterator for Connector {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.remaining = self.remaining.checked_sub(1)?;
        self.candidates.get(self.remaining).cloned()
    }
}

/// The authentication server
#[derive(Clone)]
pub struct AuthenticationServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    entity: Entity,
    attempts: Mutex<Vec<Arc<Attempt>>>,
}

impl AuthenticationServer {
    /// Route the probe prefix over the multicast faces and listen for
    /// add-device commands.
    ///
    /// A node without usable multicast faces still starts; its probes will be
    /// nacked.
    pub async fn start(entity: Entity) -> Result<Self> {
        let server = Self {
            inner: Arc::new(ServerInner {
                entity,
                attempts: Mutex::new(Vec::new()),
            }),
        };
        let entity = &server.inner.entity;

        let probe_prefix: Name = PROBE_DEVICE_PREFIX.parse()?;
        if let Err(e) = entity.agent().register_top_prefix(&probe_prefix).await {
            warn!(prefix = %probe_prefix, error = %e, "probe prefix is not routed");
        }

        entity
            .register_command_handler(
                &ADD_DEVICE_PREFIX.parse()?,
                &Name::from(ADD_DEVICE),
                Arc::new(AddDevice(Arc::downgrade(&server.inner))),
                SecurityOptions::open(),
            )
            .await?;
        info!(name = %entity.name(), "authentication server is ready");
        Ok(server)
    }

    /// The server's node
    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.inner.entity
    }

    /// Every add-device request so far, oldest first
    pub fn attempts(&self) -> Vec<Arc<Attempt>> {
        self.lock_attempts().clone()
    }

    fn lock_attempts(&self) -> std::sync::MutexGuard<'_, Vec<Arc<Attempt>>> {
        self.inner
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn new_attempt(&self) -> Arc<Attempt> {
        let mut attempts = self.lock_attempts();
        let attempt = Arc::new(Attempt::new(attempts.len()));
        attempts.push(Arc::clone(&attempt));
        attempt
    }

    /// Run the whole add-device exchange for `params` and return the status
    /// for the operator
    pub async fn add_device(&self, params: &ControlParameters) -> ControlResponse {
        let attempt = self.new_attempt();
        let response = self.probe_and_connect(&attempt, params).await;
        if response.is_success() {
            attempt.advance(BootstrapState::AwaitingCertApplication);
        } else {
            attempt.advance(BootstrapState::Failed);
        }
        info!(attempt = attempt.id(), %response, "add-device finished");
        response
    }

    async fn probe_and_connect(&self, attempt: &Arc<Attempt>, params: &ControlParameters) -> ControlResponse {
        let pin = match params.pin_code() {
            Some(pin) if !params.has_name() => Pin::from(pin),
            _ => {
                return ControlResponse::new(
                    ControlResponse::INVALID_PARAMETERS,
                    "add-device needs a PinCode and no Name",
                )
            }
        };

        let entity = self.entity();
        let probe_params = params
            .clone()
            .set_name(entity.name().clone())
            .unset_pin_code();
        let probe = PROBE_DEVICE_PREFIX
            .parse::<Name>()
            .map_err(NodeError::from)
            .and_then(|prefix| {
                entity.make_command(prefix, &probe_params, &Signing::SharedSecret(pin.clone()))
            });
        let probe = match probe {
            Ok(probe) => probe.with_lifetime(entity.config().probe_lifetime()),
            Err(e) => return ControlResponse::new(ControlResponse::BROADCAST_FAILED, e.to_string()),
        };

        attempt.advance(BootstrapState::Probing);
        info!(attempt = attempt.id(), probe = %probe.name(), "probing for the device");
        let content = match entity.broadcast(probe, |data| hmac::verify_data(data, &pin)).await {
            Ok(content) => content,
            Err(e) => return ControlResponse::new(ControlResponse::BROADCAST_FAILED, e.to_string()),
        };

        self.probe_response(attempt, &content, &pin).await
    }

    /// Act on the content of a verified probe reply
    pub async fn handle_probe_response(&self, content: &[u8], pin: &Pin) -> ControlResponse {
        let attempt = self.new_attempt();
        attempt.advance(BootstrapState::Probing);
        let response = self.probe_response(&attempt, content, pin).await;
        if !response.is_success() {
            attempt.advance(BootstrapState::Failed);
        }
        response
    }

    async fn probe_response(&self, attempt: &Arc<Attempt>, content: &[u8], pin: &Pin) -> ControlResponse {
        let device = match ProbeResponse::decode_name(content) {
            Ok(name) => name,
            Err(e) => return ControlResponse::new(ControlResponse::BAD_DEVICE_NAME, e.to_string()),
        };
        let uris = match ProbeResponse::decode_uris(content) {
            Ok(uris) => uris,
            Err(e) => return ControlResponse::new(ControlResponse::BAD_DEVICE_URIS, e.to_string()),
        };
        info!(attempt = attempt.id(), device = %device, ?uris, "device answered the probe");
        attempt.set_device(device.clone());

        let entity = self.entity();
        let channel = entity.name().clone().append(APPLY_CERT);
        let handler = Arc::new(IssueCertificate {
            server: Arc::downgrade(&self.inner),
            attempt: Arc::clone(attempt),
        });
        if let Err(e) = entity
            .register_command_handler(&channel, &device, handler, SecurityOptions::shared_secret(pin.clone()))
            .await
        {
            warn!(device = %device, error = %e, "certificate channel is not reachable");
        }

        attempt.advance(BootstrapState::AwaitingFace);
        let face = match self.connect_to_device(uris).await {
            Ok(face) => face,
            Err(response) => return response,
        };

        attempt.advance(BootstrapState::RegisteringCertChannel);
        info!(device = %device, face = face.face_id, remote = %face.remote_uri, "connected to the device");
        entity.record_created_face(face.face_id);
        match entity.register_route_on_face(&device, face.face_id).await {
            Ok(()) => ControlResponse::ok(),
            Err(e) => {
                warn!(device = %device, error = %e, "error when registering the device prefix");
                e.to_control_response()
            }
        }
    }

    /// Try `uris` from the last to the first until a face exists toward one.
    ///
    /// Addresses that do not parse or canonize are skipped. An existing face
    /// counts as connected.
    pub async fn connect_to_device(&self, uris: Vec<String>) -> std::result::Result<FaceStatus, ControlResponse> {
        let entity = self.entity();
        let controller = entity.controller();
        let timeout = entity.config().canonize_timeout();

        for candidate in Connector::new(uris) {
            let uri = match FaceUri::parse(&candidate) {
                Ok(uri) => uri,
                Err(e) => {
                    debug!(uri = %candidate, error = %e, "skipping address");
                    continue;
                }
            };
            let uri = match controller.canonize(&uri, timeout).await {
                Ok(uri) => uri,
                Err(e) => {
                    debug!(uri = %candidate, error = %e, "skipping address");
                    continue;
                }
            };

            debug!(uri = %uri, "creating face");
            match controller.create_face(&uri).await {
                Ok(face) => return Ok(face),
                Err(NodeError::FaceExists(face)) => return Ok(*face),
                Err(e) => warn!(uri = %uri, error = %e, "cannot connect"),
            }
        }
        Err(ControlResponse::new(
            ControlResponse::NO_REACHABLE_ADDRESS,
            "none of the device addresses can be connected to",
        ))
    }

    /// Issue a certificate for the key in `params`, publish it and return the
    /// trust anchor that signed it
    pub async fn issue_certificate(&self, params: &ControlParameters) -> std::result::Result<Certificate, ControlResponse> {
        let invalid = |text: String| ControlResponse::new(ControlResponse::INVALID_PARAMETERS, text);
        let (Some(key_name), Some(public_key)) = (params.name(), params.public_key()) else {
            return Err(invalid("apply-cert needs a Name and a PublicKey".into()));
        };

        let entity = self.entity();
        let anchor = entity.default_certificate().map_err(|e| invalid(e.to_string()))?;
        let certificate = self
            .generate_device_certificate(key_name, public_key, &anchor)
            .map_err(|e| invalid(e.to_string()))?;
        info!(certificate = %certificate.name(), "issued device certificate");
        entity
            .publish_certificate(key_name, certificate)
            .await
            .map_err(|e| invalid(e.to_string()))?;
        Ok(anchor)
    }

    /// Certificate `<key>/NDNCERT/<version>` holding `public_key`, signed by
    /// `anchor` with the anchor's validity
    pub fn generate_device_certificate(
        &self,
        key_name: &Name,
        public_key: &[u8],
        anchor: &Certificate,
    ) -> Result<Certificate> {
        let name = key_name.clone().append(ISSUED_CERT_MARKER).append_version();
        let mut data = Data::new(name).with_content(public_key.to_vec());
        self.entity()
            .with_keychain(|kc| kc.sign_with_certificate(&mut data, anchor, anchor.validity()))?;
        Ok(Certificate::from_data(data)?)
    }
}

impl std::fmt::Debug for AuthenticationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationServer")
            .field("entity", &self.inner.entity)
            .finish_non_exhaustive()
    }
}

struct AddDevice(Weak<ServerInner>);

#[async_trait]
impl CommandHandler for AddDevice {
    async fn handle(&self, params: ControlParameters, _auth: Authorization, responder: Responder) {
        let Some(inner) = self.0.upgrade() else { return };
        let response = AuthenticationServer { inner }.add_device(&params).await;
        if let Err(e) = responder.reply_status(&response).await {
            warn!(error = %e, "cannot answer add-device");
        }
    }
}

struct IssueCertificate {
    server: Weak<ServerInner>,
    attempt: Arc<Attempt>,
}

#[async_trait]
impl CommandHandler for IssueCertificate {
    async fn handle(&self, params: ControlParameters, auth: Authorization, responder: Responder) {
        let Some(inner) = self.server.upgrade() else { return };
        debug!(verified = %auth.resolved_verification_type(), "apply-cert received");

        let (content, issued) = match (AuthenticationServer { inner }).issue_certificate(&params).await {
            Ok(anchor) => (anchor.wire_encode(), true),
            Err(response) => (response.wire_encode(), false),
        };
        let sent = match content {
            Ok(content) => responder.reply(content).await,
            Err(e) => Err(e.into()),
        };
        match sent {
            Ok(()) if issued => self.attempt.advance(BootstrapState::Done),
            Ok(()) => {}
            Err(e) => warn!(error = %e, "cannot answer apply-cert"),
        }
    }
}
