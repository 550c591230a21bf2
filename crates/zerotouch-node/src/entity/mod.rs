//! The per-node runtime.
//!
//! An [`Entity`] owns a node's identity and key chain, its registered
//! commands and the certificates it trusts or serves. It registers command
//! handlers behind an authorization gate, issues signed commands and checks
//! the replies, and serves published certificates on request.

mod authorize;
mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use zerotouch_core::{
    hmac, CachePolicy, Certificate, ControlParameters, ControlResponse, Data, Interest, Key,
    KeyChain, Name, SecurityOptions, Signing,
};

pub use registry::CommandHandler;
use registry::{CommandEntry, Registry, Route};

use crate::broadcast::BroadcastAgent;
use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::observer::{Direction, PacketObserver, TracingObserver};
use crate::transport::{Controller, Face, FaceId, RouteParameters};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A node taking part in bootstrapping
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

struct EntityInner {
    name: Name,
    face: Arc<dyn Face>,
    controller: Arc<dyn Controller>,
    agent: BroadcastAgent,
    config: NodeConfig,
    observer: Arc<dyn PacketObserver>,
    handle_signals: bool,
    keychain: Mutex<KeyChain>,
    registry: Mutex<Registry>,
    anchors: Mutex<BTreeMap<Name, Certificate>>,
    created_faces: Mutex<Vec<FaceId>>,
    /// `None` once shut down
    tasks: Mutex<Option<Vec<AbortHandle>>>,
}

/// Builder for [`Entity`]
pub struct EntityBuilder {
    name: Name,
    face: Arc<dyn Face>,
    controller: Arc<dyn Controller>,
    config: NodeConfig,
    observer: Option<Arc<dyn PacketObserver>>,
    handle_signals: bool,
}

impl EntityBuilder {
    /// Set the configuration
    #[must_use]
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the packet observer (default: [`TracingObserver`])
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn PacketObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Stop on SIGINT/SIGTERM, destroying created faces first
    #[must_use]
    pub const fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Build the entity and create its identity
    pub fn build(self) -> Entity {
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(TracingObserver));
        let mut keychain = KeyChain::new();
        keychain.create_identity(&self.name);

        Entity {
            inner: Arc::new(EntityInner {
                agent: BroadcastAgent::new(
                    Arc::clone(&self.face),
                    Arc::clone(&self.controller),
                    Arc::clone(&observer),
                ),
                name: self.name,
                face: self.face,
                controller: self.controller,
                config: self.config,
                observer,
                handle_signals: self.handle_signals,
                keychain: Mutex::new(keychain),
                registry: Mutex::new(Registry::default()),
                anchors: Mutex::new(BTreeMap::new()),
                created_faces: Mutex::new(Vec::new()),
                tasks: Mutex::new(Some(Vec::new())),
            }),
        }
    }
}

impl Entity {
    /// Start building an entity named `name`
    #[must_use]
    pub fn builder(name: Name, face: Arc<dyn Face>, controller: Arc<dyn Controller>) -> EntityBuilder {
        EntityBuilder {
            name,
            face,
            controller,
            config: NodeConfig::default(),
            observer: None,
            handle_signals: false,
        }
    }

    /// Node name
    #[must_use]
    pub fn name(&self) -> &Name {
        &self.inner.name
    }

    /// Node configuration
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Forwarder management
    #[must_use]
    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.inner.controller
    }

    /// Packet face
    #[must_use]
    pub fn face(&self) -> &Arc<dyn Face> {
        &self.inner.face
    }

    /// Multicast discovery helper
    #[must_use]
    pub fn agent(&self) -> &BroadcastAgent {
        &self.inner.agent
    }

    /// Register `handler` for `prefix/sub`, gated by `options`.
    ///
    /// `prefix` is registered with the forwarder the first time it is used.
    /// If the forwarder refuses it, every handler under `prefix` is dropped
    /// and the next registration tries again.
    pub async fn register_command_handler(
        &self,
        prefix: &Name,
        sub: &Name,
        handler: Arc<dyn CommandHandler>,
        options: SecurityOptions,
    ) -> Result<()> {
        let fresh = lock(&self.inner.registry).insert_command(
            prefix,
            CommandEntry {
                sub: sub.clone(),
                options,
                handler,
            },
        );
        debug!(prefix = %prefix, sub = %sub, "command handler registered");

        if fresh {
            if let Err(e) = self.inner.face.register_prefix(prefix).await {
                warn!(prefix = %prefix, error = %e, "fail to register prefix");
                lock(&self.inner.registry).remove_commands(prefix);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Build a command interest `prefix/<params>/<timestamp>/<nonce>` signed
    /// as `signing` says
    pub fn make_command(
        &self,
        prefix: Name,
        params: &ControlParameters,
        signing: &Signing,
    ) -> Result<Interest> {
        let command = Interest::command(prefix, params)?;
        let command = match signing {
            Signing::SharedSecret(pin) => hmac::sign_interest(command, pin)?,
            Signing::Identity => lock(&self.inner.keychain).sign_interest(&self.inner.name, command)?,
        };
        Ok(command
            .with_lifetime(self.inner.config.command_lifetime())
            .with_must_be_fresh(true))
    }

    /// Send `command` and return the content of its verified reply.
    ///
    /// Failures are logged and returned; nothing is retried.
    pub async fn issue_command<F>(&self, command: Interest, verify: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&Data) -> bool + Send,
    {
        self.inner.observer.on_interest(Direction::Out, &command);
        let data = match self.inner.face.express_interest(command.clone()).await {
            Ok(data) => data,
            Err(e) => {
                warn!(name = %command.name(), error = %e, "command failed");
                return Err(e.into());
            }
        };
        self.inner.observer.on_data(Direction::In, &data);
        self.verify_response(&command, &data, verify)
    }

    /// Broadcast `interest` on every multi-access face and return the content
    /// of the first verified reply
    pub async fn broadcast<F>(&self, interest: Interest, verify: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&Data) -> bool + Send,
    {
        let data = self.inner.agent.broadcast(interest.clone()).await?;
        self.inner.observer.on_data(Direction::In, &data);
        self.verify_response(&interest, &data, verify)
    }

    /// Send a plain interest and return whatever data answers it
    pub async fn fetch(&self, interest: Interest) -> Result<Data> {
        self.inner.observer.on_interest(Direction::Out, &interest);
        let data = self.inner.face.express_interest(interest).await?;
        self.inner.observer.on_data(Direction::In, &data);
        Ok(data)
    }

    fn verify_response<F>(&self, interest: &Interest, data: &Data, verify: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&Data) -> bool,
    {
        if !interest.matches_data(data) {
            warn!(interest = %interest.name(), data = %data.name(), "interest and data do not match");
            return Err(NodeError::Verification("interest and data do not match".into()));
        }
        if !verify(data) {
            warn!(data = %data.name(), "data can not be verified");
            return Err(NodeError::Verification("data can not be verified".into()));
        }
        Ok(data.content().to_vec())
    }

    /// Route `name` over `face_id` with cost 0 and no expiration
    pub async fn register_route_on_face(&self, name: &Name, face_id: FaceId) -> Result<()> {
        let route = RouteParameters::new(name.clone(), face_id, 0);
        self.inner.controller.register_route(&route).await
    }

    /// Run `f` with the key chain locked
    pub fn with_keychain<R>(&self, f: impl FnOnce(&mut KeyChain) -> R) -> R {
        f(&mut lock(&self.inner.keychain))
    }

    /// Default key, created on first use
    pub fn default_key(&self) -> Result<Key> {
        Ok(self.with_keychain(|kc| kc.default_key(&self.inner.name))?)
    }

    /// Default certificate of the default key
    pub fn default_certificate(&self) -> Result<Certificate> {
        Ok(self.with_keychain(|kc| kc.default_certificate(&self.inner.name))?)
    }

    /// Install a certificate for one of this node's keys as that key's default
    pub fn install_certificate(&self, certificate: Certificate) -> Result<()> {
        Ok(self.with_keychain(|kc| kc.set_default_certificate(certificate))?)
    }

    /// Trust `certificate` without serving it
    pub fn add_trust_anchor(&self, certificate: Certificate) {
        debug!(name = %certificate.name(), "trust anchor added");
        lock(&self.inner.anchors).insert(certificate.name().clone(), certificate);
    }

    /// Trust `certificate` and answer requests for `key_name` with it
    pub async fn publish_certificate(&self, key_name: &Name, certificate: Certificate) -> Result<()> {
        lock(&self.inner.anchors).insert(certificate.name().clone(), certificate);
        let fresh = lock(&self.inner.registry).insert_certificate(key_name);
        debug!(key = %key_name, "certificate is published");

        if fresh {
            if let Err(e) = self.inner.face.register_prefix(key_name).await {
                warn!(key = %key_name, error = %e, "fail to listen for certificate requests");
                lock(&self.inner.registry).remove_certificate(key_name);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Every trusted or published certificate
    pub fn trust_anchors(&self) -> Vec<Certificate> {
        lock(&self.inner.anchors).values().cloned().collect()
    }

    pub(crate) fn has_trust_anchors(&self) -> bool {
        !lock(&self.inner.anchors).is_empty()
    }

    /// Anchor named `locator`, or whose key is named `locator`
    pub(crate) fn find_anchor(&self, locator: &Name) -> Option<Certificate> {
        let anchors = lock(&self.inner.anchors);
        anchors
            .get(locator)
            .or_else(|| anchors.values().find(|c| locator.is_prefix_of(c.name())))
            .cloned()
    }

    /// Remember a face this node created
    pub fn record_created_face(&self, face_id: FaceId) {
        lock(&self.inner.created_faces).push(face_id);
    }

    /// Faces created by this node, oldest first
    pub fn created_faces(&self) -> Vec<FaceId> {
        lock(&self.inner.created_faces).clone()
    }

    /// Abort `task` when the node shuts down, or right away if it already has
    pub fn abort_on_shutdown(&self, task: AbortHandle) {
        match lock(&self.inner.tasks).as_mut() {
            Some(tasks) => {
                tasks.retain(|t| !t.is_finished());
                tasks.push(task);
            }
            None => task.abort(),
        }
    }

    /// Returns true once [`Entity::shutdown`] has started
    pub fn is_shut_down(&self) -> bool {
        lock(&self.inner.tasks).is_none()
    }

    /// Abort background tasks, then destroy every created face, best effort
    pub async fn shutdown(&self) {
        let tasks = lock(&self.inner.tasks).take().unwrap_or_default();
        for task in tasks {
            task.abort();
        }
        for face_id in self.created_faces() {
            if let Err(e) = self.inner.controller.destroy_face(face_id).await {
                debug!(face = face_id, error = %e, "cannot destroy face");
            }
        }
    }

    /// Serve incoming interests until the channel closes or, if enabled, a
    /// termination signal arrives
    pub async fn run(self, mut incoming: UnboundedReceiver<Interest>) {
        info!(name = %self.inner.name, "node is running");
        let terminate = termination(self.inner.handle_signals);
        tokio::pin!(terminate);

        loop {
            tokio::select! {
                next = incoming.recv() => {
                    let Some(interest) = next else { break };
                    let this = self.clone();
                    tokio::spawn(async move { this.dispatch(interest).await });
                }
                signal = &mut terminate => {
                    info!(name = %self.inner.name, signal, "node is going to be terminated");
                    self.shutdown().await;
                    break;
                }
            }
        }
    }

    /// Handle one incoming interest
    pub async fn dispatch(&self, interest: Interest) {
        self.inner.observer.on_interest(Direction::In, &interest);
        let route = lock(&self.inner.registry).lookup(interest.name());
        match route {
            Some(Route::Command(entry)) => self.handle_command(interest, entry).await,
            Some(Route::Certificate(_)) => self.serve_certificate(&interest).await,
            None => debug!(name = %interest.name(), "no filter for interest"),
        }
    }

    async fn handle_command(&self, interest: Interest, entry: CommandEntry) {
        let Some(resolved) = self.authorize(&interest, &entry.options).await else {
            debug!(name = %interest.name(), "request dropped: not authorized");
            return;
        };
        let params = match ControlParameters::from_command_interest(&interest) {
            Ok(params) => params,
            Err(e) => {
                warn!(name = %interest.name(), error = %e, "can not parse the parameters");
                return;
            }
        };
        debug!(name = %interest.name(), %params, %resolved, "request authorized");

        let responder = Responder {
            entity: self.clone(),
            request: interest.name().clone(),
            signing: entry.options.signing(),
        };
        entry
            .handler
            .handle(params, entry.options.resolve(resolved), responder)
            .await;
    }

    async fn serve_certificate(&self, interest: &Interest) {
        info!(name = %interest.name(), "fetch and supply certificate");
        let certificate = lock(&self.inner.anchors)
            .values()
            .find(|c| interest.matches_data(c.data()))
            .cloned();
        match certificate {
            Some(certificate) => {
                if let Err(e) = self.put(certificate.into_data()).await {
                    warn!(name = %interest.name(), error = %e, "cannot send certificate");
                }
            }
            None => debug!(name = %interest.name(), "no certificate matches"),
        }
    }

    async fn put(&self, data: Data) -> Result<()> {
        self.inner.observer.on_data(Direction::Out, &data);
        self.inner.face.put_data(data).await
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

async fn termination(enabled: bool) -> &'static str {
    if !enabled {
        return std::future::pending().await;
    }

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return "SIGINT",
                _ = term.recv() => return "SIGTERM",
            }
        }
    }

    if tokio::signal::ctrl_c().await.is_err() {
        warn!("cannot listen for termination signals");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}

/// Answers one authorized request
pub struct Responder {
    entity: Entity,
    request: Name,
    signing: Signing,
}

impl Responder {
    /// Name of the request being answered
    #[must_use]
    pub const fn request_name(&self) -> &Name {
        &self.request
    }

    /// Send `content` in a fresh version of the request name, signed per the
    /// command's options and marked non-cacheable
    pub async fn reply(self, content: Vec<u8>) -> Result<()> {
        let mut data = Data::new(self.request.append_version()).with_content(content);
        match &self.signing {
            Signing::SharedSecret(pin) => hmac::sign_data(&mut data, pin)?,
            Signing::Identity => {
                let name = self.entity.name().clone();
                self.entity.with_keychain(|kc| kc.sign_data(&name, &mut data))?;
            }
        }
        data.set_cache_policy(CachePolicy::NoCache);
        self.entity.put(data).await
    }

    /// Reply with an encoded status
    pub async fn reply_status(self, response: &ControlResponse) -> Result<()> {
        let content = response.wire_encode()?;
        self.reply(content).await
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}
