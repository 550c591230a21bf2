//! Running nodes for zero-touch bootstrapping.
//!
//! - [`Entity`]: a node's identity, command registry and authorization gate
//! - [`BroadcastAgent`]: multicast routing and probe broadcast
//! - [`AuthenticationServer`] and [`DeviceController`]: the two protocol roles
//! - [`CommandTool`]: the operator's one-shot command sender
//! - [`sim`]: an in-memory network implementing [`Face`] and [`Controller`]
//!
//! # Example
//!
//! ```rust,ignore
//! use zerotouch_node::sim::SimNetwork;
//! use zerotouch_node::{AuthenticationServer, CommandTool, DeviceController, Entity};
//!
//! let net = SimNetwork::new();
//! let as_node = net.add_node("as");
//! let (face, incoming) = as_node.attach_app();
//! let entity = Entity::builder("/home/as".parse()?, face, as_node.controller()).build();
//! tokio::spawn(entity.clone().run(incoming));
//! let server = AuthenticationServer::start(entity).await?;
//! ```

pub mod broadcast;
pub mod config;
pub mod device;
pub mod entity;
mod error;
pub mod observer;
pub mod server;
pub mod sim;
pub mod tool;
pub mod transport;

pub use broadcast::{BroadcastAgent, RegistrationTally};
pub use config::NodeConfig;
pub use device::{DeviceController, DeviceState};
pub use entity::{CommandHandler, Entity, EntityBuilder, Responder};
pub use error::{NodeError, Result, STATUS_NACK, STATUS_TIMEOUT};
pub use observer::{Direction, FileTrace, PacketEvent, PacketObserver, RecordingObserver, TracingObserver};
pub use server::{Attempt, AuthenticationServer, BootstrapState};
pub use tool::CommandTool;
pub use transport::{
    Controller, ExpressError, Face, FaceEventKind, FaceEventNotification, FaceId, FacePersistency,
    FaceQueryFilter, FaceScope, FaceStatus, LinkType, RouteParameters,
};
