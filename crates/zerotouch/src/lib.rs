//! Zero-touch bootstrapping of devices on named-data networks.
//!
//! An operator hands the same PIN to an authentication server and to a new
//! device. The server finds the device over multicast, both sides prove
//! knowledge of the PIN, the server connects to the device and issues it a
//! certificate signed by the server's trust anchor.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use zerotouch::sim::SimNetwork;
//! use zerotouch::{AuthenticationServer, CommandTool, DeviceController, Entity, Pin};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> zerotouch::NodeResult<()> {
//!     let net = SimNetwork::new();
//!     let (as_node, dev_node) = (net.add_node("as"), net.add_node("device"));
//!
//!     let (face, incoming) = as_node.attach_app();
//!     let entity = Entity::builder("/home/as".parse()?, face, as_node.controller()).build();
//!     tokio::spawn(entity.clone().run(incoming));
//!     let _server = AuthenticationServer::start(entity).await?;
//!
//!     let (face, incoming) = dev_node.attach_app();
//!     let entity = Entity::builder("/home/dev".parse()?, face, dev_node.controller()).build();
//!     tokio::spawn(entity.clone().run(incoming));
//!     let _device = DeviceController::start(entity, Pin::from("1234"), false).await?;
//!
//!     let (face, _) = as_node.attach_app();
//!     let tool = CommandTool::new(face, "/home/operator".parse()?);
//!     println!("{}", tool.add_device(&Pin::from("1234")).await);
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/zerotouch/0.3.0")]

// Re-export core types
pub use zerotouch_core::*;

// Re-export the running side
pub use zerotouch_node::{
    broadcast, config, device, entity, observer, server, sim, tool, transport,
};
pub use zerotouch_node::{
    AuthenticationServer, BootstrapState, BroadcastAgent, CommandHandler, CommandTool,
    DeviceController, DeviceState, Entity, EntityBuilder, NodeConfig, NodeError, PacketObserver,
    Responder, Result as NodeResult,
};

// Re-export runtime for convenience
pub use serde;
pub use tokio;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimNetwork;

    #[test]
    fn test_quick_start() {
        tokio_test::block_on(async {
            let net = SimNetwork::new();
            let (as_node, dev_node) = (net.add_node("as"), net.add_node("device"));

            let (face, incoming) = as_node.attach_app();
            let entity = Entity::builder("/home/as".parse().unwrap(), face, as_node.controller()).build();
            tokio::spawn(entity.clone().run(incoming));
            let server = AuthenticationServer::start(entity).await.unwrap();

            let (face, incoming) = dev_node.attach_app();
            let entity = Entity::builder("/home/dev".parse().unwrap(), face, dev_node.controller()).build();
            tokio::spawn(entity.clone().run(incoming));
            let device = DeviceController::start(entity, Pin::from("1234"), false).await.unwrap();

            let (face, _) = as_node.attach_app();
            let tool = CommandTool::new(face, "/home/operator".parse().unwrap());
            assert!(tool.add_device(&Pin::from("1234")).await.is_success());

            let mut states = device.subscribe();
            states.wait_for(|s| s.is_terminal()).await.unwrap();
            assert_eq!(device.state(), DeviceState::Done);
            let anchor = server.entity().default_certificate().unwrap();
            let issued = device.entity().default_certificate().unwrap();
            assert_eq!(issued.issuer(), Some(anchor.name()));
        });
    }
}
