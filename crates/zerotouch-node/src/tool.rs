//! Operator command line helper.
//!
//! Sends one signed command to a node on the same host and turns whatever
//! comes back into a [`ControlResponse`]. Failures never escape as errors:
//! a nack, a timeout or an undecodable reply each become a status with code 0.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info};
use zerotouch_core::packet::DEFAULT_INTEREST_LIFETIME;
use zerotouch_core::{ControlParameters, ControlResponse, Interest, KeyChain, Name, Pin};

use crate::error::Result;
use crate::observer::{Direction, PacketObserver, TracingObserver};
use crate::server::{ADD_DEVICE, ADD_DEVICE_PREFIX};
use crate::transport::{ExpressError, Face};

/// Issues single commands on behalf of an operator
pub struct CommandTool {
    face: Arc<dyn Face>,
    identity: Name,
    keychain: Mutex<KeyChain>,
    lifetime: Duration,
    observer: Arc<dyn PacketObserver>,
}

impl CommandTool {
    /// Tool signing as `identity`, created on the spot
    #[must_use]
    pub fn new(face: Arc<dyn Face>, identity: Name) -> Self {
        let mut keychain = KeyChain::new();
        keychain.create_identity(&identity);
        Self {
            face,
            identity,
            keychain: Mutex::new(keychain),
            lifetime: DEFAULT_INTEREST_LIFETIME,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Set the command lifetime
    #[must_use]
    pub const fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the packet observer
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn PacketObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Build `prefix/<params>/<timestamp>/<nonce>` signed by the tool's
    /// identity
    pub fn make_command(&self, prefix: Name, params: &ControlParameters) -> Result<Interest> {
        let command = Interest::command(prefix, params)?;
        let command = self
            .keychain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sign_interest(&self.identity, command)?;
        Ok(command.with_lifetime(self.lifetime).with_must_be_fresh(true))
    }

    /// Send one command and report its outcome
    pub async fn issue_command(&self, prefix: Name, params: &ControlParameters) -> ControlResponse {
        let command = match self.make_command(prefix, params) {
            Ok(command) => command,
            Err(e) => return ControlResponse::new(ControlResponse::INVALID_PARAMETERS, e.to_string()),
        };
        debug!(name = %command.name(), %params, "issuing command");

        self.observer.on_interest(Direction::Out, &command);
        let response = match self.face.express_interest(command).await {
            Ok(data) => {
                self.observer.on_data(Direction::In, &data);
                ControlResponse::wire_decode(data.content()).unwrap_or_else(|_| {
                    ControlResponse::new(ControlResponse::INVALID_PARAMETERS, "Parse Data error")
                })
            }
            Err(ExpressError::Nack(_)) => ControlResponse::new(ControlResponse::INVALID_PARAMETERS, "Nack"),
            Err(ExpressError::Timeout) => ControlResponse::new(ControlResponse::INVALID_PARAMETERS, "Timeout"),
        };
        info!(%response, "command finished");
        response
    }

    /// Ask the local authentication server to bootstrap the device holding
    /// `pin`
    pub async fn add_device(&self, pin: &Pin) -> ControlResponse {
        let params = ControlParameters::new().set_pin_code(pin.expose());
        match format!("{ADD_DEVICE_PREFIX}/{ADD_DEVICE}").parse() {
            Ok(prefix) => self.issue_command(prefix, &params).await,
            Err(e) => ControlResponse::new(ControlResponse::INVALID_PARAMETERS, format!("{e}")),
        }
    }
}

impl std::fmt::Debug for CommandTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTool")
            .field("identity", &self.identity)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use zerotouch_core::{hmac, Data};

    struct Scripted(std::result::Result<Vec<u8>, ExpressError>);

    #[async_trait]
    impl Face for Scripted {
        async fn express_interest(&self, interest: Interest) -> std::result::Result<Data, ExpressError> {
            self.0
                .clone()
                .map(|content| Data::new(interest.name().clone().append_version()).with_content(content))
        }

        async fn put_data(&self, _: Data) -> Result<()> {
            Ok(())
        }

        async fn register_prefix(&self, _: &Name) -> Result<()> {
            Ok(())
        }
    }

    fn tool(reply: std::result::Result<Vec<u8>, ExpressError>) -> CommandTool {
        CommandTool::new(Arc::new(Scripted(reply)), "/operator".parse().unwrap())
    }

    #[tokio::test]
    async fn test_failures_become_code_zero() {
        let pin = Pin::from("1234");

        let nack = tool(Err(ExpressError::Nack("NoRoute".into()))).add_device(&pin).await;
        assert_eq!((nack.code(), nack.text()), (0, "Nack"));

        let timeout = tool(Err(ExpressError::Timeout)).add_device(&pin).await;
        assert_eq!((timeout.code(), timeout.text()), (0, "Timeout"));

        let garbage = tool(Ok(vec![0xff, 0x00])).add_device(&pin).await;
        assert_eq!((garbage.code(), garbage.text()), (0, "Parse Data error"));
    }

    #[tokio::test]
    async fn test_reply_is_decoded() {
        let content = ControlResponse::ok().wire_encode().unwrap();
        let response = tool(Ok(content)).add_device(&Pin::from("1234")).await;
        assert!(response.is_success());
    }

    #[test]
    fn test_commands_are_signed_by_identity_not_pin() {
        let tool = tool(Err(ExpressError::Timeout));
        let params = ControlParameters::new().set_pin_code("1234");
        let command = tool.make_command("/localhost/add-device".parse().unwrap(), &params).unwrap();
        assert!(!hmac::verify_interest(&command, &Pin::from("1234")));
        assert_eq!(
            ControlParameters::from_command_interest(&command).unwrap().pin_code(),
            Some("1234")
        );
    }
}
