//! Core types for zero-touch bootstrapping of devices on a named-data network.
//!
//! This crate provides the building blocks shared by both protocol roles:
//!
//! - **Names**: hierarchical [`Name`]s with version components
//! - **Packets**: [`Interest`] requests and [`Data`] responses, including the
//!   signed command-interest layout
//! - **Parameters**: the [`ControlParameters`] bag carried by commands and the
//!   [`ControlResponse`] status reply
//! - **Security**: the shared-secret HMAC helper, an in-memory [`KeyChain`],
//!   [`Certificate`]s and the per-command [`SecurityOptions`] policy
//!
//! # Example
//!
//! ```rust,ignore
//! use zerotouch_core::{hmac, ControlParameters, Interest, Name, Pin};
//!
//! let pin = Pin::from("abc123");
//! let params = ControlParameters::new().set_name("/home/as".parse()?);
//! let probe = Interest::command("/localhop/probe-device".parse()?, &params)?;
//! let probe = hmac::sign_interest(probe, &pin)?;
//! assert!(hmac::verify_interest(&probe, &pin));
//! ```

#![doc(html_root_url = "https://docs.rs/zerotouch-core/0.3.0")]

pub mod cert;
pub mod content;
pub mod encoding;
mod error;
pub mod face_uri;
pub mod name;
pub mod packet;
pub mod params;
pub mod security;

pub use cert::{Certificate, ValidityPeriod};
pub use content::ProbeResponse;
pub use error::{Error, Result};
pub use face_uri::FaceUri;
pub use name::{Component, Name};
pub use packet::{CachePolicy, Data, Interest, Signature, SignatureInfo, SignatureType};
pub use params::{ControlParameters, ControlResponse};
pub use security::hmac;
pub use security::keychain::{Identity, Key, KeyChain};
pub use security::options::{Authorization, Pin, Policy, SecurityOptions, Signing, VerificationType};
