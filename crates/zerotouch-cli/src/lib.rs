//! # zerotouch-cli
//!
//! Command-line front end for zero-touch bootstrapping.
//!
//! - **demo**: runs a server, a device and an operator on an in-memory link
//!   and reports whether the device ended up with a server-issued certificate
//! - **config**: shows the effective configuration and where it lives

pub mod cli;
pub mod config;

pub use cli::run;
