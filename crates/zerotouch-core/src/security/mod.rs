//! Signing, verification and authorization policy.

pub mod hmac;
pub mod keychain;
pub mod options;
