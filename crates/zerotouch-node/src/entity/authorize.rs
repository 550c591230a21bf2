//! Request authorization.
//!
//! Accepted policies are tried in order. A shared-secret policy checks the
//! request's HMAC. An identity policy walks the signer chain: the request's
//! key locator is looked up among trust anchors; if it is not one, the named
//! certificate is fetched, the signature is checked against it, and the walk
//! continues with that certificate's own key locator. Every hop is verified
//! and the walk stops after `max_chain_depth` fetches.

use tracing::{debug, warn};
use zerotouch_core::security::keychain;
use zerotouch_core::{
    hmac, Certificate, Data, Interest, Name, Policy, SecurityOptions, VerificationType,
};

use super::Entity;

/// Something signed that may need to be traced back to an anchor
enum Signed<'a> {
    Request(&'a Interest),
    Certificate(Data),
}

impl Signed<'_> {
    fn key_locator(&self) -> Option<Name> {
        match self {
            Self::Request(interest) => interest.signature_info().ok()?.key_locator,
            Self::Certificate(data) => data.key_locator().cloned(),
        }
    }

    fn verify(&self, public_key: &[u8]) -> bool {
        match self {
            Self::Request(interest) => keychain::verify_interest(interest, public_key),
            Self::Certificate(data) => keychain::verify_data(data, public_key),
        }
    }
}

impl Entity {
    /// Decide whether `interest` may reach a handler registered with
    /// `options`. `None` means the request is dropped.
    pub(crate) async fn authorize(
        &self,
        interest: &Interest,
        options: &SecurityOptions,
    ) -> Option<VerificationType> {
        if options.is_open() {
            return Some(VerificationType::Open);
        }

        for policy in options.accepted() {
            match policy {
                Policy::SharedSecret(pin) => {
                    if hmac::verify_interest(interest, pin) {
                        return Some(VerificationType::SharedSecret);
                    }
                }
                Policy::Identity => {
                    if self.verify_by_key(interest).await {
                        return Some(VerificationType::Identity);
                    }
                }
            }
        }
        None
    }

    async fn verify_by_key(&self, interest: &Interest) -> bool {
        let max_depth = self.inner.config.max_chain_depth;
        let mut current = Signed::Request(interest);
        let mut fetched = 0;

        loop {
            let Some(locator) = current.key_locator() else {
                warn!(name = %interest.name(), "cannot get key locator name");
                return false;
            };
            if !self.has_trust_anchors() {
                debug!("no trust anchor to verify this request");
                return false;
            }
            if let Some(anchor) = self.find_anchor(&locator) {
                let ok = current.verify(anchor.public_key());
                if !ok {
                    warn!(anchor = %anchor.name(), "signature does not verify against anchor");
                }
                return ok;
            }

            if fetched == max_depth {
                warn!(name = %interest.name(), depth = max_depth, "signer chain too long");
                return false;
            }
            fetched += 1;

            let Some(certificate) = self.fetch_signer(&locator).await else {
                return false;
            };
            if !current.verify(certificate.public_key()) {
                warn!(signer = %certificate.name(), "signature does not verify against fetched certificate");
                return false;
            }
            current = Signed::Certificate(certificate.into_data());
        }
    }

    async fn fetch_signer(&self, locator: &Name) -> Option<Certificate> {
        let interest = Interest::new(locator.clone()).with_lifetime(self.inner.config.cert_fetch_lifetime());
        let data = match self.fetch(interest).await {
            Ok(data) => data,
            Err(e) => {
                warn!(signer = %locator, error = %e, "cannot fetch signer certificate");
                return None;
            }
        };

        match Certificate::from_data(data) {
            Ok(certificate) => Some(certificate),
            Err(e) => {
                warn!(signer = %locator, error = %e, "fetched data is not a certificate");
                None
            }
        }
    }
}
