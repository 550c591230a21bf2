//! Multicast discovery.
//!
//! [`BroadcastAgent`] routes a prefix over every multi-access face with the
//! multicast strategy, so that interests under it reach every host on the
//! link, and sends such interests.

use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{info, warn};
use zerotouch_core::{Data, Interest, Name};

use crate::error::{NodeError, Result};
use crate::observer::{Direction, PacketObserver};
use crate::transport::{
    Controller, ExpressError, Face, FaceQueryFilter, RouteParameters, MULTICAST_STRATEGY,
};

/// Cost of routes toward multi-access faces
const MULTICAST_ROUTE_COST: u64 = 1;

/// Outcome of routing a prefix over the multi-access faces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationTally {
    /// Routes that were added
    pub succeeded: usize,
    /// Routes that were refused
    pub failed: usize,
}

/// Routes and sends discovery interests over multi-access faces
#[derive(Clone)]
pub struct BroadcastAgent {
    face: Arc<dyn Face>,
    controller: Arc<dyn Controller>,
    observer: Arc<dyn PacketObserver>,
}

impl BroadcastAgent {
    /// Create an agent over a face and its forwarder
    #[must_use]
    pub fn new(
        face: Arc<dyn Face>,
        controller: Arc<dyn Controller>,
        observer: Arc<dyn PacketObserver>,
    ) -> Self {
        Self {
            face,
            controller,
            observer,
        }
    }

    /// Route `prefix` over every multi-access face, then switch it to the
    /// multicast strategy if at least one route was added.
    ///
    /// Registrations run concurrently and are tallied as they complete. A
    /// refused registration is not retried.
    pub async fn register_top_prefix(&self, prefix: &Name) -> Result<RegistrationTally> {
        let filter = FaceQueryFilter::new().multi_access();
        let faces = self.controller.query_faces(&filter).await.map_err(|e| {
            warn!(error = %e, "error when fetching multicast faces");
            e
        })?;
        if faces.is_empty() {
            warn!(prefix = %prefix, "no multi-access face available");
            return Err(NodeError::NoMulticastFaces);
        }

        let mut pending: FuturesUnordered<_> = faces
            .into_iter()
            .map(|face| {
                let controller = Arc::clone(&self.controller);
                let route = RouteParameters::new(prefix.clone(), face.face_id, MULTICAST_ROUTE_COST);
                async move { (face, controller.register_route(&route).await) }
            })
            .collect();

        let mut tally = RegistrationTally {
            succeeded: 0,
            failed: 0,
        };
        while let Some((face, outcome)) = pending.next().await {
            match outcome {
                Ok(()) => tally.succeeded += 1,
                Err(e) => {
                    warn!(
                        remote = %face.remote_uri,
                        code = ?e.status_code(),
                        error = %e,
                        "error in registering route"
                    );
                    tally.failed += 1;
                }
            }
        }

        if tally.succeeded == 0 {
            warn!(prefix = %prefix, "cannot register prefix on any multicast face");
            return Err(NodeError::Management {
                code: 0,
                text: format!("cannot register {prefix} on any multicast face"),
            });
        }

        let strategy: Name = MULTICAST_STRATEGY.parse()?;
        if let Err(e) = self.controller.set_strategy(prefix, &strategy).await {
            warn!(prefix = %prefix, error = %e, "error when setting multicast strategy");
            return Err(e);
        }
        info!(prefix = %prefix, ?tally, "multicast faces are ready");
        Ok(tally)
    }

    /// Send `interest` and wait for the first reply, nack or timeout
    pub async fn broadcast(&self, interest: Interest) -> std::result::Result<Data, ExpressError> {
        self.observer.on_interest(Direction::Out, &interest);
        let name = interest.name().clone();
        let outcome = self.face.express_interest(interest).await;
        if let Err(e) = &outcome {
            warn!(name = %name, error = %e, "broadcast failed");
        }
        outcome
    }
}
