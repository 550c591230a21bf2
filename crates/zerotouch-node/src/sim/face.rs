use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::debug;
use zerotouch_core::{Data, Interest, Name};

use super::{lock, AppId, NodeId, SimNetwork};
use crate::error::Result;
use crate::transport::{ExpressError, Face};

/// An application's face on a simulated host
#[derive(Debug)]
pub struct SimFace {
    network: SimNetwork,
    node: NodeId,
    app: AppId,
}

impl SimFace {
    pub(super) const fn new(network: SimNetwork, node: NodeId, app: AppId) -> Self {
        Self { network, node, app }
    }
}

#[async_trait]
impl Face for SimFace {
    async fn express_interest(&self, interest: Interest) -> std::result::Result<Data, ExpressError> {
        let deadline = Instant::now() + interest.lifetime();
        let (tx, mut rx) = mpsc::unbounded_channel();
        lock(&self.network.state).forward(self.node, self.app, &interest, &tx)?;
        drop(tx);

        match timeout_at(deadline, rx.recv()).await {
            Ok(Some(data)) => Ok(data),
            Ok(None) => {
                // Nobody holds the interest; it still lives until its lifetime ends.
                sleep_until(deadline).await;
                Err(ExpressError::Timeout)
            }
            Err(_) => Err(ExpressError::Timeout),
        }
    }

    async fn put_data(&self, data: Data) -> Result<()> {
        let satisfied = lock(&self.network.state).satisfy(self.node, self.app, &data);
        if satisfied == 0 {
            debug!(name = %data.name(), "unsolicited data dropped");
        }
        Ok(())
    }

    async fn register_prefix(&self, prefix: &Name) -> Result<()> {
        let mut state = lock(&self.network.state);
        if let Some(app) = state.app_mut(self.node, self.app) {
            if !app.prefixes.contains(prefix) {
                app.prefixes.push(prefix.clone());
            }
        }
        Ok(())
    }
}
