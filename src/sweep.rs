//! Periodic blacklist sweep scheduling.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::admission::AdmissionEngine;
use crate::clock::Clock;
use crate::store::KeyStore;

/// Drives the bulk blacklist reconciliation on a fixed interval.
///
/// The first sweep runs immediately at startup, then once per interval.
pub struct Sweeper<S, C> {
    engine: Arc<AdmissionEngine<S>>,
    clock: Arc<C>,
    interval: Duration,
}

impl<S, C> Sweeper<S, C>
where
    S: KeyStore + 'static,
    C: Clock + 'static,
{
    /// Create a sweeper over the given engine and time source.
    pub fn new(engine: Arc<AdmissionEngine<S>>, clock: Arc<C>, interval: Duration) -> Self {
        Self {
            engine,
            clock,
            interval,
        }
    }

    /// Run the sweep loop until the task is aborted.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "blacklist sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            let now = self.clock.now();
            match self.engine.sweep_expired_blacklists(now).await {
                Ok(cleared) => info!(cleared, %now, "blacklist sweep finished"),
                Err(e) => error!(error = %e, "blacklist sweep failed"),
            }
        }
    }

    /// Spawn the sweep loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
