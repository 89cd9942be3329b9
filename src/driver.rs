//! Outer connection lifecycle.
//!
//! The driver owns the configuration and the reconnect loop. Each attempt
//! wires a fresh [`StratumClient`] + [`JobDistributor`] pair; when the
//! session ends for any reason the pair is torn down completely and, after
//! a fixed delay, a new one is built. Shutdown is an explicit cancellation
//! token cancelled by SIGINT/SIGTERM and propagated structurally into the
//! session and the worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::MinerConfig;
use crate::distributor::JobDistributor;
use crate::pow::{PairDigest, PowHash, Sha256Pair, Sha256Pow};
use crate::stratum::{connection, StratumClient};
use crate::tracing::prelude::*;

/// Fixed delay between reconnection attempts. Retries are unlimited.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// The top-level miner lifecycle.
pub struct Driver {
    config: MinerConfig,
    shutdown: CancellationToken,
    pow: Arc<dyn PowHash>,
    digest: Arc<dyn PairDigest>,
}

impl Driver {
    /// Create a driver with the default hash capabilities.
    pub fn new(config: MinerConfig) -> Self {
        Self::with_capabilities(config, Arc::new(Sha256Pow), Arc::new(Sha256Pair))
    }

    /// Create a driver with explicit hash capabilities.
    pub fn with_capabilities(
        config: MinerConfig,
        pow: Arc<dyn PowHash>,
        digest: Arc<dyn PairDigest>,
    ) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            pow,
            digest,
        }
    }

    /// Run until SIGINT or SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
            shutdown.cancel();
        });

        info!(
            threads = self.config.threads,
            pool = %format_args!("{}:{}", self.config.host, self.config.port),
            username = %self.config.username,
            "Started"
        );

        while !self.shutdown.is_cancelled() {
            if let Err(e) = self.run_session().await {
                warn!(error = %e, "Session ended with error");
            }

            if self.shutdown.is_cancelled() {
                break;
            }

            debug!(delay = ?RECONNECT_DELAY, "Reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }

        info!("Exiting");
        Ok(())
    }

    /// One connection attempt with a fresh client + distributor pair.
    ///
    /// Returns once the session is over and the pair is fully torn down;
    /// nothing carries over into the next attempt.
    async fn run_session(&self) -> anyhow::Result<()> {
        let (reader, writer) = connection::connect(&self.config.host, self.config.port).await?;

        let session_token = self.shutdown.child_token();
        let (event_tx, mut event_rx) = mpsc::channel(64);
        let (client, handle) = StratumClient::new(
            self.config.username.clone(),
            event_tx,
            session_token.clone(),
        );

        let session = match client.start(reader, writer).await {
            Ok(session) => session,
            Err(e) => {
                session_token.cancel();
                return Err(e.into());
            }
        };

        let mut distributor =
            JobDistributor::new(self.config.threads, handle, self.pow.clone(), self.digest.clone());
        distributor.run(&mut event_rx, session_token.clone()).await;

        // Tear down in order: worker pool first, then the session tasks.
        distributor.shutdown();
        session_token.cancel();
        session.join().await;

        Ok(())
    }
}
