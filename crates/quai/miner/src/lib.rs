//! Quai hierarchical miner
//!
//! Fetches pending headers from a mining proxy or from the nodes of one
//! slice, seals them with a [`SealEngine`] and submits the results to every
//! level their proof of work qualifies for.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              QUAI MINER                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │   Proxy (TCP, JSON lines)            Prime / Region / Zone (WS)      │
//! │   MinerSession + SessionListener     SliceClients                    │
//! │              │                              │                        │
//! │              └──────────┬───────────────────┘                        │
//! │                         ▼                                            │
//! │   ┌──────────────────────────────────────────────────────────┐       │
//! │   │ PendingHeaderFeed    initial fetch with retry, then push │       │
//! │   └──────────────────────────────────────────────────────────┘       │
//! │                         │ update channel (bounded)                   │
//! │                         ▼                                            │
//! │   ┌──────────────────────────────────────────────────────────┐       │
//! │   │ SealingCoordinator   cancel previous attempt, seal new   │       │
//! │   └──────────────────────────────────────────────────────────┘       │
//! │                         │ result channel (bounded)                   │
//! │                         ▼                                            │
//! │   ┌──────────────────────────────────────────────────────────┐       │
//! │   │ ResultFanout         order → proxy, or Zone..=order      │       │
//! │   └──────────────────────────────────────────────────────────┘       │
//! │                                                                      │
//! │   HashrateMonitor      engine.hashrate() every interval              │
//! │                                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every task takes the same shutdown token. [`Miner::run`] cancels it as
//! soon as any task fails, then waits for the rest.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod config;
pub mod coordinator;
mod error;
pub mod feed;
pub mod hashrate;
mod metrics;
pub mod results;
pub mod retry;
pub mod session;
pub mod slice;

#[cfg(test)]
mod test_utils;

pub use config::{ConfigError, MinerConfig, PolicyConfig};
pub use coordinator::SealingCoordinator;
pub use error::MinerError;
pub use feed::{PendingHeaderFeed, Upstream};
pub use hashrate::{HashrateMonitor, to_si_units};
pub use results::ResultFanout;
pub use retry::{RetryPolicy, Transient};
pub use session::{MinerSession, SessionError, SessionListener};
pub use slice::{HeaderStream, NodeClient, SliceClients, WsNodeClient};

use quai_consensus::SealEngine;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// JSON-RPC method names.
pub mod methods {
    /// Proxy login
    pub const SUBMIT_LOGIN: &str = "quai_submitLogin";
    /// Current pending header
    pub const GET_PENDING_HEADER: &str = "quai_getPendingHeader";
    /// Sealed header submission
    pub const RECEIVE_MINED_HEADER: &str = "quai_receiveMinedHeader";
    /// Node subscription
    pub const SUBSCRIBE: &str = "quai_subscribe";
    /// Node unsubscription
    pub const UNSUBSCRIBE: &str = "quai_unsubscribe";
    /// Subscription kind for pending headers
    pub const PENDING_HEADER_SUBSCRIPTION: &str = "pendingHeader";
}

/// The whole mining pipeline for one location.
#[derive(Debug)]
pub struct Miner<E> {
    config: MinerConfig,
    engine: Arc<E>,
}

impl<E: SealEngine> Miner<E> {
    /// Create a miner. `config` should already be validated.
    pub const fn new(config: MinerConfig, engine: Arc<E>) -> Self {
        Self { config, engine }
    }

    /// Connect upstream and mine until `shutdown` fires or a task fails.
    ///
    /// Connecting retries forever; a shutdown during that phase returns
    /// `Ok(())`.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), MinerError> {
        let location = self.config.location().map_err(ConfigError::from)?;
        let policy = self.config.retry_policy();
        info!(target: "quai::miner", %location, proxy = self.config.proxy, "Starting miner");

        if !self.config.proxy {
            let Some(slice) = SliceClients::connect(&self.config, location, policy, &shutdown).await?
            else {
                return Ok(());
            };
            return self.run_with(Upstream::Nodes(slice), None, shutdown).await;
        }

        let url = self.config.proxy_url.as_str();
        let Some((session, listener)) =
            retry::retry(policy, &shutdown, "Proxy connection", || MinerSession::connect(url)).await?
        else {
            return Ok(());
        };

        let (address, password) = (self.config.reward_address, self.config.password.as_str());
        let session_ref = &session;
        let logged_in = retry::retry(policy, &shutdown, "Proxy login", move || {
            session_ref.login(address, password)
        })
        .await?;
        if logged_in.is_none() {
            return Ok(());
        }

        self.run_with(Upstream::Proxy(session), Some(listener), shutdown).await
    }

    /// Run the pipeline against an already connected upstream.
    ///
    /// `listener` must be the receive half of the proxy session in proxy
    /// mode and `None` in direct mode.
    pub async fn run_with(
        self,
        upstream: Upstream,
        listener: Option<SessionListener>,
        shutdown: CancellationToken,
    ) -> Result<(), MinerError> {
        let policy = self.config.retry_policy();
        let settings = &self.config.policy;
        let (updates_tx, updates_rx) = mpsc::channel(settings.update_queue_size);
        let (results_tx, results_rx) = mpsc::channel(settings.result_queue_size);

        let mut tasks = JoinSet::new();
        if let Some(listener) = listener {
            let updates = updates_tx.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { listener.run(updates, shutdown).await.map_err(MinerError::from) });
        }
        tasks.spawn(PendingHeaderFeed::new(upstream.clone(), updates_tx, policy).run(shutdown.clone()));
        tasks.spawn(
            SealingCoordinator::new(Arc::clone(&self.engine), updates_rx, results_tx)
                .run(shutdown.clone()),
        );
        tasks.spawn(
            ResultFanout::new(Arc::clone(&self.engine), results_rx, upstream, policy)
                .run(shutdown.clone()),
        );
        tasks.spawn(
            HashrateMonitor::new(Arc::clone(&self.engine), settings.hashrate_interval)
                .run(shutdown.clone()),
        );

        let mut outcome = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let Err(err) = joined.map_err(MinerError::from).and_then(|res| res) else { continue };
            if outcome.is_ok() {
                error!(target: "quai::miner", %err, "Miner task failed, shutting down");
                outcome = Err(err);
            }
            shutdown.cancel();
        }

        info!(target: "quai::miner", "Miner stopped");
        outcome
    }
}
