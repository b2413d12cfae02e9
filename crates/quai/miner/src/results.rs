//! Result fan-out
//!
//! Takes sealed headers off the result channel, works out their order and
//! hands them upstream.
//!
//! In direct mode a header is submitted to every level of the slice from the
//! Zone up to its order. A failure at one level is logged and the remaining
//! levels are still tried:
//!
//! | order  | submitted to           |
//! |--------|------------------------|
//! | Zone   | Zone                   |
//! | Region | Zone, Region           |
//! | Prime  | Zone, Region, Prime    |
//!
//! In proxy mode the header goes to the proxy once, retried in the background.

use crate::{
    MinerError,
    feed::Upstream,
    metrics,
    retry::{RetryPolicy, retry},
    session::MinerSession,
    slice::SliceClients,
};
use alloy_primitives::B256;
use quai_consensus::SealEngine;
use quai_primitives::{Context, Header};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Routes sealed headers to the proxy or the slice nodes.
#[derive(Debug)]
pub struct ResultFanout<E> {
    engine: Arc<E>,
    results: mpsc::Receiver<Header>,
    upstream: Upstream,
    policy: RetryPolicy,
}

impl<E: SealEngine> ResultFanout<E> {
    /// Create a fan-out reading `results`.
    pub fn new(
        engine: Arc<E>,
        results: mpsc::Receiver<Header>,
        upstream: Upstream,
        policy: RetryPolicy,
    ) -> Self {
        Self { engine, results, upstream, policy }
    }

    /// Handle results until `shutdown` fires or the result channel closes.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), MinerError> {
        // Proxy submissions retry in the background; aborted when this returns.
        let mut submissions = JoinSet::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                Some(joined) = submissions.join_next(), if !submissions.is_empty() => {
                    if let Err(err) = joined {
                        warn!(target: "quai::results", %err, "Submission task failed");
                    }
                    continue
                }
                next = self.results.recv() => next,
            };
            let Some(header) = next else {
                return Err(MinerError::ChannelClosed("result"));
            };

            let (hash, order) = match self.engine.calc_order(&header) {
                Ok(found) => found,
                Err(err) => {
                    metrics::record_invalid_result();
                    warn!(target: "quai::results", %err, nonce = header.nonce_u64(), "Dropping invalid sealed header");
                    continue;
                }
            };

            match &self.upstream {
                Upstream::Proxy(session) => {
                    let task = submit_to_proxy(
                        Arc::clone(session),
                        header.clone(),
                        order,
                        self.policy,
                        shutdown.clone(),
                    );
                    submissions.spawn(task);
                }
                Upstream::Nodes(slice) => submit_to_slice(slice, &header, order).await,
            }

            log_block(&header, hash, order);
        }
    }
}

/// Submit to every level from the Zone up to `order`.
async fn submit_to_slice(slice: &SliceClients, header: &Header, order: Context) {
    for ctx in order.fan_out() {
        match slice.get(ctx).submit_mined_header(header).await {
            Ok(()) => debug!(target: "quai::results", %ctx, "Submitted mined header"),
            Err(err) => {
                metrics::record_submission_failure(ctx);
                warn!(target: "quai::results", %ctx, %err, "Failed to submit mined header");
            }
        }
    }
}

async fn submit_to_proxy(
    session: Arc<MinerSession>,
    header: Header,
    order: Context,
    policy: RetryPolicy,
    shutdown: CancellationToken,
) {
    let submitted = retry(policy, &shutdown, "Mined header submission", || {
        session.submit_mined_header(&header)
    })
    .await;

    match submitted {
        Ok(Some(())) => debug!(target: "quai::results", "Submitted mined header to proxy"),
        Ok(None) => {}
        Err(err) => {
            metrics::record_submission_failure(order);
            warn!(target: "quai::results", %err, "Giving up on mined header submission");
        }
    }
}

fn log_block(header: &Header, hash: B256, order: Context) {
    metrics::record_block_found(order);
    let label = match order {
        Context::Prime => "PRIME",
        Context::Region => "REGION",
        Context::Zone => "ZONE",
    };
    info!(
        target: "quai::results",
        number = ?header.numbers(),
        location = %header.location,
        %hash,
        "{label} block"
    );
}
