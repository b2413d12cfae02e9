//! Sealing engine interface
//!
//! The orchestrator treats the engine as opaque. It hands over a header, a
//! [`ResultSink`] and a [`CancellationToken`], and later asks for the hashrate
//! and the order of whatever came back.

use crate::EngineError;
use alloy_primitives::B256;
use parking_lot::Mutex;
use quai_primitives::{Context, Header};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// A proof-of-work engine.
pub trait SealEngine: Send + Sync + 'static {
    /// Start sealing `header` in the background and return immediately.
    ///
    /// A solution is reported through `results`. Work should stop soon after
    /// `stop` is cancelled. An error means the attempt never started.
    fn seal(
        &self,
        header: Header,
        results: ResultSink,
        stop: CancellationToken,
    ) -> Result<(), EngineError>;

    /// Current hash rate in hashes per second.
    fn hashrate(&self) -> f64;

    /// Proof-of-work hash and order of a sealed header.
    fn calc_order(&self, header: &Header) -> Result<(B256, Context), EngineError>;
}

/// Why a result was not enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The attempt was cancelled before the result arrived
    #[error("sealing attempt was cancelled")]
    Stale,
    /// The result queue is full
    #[error("result queue is full")]
    Full,
    /// The result consumer is gone
    #[error("result queue is closed")]
    Closed,
}

/// Orders result submission against attempt cancellation.
///
/// The coordinator cancels attempts through [`SealGate::cancel`] and every
/// [`ResultSink`] checks its token under the same lock before enqueuing.
#[derive(Debug, Clone, Default)]
pub struct SealGate {
    lock: Arc<Mutex<()>>,
}

impl SealGate {
    /// Create a new gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel an attempt. Once this returns, no sink holding `stop` can
    /// enqueue another result.
    pub fn cancel(&self, stop: &CancellationToken) {
        let _guard = self.lock.lock();
        stop.cancel();
    }

    /// Result sink for the attempt controlled by `stop`.
    pub fn sink(&self, results: mpsc::Sender<Header>, stop: CancellationToken) -> ResultSink {
        ResultSink { results, gate: self.clone(), stop }
    }
}

/// Where an engine reports a sealed header.
#[derive(Debug, Clone)]
pub struct ResultSink {
    results: mpsc::Sender<Header>,
    gate: SealGate,
    stop: CancellationToken,
}

impl ResultSink {
    /// Enqueue a sealed header unless its attempt has been cancelled.
    ///
    /// Never blocks: a full queue drops the result.
    pub fn submit(&self, header: Header) -> Result<(), SinkError> {
        let _guard = self.gate.lock.lock();
        if self.stop.is_cancelled() {
            return Err(SinkError::Stale);
        }
        self.results.try_send(header).map_err(|err| match err {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    /// Whether the attempt this sink belongs to was cancelled.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}
