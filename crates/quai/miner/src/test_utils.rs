//! Stub engine and node clients for unit tests.

use crate::{
    MinerError,
    slice::{HeaderStream, NodeClient},
};
use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use futures::StreamExt;
use jsonrpsee::core::ClientError;
use parking_lot::Mutex;
use quai_consensus::{EngineError, ResultSink, SealEngine};
use quai_primitives::{Context, Header, Location};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn stub_error() -> MinerError {
    MinerError::Rpc(ClientError::Custom("stub failure".to_string()))
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Shared record of which tier was asked to accept a header, in call order.
pub(crate) type Journal = Arc<Mutex<Vec<Context>>>;

#[derive(Default)]
struct NodeState {
    journal: Mutex<Option<(Journal, Context)>>,
    pending: Mutex<Option<Header>>,
    fetch_failures: AtomicU32,
    fetches: AtomicU32,
    submitted: Mutex<Vec<Header>>,
    failing: AtomicBool,
    pushes: Mutex<Option<mpsc::UnboundedReceiver<Result<Header, MinerError>>>>,
}

/// In-memory node. Clones share state.
#[derive(Clone, Default)]
pub(crate) struct StubNode {
    state: Arc<NodeState>,
}

impl StubNode {
    /// Zone header at location `[0 0]` with the given zone number.
    pub(crate) fn header(zone_number: u64) -> Header {
        Header::new([1, 2, zone_number], U256::from(1000u64), Location::default())
    }

    pub(crate) fn into_client(self) -> Arc<dyn NodeClient> {
        Arc::new(self)
    }

    pub(crate) fn with_pending(self, header: Header) -> Self {
        *self.state.pending.lock() = Some(header);
        self
    }

    /// Fail the next `n` pending header fetches.
    pub(crate) fn fail_fetches(self, n: u32) -> Self {
        self.state.fetch_failures.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn fail_submissions(self) -> Self {
        self.state.failing.store(true, Ordering::SeqCst);
        self
    }

    /// Record every submission attempt as `ctx` in `journal`.
    pub(crate) fn journaled(self, journal: &Journal, ctx: Context) -> Self {
        *self.state.journal.lock() = Some((Arc::clone(journal), ctx));
        self
    }

    /// Sender feeding the next subscription.
    pub(crate) fn push_channel(&self) -> mpsc::UnboundedSender<Result<Header, MinerError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.pushes.lock() = Some(rx);
        tx
    }

    pub(crate) fn fetches(&self) -> u32 {
        self.state.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn submitted(&self) -> Vec<Header> {
        self.state.submitted.lock().clone()
    }
}

#[async_trait]
impl NodeClient for StubNode {
    async fn pending_header(&self) -> Result<Header, MinerError> {
        self.state.fetches.fetch_add(1, Ordering::SeqCst);
        let left = self.state.fetch_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.state.fetch_failures.store(left - 1, Ordering::SeqCst);
            return Err(stub_error());
        }
        self.state.pending.lock().clone().ok_or_else(stub_error)
    }

    async fn submit_mined_header(&self, header: &Header) -> Result<(), MinerError> {
        if let Some((journal, ctx)) = &*self.state.journal.lock() {
            journal.lock().push(*ctx);
        }
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(stub_error());
        }
        self.state.submitted.lock().push(header.clone());
        Ok(())
    }

    async fn subscribe_pending_headers(&self) -> Result<HeaderStream, MinerError> {
        let rx = self.state.pushes.lock().take().ok_or_else(stub_error)?;
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

/// One call to [`StubEngine::seal`].
#[derive(Debug, Clone)]
pub(crate) struct Attempt {
    pub(crate) header: Header,
    pub(crate) sink: ResultSink,
    pub(crate) stop: CancellationToken,
    /// Whether every earlier attempt was already cancelled when this began.
    pub(crate) earlier_cancelled: bool,
}

/// Engine that records attempts and never finds anything on its own.
#[derive(Debug, Default)]
pub(crate) struct StubEngine {
    attempts: Mutex<Vec<Attempt>>,
    order: Mutex<Option<Context>>,
    failing_seals: AtomicU32,
    rate: Mutex<f64>,
    rate_reads: AtomicU32,
}

impl StubEngine {
    pub(crate) fn with_order(order: Context) -> Self {
        let engine = Self::default();
        *engine.order.lock() = Some(order);
        engine
    }

    /// Fail the next `n` calls to `seal`.
    pub(crate) fn fail_seals(&self, n: u32) {
        self.failing_seals.store(n, Ordering::SeqCst);
    }

    pub(crate) fn set_hashrate(&self, rate: f64) {
        *self.rate.lock() = rate;
    }

    pub(crate) fn rate_reads(&self) -> u32 {
        self.rate_reads.load(Ordering::SeqCst)
    }

    pub(crate) fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().clone()
    }
}

impl SealEngine for StubEngine {
    fn seal(
        &self,
        header: Header,
        results: ResultSink,
        stop: CancellationToken,
    ) -> Result<(), EngineError> {
        let failing = self.failing_seals.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_seals.store(failing - 1, Ordering::SeqCst);
            return Err(EngineError::Spawn(std::io::Error::other("no threads left")));
        }
        let mut attempts = self.attempts.lock();
        let earlier_cancelled = attempts.iter().all(|attempt| attempt.stop.is_cancelled());
        attempts.push(Attempt { header, sink: results, stop, earlier_cancelled });
        Ok(())
    }

    fn hashrate(&self) -> f64 {
        self.rate_reads.fetch_add(1, Ordering::SeqCst);
        *self.rate.lock()
    }

    fn calc_order(&self, header: &Header) -> Result<(B256, Context), EngineError> {
        if header.difficulty.is_zero() {
            return Err(EngineError::ZeroDifficulty);
        }
        self.order.lock().map(|order| (B256::ZERO, order)).ok_or(EngineError::InsufficientWork)
    }
}
