//! Sealing coordinator
//!
//! The single reader of the update channel. Every pending header interrupts
//! the running attempt and starts a new one:
//!
//! ```text
//!            update                      update
//!   Idle ───────────► Sealing(attempt n) ───────► cancel n ──► Sealing(n + 1)
//! ```
//!
//! Cancellation goes through the [`SealGate`] shared with every attempt's
//! [`ResultSink`](quai_consensus::ResultSink), so once attempt `n` has been
//! cancelled it cannot put a result on the result channel, whatever the
//! engine does.

use crate::MinerError;
use quai_consensus::{SealEngine, SealGate};
use quai_primitives::{Context, HIERARCHY_DEPTH, Header};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives the sealing engine from the update channel.
#[derive(Debug)]
pub struct SealingCoordinator<E> {
    engine: Arc<E>,
    updates: mpsc::Receiver<Header>,
    results: mpsc::Sender<Header>,
    gate: SealGate,
    /// Cancellation token of the live attempt
    current: Option<CancellationToken>,
    /// Block numbers of the last header, only used to decide what to log
    previous_numbers: Option<[u64; HIERARCHY_DEPTH]>,
}

impl<E: SealEngine> SealingCoordinator<E> {
    /// Create a coordinator reading `updates` and sealing into `results`.
    pub fn new(engine: Arc<E>, updates: mpsc::Receiver<Header>, results: mpsc::Sender<Header>) -> Self {
        Self {
            engine,
            updates,
            results,
            gate: SealGate::new(),
            current: None,
            previous_numbers: None,
        }
    }

    /// Process updates until `shutdown` fires.
    ///
    /// The live attempt is cancelled on the way out. Returns an error if the
    /// update channel closes underneath it.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), MinerError> {
        loop {
            let update = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                update = self.updates.recv() => update,
            };
            let Some(header) = update else {
                self.interrupt();
                return Err(MinerError::ChannelClosed("update"));
            };
            self.start(header, &shutdown);
        }

        self.interrupt();
        Ok(())
    }

    /// Cancel the live attempt, if any.
    fn interrupt(&mut self) {
        if let Some(stop) = self.current.take() {
            self.gate.cancel(&stop);
            debug!(target: "quai::coordinator", "Interrupted sealing attempt");
        }
    }

    fn start(&mut self, mut header: Header, shutdown: &CancellationToken) {
        self.interrupt();
        self.log_new_work(&header);

        if let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) {
            header.time = now.as_secs();
        }

        let stop = shutdown.child_token();
        let sink = self.gate.sink(self.results.clone(), stop.clone());
        match self.engine.seal(header, sink, stop.clone()) {
            Ok(()) => self.current = Some(stop),
            Err(err) => {
                warn!(target: "quai::coordinator", %err, "Failed to start sealing attempt");
                stop.cancel();
            }
        }
    }

    fn log_new_work(&mut self, header: &Header) {
        let numbers = header.numbers();
        let changed = match self.previous_numbers {
            Some(previous) => {
                Context::ALL.into_iter().find(|ctx| previous[ctx.index()] != numbers[ctx.index()])
            }
            None => Some(Context::Prime),
        };
        self.previous_numbers = Some(numbers);

        if let Some(changed) = changed {
            info!(
                target: "quai::coordinator",
                number = ?numbers,
                %changed,
                location = %header.location,
                difficulty = %header.difficulty,
                "Mining block"
            );
        }
    }
}
