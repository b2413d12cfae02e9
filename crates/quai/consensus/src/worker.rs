//! Blake3 CPU engine
//!
//! Handles parallel nonce search. Each attempt spawns one OS thread per
//! configured core; threads walk disjoint nonce ranges from a random start
//! and check for cancellation between batches.

use crate::{
    EngineError, ResultSink, SealEngine, SinkError,
    pow::{self, pow_hash},
};
use alloy_primitives::{B256, U256};
use parking_lot::Mutex;
use quai_primitives::{Context, Header};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shortest window the hashrate is averaged over.
const MIN_RATE_WINDOW: Duration = Duration::from_secs(1);

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of sealing threads
    pub threads: usize,
    /// Nonces to try per batch before checking for cancellation
    pub batch_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { threads: num_cpus::get().max(1), batch_size: 10_000 }
    }
}

impl EngineConfig {
    /// Create config for single-threaded sealing
    pub fn single_thread() -> Self {
        Self { threads: 1, ..Default::default() }
    }

    /// Create config with specific thread count (0 = all cores)
    pub fn with_threads(threads: usize) -> Self {
        if threads == 0 {
            return Self::default();
        }
        Self { threads, ..Default::default() }
    }
}

#[derive(Debug)]
struct RateSample {
    at: Instant,
    total: u64,
    rate: f64,
}

/// Counts hashes and derives a rate from the delta between reads.
#[derive(Debug)]
struct HashMeter {
    total: AtomicU64,
    sample: Mutex<RateSample>,
}

impl HashMeter {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            sample: Mutex::new(RateSample { at: Instant::now(), total: 0, rate: 0.0 }),
        }
    }

    fn mark(&self, hashes: u64) {
        self.total.fetch_add(hashes, Ordering::Relaxed);
    }

    fn rate(&self) -> f64 {
        let mut sample = self.sample.lock();
        let elapsed = sample.at.elapsed();
        if elapsed >= MIN_RATE_WINDOW {
            let total = self.total.load(Ordering::Relaxed);
            sample.rate = (total - sample.total) as f64 / elapsed.as_secs_f64();
            sample.total = total;
            sample.at = Instant::now();
        }
        sample.rate
    }
}

/// Multi-threaded Blake3 sealing engine
#[derive(Debug, Clone)]
pub struct Blake3Engine {
    config: EngineConfig,
    meter: Arc<HashMeter>,
}

impl Blake3Engine {
    /// Create a new engine
    pub fn new(config: EngineConfig) -> Self {
        Self { config, meter: Arc::new(HashMeter::new()) }
    }

    /// Hashes computed since the engine was created
    pub fn total_hashes(&self) -> u64 {
        self.meter.total.load(Ordering::Relaxed)
    }
}

impl SealEngine for Blake3Engine {
    fn seal(
        &self,
        header: Header,
        results: ResultSink,
        stop: CancellationToken,
    ) -> Result<(), EngineError> {
        if header.difficulty.is_zero() {
            return Err(EngineError::ZeroDifficulty);
        }

        let threads = self.config.threads.max(1);
        let seal_hash = pow::seal_hash(&header);
        let target = pow::difficulty_to_target(header.difficulty);
        // Cancelled by the first thread to find a solution, or by `stop`.
        let found = stop.child_token();
        let header = Arc::new(header);

        let stride = u64::MAX / threads as u64;
        let start: u64 = rand::random();
        debug!(
            target: "quai::engine",
            threads,
            seal_hash = %seal_hash,
            difficulty = %header.difficulty,
            "Starting sealing attempt"
        );

        for id in 0..threads {
            let search = NonceSearch {
                header: Arc::clone(&header),
                seal_hash,
                target,
                batch_size: self.config.batch_size,
                results: results.clone(),
                found: found.clone(),
                meter: Arc::clone(&self.meter),
            };
            let first = start.wrapping_add(stride.wrapping_mul(id as u64));
            thread::Builder::new()
                .name(format!("quai-seal-{id}"))
                .spawn(move || search.run(first))
                .inspect_err(|_| found.cancel())?;
        }
        Ok(())
    }

    fn hashrate(&self) -> f64 {
        self.meter.rate()
    }

    fn calc_order(&self, header: &Header) -> Result<(B256, Context), EngineError> {
        pow::calc_order(header)
    }
}

/// One thread's share of a sealing attempt.
struct NonceSearch {
    header: Arc<Header>,
    seal_hash: B256,
    target: U256,
    batch_size: u64,
    results: ResultSink,
    found: CancellationToken,
    meter: Arc<HashMeter>,
}

impl NonceSearch {
    fn run(self, first: u64) {
        let mut nonce = first;
        loop {
            if self.found.is_cancelled() {
                return;
            }

            for tried in 0..self.batch_size {
                let result = pow_hash(&self.seal_hash, nonce);
                if U256::from_be_bytes(result.hash.0) <= self.target {
                    self.meter.mark(tried + 1);
                    self.found.cancel();
                    self.report(nonce, result.mix_digest, result.hash);
                    return;
                }
                nonce = nonce.wrapping_add(1);
            }
            self.meter.mark(self.batch_size);
        }
    }

    fn report(&self, nonce: u64, mix_digest: B256, hash: B256) {
        let mut sealed = (*self.header).clone();
        sealed.seal(nonce, mix_digest);

        match self.results.submit(sealed) {
            Ok(()) => debug!(target: "quai::engine", nonce, hash = %hash, "Header sealed"),
            Err(SinkError::Stale) => {
                debug!(target: "quai::engine", nonce, "Dropping solution for cancelled attempt")
            }
            Err(err) => warn!(target: "quai::engine", nonce, %err, "Failed to report solution"),
        }
    }
}
