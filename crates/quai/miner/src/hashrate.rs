//! Periodic hashrate report.

use crate::{MinerError, metrics};
use quai_consensus::SealEngine;
use std::{sync::Arc, time::Duration};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

const UNITS: [&str; 5] = ["h/s", "Kh/s", "Mh/s", "Gh/s", "Th/s"];

/// Scale a rate in hashes per second to the largest unit that keeps it at
/// or above 1.
///
/// Rates too large for Th/s are returned unscaled in h/s.
pub fn to_si_units(rate: f64) -> (f64, &'static str) {
    let mut value = rate;
    let mut divisions = 0;
    while value >= 1000.0 && divisions < UNITS.len() {
        value /= 1000.0;
        divisions += 1;
    }
    match UNITS.get(divisions) {
        Some(unit) => (value, *unit),
        None => (rate, UNITS[0]),
    }
}

/// Logs the engine's hashrate at a fixed interval.
#[derive(Debug)]
pub struct HashrateMonitor<E> {
    engine: Arc<E>,
    interval: Duration,
}

impl<E: SealEngine> HashrateMonitor<E> {
    /// Report every `interval`, starting one interval from now.
    pub const fn new(engine: Arc<E>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Report until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), MinerError> {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => self.report(),
            }
        }
    }

    fn report(&self) {
        let rate = self.engine.hashrate();
        metrics::record_hashrate(rate);
        let (value, unit) = to_si_units(rate);
        info!(target: "quai::hashrate", "Current hashrate: {value:.2} {unit}");
    }
}
