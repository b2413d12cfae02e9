//! Miner metrics.

use metrics::{counter, gauge};
use quai_primitives::Context;

pub(crate) fn record_hashrate(rate: f64) {
    gauge!("quai_miner_hashrate").set(rate);
}

pub(crate) fn record_pending_header() {
    counter!("quai_miner_pending_headers_total").increment(1);
}

pub(crate) fn record_block_found(order: Context) {
    counter!("quai_miner_blocks_found_total", "order" => order.name()).increment(1);
}

pub(crate) fn record_submission_failure(tier: Context) {
    counter!("quai_miner_submissions_failed_total", "tier" => tier.name()).increment(1);
}

pub(crate) fn record_invalid_result() {
    counter!("quai_miner_invalid_results_total").increment(1);
}
