//! Quai sealing engine
//!
//! This crate defines the boundary between the mining orchestrator and
//! whatever finds the proof of work:
//!
//! - [`SealEngine`]: `seal`, `hashrate` and `calc_order`, the only calls the
//!   orchestrator makes into an engine.
//! - [`SealGate`] / [`ResultSink`]: the channel an engine reports solutions
//!   through. Submissions race against cancellation under one lock, so an
//!   attempt that was cancelled can never enqueue a result afterwards.
//! - [`Blake3Engine`]: a multi-threaded CPU reference engine.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod engine;
pub mod pow;
pub mod worker;

pub use engine::{ResultSink, SealEngine, SealGate, SinkError};
pub use worker::{Blake3Engine, EngineConfig};

use thiserror::Error;

/// Sealing and order calculation errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Header difficulty is zero, so there is no target
    #[error("header has zero difficulty")]
    ZeroDifficulty,

    /// Mix digest in the header does not match the recomputed one
    #[error("mix digest mismatch: expected {expected}, got {actual}")]
    MixDigestMismatch {
        /// Digest recomputed from the header and nonce
        expected: alloy_primitives::B256,
        /// Digest carried by the header
        actual: alloy_primitives::B256,
    },

    /// Proof of work does not meet even the zone target
    #[error("insufficient work for zone target")]
    InsufficientWork,

    /// A sealing thread could not be started
    #[error("failed to start sealing thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error() {
        let err = EngineError::InsufficientWork;
        assert!(err.to_string().contains("zone target"));
    }
}
