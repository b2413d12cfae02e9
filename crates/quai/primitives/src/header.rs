//! Pending headers handed out for mining
//!
//! A pending header carries everything the node needs back on submission.
//! The miner only touches the timestamp, the nonce and the mix digest; any
//! field it does not model is kept in [`Header::other`] and echoed back.

use crate::{Context, HIERARCHY_DEPTH, Location};
use alloy_primitives::{B64, B256, U64, U256};
use alloy_serde::OtherFields;
use serde::{Deserialize, Serialize};

/// Candidate block header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Parent hash at each context
    #[serde(default)]
    pub parent_hash: [B256; HIERARCHY_DEPTH],
    /// Block number at each context
    pub number: [U64; HIERARCHY_DEPTH],
    /// Zone difficulty
    pub difficulty: U256,
    /// Timestamp (seconds since epoch)
    #[serde(with = "alloy_serde::quantity")]
    pub time: u64,
    /// Nonce, filled in by sealing
    #[serde(default)]
    pub nonce: B64,
    /// Mix digest, filled in by sealing
    #[serde(default)]
    pub mix_hash: B256,
    /// Zone this header belongs to
    pub location: Location,
    /// Fields the miner passes through untouched
    #[serde(flatten)]
    pub other: OtherFields,
}

impl Header {
    /// Create a header with the given per-context numbers.
    pub fn new(numbers: [u64; HIERARCHY_DEPTH], difficulty: U256, location: Location) -> Self {
        Self {
            parent_hash: Default::default(),
            number: numbers.map(U64::from),
            difficulty,
            time: 0,
            nonce: B64::ZERO,
            mix_hash: B256::ZERO,
            location,
            other: OtherFields::default(),
        }
    }

    /// Block number at `ctx`.
    pub fn number(&self, ctx: Context) -> u64 {
        self.number[ctx.index()].to::<u64>()
    }

    /// Block numbers at every context, coarsest first.
    pub fn numbers(&self) -> [u64; HIERARCHY_DEPTH] {
        Context::ALL.map(|ctx| self.number(ctx))
    }

    /// Nonce as an integer.
    pub fn nonce_u64(&self) -> u64 {
        u64::from_be_bytes(self.nonce.0)
    }

    /// Record a sealing solution.
    pub fn seal(&mut self, nonce: u64, mix_hash: B256) {
        self.nonce = B64::from(nonce.to_be_bytes());
        self.mix_hash = mix_hash;
    }
}
