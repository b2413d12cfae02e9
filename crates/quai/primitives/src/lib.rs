//! Quai hierarchy primitives
//!
//! Types shared by the sealing engine and the mining orchestrator:
//!
//! ```text
//!                    ┌─────────┐
//!                    │  Prime  │   context 0
//!                    └────┬────┘
//!          ┌──────────────┼──────────────┐
//!     ┌────┴────┐    ┌────┴────┐    ┌────┴────┐
//!     │Region 0 │    │Region 1 │    │Region 2 │   context 1
//!     └────┬────┘    └────┬────┘    └────┬────┘
//!      z0 z1 z2       z0 z1 z2       z0 z1 z2      context 2
//! ```
//!
//! A miner always targets one Zone; its [`Location`] implies the Region and the
//! single Prime above it (the "slice").

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod context;
mod header;
mod location;

pub use context::{Context, HIERARCHY_DEPTH};
pub use header::Header;
pub use location::{
    Location, LocationError, NUM_REGIONS, ZONES_PER_REGION, diagnostics_port,
};
