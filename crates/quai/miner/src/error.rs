//! Miner error types

use crate::{config::ConfigError, retry::Transient, session::SessionError};
use quai_consensus::EngineError;
use thiserror::Error;

/// Errors that can occur while mining
#[derive(Debug, Error)]
pub enum MinerError {
    /// Proxy session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Node RPC error
    #[error("Node RPC error: {0}")]
    Rpc(#[from] jsonrpsee::core::ClientError),

    /// Header from a node could not be decoded
    #[error("Invalid header from node: {0}")]
    Decode(#[from] serde_json::Error),

    /// The zone's pending header subscription ended
    #[error("Pending header subscription closed")]
    SubscriptionClosed,

    /// A pipeline channel closed underneath a task
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Sealing engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// A pipeline task panicked or was aborted
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Transient for MinerError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Session(err) => err.is_transient(),
            Self::Rpc(_) | Self::Decode(_) | Self::SubscriptionClosed => true,
            Self::ChannelClosed(_) | Self::Config(_) | Self::Engine(_) | Self::Task(_) => false,
        }
    }
}
