//! Miner configuration
//!
//! Loaded from a TOML file. Every field has a default, so a file only needs
//! the values that differ:
//!
//! ```toml
//! proxy = true
//! proxy_url = "tcp://127.0.0.1:3333"
//! location = [0, 1]
//! reward_address = "0x00000000000000000000000000000000000000aa"
//!
//! [policy]
//! max_retry_delay = "10m"
//! ```

use crate::retry::{DEFAULT_MAX_RETRY_DELAY, RetryPolicy};
use alloy_primitives::Address;
use quai_primitives::{Context, Location, LocationError, NUM_REGIONS, ZONES_PER_REGION};
use serde::{Deserialize, Serialize};
use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

/// Config file read when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

const REGIONS: usize = NUM_REGIONS as usize;
const ZONES: usize = ZONES_PER_REGION as usize;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Config file is not valid TOML for [`MinerConfig`]
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Location out of range
    #[error("invalid location: {0}")]
    Location(#[from] LocationError),

    /// An endpoint needed by the selected mode is empty
    #[error("no {0} url configured")]
    MissingUrl(String),

    /// A policy value that must be positive is zero
    #[error("policy.{0} must be greater than zero")]
    Zero(&'static str),
}

/// Top-level miner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Mine through a proxy instead of talking to nodes directly
    pub proxy: bool,
    /// Proxy address, `host:port` or `tcp://host:port`
    pub proxy_url: String,
    /// Prime node websocket url
    pub prime_url: String,
    /// Region node urls, by region index
    pub region_urls: [String; REGIONS],
    /// Zone node urls, by region then zone index
    pub zone_urls: [[String; ZONES]; REGIONS],
    /// `[region, zone]` to mine at
    pub location: [u8; 2],
    /// Address credited by the proxy
    pub reward_address: Address,
    /// Proxy password
    pub password: String,
    /// Timing and sizing knobs
    pub policy: PolicyConfig,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            proxy: false,
            proxy_url: String::new(),
            prime_url: String::new(),
            region_urls: Default::default(),
            zone_urls: Default::default(),
            location: [0, 0],
            reward_address: Address::ZERO,
            password: String::new(),
            policy: PolicyConfig::default(),
        }
    }
}

/// Retry, channel and reporting settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Cap on the delay between retries
    #[serde(with = "humantime_serde")]
    pub max_retry_delay: Duration,
    /// Capacity of the pending header channel
    pub update_queue_size: usize,
    /// Capacity of the sealed header channel
    pub result_queue_size: usize,
    /// How often the hashrate is reported
    #[serde(with = "humantime_serde")]
    pub hashrate_interval: Duration,
    /// Sealing threads, 0 for one per core
    pub threads: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            update_queue_size: 10,
            result_queue_size: 10,
            hashrate_interval: Duration::from_secs(60),
            threads: 0,
        }
    }
}

impl MinerConfig {
    /// Read and parse a config file. The result is not validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Configured location.
    pub fn location(&self) -> Result<Location, LocationError> {
        let [region, zone] = self.location;
        Location::new(region, zone)
    }

    /// Node url for `ctx` in the slice containing `location`.
    pub fn node_url(&self, ctx: Context, location: Location) -> &str {
        let region = location.region as usize;
        match ctx {
            Context::Prime => &self.prime_url,
            Context::Region => &self.region_urls[region],
            Context::Zone => &self.zone_urls[region][location.zone as usize],
        }
    }

    /// Retry policy built from `policy.max_retry_delay`.
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.policy.max_retry_delay)
    }

    /// Check that the configuration can run in the selected mode.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let location = self.location()?;

        let policy = &self.policy;
        if policy.update_queue_size == 0 {
            return Err(ConfigError::Zero("update_queue_size"));
        }
        if policy.result_queue_size == 0 {
            return Err(ConfigError::Zero("result_queue_size"));
        }
        if policy.hashrate_interval.is_zero() {
            return Err(ConfigError::Zero("hashrate_interval"));
        }

        if self.proxy {
            if self.proxy_url.trim().is_empty() {
                return Err(ConfigError::MissingUrl("proxy".to_string()));
            }
            return Ok(());
        }

        for ctx in Context::ALL {
            if self.node_url(ctx, location).trim().is_empty() {
                let which = match ctx {
                    Context::Prime => "prime".to_string(),
                    Context::Region => format!("region {}", location.region),
                    Context::Zone => format!("zone {location}"),
                };
                return Err(ConfigError::MissingUrl(which));
            }
        }
        Ok(())
    }
}
