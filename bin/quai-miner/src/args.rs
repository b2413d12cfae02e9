//! Command line arguments.

use clap::Parser;
use eyre::WrapErr;
use quai_miner::{MinerConfig, config::DEFAULT_CONFIG_PATH};
use std::path::{Path, PathBuf};
use tracing::info;

/// Quai CPU miner
#[derive(Debug, Parser)]
#[command(name = "quai-miner", version, about = "CPU miner for the Quai Prime / Region / Zone hierarchy")]
pub(crate) struct MinerArgs {
    /// TOML config file. Defaults to `config.toml` if it exists.
    #[arg(long, short = 'c', env = "QUAI_MINER_CONFIG")]
    pub(crate) config: Option<PathBuf>,

    /// Mine through a proxy
    #[arg(long)]
    pub(crate) proxy: bool,

    /// Proxy address, `host:port` or `tcp://host:port`
    #[arg(long, env = "QUAI_PROXY_URL")]
    pub(crate) proxy_url: Option<String>,

    /// Sealing threads (0 = one per core)
    #[arg(long, short = 't')]
    pub(crate) threads: Option<usize>,

    /// Region to mine at
    #[arg(requires = "zone")]
    pub(crate) region: Option<u8>,

    /// Zone within the region
    pub(crate) zone: Option<u8>,
}

impl MinerArgs {
    /// Load the config file, apply overrides and validate the result.
    pub(crate) fn load_config(&self) -> eyre::Result<MinerConfig> {
        let mut config = match &self.config {
            Some(path) => load(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => load(Path::new(DEFAULT_CONFIG_PATH))?,
            None => {
                info!(target: "quai::cli", "No config file found, using defaults");
                MinerConfig::default()
            }
        };
        self.apply(&mut config);
        config.validate().wrap_err("invalid configuration")?;
        Ok(config)
    }

    /// Overlay command line values on `config`.
    pub(crate) fn apply(&self, config: &mut MinerConfig) {
        if self.proxy {
            config.proxy = true;
        }
        if let Some(url) = &self.proxy_url {
            config.proxy_url.clone_from(url);
        }
        if let Some(threads) = self.threads {
            config.policy.threads = threads;
        }
        if let (Some(region), Some(zone)) = (self.region, self.zone) {
            config.location = [region, zone];
        }
    }
}

fn load(path: &Path) -> eyre::Result<MinerConfig> {
    info!(target: "quai::cli", path = %path.display(), "Loading config");
    MinerConfig::load(path).wrap_err_with(|| format!("failed to load {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Result<MinerArgs, clap::Error> {
        MinerArgs::try_parse_from(std::iter::once("quai-miner").chain(args.iter().copied()))
    }

    #[test]
    fn location_from_positionals() {
        let args = parse(&["2", "1", "--threads", "4"]).unwrap();
        let mut config = MinerConfig::default();
        args.apply(&mut config);
        assert_eq!(config.location, [2, 1]);
        assert_eq!(config.policy.threads, 4);
        assert!(!config.proxy);
    }

    #[test]
    fn region_needs_zone() {
        assert!(parse(&["1"]).is_err());
        assert!(parse(&["1", "x"]).is_err());
    }

    #[test]
    fn flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "location = [0, 0]\nproxy_url = \"tcp://10.0.0.1:1\"\n").unwrap();
        let path = file.path().to_str().unwrap();

        let args =
            parse(&["--config", path, "--proxy", "--proxy-url", "127.0.0.1:3333", "1", "2"]).unwrap();
        let config = args.load_config().unwrap();
        assert!(config.proxy);
        assert_eq!(config.proxy_url, "127.0.0.1:3333");
        assert_eq!(config.location, [1, 2]);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "proxy = true\nproxy_url = \"127.0.0.1:1\"\n").unwrap();
        let path = file.path().to_str().unwrap();

        let args = parse(&["--config", path, "5", "0"]).unwrap();
        assert!(args.load_config().is_err());
    }
}
