pub mod config;
pub mod graph;
pub mod image;
pub mod init;
pub mod synth;

use anyhow::Context as _;
use relay_core::config::RelayConfig;
use std::path::PathBuf;

/// Global flags shared by every subcommand.
pub struct Context {
    pub root: PathBuf,
    pub config_path: Option<PathBuf>,
    pub json: bool,
}

impl Context {
    /// Load the config from `--config` if given, else `<root>/relay.yaml`.
    pub fn load_config(&self) -> anyhow::Result<RelayConfig> {
        match &self.config_path {
            Some(path) => RelayConfig::load_from(path)
                .with_context(|| format!("failed to load {}", path.display())),
            None => RelayConfig::load(&self.root).context("failed to load config"),
        }
    }
}
