//! CLI command implementations.

pub(crate) mod build;
pub(crate) mod serve;

use std::path::PathBuf;

use clap::Args;
use ost_config::{CliSettings, Config};

pub(crate) use build::BuildArgs;
pub(crate) use serve::ServeArgs;

use crate::error::CliError;

/// Options shared by every command that builds the site.
#[derive(Args, Debug)]
pub(crate) struct SiteArgs {
    /// Path to configuration file (default: auto-discover ost.toml).
    #[arg(short, long, env = "OST_CONFIG")]
    config: Option<PathBuf>,

    /// Source directory (overrides config).
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Destination directory (overrides config).
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// Template directory (overrides config).
    #[arg(short, long)]
    templates: Option<PathBuf>,

    /// Enable verbose output (build progress and timing logs).
    #[arg(short, long)]
    pub verbose: bool,
}

impl SiteArgs {
    /// Load configuration, applying directory overrides and `extra` settings.
    fn load_config(&self, mut extra: CliSettings) -> Result<Config, CliError> {
        extra.source_dir.clone_from(&self.source);
        extra.destination_dir.clone_from(&self.destination);
        extra.template_dir.clone_from(&self.templates);

        let config = Config::load(self.config.as_deref(), Some(&extra))?;
        config.validate()?;
        config.require_roots()?;
        Ok(config)
    }
}
