//! `ost build` command implementation.

use clap::Args;
use ost_compiler::Site;
use ost_config::CliSettings;

use super::SiteArgs;
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the build command.
#[derive(Args, Debug)]
pub(crate) struct BuildArgs {
    #[command(flatten)]
    pub site: SiteArgs,
}

impl BuildArgs {
    /// Execute the build command: run a single build pass.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the build pass fails.
    pub(crate) fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let config = self.site.load_config(CliSettings::default())?;

        let paths = &config.paths_resolved;
        output.building(&paths.source_dir, &paths.destination_dir);

        let report = Site::from_config(&config).render()?;
        output.built(&report);
        Ok(())
    }
}
