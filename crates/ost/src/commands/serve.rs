//! `ost serve` command implementation.

use std::sync::{Arc, Mutex, PoisonError};

use clap::Args;
use ost_compiler::Site;
use ost_config::{CliSettings, Config};
use ost_server::{ServerConfig, run_server};
use ost_watch::{DirWatcher, WatchHandle};

use super::SiteArgs;
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub(crate) struct ServeArgs {
    #[command(flatten)]
    pub site: SiteArgs,

    /// Host to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Do not rebuild when source or template files change.
    #[arg(long)]
    no_watch: bool,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// Runs an initial build pass, starts the watcher unless disabled, then
    /// serves the destination root until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails, the initial pass fails with
    /// watching disabled, or the server fails to start.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let config = self.site.load_config(CliSettings {
            host: self.host,
            port: self.port,
            ..CliSettings::default()
        })?;

        let site = Arc::new(Mutex::new(Site::from_config(&config)));
        match rebuild(&site) {
            Ok(report) => output.built(&report),
            Err(err) if self.no_watch => return Err(err.into()),
            Err(err) => output.failed(&err),
        }

        let paths = &config.paths_resolved;
        let watcher = if self.no_watch {
            output.watching(&[]);
            None
        } else {
            output.watching(&[paths.source_dir.as_path(), paths.template_dir.as_path()]);
            Some(start_watcher(&config, Arc::clone(&site))?)
        };

        std::fs::create_dir_all(&paths.destination_dir)?;
        output.serving(&paths.destination_dir, &config.server.host, config.server.port);

        let result = run_server(ServerConfig::new(
            config.server.host.clone(),
            config.server.port,
            config.paths_resolved.destination_dir.clone(),
        ))
        .await;

        if let Some(watcher) = watcher {
            watcher.stop();
        }
        result?;
        Ok(())
    }
}

/// Run one pass. Passes are serialized by the site lock.
fn rebuild(site: &Mutex<Site>) -> Result<ost_compiler::BuildReport, ost_compiler::BuildError> {
    site.lock().unwrap_or_else(PoisonError::into_inner).render()
}

/// Watch the source and template roots, rebuilding on every change.
///
/// A failed pass is logged and the watcher keeps running.
fn start_watcher(config: &Config, site: Arc<Mutex<Site>>) -> Result<WatchHandle, CliError> {
    let paths = &config.paths_resolved;
    let watcher = DirWatcher::new(
        [paths.source_dir.clone(), paths.template_dir.clone()],
        config.watch.poll_interval(),
    )
    .ignore(paths.destination_dir.clone());

    let handle = watcher.start(move || match rebuild(&site) {
        Ok(report) => tracing::info!(
            pages = report.pages,
            templates = report.templates,
            static_files = report.static_files,
            "Rebuilt site"
        ),
        Err(err) => tracing::error!(error = %err, "Rebuild failed"),
    })?;
    Ok(handle)
}
