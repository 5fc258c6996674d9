//! CLI error types.

use ost_compiler::BuildError;
use ost_config::ConfigError;
use ost_server::ServerError;
use ost_watch::WatchError;

/// CLI error type.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Build(#[from] BuildError),

    #[error("{0}")]
    Watch(#[from] WatchError),

    #[error("{0}")]
    Server(#[from] ServerError),
}
