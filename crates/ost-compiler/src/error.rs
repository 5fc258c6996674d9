//! Build error types.

use std::path::PathBuf;

use ost_document::ParseError;

use crate::context::HookPoint;
use crate::script::ScriptError;
use crate::unit::UnitState;

/// Broad category of a [`BuildError`].
///
/// Callers that only need to distinguish failure classes (exit codes, log
/// levels, tests) match on this instead of the full error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed source document.
    Parse,
    /// Template inheritance cycle.
    Cycle,
    /// Missing template or out-of-order unit operation.
    Lookup,
    /// Initializer, hook, or post-process failure.
    Script,
    /// Template engine failure.
    Render,
    /// Filesystem failure.
    Io,
}

/// Error returned when compiling or rendering a site fails.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Source document could not be parsed.
    #[error("Failed to parse {id}: {source}")]
    Parse {
        /// Document id.
        id: String,
        #[source]
        source: ParseError,
    },

    /// Template inheritance forms a cycle.
    #[error("Template inheritance cycle at {id}: {}", .chain.join(" -> "))]
    Cycle {
        /// Template whose import closed the cycle.
        id: String,
        /// Import chain, starting and ending with `id`.
        chain: Vec<String>,
    },

    /// Referenced template does not exist.
    #[error("Unknown template {name:?}{}", referenced_by_suffix(.referenced_by.as_deref()))]
    UnknownTemplate {
        /// Requested template id.
        name: String,
        /// Document that referenced it, if any.
        referenced_by: Option<String>,
    },

    /// Unit operation called in the wrong lifecycle state.
    #[error("Cannot {operation} {id} in state {state}")]
    InvalidState {
        /// Document id.
        id: String,
        /// Attempted operation.
        operation: &'static str,
        /// State the unit was in.
        state: UnitState,
    },

    /// Initializer section failed.
    #[error("Initialization of {id} failed: {source}")]
    Script {
        /// Document id.
        id: String,
        #[source]
        source: ScriptError,
    },

    /// Post-process transform failed.
    #[error("Post-process transform of {id} failed: {source}")]
    PostProcess {
        /// Document id whose transform failed.
        id: String,
        #[source]
        source: ScriptError,
    },

    /// Build-wide hook failed.
    #[error("{point} hook #{index}{} failed: {source}", registered_by_suffix(.id.as_deref()))]
    Hook {
        /// Hook point being triggered.
        point: HookPoint,
        /// Position of the failing hook in registration order.
        index: usize,
        /// Document whose initializer registered the hook, if any.
        id: Option<String>,
        #[source]
        source: ScriptError,
    },

    /// Template engine error while preparing or rendering.
    #[error("Template error in {id}: {source}")]
    Template {
        /// Document id.
        id: String,
        #[source]
        source: minijinja::Error,
    },

    /// Filesystem error.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn referenced_by_suffix(referenced_by: Option<&str>) -> String {
    referenced_by.map_or_else(String::new, |id| format!(" referenced by {id}"))
}

fn registered_by_suffix(id: Option<&str>) -> String {
    id.map_or_else(String::new, |id| format!(" (registered by {id})"))
}

impl BuildError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Cycle { .. } => ErrorKind::Cycle,
            Self::UnknownTemplate { .. } | Self::InvalidState { .. } => ErrorKind::Lookup,
            Self::Script { .. } | Self::PostProcess { .. } | Self::Hook { .. } => {
                ErrorKind::Script
            }
            Self::Template { .. } => ErrorKind::Render,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Id of the document the error is attributed to, if any.
    #[must_use]
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::Parse { id, .. }
            | Self::Cycle { id, .. }
            | Self::InvalidState { id, .. }
            | Self::Script { id, .. }
            | Self::PostProcess { id, .. }
            | Self::Template { id, .. } => Some(id),
            Self::UnknownTemplate { referenced_by, .. } => referenced_by.as_deref(),
            Self::Hook { id, .. } => id.as_deref(),
            Self::Io { .. } => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
