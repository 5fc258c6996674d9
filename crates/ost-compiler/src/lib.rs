//! Document compiler for the ost static site generator.
//!
//! This crate provides:
//! - [`CompiledUnit`]: one source document, compiled and rendered
//! - [`TemplateRegistry`]: template-scope documents, parents before children
//! - [`Site`]: complete build passes over a source and template root
//!
//! # Quick Start
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use ost_compiler::{Site, SitePaths};
//!
//! let mut site = Site::new(SitePaths::new("src", "dst", "templates"));
//! let report = site.render()?;
//! println!("{} pages", report.pages);
//! # Ok(())
//! # }
//! ```

mod context;
mod engine;
mod error;
mod markdown;
mod paths;
mod registry;
mod script;
mod site;
mod unit;

pub use context::{BuildContext, Hook, HookName, HookPoint, HookRegistry, PersistentData};
pub use engine::{Namespace, Rendered, TemplateEngine, TemplateHandle};
pub use error::{BuildError, ErrorKind};
pub use markdown::{MarkdownConverter, PulldownConverter, parser_options};
pub use paths::SitePaths;
pub use registry::TemplateRegistry;
pub use script::{Initializer, MARKDOWN, PERSISTENT, PostProcess, Script, ScriptError, THIS};
pub use site::{BuildReport, FileHandler, SetupFn, Site};
pub use unit::{CompiledUnit, RootKind, UnitState};
