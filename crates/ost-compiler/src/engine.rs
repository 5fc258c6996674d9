//! Template engine wrapper.
//!
//! Every document with template text is registered with one shared
//! [`minijinja::Environment`] under a handle name. Template-scope units use
//! their id as the handle so `{% extends "base" %}` resolves to the compiled
//! `base` template; pages are registered under `@page/<id>` so a page can
//! never be extended or shadow a template.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use minijinja::{AutoEscape, Environment, Value};

use crate::unit::RootKind;

/// Data namespace of a compiled unit.
pub type Namespace = BTreeMap<String, Value>;

/// Prefix of page handle names.
const PAGE_HANDLE_PREFIX: &str = "@page/";

/// Name of a template registered with the engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TemplateHandle(String);

impl TemplateHandle {
    /// Handle name for a document.
    #[must_use]
    pub fn for_document(kind: RootKind, id: &str) -> Self {
        match kind {
            RootKind::Template => Self(id.to_owned()),
            RootKind::Page => Self(format!("{PAGE_HANDLE_PREFIX}{id}")),
        }
    }

    /// Name the template is registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output of a template render.
#[derive(Debug)]
pub struct Rendered {
    /// Rendered text.
    pub output: String,
    /// Top-level variables the template set, as a map value.
    pub module: Value,
}

/// Shared template environment for one build pass.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create an engine without a filesystem loader.
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::None);
        Self { env }
    }

    /// Create an engine that can also `{% include %}` raw files below `root`.
    ///
    /// Compiled documents always take precedence over loader lookups.
    #[must_use]
    pub fn with_include_root(root: &Path) -> Self {
        let mut engine = Self::new();
        engine.env.set_loader(minijinja::path_loader(root));
        engine
    }

    /// Compile template text and register it under `handle`.
    ///
    /// Replaces any template previously registered under the same handle.
    pub fn prepare(
        &mut self,
        handle: TemplateHandle,
        source: String,
    ) -> Result<TemplateHandle, minijinja::Error> {
        self.env.add_template_owned(handle.0.clone(), source)?;
        Ok(handle)
    }

    /// Render a prepared template with `context`.
    pub fn render(
        &self,
        handle: &TemplateHandle,
        context: &Namespace,
    ) -> Result<Rendered, minijinja::Error> {
        let template = self.env.get_template(handle.name())?;
        let (output, state) = template.render_and_return_state(namespace_value(context))?;
        let module = state
            .exports()
            .into_iter()
            .filter_map(|name| state.lookup(name).map(|value| (name.to_owned(), value)))
            .collect::<Value>();
        Ok(Rendered { output, module })
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateEngine")
            .field(
                "templates",
                &self.env.templates().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Namespace as a template context value.
pub(crate) fn namespace_value(namespace: &Namespace) -> Value {
    namespace
        .iter()
        .map(|(name, value)| (name.as_str(), value.clone()))
        .collect()
}
