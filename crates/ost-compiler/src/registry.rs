//! Template registry.
//!
//! Loads every document under the template root, compiling each parent
//! before its children. Imports are tracked on a stack so that a template
//! reached again while its own import is still in progress is reported as a
//! cycle before any document in the cycle runs its initializer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::paths::{document_id, scan_files};
use crate::unit::{CompiledUnit, RootKind};

/// Compiled template-scope units, keyed by id.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, CompiledUnit>,
    sources: HashMap<String, PathBuf>,
    importing: Vec<String>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard every template and import every document under the template
    /// root, in sorted path order.
    ///
    /// Returns the number of templates loaded.
    pub fn load_templates(&mut self, ctx: &mut BuildContext) -> Result<usize, BuildError> {
        self.clear();
        let paths = ctx.paths();
        let mut ids = Vec::new();
        for relative in scan_files(&paths.template_dir)
            .map_err(|e| BuildError::io(&paths.template_dir, e))?
        {
            if paths.is_document(&relative) {
                let id = document_id(&relative);
                self.sources
                    .insert(id.clone(), paths.template_dir.join(relative));
                ids.push(id);
            }
        }

        for id in &ids {
            self.import_template(id, ctx)?;
        }

        tracing::debug!(count = self.templates.len(), "Loaded templates");
        Ok(self.templates.len())
    }

    /// Import template `id` and, first, its ancestors.
    ///
    /// Already-imported templates are skipped.
    pub fn import_template(&mut self, id: &str, ctx: &mut BuildContext) -> Result<(), BuildError> {
        if self.templates.contains_key(id) {
            return Ok(());
        }
        if let Some(start) = self.importing.iter().position(|i| i == id) {
            let mut chain = self.importing[start..].to_vec();
            chain.push(id.to_owned());
            return Err(BuildError::Cycle {
                id: id.to_owned(),
                chain,
            });
        }
        let path = self
            .sources
            .get(id)
            .cloned()
            .unwrap_or_else(|| ctx.paths().document_path(RootKind::Template, id));
        if !path.is_file() {
            return Err(BuildError::UnknownTemplate {
                name: id.to_owned(),
                referenced_by: self.importing.last().cloned(),
            });
        }

        self.importing.push(id.to_owned());
        let result = self.compile_template(id, &path, ctx);
        self.importing.pop();

        self.templates.insert(id.to_owned(), result?);
        Ok(())
    }

    fn compile_template(
        &mut self,
        id: &str,
        path: &Path,
        ctx: &mut BuildContext,
    ) -> Result<CompiledUnit, BuildError> {
        let mut unit = CompiledUnit::new(id, RootKind::Template);
        unit.load(path)?;
        if let Some(parent) = unit.declared_parent().map(str::to_owned) {
            self.import_template(&parent, ctx)?;
        }
        unit.compile(ctx, self)?;
        Ok(unit)
    }

    /// Compiled template `id`.
    pub fn get_template(&self, id: &str) -> Result<&CompiledUnit, BuildError> {
        self.templates
            .get(id)
            .ok_or_else(|| BuildError::UnknownTemplate {
                name: id.to_owned(),
                referenced_by: None,
            })
    }

    /// Whether template `id` is loaded.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    /// Number of loaded templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether no templates are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Loaded template ids in sorted order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    fn clear(&mut self) {
        self.templates.clear();
        self.sources.clear();
        self.importing.clear();
    }
}
