//! Compiled documents.
//!
//! A [`CompiledUnit`] moves through a fixed lifecycle:
//!
//! ```text
//! Created --load/parse--> Parsed --compile--> Compiled --render--> Rendered
//! ```
//!
//! Compilation resolves the parent template, builds the data namespace
//! (inherited from the parent, then extended by the document's own
//! initializer), converts markdown, and registers the template text with the
//! engine. Rendering produces output text, runs post-process transforms from
//! the root template down to the document itself, and writes the result.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use minijinja::value::{Enumerator, Object, from_args};
use minijinja::{State, Value};
use ost_document::SourceDocument;

use crate::context::BuildContext;
use crate::engine::{Namespace, TemplateHandle};
use crate::error::BuildError;
use crate::paths::write_file;
use crate::registry::TemplateRegistry;
use crate::script::{MARKDOWN, PERSISTENT, PostProcess, Script, THIS};

/// Root a document was loaded from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RootKind {
    /// Page under the source root; rendered to the destination root.
    Page,
    /// Template under the template root; only ever extended.
    Template,
}

impl RootKind {
    /// Lowercase name exposed to templates as `this.kind`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Template => "template",
        }
    }
}

/// Lifecycle state of a [`CompiledUnit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitState {
    /// Identity known, source not parsed.
    Created,
    /// Source parsed.
    Parsed,
    /// Namespace built and template prepared.
    Compiled,
    /// Output written.
    Rendered,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Parsed => "parsed",
            Self::Compiled => "compiled",
            Self::Rendered => "rendered",
        })
    }
}

/// The `this` variable seen by templates and initializers.
#[derive(Debug)]
struct UnitHandle {
    id: String,
    kind: RootKind,
    url: Option<String>,
    ancestors: Vec<String>,
    markdown: Option<String>,
}

impl UnitHandle {
    const FIELDS: &'static [&'static str] = &["id", "kind", "url", "parent", "ancestors", "markdown"];
}

impl Object for UnitHandle {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let value = match key.as_str()? {
            "id" => Value::from(self.id.as_str()),
            "kind" => Value::from(self.kind.as_str()),
            "url" => self.url.as_deref().map_or(Value::from(()), Value::from),
            "parent" => self.ancestors.first().map_or(Value::from(()), |p| Value::from(p.as_str())),
            "ancestors" => Value::from(self.ancestors.clone()),
            "markdown" => self.markdown.as_deref().map_or(Value::from(()), Value::from),
            _ => return None,
        };
        Some(value)
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(Self::FIELDS)
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, minijinja::Error> {
        match method {
            "extends" => {
                let (name,): (&str,) = from_args(args)?;
                Ok(Value::from(self.ancestors.iter().any(|a| a == name)))
            }
            _ => Err(minijinja::Error::from(minijinja::ErrorKind::UnknownMethod)),
        }
    }
}

/// A source document and everything compiled from it.
pub struct CompiledUnit {
    id: String,
    kind: RootKind,
    state: UnitState,
    document: Option<SourceDocument>,
    parent: Option<String>,
    ancestors: Vec<String>,
    data: Namespace,
    markdown: Option<String>,
    template: Option<TemplateHandle>,
    post_process: Option<PostProcess>,
}

impl CompiledUnit {
    /// Create a unit for document `id` under the `kind` root.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: RootKind) -> Self {
        Self {
            id: id.into(),
            kind,
            state: UnitState::Created,
            document: None,
            parent: None,
            ancestors: Vec::new(),
            data: Namespace::new(),
            markdown: None,
            template: None,
            post_process: None,
        }
    }

    /// Read and parse the document's source file.
    pub fn load(&mut self, path: &Path) -> Result<(), BuildError> {
        let content = fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
        self.parse(&content)
    }

    /// Parse document content.
    pub fn parse(&mut self, content: &str) -> Result<(), BuildError> {
        self.expect_state(UnitState::Created, "parse")?;
        let document = SourceDocument::parse(content).map_err(|source| BuildError::Parse {
            id: self.id.clone(),
            source,
        })?;
        self.document = Some(document);
        self.state = UnitState::Parsed;
        Ok(())
    }

    /// Parent template declared by the parsed source.
    ///
    /// Available between parsing and compilation; use [`parent`](Self::parent)
    /// afterwards.
    #[must_use]
    pub fn declared_parent(&self) -> Option<&str> {
        self.document.as_ref().and_then(SourceDocument::extends)
    }

    /// Compile the parsed document.
    ///
    /// The parent template must already be present in `templates`.
    pub fn compile(
        &mut self,
        ctx: &mut BuildContext,
        templates: &TemplateRegistry,
    ) -> Result<(), BuildError> {
        self.expect_state(UnitState::Parsed, "compile")?;
        let Some(document) = self.document.take() else {
            return Err(self.invalid_state("compile"));
        };
        tracing::debug!(id = %self.id, kind = self.kind.as_str(), "Compiling document");

        let parent = match document.extends() {
            Some(name) => Some(templates.get_template(name).map_err(|_| {
                BuildError::UnknownTemplate {
                    name: name.to_owned(),
                    referenced_by: Some(self.id.clone()),
                }
            })?),
            None => None,
        };

        let mut data = parent.map(|p| p.data.clone()).unwrap_or_default();
        let ancestors = parent.map_or_else(Vec::new, |p| {
            std::iter::once(p.id.clone())
                .chain(p.ancestors.iter().cloned())
                .collect()
        });
        let template_text = compose_template(
            parent.and_then(|p| p.template.as_ref()),
            document.template(),
        );

        let markdown = document.markdown().map(|source| ctx.convert_markdown(source));
        let handle = UnitHandle {
            id: self.id.clone(),
            kind: self.kind,
            url: (self.kind == RootKind::Page).then(|| ctx.paths().url(&self.id)),
            ancestors: ancestors.clone(),
            markdown: markdown.clone(),
        };
        data.insert(PERSISTENT.to_owned(), ctx.persistent().to_value());
        data.insert(THIS.to_owned(), Value::from_object(handle));
        match &markdown {
            Some(html) => data.insert(MARKDOWN.to_owned(), Value::from(html.as_str())),
            None => data.remove(MARKDOWN),
        };

        if let Some(source) = document.init() {
            let script_error = |source| BuildError::Script {
                id: self.id.clone(),
                source,
            };
            let script = Script::parse(source).map_err(script_error)?;
            self.post_process = ctx
                .run_init(&self.id, &script, &mut data)
                .map_err(script_error)?;
        }

        if let Some(text) = template_text {
            let handle = TemplateHandle::for_document(self.kind, &self.id);
            let handle = ctx
                .engine_mut()
                .prepare(handle, text)
                .map_err(|source| BuildError::Template {
                    id: self.id.clone(),
                    source,
                })?;
            self.template = Some(handle);
        }

        self.parent = parent.map(|p| p.id.clone());
        self.ancestors = ancestors;
        self.data = data;
        self.markdown = markdown;
        self.state = UnitState::Compiled;
        Ok(())
    }

    /// Produce the final output text without writing it.
    ///
    /// With a template, the output is the rendered template. Without one it
    /// is the converted markdown, or empty. Post-process transforms then run
    /// from the root template down to this unit; a transform returning
    /// nothing keeps the current output.
    pub fn render_output(
        &self,
        ctx: &BuildContext,
        templates: &TemplateRegistry,
    ) -> Result<String, BuildError> {
        if !matches!(self.state, UnitState::Compiled | UnitState::Rendered) {
            return Err(self.invalid_state("render"));
        }

        let (output, module) = match &self.template {
            Some(handle) => {
                let rendered =
                    ctx.engine()
                        .render(handle, &self.data)
                        .map_err(|source| BuildError::Template {
                            id: self.id.clone(),
                            source,
                        })?;
                (rendered.output, rendered.module)
            }
            None => (
                self.markdown.clone().unwrap_or_default(),
                Value::from(Namespace::new()),
            ),
        };

        self.apply_post_process(output, &module, templates)
    }

    /// Render and write the output to the destination root.
    ///
    /// Returns the written path.
    pub fn render(
        &mut self,
        ctx: &BuildContext,
        templates: &TemplateRegistry,
    ) -> Result<PathBuf, BuildError> {
        self.expect_state(UnitState::Compiled, "render")?;
        let output = self.render_output(ctx, templates)?;
        let destination = ctx.paths().output_path(&self.id);
        write_file(&destination, output).map_err(|e| BuildError::io(&destination, e))?;
        tracing::debug!(id = %self.id, path = %destination.display(), "Rendered document");
        self.state = UnitState::Rendered;
        Ok(destination)
    }

    fn apply_post_process(
        &self,
        mut output: String,
        module: &Value,
        templates: &TemplateRegistry,
    ) -> Result<String, BuildError> {
        if let Some(parent) = &self.parent {
            output = templates
                .get_template(parent)?
                .apply_post_process(output, module, templates)?;
        }
        if let Some(transform) = &self.post_process {
            let replaced = transform(&output, module).map_err(|source| BuildError::PostProcess {
                id: self.id.clone(),
                source,
            })?;
            if let Some(replaced) = replaced {
                output = replaced;
            }
        }
        Ok(output)
    }

    /// Register the output transform, replacing any existing one.
    pub fn set_post_process(&mut self, transform: PostProcess) {
        if self.post_process.is_some() {
            tracing::warn!(id = %self.id, "Replacing post_process hook");
        }
        self.post_process = Some(transform);
    }

    /// Whether this unit's ancestor chain contains `name`.
    #[must_use]
    pub fn extends(&self, name: &str) -> bool {
        self.ancestors.iter().any(|a| a == name)
    }

    /// Document id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Root the document belongs to.
    #[must_use]
    pub fn kind(&self) -> RootKind {
        self.kind
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Resolved parent template id.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Ancestor ids, nearest first.
    #[must_use]
    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// Data namespace.
    #[must_use]
    pub fn data(&self) -> &Namespace {
        &self.data
    }

    /// Namespace variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Converted markdown.
    #[must_use]
    pub fn markdown(&self) -> Option<&str> {
        self.markdown.as_deref()
    }

    /// Prepared template handle.
    #[must_use]
    pub fn template(&self) -> Option<&TemplateHandle> {
        self.template.as_ref()
    }

    fn expect_state(&self, expected: UnitState, operation: &'static str) -> Result<(), BuildError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> BuildError {
        BuildError::InvalidState {
            id: self.id.clone(),
            operation,
            state: self.state,
        }
    }
}

impl fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("parent", &self.parent)
            .field("template", &self.template)
            .field("post_process", &self.post_process.is_some())
            .finish_non_exhaustive()
    }
}

/// Template text for a unit: an `extends` of the parent's template followed
/// by the unit's own text.
///
/// A unit whose parent has a template always gets one, even with no template
/// section of its own, so it renders through the parent layout.
fn compose_template(parent: Option<&TemplateHandle>, own: Option<&str>) -> Option<String> {
    match parent {
        Some(parent) => Some(format!(
            "{{% extends {} %}}\n{}",
            string_literal(parent.name()),
            own.unwrap_or_default()
        )),
        None => own.map(str::to_owned),
    }
}

fn string_literal(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}
