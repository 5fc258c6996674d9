//! Build orchestration.
//!
//! A [`Site`] runs complete build passes:
//!
//! 1. Create a fresh [`BuildContext`] seeded with the configured `[data]`
//!    table, then run registered setup callbacks.
//! 2. Load every template.
//! 3. Walk the source root in sorted order. Documents are compiled and
//!    queued; every other file is copied to the destination unchanged.
//! 4. Trigger `pre_render`, render the queue in order, trigger `post_render`.
//!
//! The first error aborts the pass. Files already written stay on disk.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use minijinja::Value;
use ost_config::{Config, MarkdownExtension};

use crate::context::{BuildContext, HookPoint};
use crate::engine::TemplateEngine;
use crate::error::BuildError;
use crate::markdown::PulldownConverter;
use crate::paths::{SitePaths, document_id, scan_files};
use crate::registry::TemplateRegistry;
use crate::unit::{CompiledUnit, RootKind};

/// Callback run against every new [`BuildContext`] before templates load.
pub type SetupFn = Box<dyn Fn(&mut BuildContext) -> Result<(), BuildError> + Send>;

/// How a file under the source root is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileHandler {
    /// Compiled and rendered as a page.
    Document,
    /// Copied to the destination byte for byte.
    Static,
}

/// Summary of a completed build pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Pages compiled and rendered.
    pub pages: usize,
    /// Templates loaded.
    pub templates: usize,
    /// Static files copied.
    pub static_files: usize,
}

/// Builds a site from its source and template roots.
pub struct Site {
    paths: SitePaths,
    markdown_extensions: Vec<MarkdownExtension>,
    data: toml::Table,
    handlers: HashMap<String, FileHandler>,
    setup: Vec<SetupFn>,
    templates: TemplateRegistry,
    compiled: Vec<CompiledUnit>,
}

impl Site {
    /// Create a site over `paths` with default markdown options and no data.
    #[must_use]
    pub fn new(paths: SitePaths) -> Self {
        let handlers = HashMap::from([(
            paths.source_extension.to_ascii_lowercase(),
            FileHandler::Document,
        )]);
        Self {
            paths,
            markdown_extensions: Vec::new(),
            data: toml::Table::new(),
            handlers,
            setup: Vec::new(),
            templates: TemplateRegistry::new(),
            compiled: Vec::new(),
        }
    }

    /// Create a site from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(SitePaths::from_config(config))
            .with_markdown_extensions(config.markdown.extensions.clone())
            .with_data(config.data.clone())
    }

    /// Enable markdown extensions.
    #[must_use]
    pub fn with_markdown_extensions(mut self, extensions: Vec<MarkdownExtension>) -> Self {
        self.markdown_extensions = extensions;
        self
    }

    /// Seed persistent data at the start of every pass.
    #[must_use]
    pub fn with_data(mut self, data: toml::Table) -> Self {
        self.data = data;
        self
    }

    /// Handle files with `extension` (case-insensitive, without the dot).
    #[must_use]
    pub fn with_handler(mut self, extension: &str, handler: FileHandler) -> Self {
        self.handlers.insert(extension.to_ascii_lowercase(), handler);
        self
    }

    /// Run `setup` against every new build context.
    ///
    /// Hooks attached here are registered before any document compiles, so
    /// they run ahead of document hooks at the same point.
    #[must_use]
    pub fn with_setup(
        mut self,
        setup: impl Fn(&mut BuildContext) -> Result<(), BuildError> + Send + 'static,
    ) -> Self {
        self.setup.push(Box::new(setup));
        self
    }

    /// Site roots.
    #[must_use]
    pub fn paths(&self) -> &SitePaths {
        &self.paths
    }

    /// Templates loaded by the last pass.
    #[must_use]
    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Pages compiled by the last pass, in build order.
    #[must_use]
    pub fn compiled(&self) -> &[CompiledUnit] {
        &self.compiled
    }

    /// Handler for a source-root-relative file.
    #[must_use]
    pub fn handler_for(&self, path: &Path) -> FileHandler {
        path.extension()
            .and_then(|ext| self.handlers.get(&ext.to_string_lossy().to_ascii_lowercase()))
            .copied()
            .unwrap_or(FileHandler::Static)
    }

    /// Run one complete build pass.
    pub fn render(&mut self) -> Result<BuildReport, BuildError> {
        let start = Instant::now();
        self.compiled.clear();
        let mut ctx = self.new_context()?;

        tracing::info!(root = %self.paths.template_dir.display(), "Loading templates");
        let templates = self.templates.load_templates(&mut ctx)?;

        tracing::info!(root = %self.paths.source_dir.display(), "Compiling documents");
        let files = scan_files(&self.paths.source_dir)
            .map_err(|e| BuildError::io(&self.paths.source_dir, e))?;
        let mut static_files = 0;
        for relative in &files {
            match self.handler_for(relative) {
                FileHandler::Document => {
                    let mut unit = CompiledUnit::new(document_id(relative), RootKind::Page);
                    unit.load(&self.paths.source_dir.join(relative))?;
                    unit.compile(&mut ctx, &self.templates)?;
                    self.compiled.push(unit);
                }
                FileHandler::Static => {
                    self.copy_static(relative)?;
                    static_files += 1;
                }
            }
        }

        tracing::info!(pages = self.compiled.len(), "Rendering documents");
        ctx.trigger(HookPoint::PreRender)?;
        for unit in &mut self.compiled {
            unit.render(&ctx, &self.templates)?;
        }
        ctx.trigger(HookPoint::PostRender)?;

        let report = BuildReport {
            pages: self.compiled.len(),
            templates,
            static_files,
        };
        tracing::info!(
            pages = report.pages,
            templates = report.templates,
            static_files = report.static_files,
            elapsed_ms = start.elapsed().as_millis(),
            "Build complete"
        );
        Ok(report)
    }

    fn new_context(&self) -> Result<BuildContext, BuildError> {
        let engine = TemplateEngine::with_include_root(&self.paths.template_dir);
        let markdown = PulldownConverter::from_extensions(&self.markdown_extensions);
        let mut ctx = BuildContext::new(self.paths.clone(), engine, Box::new(markdown));

        for (key, value) in &self.data {
            ctx.persistent().set(key.as_str(), Value::from_serialize(value));
        }
        for setup in &self.setup {
            setup(&mut ctx)?;
        }
        Ok(ctx)
    }

    fn copy_static(&self, relative: &Path) -> Result<(), BuildError> {
        let source = self.paths.source_dir.join(relative);
        let destination = self.paths.destination_dir.join(relative);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        fs::copy(&source, &destination).map_err(|e| BuildError::io(&source, e))?;
        tracing::debug!(path = %relative.display(), "Copied static file");
        Ok(())
    }
}

impl std::fmt::Debug for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Site")
            .field("paths", &self.paths)
            .field("markdown_extensions", &self.markdown_extensions)
            .field("handlers", &self.handlers)
            .field("setup", &self.setup.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::ErrorKind;
    use crate::markdown::MarkdownConverter;
    use pretty_assertions::assert_eq;

    static_assertions::assert_impl_all!(super::Site: Send);

    struct Fixture {
        _temp_dir: tempfile::TempDir,
        root: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = tempfile::tempdir().unwrap();
            let root = temp_dir.path().to_path_buf();
            fs::create_dir_all(root.join("src")).unwrap();
            fs::create_dir_all(root.join("templates")).unwrap();
            Self {
                _temp_dir: temp_dir,
                root,
            }
        }

        fn write(&self, relative: &str, content: impl AsRef<[u8]>) {
            let path = self.root.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn read(&self, relative: &str) -> String {
            fs::read_to_string(self.root.join(relative)).unwrap()
        }

        fn site(&self) -> Site {
            Site::new(SitePaths::new(
                self.root.join("src"),
                self.root.join("dst"),
                self.root.join("templates"),
            ))
        }
    }

    #[test]
    fn test_hello_world() {
        let fixture = Fixture::new();
        fixture.write(
            "src/index.ost",
            "% init\nname = \"World\"\n% template\nHello {{ name }}",
        );

        let report = fixture.site().render().unwrap();

        assert_eq!(fixture.read("dst/index.html"), "Hello World");
        assert_eq!(
            report,
            BuildReport {
                pages: 1,
                templates: 0,
                static_files: 0
            }
        );
    }

    #[test]
    fn test_markdown_only_page() {
        let fixture = Fixture::new();
        fixture.write("src/doc.ost", "% markdown\n# Title");

        fixture.site().render().unwrap();

        let mut converter = PulldownConverter::default();
        converter.reset();
        assert_eq!(fixture.read("dst/doc.html"), converter.convert("# Title"));
    }

    #[test]
    fn test_render_is_idempotent() {
        let fixture = Fixture::new();
        fixture.write("templates/base.ost", "<html>{% block body %}{% endblock %}</html>");
        fixture.write(
            "src/a.ost",
            "% extends base\n% init\npersistent.pages += this.id\n% template\n{% block body %}{{ persistent.pages | join(',') }}{% endblock %}",
        );
        fixture.write("src/b.ost", "% init\npersistent.pages += this.id\n% template\nb");
        let mut site = fixture.site();

        site.render().unwrap();
        let first = fixture.read("dst/a.html");
        site.render().unwrap();
        let second = fixture.read("dst/a.html");

        assert_eq!(first, "<html>a,b</html>");
        assert_eq!(first, second);
    }

    #[test]
    fn test_three_level_inheritance() {
        let fixture = Fixture::new();
        fixture.write(
            "templates/c.ost",
            "% init\nlevel = \"C\"\nfrom_c = \"c\"\n% template\n<c>{% block body %}{% endblock %}</c>",
        );
        fixture.write(
            "templates/b.ost",
            "% extends c\n% init\nfrom_b = level ~ \"b\"\nlevel = \"B\"\n% template\n{% block body %}<b>{% block inner %}{% endblock %}</b>{% endblock %}",
        );
        fixture.write(
            "src/a.ost",
            "% extends b\n% init\nlevel = \"A\"\n% template\n{% block inner %}<a>{{ level }}-{{ from_c }}-{{ from_b }}</a>{% endblock %}",
        );
        let mut site = fixture.site();

        site.render().unwrap();

        assert_eq!(fixture.read("dst/a.html"), "<c><b><a>A-c-Cb</a></b></c>");
        let page = &site.compiled()[0];
        assert_eq!(page.ancestors(), ["b".to_owned(), "c".to_owned()]);
        assert_eq!(site.templates().len(), 2);
    }

    #[test]
    fn test_child_without_template_renders_parent_layout() {
        let fixture = Fixture::new();
        fixture.write("templates/base.ost", "<main>{{ markdown }}</main>");
        fixture.write("src/post.ost", "% extends base\n% markdown\nhello");

        fixture.site().render().unwrap();

        assert_eq!(fixture.read("dst/post.html"), "<main><p>hello</p>\n</main>");
    }

    #[test]
    fn test_post_process_runs_root_first() {
        let fixture = Fixture::new();
        fixture.write("templates/c.ost", "% init\nhook post_process {{ output }}|C\n% template\nx");
        fixture.write("templates/b.ost", "% extends c\n% init\nhook post_process {{ output }}|B");
        fixture.write("src/a.ost", "% extends b\n% init\nhook post_process {{ output }}|A");

        fixture.site().render().unwrap();

        assert_eq!(fixture.read("dst/a.html"), "x|C|B|A");
    }

    #[test]
    fn test_cycle_fails_build() {
        let fixture = Fixture::new();
        fixture.write("templates/a.ost", "% extends b\n");
        fixture.write("templates/b.ost", "% extends a\n");
        fixture.write("src/index.ost", "hi");

        let err = fixture.site().render().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cycle);
        assert!(!fixture.root.join("dst/index.html").exists());
    }

    #[test]
    fn test_missing_parent_never_writes_destination() {
        let fixture = Fixture::new();
        fixture.write("src/orphan.ost", "% extends missing\nbody");

        let err = fixture.site().render().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Lookup);
        assert_eq!(err.document_id(), Some("orphan"));
        assert!(!fixture.root.join("dst/orphan.html").exists());
    }

    #[test]
    fn test_static_files_copied_byte_for_byte() {
        let fixture = Fixture::new();
        let bytes = [0x89_u8, 0x50, 0x4e, 0x47, 0x00, 0xff, 0x10];
        fixture.write("src/img/logo.png", bytes);
        fixture.write("src/style.css", "body{}");

        let report = fixture.site().render().unwrap();

        assert_eq!(fs::read(fixture.root.join("dst/img/logo.png")).unwrap(), bytes);
        assert_eq!(fixture.read("dst/style.css"), "body{}");
        assert_eq!(report.static_files, 2);
        assert_eq!(report.pages, 0);
    }

    #[test]
    fn test_extension_matching_is_case_insensitive() {
        let fixture = Fixture::new();
        fixture.write("src/UPPER.OST", "upper");

        fixture.site().render().unwrap();

        assert_eq!(fixture.read("dst/UPPER.html"), "upper");
    }

    #[test]
    fn test_custom_handler_overrides_default() {
        let fixture = Fixture::new();
        fixture.write("src/raw.ost", "{{ not rendered }}");

        fixture
            .site()
            .with_handler("ost", FileHandler::Static)
            .render()
            .unwrap();

        assert_eq!(fixture.read("dst/raw.ost"), "{{ not rendered }}");
        assert!(!fixture.root.join("dst/raw.html").exists());
    }

    #[test]
    fn test_pre_render_hook_sees_every_compiled_page() {
        let fixture = Fixture::new();
        fixture.write(
            "src/a.ost",
            "% init\npersistent.pages += this.url\nhook pre_render persistent.count = persistent.pages | length\n% template\n{{ persistent.count }}",
        );
        fixture.write("src/b.ost", "% init\npersistent.pages += this.url");

        fixture.site().render().unwrap();

        assert_eq!(fixture.read("dst/a.html"), "2");
    }

    #[test]
    fn test_setup_hooks_and_data_seed() {
        let fixture = Fixture::new();
        fixture.write("src/index.ost", "{{ persistent.site_name }}");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let mut data = toml::Table::new();
        data.insert("site_name".to_owned(), toml::Value::String("Docs".to_owned()));

        let mut site = fixture.site().with_data(data).with_setup(move |ctx| {
            let recorder = Arc::clone(&recorder);
            let persistent = ctx.persistent().clone();
            ctx.attach_hook(
                HookPoint::PostRender,
                Box::new(move || {
                    let name = persistent.get("site_name").map(|v| v.to_string());
                    recorder.lock().unwrap().push(name);
                    Ok(())
                }),
            );
            Ok(())
        });

        site.render().unwrap();
        site.render().unwrap();

        assert_eq!(fixture.read("dst/index.html"), "Docs");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("Docs".to_owned()), Some("Docs".to_owned())]
        );
    }

    #[test]
    fn test_persistent_data_resets_between_passes() {
        let fixture = Fixture::new();
        fixture.write(
            "src/index.ost",
            "% init\npersistent.visits += 1\n% template\n{{ persistent.visits | length }}",
        );
        let mut site = fixture.site();

        site.render().unwrap();
        site.render().unwrap();

        assert_eq!(fixture.read("dst/index.html"), "1");
    }

    #[test]
    fn test_markdown_state_does_not_leak_between_pages() {
        let fixture = Fixture::new();
        fixture.write("src/a.ost", "% markdown\nalpha");
        fixture.write("src/b.ost", "% markdown\nbeta");

        fixture.site().render().unwrap();

        assert_eq!(fixture.read("dst/b.html"), "<p>beta</p>\n");
    }

    #[test]
    fn test_this_extends_in_templates() {
        let fixture = Fixture::new();
        fixture.write("templates/base.ost", "{% if this.extends('base') %}child{% else %}root{% endif %}");
        fixture.write("src/page.ost", "% extends base");

        fixture.site().render().unwrap();

        assert_eq!(fixture.read("dst/page.html"), "child");
    }

    #[test]
    fn test_failing_hook_aborts_pass() {
        let fixture = Fixture::new();
        fixture.write("src/index.ost", "x");
        let mut site = fixture.site().with_setup(|ctx| {
            ctx.attach_hook(
                HookPoint::PreRender,
                Box::new(|| Err(crate::ScriptError::Custom("nope".to_owned()))),
            );
            Ok(())
        });

        let err = site.render().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Script);
        assert!(!fixture.root.join("dst/index.html").exists());
    }

    #[test]
    fn test_failing_document_hook_names_document() {
        let fixture = Fixture::new();
        fixture.write("src/index.ost", "fine");
        fixture.write(
            "src/broken.ost",
            "% init\nhook pre_render persistent.n = nope()\n% template\nx",
        );

        let err = fixture.site().render().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Script);
        assert_eq!(err.document_id(), Some("broken"));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_from_config_uses_extensions_and_data() {
        let fixture = Fixture::new();
        let mut config = Config::default_with_base(&fixture.root);
        config.build.output_extension = "htm".to_owned();
        config.data.insert("n".to_owned(), toml::Value::Integer(3));
        fixture.write("src/i.ost", "{{ persistent.n * 2 }}");

        Site::from_config(&config).render().unwrap();

        assert_eq!(fixture.read("dst/i.htm"), "6");
    }
}
