//! Configuration management for ost.
//!
//! Parses `ost.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! CLI settings can be applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! String values support `${VAR}` and `${VAR:-default}`. Expanded fields:
//! - `paths.source`
//! - `paths.destination`
//! - `paths.templates`
//! - `server.host`
//!
//! ## Example
//!
//! ```toml
//! [paths]
//! source = "src"
//! destination = "dst"
//! templates = "templates"
//!
//! [build]
//! source_extension = "ost"
//! output_extension = "html"
//!
//! [markdown]
//! extensions = ["tables", "footnotes"]
//!
//! [data]
//! site_name = "My site"
//! ```

mod expand;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override source root.
    pub source_dir: Option<PathBuf>,
    /// Override destination root.
    pub destination_dir: Option<PathBuf>,
    /// Override template root.
    pub template_dir: Option<PathBuf>,
    /// Override server host.
    pub host: Option<String>,
    /// Override server port.
    pub port: Option<u16>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "ost.toml";

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directories (relative strings from TOML).
    paths: PathsConfigRaw,
    /// Document and output extensions.
    pub build: BuildConfig,
    /// Markdown converter options.
    pub markdown: MarkdownConfig,
    /// Development server configuration.
    pub server: ServerConfig,
    /// Directory watcher configuration.
    pub watch: WatchConfig,
    /// Extra data seeded into the persistent mapping of every build pass.
    pub data: toml::Table,

    /// Resolved root directories (set after loading).
    #[serde(skip)]
    pub paths_resolved: PathsConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// Raw root directories as parsed from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PathsConfigRaw {
    source: Option<String>,
    destination: Option<String>,
    templates: Option<String>,
}

/// Resolved root directories.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PathsConfig {
    /// Documents and static assets.
    pub source_dir: PathBuf,
    /// Rendered output.
    pub destination_dir: PathBuf,
    /// Template documents.
    pub template_dir: PathBuf,
}

/// Document and output file extensions (without leading dot).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BuildConfig {
    /// Extension of document files under the source and template roots.
    pub source_extension: String,
    /// Extension given to rendered documents.
    pub output_extension: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source_extension: "ost".to_owned(),
            output_extension: "html".to_owned(),
        }
    }
}

/// Optional Markdown syntax extensions.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum MarkdownExtension {
    /// GFM tables.
    Tables,
    /// Footnote references and definitions.
    Footnotes,
    /// `~~strikethrough~~`.
    Strikethrough,
    /// `- [ ]` task list items.
    Tasklists,
    /// Curly quotes, dashes and ellipses.
    SmartPunctuation,
    /// `{#id .class}` heading attributes.
    HeadingAttributes,
}

/// Markdown converter configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarkdownConfig {
    /// Enabled syntax extensions.
    pub extensions: Vec<MarkdownExtension>,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            extensions: vec![MarkdownExtension::Tables],
        }
    }
}

/// Development server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8000,
        }
    }
}

/// Directory watcher configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Interval between change checks, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
        }
    }
}

impl WatchConfig {
    /// Interval between change checks.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Required root directory does not exist.
    #[error("{name} directory does not exist: {}", path.display())]
    MissingRoot {
        /// Root name ("source" or "templates").
        name: &'static str,
        /// Resolved path.
        path: PathBuf,
    },
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`server.host`").
        field: String,
        /// Error message (e.g., "${`OST_HOST`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Require an extension to be a bare name (no dot, no separator).
fn require_bare_extension(value: &str, field: &str) -> Result<(), ConfigError> {
    require_non_empty(value, field)?;
    if value.contains(['.', '/', '\\']) {
        return Err(ConfigError::Validation(format!(
            "{field} must be a bare extension without dots or separators"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `ost.toml` in current directory and parents.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails,
    /// or validation fails.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }

        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(source_dir) = &settings.source_dir {
            self.paths_resolved.source_dir.clone_from(source_dir);
        }
        if let Some(destination_dir) = &settings.destination_dir {
            self.paths_resolved
                .destination_dir
                .clone_from(destination_dir);
        }
        if let Some(template_dir) = &settings.template_dir {
            self.paths_resolved.template_dir.clone_from(template_dir);
        }
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
    }

    /// Check that the source and template roots exist.
    ///
    /// The destination root is not required; builds create it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRoot`] naming the first missing root.
    pub fn require_roots(&self) -> Result<(), ConfigError> {
        let roots = [
            ("source", &self.paths_resolved.source_dir),
            ("templates", &self.paths_resolved.template_dir),
        ];
        for (name, path) in roots {
            if !path.is_dir() {
                return Err(ConfigError::MissingRoot {
                    name,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    #[must_use]
    pub fn default_with_base(base: &Path) -> Self {
        Self {
            paths: PathsConfigRaw::default(),
            build: BuildConfig::default(),
            markdown: MarkdownConfig::default(),
            server: ServerConfig::default(),
            watch: WatchConfig::default(),
            data: toml::Table::new(),
            paths_resolved: PathsConfig {
                source_dir: base.join("src"),
                destination_dir: base.join("dst"),
                template_dir: base.join("templates"),
            },
            config_path: None,
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_build()?;
        self.validate_server()?;
        self.validate_watch()?;
        Ok(())
    }

    /// Validate document and output extensions.
    fn validate_build(&self) -> Result<(), ConfigError> {
        require_bare_extension(&self.build.source_extension, "build.source_extension")?;
        require_bare_extension(&self.build.output_extension, "build.output_extension")?;

        // Rendered output written next to copied sources would be re-read as documents
        if self
            .build
            .source_extension
            .eq_ignore_ascii_case(&self.build.output_extension)
        {
            return Err(ConfigError::Validation(
                "build.source_extension and build.output_extension must differ".to_owned(),
            ));
        }

        Ok(())
    }

    /// Validate server configuration.
    fn validate_server(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;

        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port cannot be 0".to_owned(),
            ));
        }

        Ok(())
    }

    /// Validate watcher configuration.
    fn validate_watch(&self) -> Result<(), ConfigError> {
        if self.watch.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "watch.poll_interval_ms must be greater than 0".to_owned(),
            ));
        }
        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.server.host = expand::expand_env(&self.server.host, "server.host")?;

        let paths = &mut self.paths;
        for (value, field) in [
            (&mut paths.source, "paths.source"),
            (&mut paths.destination, "paths.destination"),
            (&mut paths.templates, "paths.templates"),
        ] {
            if let Some(raw) = value {
                *raw = expand::expand_env(raw, field)?;
            }
        }

        Ok(())
    }

    /// Resolve relative paths against the config directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        let resolve = |path: Option<&str>, default: &str| config_dir.join(path.unwrap_or(default));

        self.paths_resolved = PathsConfig {
            source_dir: resolve(self.paths.source.as_deref(), "src"),
            destination_dir: resolve(self.paths.destination.as_deref(), "dst"),
            template_dir: resolve(self.paths.templates.as_deref(), "templates"),
        };
    }
}
