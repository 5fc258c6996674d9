//! Site roots and file discovery.
//!
//! Document ids are root-relative paths without the source extension, using
//! `/` separators on every platform (e.g. `blog/first-post`).

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use ost_config::Config;

use crate::unit::RootKind;

/// The three site roots plus the extensions that map ids to files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SitePaths {
    /// Root holding page documents and static files.
    pub source_dir: PathBuf,
    /// Root the build writes into.
    pub destination_dir: PathBuf,
    /// Root holding template documents.
    pub template_dir: PathBuf,
    /// Extension of source documents, without the dot.
    pub source_extension: String,
    /// Extension of rendered output, without the dot.
    pub output_extension: String,
}

impl SitePaths {
    /// Create paths with the default `ost`/`html` extensions.
    #[must_use]
    pub fn new(
        source_dir: impl Into<PathBuf>,
        destination_dir: impl Into<PathBuf>,
        template_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            destination_dir: destination_dir.into(),
            template_dir: template_dir.into(),
            source_extension: "ost".to_owned(),
            output_extension: "html".to_owned(),
        }
    }

    /// Paths from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_dir: config.paths_resolved.source_dir.clone(),
            destination_dir: config.paths_resolved.destination_dir.clone(),
            template_dir: config.paths_resolved.template_dir.clone(),
            source_extension: config.build.source_extension.clone(),
            output_extension: config.build.output_extension.clone(),
        }
    }

    /// Root that documents of `kind` are loaded from.
    #[must_use]
    pub fn root(&self, kind: RootKind) -> &Path {
        match kind {
            RootKind::Page => &self.source_dir,
            RootKind::Template => &self.template_dir,
        }
    }

    /// Source file of a document.
    #[must_use]
    pub fn document_path(&self, kind: RootKind, id: &str) -> PathBuf {
        self.root(kind)
            .join(format!("{id}.{}", self.source_extension))
    }

    /// Destination file of a rendered page.
    #[must_use]
    pub fn output_path(&self, id: &str) -> PathBuf {
        self.destination_dir.join(self.url(id))
    }

    /// Destination-relative URL of a rendered page.
    #[must_use]
    pub fn url(&self, id: &str) -> String {
        format!("{id}.{}", self.output_extension)
    }

    /// Whether `path` carries the source document extension.
    #[must_use]
    pub fn is_document(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(self.source_extension.as_str()))
    }
}

/// Document id for a root-relative path.
pub(crate) fn document_id(relative: &Path) -> String {
    relative
        .with_extension("")
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Every file below `root`, as root-relative paths in sorted order.
///
/// Entries within a directory are visited by file name so that builds are
/// deterministic regardless of filesystem ordering. Returns an empty list if
/// `root` does not exist.
pub(crate) fn scan_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if root.exists() {
        scan_directory(root, Path::new(""), &mut files)?;
    }
    Ok(files)
}

fn scan_directory(dir: &Path, prefix: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        let relative = prefix.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            scan_directory(&entry.path(), &relative, files)?;
        } else {
            files.push(relative);
        }
    }
    Ok(())
}

/// Write `contents` to `path`, creating parent directories.
pub(crate) fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}
