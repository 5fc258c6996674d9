//! Source document parser for ost.
//!
//! An ost document is plain text made of *command lines* and *content lines*.
//! A command line is any line whose trimmed form starts with [`COMMAND_SIGIL`];
//! everything else is content and is appended verbatim to the active section.
//!
//! ```text
//! % extends layouts/base
//! % init
//! title = "About"
//! % markdown
//! # About us
//! % template
//! {% block body %}{{ markdown }}{% endblock %}
//! ```
//!
//! Recognized commands:
//!
//! - `init`, `template`, `markdown`: switch the active section
//! - `extends <name>` (alias `extend`): declare the single parent document
//!
//! Unknown commands are ignored so new commands can be introduced without
//! breaking older documents. Content before the first section switch belongs
//! to the `template` section.

use std::fmt;
use std::str::FromStr;

/// Character that introduces a command line.
pub const COMMAND_SIGIL: char = '%';

/// Named section of a source document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Section {
    /// Initializer statements run against the data namespace.
    Init,
    /// Template text handed to the template engine.
    Template,
    /// Markdown converted to HTML before initialization.
    Markdown,
}

impl Section {
    /// All sections, in declaration order.
    pub const ALL: [Section; 3] = [Section::Init, Section::Template, Section::Markdown];

    /// Command name that switches to this section.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Template => "template",
            Self::Markdown => "markdown",
        }
    }

    fn from_command(command: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == command)
    }

    fn index(self) -> usize {
        match self {
            Self::Init => 0,
            Self::Template => 1,
            Self::Markdown => 2,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a document is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// More than one `extends` command in the same document.
    #[error(
        "only one extends command is allowed per document (line {line}, first declared on line {first_line})"
    )]
    DuplicateExtends {
        /// Line of the first `extends` command.
        first_line: usize,
        /// Line of the offending command.
        line: usize,
    },
    /// `extends` command without a document name.
    #[error("extends command on line {line} is missing a document name")]
    MissingExtendsName {
        /// Line of the offending command.
        line: usize,
    },
}

/// A parsed source document.
///
/// Immutable once parsed. Sections are trimmed of surrounding whitespace and
/// are `None` when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDocument {
    sections: [Option<String>; 3],
    extends: Option<String>,
}

impl SourceDocument {
    /// Parse raw document content.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::DuplicateExtends`] if more than one `extends`
    /// command appears and [`ParseError::MissingExtendsName`] if one has no
    /// argument.
    pub fn parse(content: &str) -> Result<Self, ParseError> {
        let mut buffers: [String; 3] = Default::default();
        let mut active = Section::Template;
        let mut extends: Option<(String, usize)> = None;

        for (index, line) in content.split_inclusive('\n').enumerate() {
            let line_number = index + 1;
            let Some(command) = line.trim().strip_prefix(COMMAND_SIGIL) else {
                buffers[active.index()].push_str(line);
                continue;
            };

            let mut args = command.split_whitespace();
            let Some(name) = args.next() else {
                continue;
            };
            let name = name.to_lowercase();

            if let Some(section) = Section::from_command(&name) {
                active = section;
            } else if name == "extends" || name == "extend" {
                let target = args
                    .next()
                    .ok_or(ParseError::MissingExtendsName { line: line_number })?;
                if let Some((_, first_line)) = &extends {
                    return Err(ParseError::DuplicateExtends {
                        first_line: *first_line,
                        line: line_number,
                    });
                }
                extends = Some((target.to_owned(), line_number));
            }
        }

        let sections = buffers.map(|buffer| {
            let trimmed = buffer.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        });

        Ok(Self {
            sections,
            extends: extends.map(|(name, _)| name),
        })
    }

    /// Content of a section, if present.
    #[must_use]
    pub fn section(&self, section: Section) -> Option<&str> {
        self.sections[section.index()].as_deref()
    }

    /// Initializer statements.
    #[must_use]
    pub fn init(&self) -> Option<&str> {
        self.section(Section::Init)
    }

    /// Template text.
    #[must_use]
    pub fn template(&self) -> Option<&str> {
        self.section(Section::Template)
    }

    /// Markdown source.
    #[must_use]
    pub fn markdown(&self) -> Option<&str> {
        self.section(Section::Markdown)
    }

    /// Declared parent document id.
    #[must_use]
    pub fn extends(&self) -> Option<&str> {
        self.extends.as_deref()
    }
}

impl FromStr for SourceDocument {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
