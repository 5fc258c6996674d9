//! Markdown conversion.

use ost_config::MarkdownExtension;
use pulldown_cmark::{Options, Parser};

/// Converts markdown sections to HTML.
///
/// Converters may keep state between calls (footnote counters, output
/// buffers). [`reset`](Self::reset) is called before every conversion so no
/// state leaks from one document into the next.
pub trait MarkdownConverter {
    /// Clear state left over from the previous conversion.
    fn reset(&mut self);

    /// Convert markdown to HTML.
    fn convert(&mut self, markdown: &str) -> String;
}

/// [`MarkdownConverter`] backed by `pulldown-cmark`.
#[derive(Debug)]
pub struct PulldownConverter {
    options: Options,
    buffer: String,
}

impl PulldownConverter {
    /// Create a converter with explicit parser options.
    #[must_use]
    pub fn new(options: Options) -> Self {
        Self {
            options,
            buffer: String::new(),
        }
    }

    /// Create a converter enabling the given extensions.
    #[must_use]
    pub fn from_extensions(extensions: &[MarkdownExtension]) -> Self {
        Self::new(parser_options(extensions))
    }
}

impl Default for PulldownConverter {
    fn default() -> Self {
        Self::new(Options::empty())
    }
}

impl MarkdownConverter for PulldownConverter {
    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn convert(&mut self, markdown: &str) -> String {
        let parser = Parser::new_ext(markdown, self.options);
        pulldown_cmark::html::push_html(&mut self.buffer, parser);
        self.buffer.clone()
    }
}

/// Parser options for a set of markdown extensions.
#[must_use]
pub fn parser_options(extensions: &[MarkdownExtension]) -> Options {
    extensions
        .iter()
        .fold(Options::empty(), |options, extension| {
            options
                | match extension {
                    MarkdownExtension::Tables => Options::ENABLE_TABLES,
                    MarkdownExtension::Footnotes => Options::ENABLE_FOOTNOTES,
                    MarkdownExtension::Strikethrough => Options::ENABLE_STRIKETHROUGH,
                    MarkdownExtension::Tasklists => Options::ENABLE_TASKLISTS,
                    MarkdownExtension::SmartPunctuation => Options::ENABLE_SMART_PUNCTUATION,
                    MarkdownExtension::HeadingAttributes => Options::ENABLE_HEADING_ATTRIBUTES,
                }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_convert_heading() {
        let mut converter = PulldownConverter::default();
        converter.reset();
        assert_eq!(converter.convert("# Title"), "<h1>Title</h1>\n");
    }

    #[test]
    fn test_reset_isolates_documents() {
        let mut converter = PulldownConverter::default();
        converter.reset();
        converter.convert("first");
        converter.reset();
        assert_eq!(converter.convert("second"), "<p>second</p>\n");
    }

    #[test]
    fn test_state_accumulates_without_reset() {
        let mut converter = PulldownConverter::default();
        converter.convert("first");
        let html = converter.convert("second");
        assert!(html.contains("first"));
    }

    #[test]
    fn test_parser_options_from_extensions() {
        let options = parser_options(&[MarkdownExtension::Tables, MarkdownExtension::Footnotes]);
        assert!(options.contains(Options::ENABLE_TABLES));
        assert!(options.contains(Options::ENABLE_FOOTNOTES));
        assert!(!options.contains(Options::ENABLE_STRIKETHROUGH));

        assert_eq!(parser_options(&[]), Options::empty());
    }

    #[test]
    fn test_tables_extension_renders_table() {
        let mut converter = PulldownConverter::from_extensions(&[MarkdownExtension::Tables]);
        let html = converter.convert("| a |\n|---|\n| 1 |\n");
        assert!(html.contains("<table>"));
    }
}
