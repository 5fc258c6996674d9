//! Build status lines printed to stderr.

use std::fmt::Display;
use std::path::Path;

use console::{Style, Term};
use ost_compiler::BuildReport;

/// Writes build and serve progress to the terminal.
pub(crate) struct Output {
    term: Term,
    done: Style,
    failed: Style,
    address: Style,
}

impl Output {
    pub(crate) fn new() -> Self {
        Self {
            term: Term::stderr(),
            done: Style::new().green(),
            failed: Style::new().red(),
            address: Style::new().cyan().bold(),
        }
    }

    /// Announce a pass from `source` into `destination`.
    pub(crate) fn building(&self, source: &Path, destination: &Path) {
        self.line(&format!(
            "Building {} -> {}",
            source.display(),
            destination.display()
        ));
    }

    /// Report a finished pass (green).
    pub(crate) fn built(&self, report: &BuildReport) {
        self.line(&self.done.apply_to(summary(report)).to_string());
    }

    /// Report a failed pass or command (red).
    pub(crate) fn failed(&self, err: &dyn Display) {
        self.line(&self.failed.apply_to(format!("Error: {err}")).to_string());
    }

    /// List the roots being watched, or note that watching is off.
    pub(crate) fn watching(&self, roots: &[&Path]) {
        if roots.is_empty() {
            self.line("Watching: disabled");
            return;
        }
        let roots: Vec<String> = roots.iter().map(|root| root.display().to_string()).collect();
        self.line(&format!("Watching {}", roots.join(" and ")));
    }

    /// Announce the server address (cyan bold).
    pub(crate) fn serving(&self, destination: &Path, host: &str, port: u16) {
        let message = format!(
            "Serving {} on {}",
            destination.display(),
            address(host, port)
        );
        self.line(&self.address.apply_to(message).to_string());
    }

    fn line(&self, text: &str) {
        let _ = self.term.write_line(text);
    }
}

/// One-line summary of a build pass.
fn summary(report: &BuildReport) -> String {
    format!(
        "Built {} page(s) from {} template(s), copied {} static file(s)",
        report.pages, report.templates, report.static_files
    )
}

fn address(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}
