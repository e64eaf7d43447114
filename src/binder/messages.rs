//! Accumulating diagnostic sink.
//!
//! Authoring problems are collected here instead of aborting the bind, so a
//! single run surfaces every duplicate key, unresolved reference, and missing
//! attribute at once. The orchestrator checks [`Messages::error_count`] after
//! each phase and refuses to produce an artifact when it is non-zero.

use crate::model::SourceLocation;
use std::fmt;

/// Diagnostic severity.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational only.
    Info,
    /// Suspicious but not fatal; the bind can still succeed.
    Warning,
    /// The bind will fail, but later phases keep collecting.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(name)
    }
}

/// One accumulated diagnostic.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Severity of the problem.
    pub severity: Severity,
    /// Where the offending row or field was authored, when known.
    pub source: Option<SourceLocation>,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}: {}", source, self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// The message sink shared by every bind phase.
#[derive(Debug, Default)]
pub struct Messages {
    entries: Vec<Diagnostic>,
}

impl Messages {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error with a source location.
    pub fn error_at(&mut self, source: &SourceLocation, message: impl Into<String>) {
        self.push(Severity::Error, Some(source.clone()), message.into());
    }

    /// Records an error without a source location.
    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, None, message.into());
    }

    /// Records a warning with a source location.
    pub fn warning_at(&mut self, source: &SourceLocation, message: impl Into<String>) {
        self.push(Severity::Warning, Some(source.clone()), message.into());
    }

    /// Records a warning without a source location.
    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, None, message.into());
    }

    /// Records an informational message.
    pub fn info(&mut self, message: impl Into<String>) {
        self.push(Severity::Info, None, message.into());
    }

    fn push(&mut self, severity: Severity, source: Option<SourceLocation>, message: String) {
        match severity {
            Severity::Error => log::error!("{message}"),
            Severity::Warning => log::warn!("{message}"),
            Severity::Info => log::info!("{message}"),
        }
        self.entries.push(Diagnostic {
            severity,
            source,
            message,
        });
    }

    /// All accumulated diagnostics, in the order they were recorded.
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Number of error-severity diagnostics.
    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// Whether any error-severity diagnostic was recorded.
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_accumulate_without_stopping() {
        let mut messages = Messages::new();
        messages.error("duplicate file identifier 'FileA'");
        messages.warning("media 2 contains no files");
        messages.error_at(
            &SourceLocation::new("product.wxs", 40),
            "unresolved reference to Directory 'BINDIR'",
        );
        assert_eq!(messages.entries().len(), 3);
        assert_eq!(messages.error_count(), 2);
        assert!(messages.has_errors());
    }

    #[test]
    fn diagnostic_rendering_includes_location() {
        let diagnostic = Diagnostic {
            severity: Severity::Error,
            source: Some(SourceLocation::new("a.wxs", 7)),
            message: "bad row".into(),
        };
        assert_eq!(diagnostic.to_string(), "a.wxs(7): error: bad row");
    }
}
