//! Accumulated load diagnostics.
//!
//! The loader never prints. Recoverable problems are collected here and
//! mirrored as `tracing` events so a subscriber can pick them up live.

use std::fmt;

use serde::Serialize;

/// Severity of a report entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

/// One human-readable diagnostic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Report {
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Ordered list of diagnostics returned next to a loaded graph.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Reports {
    items: Vec<Report>,
}

impl Reports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a report and emit the matching tracing event.
    pub fn push(&mut self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info => tracing::info!(target: "blendlink", "{}", message),
            Severity::Warning => tracing::warn!(target: "blendlink", "{}", message),
            Severity::Error => tracing::error!(target: "blendlink", "{}", message),
        }
        self.items.push(Report { severity, message });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(Severity::Info, message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, message);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Report> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of entries at exactly the given severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.items.iter().filter(|r| r.severity == severity).count()
    }

    /// Number of warnings and errors.
    pub fn problems(&self) -> usize {
        self.items.iter().filter(|r| r.severity >= Severity::Warning).count()
    }

    /// Move all entries of `other` to the end of this list.
    pub fn append(&mut self, other: &mut Reports) {
        self.items.append(&mut other.items);
    }
}

impl<'a> IntoIterator for &'a Reports {
    type Item = &'a Report;
    type IntoIter = std::slice::Iter<'a, Report>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let mut reports = Reports::new();
        reports.info("Read library: 'lib.blend'");
        reports.warning("Cannot find lib 'gone.blend'");
        reports.error("unknown id code");

        assert_eq!(reports.len(), 3);
        assert_eq!(reports.count(Severity::Warning), 1);
        assert_eq!(reports.problems(), 2);
    }

    #[test]
    fn test_display() {
        let r = Report { severity: Severity::Warning, message: "x".into() };
        assert_eq!(r.to_string(), "Warning: x");
    }
}
