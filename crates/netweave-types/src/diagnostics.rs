use crate::Subject;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Level of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One entry of the diagnostic stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    /// Nested scope path at the time the entry was recorded, outermost first.
    pub scope: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.scope.join(" > "))?;
        if let Some(subject) = &self.subject {
            write!(f, " ({subject})")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// The nested-scope diagnostic stream produced by one pass.
///
/// Every entry is mirrored to `tracing`, and every scope opens a `tracing`
/// span, so an installed subscriber observes the same structure.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<LogEntry>,
    scopes: Vec<(String, tracing::span::EnteredSpan)>,
}

impl Diagnostics {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a nested scope.
    pub fn push_scope(&mut self, name: impl Into<String>) {
        let name = name.into();
        let span = tracing::debug_span!("weave", scope = %name).entered();
        self.scopes.push((name, span));
    }

    /// Close the innermost scope.
    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Current scope depth.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Close scopes until only `depth` remain. Used to unwind after an error.
    pub fn truncate_scopes(&mut self, depth: usize) {
        while self.scopes.len() > depth {
            self.scopes.pop();
        }
    }

    pub fn debug(&mut self, subject: Option<Subject>, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(subject = ?subject, "{message}");
        self.record(LogLevel::Debug, subject, message);
    }

    pub fn warn(&mut self, subject: Option<Subject>, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(subject = ?subject, "{message}");
        self.record(LogLevel::Warning, subject, message);
    }

    pub fn error(&mut self, subject: Option<Subject>, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(subject = ?subject, "{message}");
        self.record(LogLevel::Error, subject, message);
    }

    fn record(&mut self, level: LogLevel, subject: Option<Subject>, message: String) {
        self.entries.push(LogEntry {
            level,
            scope: self.scopes.iter().map(|(name, _)| name.clone()).collect(),
            subject,
            message,
        });
    }

    /// All entries in emission order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entries at exactly `level`.
    pub fn at_level(&self, level: LogLevel) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.level == level)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LogEntry> {
        self.at_level(LogLevel::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.at_level(LogLevel::Error).next().is_some()
    }

    /// Detach the recorded entries, closing any open scopes.
    pub fn into_entries(mut self) -> Vec<LogEntry> {
        self.scopes.clear();
        self.entries
    }
}
