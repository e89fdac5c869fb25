//! Error types for the COGZ core library.
//!
//! Only structural problems in the model graph are errors. Runtime oddities
//! (unbound variables, empty buffers) are trace warnings, and "no production
//! matched" or "retrieval failed" are ordinary simulation outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Location of an element in the source the model graph was built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    /// 1-based line number (0 when unknown).
    pub line: u32,
    /// Byte offset into the source text.
    pub offset: usize,
}

impl SourceSpan {
    /// Create a span at the given line and offset.
    #[must_use]
    pub fn new(line: u32, offset: usize) -> Self {
        Self { line, offset }
    }
}

/// A structural problem found while compiling a model graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Human-readable description.
    pub message: String,
    /// Where in the source the problem was found, if known.
    pub span: Option<SourceSpan>,
    /// Fatal diagnostics prevent the model from being built.
    pub fatal: bool,
}

impl Diagnostic {
    /// A diagnostic that prevents the model from being used.
    #[must_use]
    pub fn fatal(message: impl Into<String>, span: Option<SourceSpan>) -> Self {
        Self {
            message: message.into(),
            span,
            fatal: true,
        }
    }

    /// A diagnostic that is reported but does not block the model.
    #[must_use]
    pub fn warning(message: impl Into<String>, span: Option<SourceSpan>) -> Self {
        Self {
            message: message.into(),
            span,
            fatal: false,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = if self.fatal { "error" } else { "warning" };
        match self.span {
            Some(span) => write!(
                f,
                "{level} (line {}, offset {}): {}",
                span.line, span.offset, self.message
            ),
            None => write!(f, "{level}: {}", self.message),
        }
    }
}

/// Top-level error type for all COGZ operations.
#[derive(Error, Debug)]
pub enum CogzError {
    /// The model graph contains at least one fatal structural error.
    #[error("Model compilation failed with {} fatal error(s): {}", count_fatal(.0), first_fatal(.0))]
    Compile(Vec<Diagnostic>),

    /// A parameter key is unknown or its value has the wrong type.
    #[error("Parameter error: {key}: {reason}")]
    Parameter {
        /// The offending key (e.g. `:rt`).
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A production with the given name does not exist.
    #[error("Production not found: {0}")]
    ProductionNotFound(String),

    /// An embedded expression could not be read.
    #[error("Expression error: {0}")]
    Expression(String),

    /// Trace serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn count_fatal(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.fatal).count()
}

fn first_fatal(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .find(|d| d.fatal)
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, CogzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_reports_first_fatal() {
        let err = CogzError::Compile(vec![
            Diagnostic::warning("slot never read", None),
            Diagnostic::fatal("unbound variable =x", Some(SourceSpan::new(12, 340))),
        ]);
        let text = err.to_string();
        assert!(text.contains("1 fatal"));
        assert!(text.contains("line 12"));
        assert!(text.contains("=x"));
    }
}
