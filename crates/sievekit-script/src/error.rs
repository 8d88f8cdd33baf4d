//! Error types for the Sieve language core.

use thiserror::Error;

/// Errors produced while lexing, parsing or building Sieve scripts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed token in the source text.
    #[error("line {line}: {reason}")]
    Lex {
        /// Line where the bad token starts.
        line: usize,
        /// Description of what went wrong.
        reason: String,
    },

    /// Grammar, argument-schema or capability-declaration violation.
    #[error("line {line}: {message}")]
    Parse {
        /// Line of the first offending token.
        line: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Invalid use of the tree-building API.
    #[error("{message}")]
    Build {
        /// Description of what went wrong.
        message: String,
    },
}

impl Error {
    pub(crate) fn lex(line: usize, reason: impl Into<String>) -> Self {
        Self::Lex {
            line,
            reason: reason.into(),
        }
    }

    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }

    /// Returns the source line the error refers to, if any.
    #[must_use]
    pub const fn line(&self) -> Option<usize> {
        match self {
            Self::Lex { line, .. } | Self::Parse { line, .. } => Some(*line),
            Self::Build { .. } => None,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
