//! Error and warning types shared across the pipeline.

use serde::Serialize;

/// Result alias that carries the crate error type.
pub type Result<T> = std::result::Result<T, HarpError>;

/// Errors that abort the current render.
///
/// Parse errors are different: they accumulate into a list so rendering can
/// continue on partial input (see [`ParseError`]).
#[derive(Debug, thiserror::Error)]
pub enum HarpError {
    /// A deferred configuration value read another deferred value that is
    /// currently being evaluated. The chain names every path in the cycle.
    #[error("circular configuration dependency: {}", .0.join(" -> "))]
    CircularConfig(Vec<String>),

    /// Any other configuration problem (bad path, wrong value shape).
    #[error("configuration error: {0}")]
    Config(String),

    /// An unexpected symbol shape during the music transformation.
    #[error("transform error at char {start_char}: {message}")]
    Transform { message: String, start_char: usize },

    /// A structural invariant was broken (e.g. a note without a pitch).
    #[error("invariant violation: {0}")]
    Invariant(String),
}

/// One error reported by the ABC front end, with a source position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseError {
    pub message: String,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column number.
    pub column: usize,
}

impl ParseError {
    pub fn new<T: Into<String>>(message: T, line: usize, column: usize) -> Self {
        Self { message: message.into(), line, column }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// A non-fatal problem found while transforming or laying out a tune.
///
/// Warnings are logged through the `log` facade as they occur and also
/// collected on the [`crate::model::Song`] so a caller without a logger
/// still sees them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub message: String,
    pub start_char: usize,
    pub end_char: usize,
}

impl Warning {
    pub fn new<T: Into<String>>(message: T, start_char: usize, end_char: usize) -> Self {
        Self { message: message.into(), start_char, end_char }
    }
}
