//! Error types for the shell core.
//!
//! All kernel operations return [`ShellError`]. Errors that surface to the
//! caller of [`Session::execute`](crate::session::Session::execute) are
//! enriched once with the earliest source position the evaluator touched
//! (the [`ShellError::Located`] wrapper); later re-throws never overwrite
//! that annotation.

use thiserror::Error;

/// Result alias used throughout the kernel.
pub type Result<T> = std::result::Result<T, ShellError>;

/// Errors raised by the tokenizer, evaluator, dispatcher, and pipeline engine.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Execute was called on a session that has already been closed.
    #[error("session is closed")]
    SessionClosed,

    /// Tokenizer, parser, or token-evaluation misuse.
    #[error("{line}.{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// Parse aborted on incomplete input. Interactive clients should read
    /// more input rather than report this as a failure.
    #[error("unexpected end of input: {message}")]
    Incomplete { message: String },

    /// The dispatch ladder was exhausted without finding a handler.
    #[error("command not found: {name}")]
    CommandNotFound { name: String },

    /// A statement head evaluated to null with further arguments present.
    #[error("command name evaluates to null: {near}")]
    CommandNameNull { near: String },

    /// A host method dispatch failed.
    #[error("host invoke failed: {0}")]
    HostInvoke(String),

    /// A pipeline join was interrupted; all stages were cancelled.
    #[error("pipeline interrupted")]
    Interrupted,

    /// An error enriched with the first reported source location.
    #[error("{location}: {source}")]
    Located {
        location: String,
        #[source]
        source: Box<ShellError>,
    },

    /// Arbitrary failure from a host-provided command.
    #[error(transparent)]
    Command(#[from] anyhow::Error),
}

impl ShellError {
    /// Syntax error at a token position.
    pub fn syntax(line: usize, column: usize, message: impl Into<String>) -> Self {
        ShellError::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    /// Incomplete-input error.
    pub fn incomplete(message: impl Into<String>) -> Self {
        ShellError::Incomplete {
            message: message.into(),
        }
    }

    /// Attach a location unless one is already attached.
    pub fn with_location(self, location: impl Into<String>) -> Self {
        match self {
            ShellError::Located { .. } => self,
            other => ShellError::Located {
                location: location.into(),
                source: Box::new(other),
            },
        }
    }

    /// The attached location, if any.
    pub fn location(&self) -> Option<&str> {
        match self {
            ShellError::Located { location, .. } => Some(location),
            _ => None,
        }
    }

    /// The underlying error, peeling any location wrapper.
    pub fn root(&self) -> &ShellError {
        match self {
            ShellError::Located { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the root cause is incomplete input.
    pub fn is_incomplete(&self) -> bool {
        matches!(self.root(), ShellError::Incomplete { .. })
    }

    /// The source position carried by the root error, if it has one.
    pub fn position(&self) -> Option<(usize, usize)> {
        match self.root() {
            ShellError::Syntax { line, column, .. } => Some((*line, *column)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_attaches_once() {
        let err = ShellError::CommandNotFound {
            name: "frob".into(),
        };
        let located = err.with_location("script:1.1");
        assert_eq!(located.location(), Some("script:1.1"));

        // A second annotation must not overwrite the first.
        let relocated = located.with_location("other:9.9");
        assert_eq!(relocated.location(), Some("script:1.1"));
    }

    #[test]
    fn root_peels_location() {
        let err = ShellError::syntax(3, 7, "bad token").with_location("1.1");
        assert!(matches!(err.root(), ShellError::Syntax { line: 3, .. }));
        assert_eq!(err.position(), Some((3, 7)));
    }

    #[test]
    fn incomplete_detected_through_wrapper() {
        let err = ShellError::incomplete("missing '}'").with_location("2.4");
        assert!(err.is_incomplete());
    }

    #[test]
    fn display_includes_location() {
        let err = ShellError::CommandNotFound { name: "x".into() }.with_location("s:1.1");
        assert_eq!(err.to_string(), "s:1.1: command not found: x");
    }
}
