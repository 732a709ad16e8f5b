//! This module defines all error types used throughout the engine.

use std::io;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    /// IO errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pattern definition is malformed or violates a structural invariant
    #[error("Invalid pattern: {0}")]
    Pattern(String),

    /// State machine became invalid while running (missing start, unknown label)
    #[error("Invalid state machine: {0}")]
    InvalidStateMachine(String),

    /// No transition of the current state accepted the inbound event
    #[error("Unexpected event in state '{state}': {reason}")]
    UnexpectedEvent { state: String, reason: String },

    /// A `$$...$$` or `%counter.X%` reference did not resolve
    #[error("Invalid pattern reference: {0}")]
    InvalidReference(String),

    /// XPath expression could not be parsed or evaluated
    #[error("Invalid XPath '{path}': {message}")]
    InvalidXPath { path: String, message: String },

    /// JSONPath expression could not be parsed or evaluated
    #[error("Invalid JSONPath '{path}': {message}")]
    InvalidJsonPath { path: String, message: String },

    /// Regex guard value is not a valid regular expression
    #[error("Invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    /// Message body could not be interpreted as the requested content type
    #[error("Invalid content: {0}")]
    InvalidContent(String),

    /// Inbound event queue is at capacity
    #[error("Event queue is full")]
    QueueFull,

    /// Waiting on the event queue was interrupted
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Outbound message invocation failed
    #[error("Message error: {0}")]
    Message(String),

    /// Generic error with custom message
    #[error("{0}")]
    Custom(String),

    /// Wrapped anyhow errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a custom error with a message
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Create a pattern error
    pub fn pattern(msg: impl Into<String>) -> Self {
        Self::Pattern(msg.into())
    }

    /// Create a reference resolution error
    pub fn reference(msg: impl Into<String>) -> Self {
        Self::InvalidReference(msg.into())
    }

    /// Create a run-time structural error
    pub fn state_machine(msg: impl Into<String>) -> Self {
        Self::InvalidStateMachine(msg.into())
    }

    pub fn xpath(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidXPath {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn json_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidJsonPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if error is an interoperability violation
    pub fn is_interop_violation(&self) -> bool {
        matches!(self, Error::UnexpectedEvent { .. })
    }

    /// Errors that make a single guard fail instead of aborting the run
    pub fn is_reference_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidReference(_)
                | Error::InvalidXPath { .. }
                | Error::InvalidJsonPath { .. }
                | Error::InvalidRegex { .. }
                | Error::InvalidContent(_)
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Pattern(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidContent(format!("JSON error: {}", err))
    }
}

// Helper macros for creating errors

/// Create a custom error with formatting
#[macro_export]
macro_rules! custom_error {
    ($($arg:tt)*) => {
        $crate::error::Error::Custom(format!($($arg)*))
    };
}

/// Bail with a pattern error message
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::error::Error::Pattern(format!($($arg)*)))
    };
}

/// Ensure a condition is true or return a pattern error
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($($arg)*);
        }
    };
}
