//! Unified error handling for reqflow
//!
//! Build-time problems (tree shape, request descriptors, configuration files)
//! surface as `FlowError`. Transport failures never do: they are recorded as
//! response data in the execution context.

use std::fmt;

/// Unified error type for building and starting runs
#[derive(Debug)]
pub enum FlowError {
    /// Invalid tree or request definition
    Configuration(String),

    /// Configuration file failed schema validation
    Validation(String),

    /// A group referenced by id does not exist in the tree
    NotFound(String),

    /// Transport could not be constructed
    Transport(String),

    /// File and other I/O errors
    Io(std::io::Error),

    /// Internal system errors
    Internal(String),
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            FlowError::Validation(msg) => write!(f, "Validation error: {msg}"),
            FlowError::NotFound(msg) => write!(f, "Group not found: {msg}"),
            FlowError::Transport(msg) => write!(f, "Transport error: {msg}"),
            FlowError::Io(err) => write!(f, "I/O error: {err}"),
            FlowError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FlowError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        FlowError::Io(err)
    }
}

impl From<validator::ValidationErrors> for FlowError {
    fn from(err: validator::ValidationErrors) -> Self {
        FlowError::Validation(err.to_string())
    }
}

impl FlowError {
    /// Whether this error was raised while building a tree or descriptor
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FlowError::Configuration(_) | FlowError::Validation(_) | FlowError::NotFound(_)
        )
    }
}

/// Result type alias for reqflow operations
pub type FlowResult<T> = std::result::Result<T, FlowError>;

/// Helper trait for adding context to foreign errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> FlowResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> FlowResult<T> {
        self.map_err(|e| FlowError::Configuration(format!("{context}: {e}")))
    }
}

/// Shorthand for `FlowError::Configuration`
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::error::FlowError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::FlowError::Configuration(format!($fmt, $($arg)*))
    };
}

/// Shorthand for `FlowError::Internal`
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::core::error::FlowError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::FlowError::Internal(format!($fmt, $($arg)*))
    };
}
