//! Error types for bridge operations
//!
//! Conversion failures are not errors: they surface as `None` from the
//! lenient API. `FerryError` is reserved for the `try_*` operations, for
//! context setup, and for turning a pending script exception into something
//! a Rust caller can propagate with `?`.

use thiserror::Error;

/// Result type alias for bridge operations
pub type FerryResult<T> = Result<T, FerryError>;

/// Structured error types for bridge operations
#[derive(Debug, Error)]
pub enum FerryError {
    /// Failed to create a context
    #[error("Context creation failed: {message}")]
    ContextCreation { message: String },

    /// Script-level exception (throw, TypeError, SyntaxError, ...)
    #[error("{error_type}: {message}")]
    ScriptError {
        error_type: String,
        message: String,
        stack: Option<String>,
    },

    /// Value did not convert to the requested native type
    #[error("Type error: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    /// Operation on a value that carries no context
    #[error("Value is not attached to a context")]
    Detached,

    /// Call on a receiver that is not a function
    #[error("Value is not a function")]
    NotAFunction,

    /// Index access on a receiver that is not an array
    #[error("Value is not an array")]
    NotAnArray,

    /// Index outside `0..length`
    #[error("Index {index} out of range for length {length}")]
    IndexOutOfRange { index: i64, length: i64 },

    /// The engine refused to intern another property name
    #[error("Atom table exhausted while interning {0:?}")]
    AtomExhausted(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Internal/unexpected error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FerryError {
    /// Create a script error from error type and message
    pub fn script_error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ScriptError {
            error_type: error_type.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Create a type error
    pub fn type_error(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeError {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error came from script execution
    pub fn is_script_error(&self) -> bool {
        matches!(self, Self::ScriptError { .. })
    }

    /// Check if this error is host-side misuse of the façade
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::Detached
                | Self::NotAFunction
                | Self::NotAnArray
                | Self::IndexOutOfRange { .. }
                | Self::AtomExhausted(_)
        )
    }

    /// Get the stack trace if available
    pub fn stack_trace(&self) -> Option<&str> {
        match self {
            Self::ScriptError { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }

    /// Get the error type name (e.g., "TypeError", "ReferenceError")
    pub fn error_type(&self) -> &str {
        match self {
            Self::ScriptError { error_type, .. } => error_type,
            Self::TypeError { .. } => "TypeError",
            Self::ContextCreation { .. } => "ContextError",
            Self::Detached => "DetachedError",
            Self::NotAFunction | Self::NotAnArray | Self::IndexOutOfRange { .. } => "MisuseError",
            Self::AtomExhausted(_) => "ResourceLimitError",
            Self::JsonError(_) => "JsonError",
            Self::Internal(_) => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_error_display() {
        let err = FerryError::script_error("TypeError", "undefined is not a function");
        assert_eq!(err.to_string(), "TypeError: undefined is not a function");
        assert!(err.is_script_error());
        assert_eq!(err.error_type(), "TypeError");
    }

    #[test]
    fn test_type_error() {
        let err = FerryError::type_error("i32", "string");
        assert!(err.to_string().contains("expected i32"));
        assert!(err.to_string().contains("got string"));
        assert!(!err.is_misuse());
    }

    #[test]
    fn test_misuse_kinds() {
        assert!(FerryError::NotAFunction.is_misuse());
        assert!(FerryError::Detached.is_misuse());
        let err = FerryError::IndexOutOfRange {
            index: 2,
            length: 2,
        };
        assert!(err.is_misuse());
        assert_eq!(err.to_string(), "Index 2 out of range for length 2");
    }

    #[test]
    fn test_stack_trace() {
        let err = FerryError::ScriptError {
            error_type: "Error".into(),
            message: "boom".into(),
            stack: Some("at f (<eval>:1:1)".into()),
        };
        assert_eq!(err.stack_trace(), Some("at f (<eval>:1:1)"));
        assert!(FerryError::internal("x").stack_trace().is_none());
    }
}
