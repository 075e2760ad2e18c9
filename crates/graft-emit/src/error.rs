//! Emission and execution errors.

use thiserror::Error;

/// Errors raised while emitting or running generated code.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("operation `{operation}` does not accept {found}")]
    TypeMismatch { operation: String, found: String },

    #[error("operation `{operation}` has no lowering")]
    UnsupportedOperation { operation: String },

    #[error("value %{0} is not defined in function `{1}`")]
    UnknownValue(u32, String),

    #[error("function `{0}` is not declared")]
    UnknownFunction(String),

    #[error("function `{0}` is already defined")]
    DuplicateFunction(String),

    #[error("global `{name}` already exists with a different shape")]
    GlobalConflict { name: String },

    #[error("signature mismatch for `{function}`: {message}")]
    SignatureMismatch { function: String, message: String },

    #[error("index {index} out of bounds for buffer of {size} elements")]
    IndexOutOfBounds { index: usize, size: usize },

    #[error("invalid precompiled code for `{function}`: {message}")]
    InvalidPrecompiledCode { function: String, message: String },

    #[error("execution failed: {message}")]
    Execution { message: String },

    #[error("backend failure at {stage}: {message}")]
    Backend { stage: String, message: String },
}

impl EmitError {
    pub(crate) fn type_mismatch(operation: impl Into<String>, found: impl ToString) -> Self {
        EmitError::TypeMismatch {
            operation: operation.into(),
            found: found.to_string(),
        }
    }

    pub(crate) fn execution(message: impl Into<String>) -> Self {
        EmitError::Execution {
            message: message.into(),
        }
    }
}
