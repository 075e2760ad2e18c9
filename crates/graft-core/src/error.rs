//! Model errors.

use graft_emit::EmitError;
use thiserror::Error;

/// Errors raised while building, rewriting, computing or compiling a model.
///
/// All of them describe static problems with a graph's shape or types;
/// none are transient, so callers should abort the operation in progress.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("size mismatch: expected {expected} elements, found {found}")]
    SizeMismatch { expected: usize, found: usize },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("range {start}..{end} out of bounds for {size} elements")]
    RangeOutOfBounds {
        start: usize,
        end: usize,
        size: usize,
    },

    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("output `{port}` has not been computed")]
    NotComputed { port: String },

    #[error("cycle detected involving node {0}")]
    CycleDetected(usize),

    #[error("unknown node type `{0}`")]
    UnknownNodeType(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid settings: {0}")]
    Config(#[from] toml::de::Error),

    #[error("emit error: {0}")]
    Emit(#[from] EmitError),
}

/// Coarse classification of a [`ModelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SizeMismatch,
    TypeMismatch,
    RangeOutOfBounds,
    UnresolvedReference,
    UnsupportedOperation,
    NotComputed,
    Other,
}

impl ModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            ModelError::TypeMismatch(_) => ErrorKind::TypeMismatch,
            ModelError::RangeOutOfBounds { .. } => ErrorKind::RangeOutOfBounds,
            ModelError::UnresolvedReference(_) => ErrorKind::UnresolvedReference,
            ModelError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            ModelError::NotComputed { .. } => ErrorKind::NotComputed,
            ModelError::Emit(e) => match e {
                EmitError::TypeMismatch { .. } | EmitError::SignatureMismatch { .. } => {
                    ErrorKind::TypeMismatch
                }
                EmitError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
                EmitError::IndexOutOfBounds { .. } => ErrorKind::RangeOutOfBounds,
                EmitError::UnknownFunction(_) | EmitError::UnknownValue(..) => {
                    ErrorKind::UnresolvedReference
                }
                _ => ErrorKind::Other,
            },
            _ => ErrorKind::Other,
        }
    }

    pub(crate) fn range(start: usize, len: usize, size: usize) -> Self {
        ModelError::RangeOutOfBounds {
            start,
            end: start.saturating_add(len),
            size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_errors_map_to_kinds() {
        let e: ModelError = EmitError::UnsupportedOperation {
            operation: "x".into(),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::UnsupportedOperation);
        let e: ModelError = EmitError::IndexOutOfBounds { index: 3, size: 2 }.into();
        assert_eq!(e.kind(), ErrorKind::RangeOutOfBounds);
        assert_eq!(ModelError::CycleDetected(1).kind(), ErrorKind::Other);
    }
}
