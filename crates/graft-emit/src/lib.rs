//! Code emission for graft models.
//!
//! This crate is the boundary between the graph engine and whatever turns
//! abstract instructions into something executable. It provides:
//!
//! - the element types and scalar kernels shared by interpreted and
//!   compiled execution ([`types`], [`ops`]),
//! - the object-safe [`ModuleEmitter`] / [`FunctionEmitter`] traits nodes
//!   compile against ([`emitter`]),
//! - the function and module tagging convention used by external tooling
//!   ([`metadata`]) and a C header writer ([`header`]),
//! - an in-process reference backend with an executor ([`reference`]),
//! - an LLVM backend behind the `llvm` feature.

pub mod emitter;
pub mod error;
pub mod header;
pub mod metadata;
pub mod ops;
pub mod reference;
pub mod types;

#[cfg(feature = "llvm")]
pub mod llvm;

pub use emitter::{FunctionEmitter, LoopBody, ModuleEmitter, Value};
pub use error::EmitError;
pub use metadata::{
    functions_with_tag, module_tag_values, FunctionTagValues, Metadata, CALLBACK_FUNCTION_TAG,
    DECLARE_IN_HEADER_TAG, PREDICT_FUNCTION_TAG, STEP_FUNCTION_TAG, STEP_TIME_FUNCTION_TAG,
};
pub use ops::{BinaryOperationType, UnaryOperationType};
pub use types::{Element, ElementType, FunctionDeclaration, NamedVariableType, Scalar, VariableType};
