//! Backend-neutral emission interface.
//!
//! Nodes compile against these two traits only. A [`ModuleEmitter`] owns
//! functions, external declarations, module-level globals and metadata; a
//! [`FunctionEmitter`] appends instructions to one function body and is
//! handed out by [`ModuleEmitter::begin_function`]. A function emitter may
//! begin another function through [`FunctionEmitter::module`]; the nested
//! function must be finished before the outer one continues.

use crate::error::EmitError;
use crate::metadata::Metadata;
use crate::ops::{BinaryOperationType, UnaryOperationType};
use crate::types::{ElementType, FunctionDeclaration, Scalar, VariableType};

/// Handle to a value inside the function that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub u32);

/// Body of a counted loop: receives the emitter and the `int64` loop index.
pub type LoopBody<'a> = dyn FnMut(&mut dyn FunctionEmitter, Value) -> Result<(), EmitError> + 'a;

pub trait FunctionEmitter {
    fn name(&self) -> &str;

    /// The value bound to parameter `index`.
    fn argument(&self, index: usize) -> Result<Value, EmitError>;

    fn value_type(&self, value: Value) -> Result<VariableType, EmitError>;

    fn literal(&mut self, value: Scalar) -> Result<Value, EmitError>;

    /// Stack array local to the current invocation.
    fn local_array(&mut self, element_type: ElementType, size: usize) -> Result<Value, EmitError>;

    /// Module-level array that keeps its contents across invocations.
    ///
    /// The first request for `name` creates it with `initial` values; later
    /// requests with the same shape return the existing storage.
    fn global_array(
        &mut self,
        name: &str,
        element_type: ElementType,
        initial: &[Scalar],
    ) -> Result<Value, EmitError>;

    fn load(&mut self, pointer: Value, offset: Value) -> Result<Value, EmitError>;

    fn store(&mut self, pointer: Value, offset: Value, value: Value) -> Result<(), EmitError>;

    fn binary(
        &mut self,
        op: BinaryOperationType,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, EmitError>;

    fn unary(&mut self, op: UnaryOperationType, operand: Value) -> Result<Value, EmitError>;

    fn cast(&mut self, value: Value, to: ElementType) -> Result<Value, EmitError>;

    /// Emit `for i in 0..count { body(i) }`.
    fn for_loop(&mut self, count: usize, body: &mut LoopBody<'_>) -> Result<(), EmitError>;

    fn call(&mut self, callee: &str, arguments: &[Value]) -> Result<(), EmitError>;

    fn module(&mut self) -> &mut dyn ModuleEmitter;

    /// Close the function and hand its body to the module.
    fn finish(self: Box<Self>) -> Result<(), EmitError>;

    fn index(&mut self, index: usize) -> Result<Value, EmitError> {
        let index = i64::try_from(index).map_err(|_| EmitError::IndexOutOfBounds {
            index,
            size: i64::MAX as usize,
        })?;
        self.literal(Scalar::I64(index))
    }

    fn load_at(&mut self, pointer: Value, index: usize) -> Result<Value, EmitError> {
        let offset = self.index(index)?;
        self.load(pointer, offset)
    }

    fn store_at(&mut self, pointer: Value, index: usize, value: Value) -> Result<(), EmitError> {
        let offset = self.index(index)?;
        self.store(pointer, offset, value)
    }

    /// Tag this function.
    fn insert_metadata(&mut self, tag: &str, value: &str) {
        let name = self.name().to_string();
        self.module().metadata_mut().insert_function_tag(&name, tag, value);
    }
}

pub trait ModuleEmitter {
    fn name(&self) -> &str;

    fn begin_function<'a>(
        &'a mut self,
        declaration: FunctionDeclaration,
    ) -> Result<Box<dyn FunctionEmitter + 'a>, EmitError>;

    /// Declare a function whose body is supplied at run or link time.
    ///
    /// Redeclaring with an identical signature is a no-op.
    fn declare_external(&mut self, declaration: FunctionDeclaration) -> Result<(), EmitError>;

    /// Add a function from precompiled code in this backend's text format.
    fn link_precompiled(
        &mut self,
        declaration: &FunctionDeclaration,
        code: &str,
    ) -> Result<(), EmitError>;

    fn function_declaration(&self, name: &str) -> Option<&FunctionDeclaration>;

    fn function_names(&self) -> Vec<String>;

    fn metadata(&self) -> &Metadata;

    fn metadata_mut(&mut self) -> &mut Metadata;

    fn has_function(&self, name: &str) -> bool {
        self.function_declaration(name).is_some()
    }
}

/// Check call arguments against a declaration.
pub(crate) fn check_call_signature(
    declaration: &FunctionDeclaration,
    argument_types: &[VariableType],
) -> Result<(), EmitError> {
    if declaration.parameters.len() != argument_types.len() {
        return Err(EmitError::SignatureMismatch {
            function: declaration.name.clone(),
            message: format!(
                "expected {} arguments, got {}",
                declaration.parameters.len(),
                argument_types.len()
            ),
        });
    }
    for (param, ty) in declaration.parameters.iter().zip(argument_types) {
        if param.ty != *ty {
            return Err(EmitError::SignatureMismatch {
                function: declaration.name.clone(),
                message: format!("parameter `{}` is {}, got {ty}", param.name, param.ty),
            });
        }
    }
    Ok(())
}
