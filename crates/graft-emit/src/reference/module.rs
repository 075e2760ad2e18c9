//! Reference module and function emitters.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::emitter::{check_call_signature, FunctionEmitter, LoopBody, ModuleEmitter, Value};
use crate::error::EmitError;
use crate::metadata::Metadata;
use crate::ops::{BinaryOperationType, UnaryOperationType};
use crate::types::{ElementType, FunctionDeclaration, Scalar, VariableType};

use super::instruction::{FunctionBody, Instruction, Register};

/// Module-level array with its initial contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalArray {
    pub element_type: ElementType,
    pub initial: Vec<Scalar>,
}

/// A module of structured functions, runnable by
/// [`ReferenceExecutor`](super::ReferenceExecutor).
#[derive(Debug, Clone, Default)]
pub struct ReferenceModule {
    name: String,
    declarations: BTreeMap<String, FunctionDeclaration>,
    functions: BTreeMap<String, FunctionBody>,
    externals: BTreeSet<String>,
    globals: BTreeMap<String, GlobalArray>,
    metadata: Metadata,
}

impl ReferenceModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionBody> {
        self.functions.get(name)
    }

    /// Precompiled code for a defined function, accepted by `link_precompiled`.
    pub fn function_code(&self, name: &str) -> Result<String, EmitError> {
        let body = self
            .functions
            .get(name)
            .ok_or_else(|| EmitError::UnknownFunction(name.to_string()))?;
        serde_json::to_string(body).map_err(|e| EmitError::Backend {
            stage: "function_code".into(),
            message: e.to_string(),
        })
    }

    pub fn is_external(&self, name: &str) -> bool {
        self.externals.contains(name)
    }

    pub fn externals(&self) -> impl Iterator<Item = &str> {
        self.externals.iter().map(String::as_str)
    }

    pub fn globals(&self) -> &BTreeMap<String, GlobalArray> {
        &self.globals
    }

    fn check_undefined(&self, name: &str) -> Result<(), EmitError> {
        if self.functions.contains_key(name) || self.externals.contains(name) {
            return Err(EmitError::DuplicateFunction(name.to_string()));
        }
        Ok(())
    }

    fn declare(&mut self, declaration: &FunctionDeclaration) -> Result<(), EmitError> {
        match self.declarations.get(&declaration.name) {
            Some(existing) if existing != declaration => Err(EmitError::SignatureMismatch {
                function: declaration.name.clone(),
                message: format!("previously declared as `{existing}`"),
            }),
            Some(_) => Ok(()),
            None => {
                self.declarations
                    .insert(declaration.name.clone(), declaration.clone());
                Ok(())
            }
        }
    }
}

impl ModuleEmitter for ReferenceModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn begin_function<'a>(
        &'a mut self,
        declaration: FunctionDeclaration,
    ) -> Result<Box<dyn FunctionEmitter + 'a>, EmitError> {
        self.check_undefined(&declaration.name)?;
        self.declare(&declaration)?;
        trace!(function = %declaration.name, "begin reference function");
        Ok(Box::new(ReferenceFunction::new(self, declaration)))
    }

    fn declare_external(&mut self, declaration: FunctionDeclaration) -> Result<(), EmitError> {
        if self.functions.contains_key(&declaration.name) {
            return Err(EmitError::DuplicateFunction(declaration.name));
        }
        self.declare(&declaration)?;
        self.externals.insert(declaration.name);
        Ok(())
    }

    fn link_precompiled(
        &mut self,
        declaration: &FunctionDeclaration,
        code: &str,
    ) -> Result<(), EmitError> {
        let invalid = |message: String| EmitError::InvalidPrecompiledCode {
            function: declaration.name.clone(),
            message,
        };
        let body: FunctionBody = serde_json::from_str(code).map_err(|e| invalid(e.to_string()))?;
        if body.declaration != *declaration {
            return Err(EmitError::SignatureMismatch {
                function: declaration.name.clone(),
                message: format!("precompiled code defines `{}`", body.declaration),
            });
        }
        validate_body(&body).map_err(invalid)?;

        if let Some(existing) = self.functions.get(&declaration.name) {
            if *existing == body {
                return Ok(());
            }
            return Err(EmitError::DuplicateFunction(declaration.name.clone()));
        }
        if self.externals.contains(&declaration.name) {
            return Err(EmitError::DuplicateFunction(declaration.name.clone()));
        }
        self.declare(declaration)?;
        self.functions.insert(declaration.name.clone(), body);
        Ok(())
    }

    fn function_declaration(&self, name: &str) -> Option<&FunctionDeclaration> {
        self.declarations.get(name)
    }

    fn function_names(&self) -> Vec<String> {
        self.declarations.keys().cloned().collect()
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl fmt::Display for ReferenceModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for (name, global) in &self.globals {
            writeln!(
                f,
                "global @{name}: {}[{}]",
                global.element_type,
                global.initial.len()
            )?;
        }
        for name in &self.externals {
            if let Some(decl) = self.declarations.get(name) {
                writeln!(f, "extern {decl}")?;
            }
        }
        for body in self.functions.values() {
            writeln!(f)?;
            write!(f, "{body}")?;
        }
        Ok(())
    }
}

/// Register references must be in range and parameters must match.
fn validate_body(body: &FunctionBody) -> Result<(), String> {
    let params = body.declaration.parameters.len();
    if body.registers.len() < params {
        return Err(format!(
            "{} registers cannot hold {params} parameters",
            body.registers.len()
        ));
    }
    for (param, ty) in body.declaration.parameters.iter().zip(&body.registers) {
        if param.ty != *ty {
            return Err(format!("parameter `{}` register has type {ty}", param.name));
        }
    }
    validate_block(&body.body, body.registers.len())
}

fn validate_block(block: &[Instruction], registers: usize) -> Result<(), String> {
    let check = |r: Register| {
        if (r as usize) < registers {
            Ok(())
        } else {
            Err(format!("register %{r} out of range"))
        }
    };
    for inst in block {
        match inst {
            Instruction::Const { dest, .. }
            | Instruction::Alloca { dest, .. }
            | Instruction::Global { dest, .. } => check(*dest)?,
            Instruction::Load {
                dest,
                pointer,
                offset,
            } => {
                check(*dest)?;
                check(*pointer)?;
                check(*offset)?;
            }
            Instruction::Store {
                pointer,
                offset,
                value,
            } => {
                check(*pointer)?;
                check(*offset)?;
                check(*value)?;
            }
            Instruction::Binary { dest, lhs, rhs, .. } => {
                check(*dest)?;
                check(*lhs)?;
                check(*rhs)?;
            }
            Instruction::Unary { dest, operand, .. } => {
                check(*dest)?;
                check(*operand)?;
            }
            Instruction::Cast { dest, value, .. } => {
                check(*dest)?;
                check(*value)?;
            }
            Instruction::Loop { counter, body, .. } => {
                check(*counter)?;
                validate_block(body, registers)?;
            }
            Instruction::Call { arguments, .. } => {
                for r in arguments {
                    check(*r)?;
                }
            }
        }
    }
    Ok(())
}

/// Emits one function into a [`ReferenceModule`], type-checking as it goes.
pub struct ReferenceFunction<'m> {
    module: &'m mut ReferenceModule,
    declaration: FunctionDeclaration,
    registers: Vec<VariableType>,
    /// Innermost open block last; loops push a block while their body is emitted.
    blocks: Vec<Vec<Instruction>>,
}

impl<'m> ReferenceFunction<'m> {
    fn new(module: &'m mut ReferenceModule, declaration: FunctionDeclaration) -> Self {
        let registers = declaration.parameter_types().collect();
        Self {
            module,
            declaration,
            registers,
            blocks: vec![Vec::new()],
        }
    }

    fn allocate(&mut self, ty: VariableType) -> Register {
        self.registers.push(ty);
        (self.registers.len() - 1) as Register
    }

    fn push(&mut self, instruction: Instruction) {
        if let Some(block) = self.blocks.last_mut() {
            block.push(instruction);
        }
    }

    fn scalar_type(&self, value: Value, operation: &str) -> Result<ElementType, EmitError> {
        match self.value_type(value)? {
            VariableType::Scalar(t) => Ok(t),
            other => Err(EmitError::type_mismatch(operation, other)),
        }
    }

    fn pointer_type(&self, value: Value, operation: &str) -> Result<ElementType, EmitError> {
        match self.value_type(value)? {
            VariableType::Pointer(t) => Ok(t),
            other => Err(EmitError::type_mismatch(operation, other)),
        }
    }

    fn check_offset(&self, offset: Value, operation: &str) -> Result<(), EmitError> {
        let ty = self.scalar_type(offset, operation)?;
        if !ty.is_integer() {
            return Err(EmitError::type_mismatch(operation, format!("{ty} offset")));
        }
        Ok(())
    }
}

impl FunctionEmitter for ReferenceFunction<'_> {
    fn name(&self) -> &str {
        &self.declaration.name
    }

    fn argument(&self, index: usize) -> Result<Value, EmitError> {
        if index < self.declaration.parameters.len() {
            Ok(Value(index as u32))
        } else {
            Err(EmitError::SignatureMismatch {
                function: self.declaration.name.clone(),
                message: format!("no parameter at index {index}"),
            })
        }
    }

    fn value_type(&self, value: Value) -> Result<VariableType, EmitError> {
        self.registers
            .get(value.0 as usize)
            .copied()
            .ok_or_else(|| EmitError::UnknownValue(value.0, self.declaration.name.clone()))
    }

    fn literal(&mut self, value: Scalar) -> Result<Value, EmitError> {
        let dest = self.allocate(VariableType::Scalar(value.element_type()));
        self.push(Instruction::Const { dest, value });
        Ok(Value(dest))
    }

    fn local_array(&mut self, element_type: ElementType, size: usize) -> Result<Value, EmitError> {
        let dest = self.allocate(VariableType::Pointer(element_type));
        self.push(Instruction::Alloca {
            dest,
            element_type,
            size,
        });
        Ok(Value(dest))
    }

    fn global_array(
        &mut self,
        name: &str,
        element_type: ElementType,
        initial: &[Scalar],
    ) -> Result<Value, EmitError> {
        if let Some(bad) = initial.iter().find(|v| v.element_type() != element_type) {
            return Err(EmitError::type_mismatch(
                format!("global {name}"),
                bad.element_type(),
            ));
        }
        match self.module.globals.get(name) {
            Some(existing)
                if existing.element_type != element_type
                    || existing.initial.len() != initial.len() =>
            {
                return Err(EmitError::GlobalConflict {
                    name: name.to_string(),
                });
            }
            Some(_) => {}
            None => {
                self.module.globals.insert(
                    name.to_string(),
                    GlobalArray {
                        element_type,
                        initial: initial.to_vec(),
                    },
                );
            }
        }
        let dest = self.allocate(VariableType::Pointer(element_type));
        self.push(Instruction::Global {
            dest,
            name: name.to_string(),
        });
        Ok(Value(dest))
    }

    fn load(&mut self, pointer: Value, offset: Value) -> Result<Value, EmitError> {
        let element_type = self.pointer_type(pointer, "load")?;
        self.check_offset(offset, "load")?;
        let dest = self.allocate(VariableType::Scalar(element_type));
        self.push(Instruction::Load {
            dest,
            pointer: pointer.0,
            offset: offset.0,
        });
        Ok(Value(dest))
    }

    fn store(&mut self, pointer: Value, offset: Value, value: Value) -> Result<(), EmitError> {
        let element_type = self.pointer_type(pointer, "store")?;
        self.check_offset(offset, "store")?;
        let value_type = self.scalar_type(value, "store")?;
        if value_type != element_type {
            return Err(EmitError::type_mismatch(
                "store",
                format!("{value_type} into {element_type} buffer"),
            ));
        }
        self.push(Instruction::Store {
            pointer: pointer.0,
            offset: offset.0,
            value: value.0,
        });
        Ok(())
    }

    fn binary(
        &mut self,
        op: BinaryOperationType,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, EmitError> {
        let lt = self.scalar_type(lhs, op.name())?;
        let rt = self.scalar_type(rhs, op.name())?;
        if lt != rt {
            return Err(EmitError::type_mismatch(op.name(), format!("{lt} and {rt}")));
        }
        if !op.supports(lt) {
            return Err(EmitError::type_mismatch(op.name(), lt));
        }
        let dest = self.allocate(VariableType::Scalar(lt));
        self.push(Instruction::Binary {
            dest,
            op,
            lhs: lhs.0,
            rhs: rhs.0,
        });
        Ok(Value(dest))
    }

    fn unary(&mut self, op: UnaryOperationType, operand: Value) -> Result<Value, EmitError> {
        let ty = self.scalar_type(operand, op.name())?;
        if !op.supports(ty) {
            return Err(EmitError::type_mismatch(op.name(), ty));
        }
        let dest = self.allocate(VariableType::Scalar(ty));
        self.push(Instruction::Unary {
            dest,
            op,
            operand: operand.0,
        });
        Ok(Value(dest))
    }

    fn cast(&mut self, value: Value, to: ElementType) -> Result<Value, EmitError> {
        self.scalar_type(value, "cast")?;
        let dest = self.allocate(VariableType::Scalar(to));
        self.push(Instruction::Cast {
            dest,
            value: value.0,
            to,
        });
        Ok(Value(dest))
    }

    fn for_loop(&mut self, count: usize, body: &mut LoopBody<'_>) -> Result<(), EmitError> {
        let counter = self.allocate(VariableType::Scalar(ElementType::Int64));
        self.blocks.push(Vec::new());
        let result = body(self, Value(counter));
        let block = self.blocks.pop().unwrap_or_default();
        result?;
        self.push(Instruction::Loop {
            counter,
            count,
            body: block,
        });
        Ok(())
    }

    fn call(&mut self, callee: &str, arguments: &[Value]) -> Result<(), EmitError> {
        let declaration = self
            .module
            .declarations
            .get(callee)
            .ok_or_else(|| EmitError::UnknownFunction(callee.to_string()))?;
        let types = arguments
            .iter()
            .map(|v| {
                self.registers
                    .get(v.0 as usize)
                    .copied()
                    .ok_or_else(|| EmitError::UnknownValue(v.0, self.declaration.name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        check_call_signature(declaration, &types)?;
        self.push(Instruction::Call {
            callee: callee.to_string(),
            arguments: arguments.iter().map(|v| v.0).collect(),
        });
        Ok(())
    }

    fn module(&mut self) -> &mut dyn ModuleEmitter {
        &mut *self.module
    }

    fn finish(self: Box<Self>) -> Result<(), EmitError> {
        let ReferenceFunction {
            module,
            declaration,
            registers,
            mut blocks,
        } = *self;
        if blocks.len() != 1 {
            return Err(EmitError::Backend {
                stage: "finish".into(),
                message: format!("function `{}` has an unterminated loop", declaration.name),
            });
        }
        let body = blocks.pop().unwrap_or_default();
        trace!(
            function = %declaration.name,
            instructions = body.len(),
            "finished reference function"
        );
        module.functions.insert(
            declaration.name.clone(),
            FunctionBody {
                declaration,
                registers,
                body,
            },
        );
        Ok(())
    }
}
