//! LLVM backend.
//!
//! Only available with the `llvm` feature. [`LlvmModule`] implements
//! [`ModuleEmitter`] over an inkwell module; precompiled code is textual
//! LLVM IR linked into it. Tags are kept in a side table and mirrored into
//! named module metadata when IR is emitted.

mod function;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::{Linkage, Module};
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine,
};
use inkwell::types::{BasicMetadataTypeEnum, BasicTypeEnum};
use inkwell::values::FunctionValue;
use inkwell::{AddressSpace, OptimizationLevel};
use tracing::debug;

use crate::emitter::{FunctionEmitter, ModuleEmitter};
use crate::error::EmitError;
use crate::metadata::Metadata;
use crate::types::{ElementType, FunctionDeclaration, VariableType};

pub use self::function::LlvmFunction;

pub(crate) fn build_err(stage: &str, e: impl std::fmt::Display) -> EmitError {
    EmitError::Backend {
        stage: stage.into(),
        message: e.to_string(),
    }
}

pub struct LlvmModule<'ctx> {
    name: String,
    context: &'ctx Context,
    module: Module<'ctx>,
    builder: Builder<'ctx>,
    declarations: BTreeMap<String, FunctionDeclaration>,
    defined: BTreeSet<String>,
    precompiled: BTreeMap<String, String>,
    globals: BTreeMap<String, (ElementType, usize)>,
    metadata: Metadata,
    metadata_written: bool,
}

impl<'ctx> LlvmModule<'ctx> {
    pub fn new(context: &'ctx Context, name: &str) -> Self {
        Self {
            name: name.to_string(),
            context,
            module: context.create_module(name),
            builder: context.create_builder(),
            declarations: BTreeMap::new(),
            defined: BTreeSet::new(),
            precompiled: BTreeMap::new(),
            globals: BTreeMap::new(),
            metadata: Metadata::new(),
            metadata_written: false,
        }
    }

    pub fn llvm_module(&self) -> &Module<'ctx> {
        &self.module
    }

    pub(crate) fn element_type(&self, ty: ElementType) -> BasicTypeEnum<'ctx> {
        match ty {
            ElementType::Float => self.context.f32_type().into(),
            ElementType::Double => self.context.f64_type().into(),
            ElementType::Int32 => self.context.i32_type().into(),
            ElementType::Int64 => self.context.i64_type().into(),
            ElementType::Boolean => self.context.bool_type().into(),
        }
    }

    fn variable_type(&self, ty: VariableType) -> BasicMetadataTypeEnum<'ctx> {
        match ty {
            VariableType::Scalar(t) => self.element_type(t).into(),
            VariableType::Pointer(_) => self.context.ptr_type(AddressSpace::default()).into(),
        }
    }

    /// Get or add the LLVM function for a declaration.
    fn function_value(&self, declaration: &FunctionDeclaration) -> FunctionValue<'ctx> {
        if let Some(f) = self.module.get_function(&declaration.name) {
            return f;
        }
        let params: Vec<BasicMetadataTypeEnum<'ctx>> = declaration
            .parameter_types()
            .map(|t| self.variable_type(t))
            .collect();
        let fn_type = self.context.void_type().fn_type(&params, false);
        self.module
            .add_function(&declaration.name, fn_type, Some(Linkage::External))
    }

    fn declare(&mut self, declaration: &FunctionDeclaration) -> Result<(), EmitError> {
        match self.declarations.get(&declaration.name) {
            Some(existing) if existing != declaration => Err(EmitError::SignatureMismatch {
                function: declaration.name.clone(),
                message: format!("previously declared as `{existing}`"),
            }),
            Some(_) => Ok(()),
            None => {
                self.function_value(declaration);
                self.declarations
                    .insert(declaration.name.clone(), declaration.clone());
                Ok(())
            }
        }
    }

    fn write_metadata(&mut self) -> Result<(), EmitError> {
        if self.metadata_written {
            return Ok(());
        }
        for function in self.declarations.keys() {
            for tag in [
                crate::CALLBACK_FUNCTION_TAG,
                crate::PREDICT_FUNCTION_TAG,
                crate::STEP_FUNCTION_TAG,
                crate::STEP_TIME_FUNCTION_TAG,
                crate::DECLARE_IN_HEADER_TAG,
            ] {
                for value in self.metadata.function_tag(function, tag) {
                    let node = self.context.metadata_node(&[
                        self.context.metadata_string(function).into(),
                        self.context.metadata_string(value).into(),
                    ]);
                    self.module
                        .add_global_metadata(tag, &node)
                        .map_err(|e| build_err("metadata", e))?;
                }
            }
        }
        for value in self.metadata.module_tag(crate::DECLARE_IN_HEADER_TAG) {
            let node = self
                .context
                .metadata_node(&[self.context.metadata_string(value).into()]);
            self.module
                .add_global_metadata("graft.module.declare", &node)
                .map_err(|e| build_err("metadata", e))?;
        }
        self.metadata_written = true;
        Ok(())
    }

    /// Verify the module and return its textual IR.
    pub fn emit_llvm_ir(&mut self) -> Result<String, EmitError> {
        self.write_metadata()?;
        self.module
            .verify()
            .map_err(|e| build_err("verify_module", e.to_string()))?;
        Ok(self.module.print_to_string().to_string())
    }

    /// Write a native object file for the host.
    pub fn emit_object(
        &mut self,
        level: OptimizationLevel,
        path: &Path,
    ) -> Result<(), EmitError> {
        self.write_metadata()?;
        Target::initialize_native(&InitializationConfig::default())
            .map_err(|e| build_err("target_init", e))?;
        let triple = TargetMachine::get_default_triple();
        let target = Target::from_triple(&triple).map_err(|e| build_err("target", e))?;
        let machine = target
            .create_target_machine(
                &triple,
                "generic",
                "",
                level,
                RelocMode::PIC,
                CodeModel::Default,
            )
            .ok_or_else(|| build_err("target_machine", "cannot create target machine"))?;
        self.module
            .set_data_layout(&machine.get_target_data().get_data_layout());
        self.module.set_triple(&triple);
        machine
            .write_to_file(&self.module, FileType::Object, path)
            .map_err(|e| build_err("emit_object", e))?;
        debug!(module = %self.name, path = %path.display(), "wrote object file");
        Ok(())
    }

    /// JIT-compile the module and run a function taking `f64` buffers.
    pub fn run_f64(&self, function: &str, buffers: &mut [Vec<f64>]) -> Result<(), EmitError> {
        let engine = self
            .module
            .create_jit_execution_engine(OptimizationLevel::None)
            .map_err(|e| build_err("jit", e))?;
        match buffers {
            [a] => unsafe {
                let f = engine
                    .get_function::<unsafe extern "C" fn(*mut f64)>(function)
                    .map_err(|e| build_err("jit_lookup", e))?;
                f.call(a.as_mut_ptr());
            },
            [a, b] => unsafe {
                let f = engine
                    .get_function::<unsafe extern "C" fn(*mut f64, *mut f64)>(function)
                    .map_err(|e| build_err("jit_lookup", e))?;
                f.call(a.as_mut_ptr(), b.as_mut_ptr());
            },
            [a, b, c] => unsafe {
                let f = engine
                    .get_function::<unsafe extern "C" fn(*mut f64, *mut f64, *mut f64)>(
                        function,
                    )
                    .map_err(|e| build_err("jit_lookup", e))?;
                f.call(a.as_mut_ptr(), b.as_mut_ptr(), c.as_mut_ptr());
            },
            _ => {
                return Err(EmitError::UnsupportedOperation {
                    operation: format!("jit call with {} buffers", buffers.len()),
                })
            }
        }
        Ok(())
    }
}

impl<'ctx> ModuleEmitter for LlvmModule<'ctx> {
    fn name(&self) -> &str {
        &self.name
    }

    fn begin_function<'a>(
        &'a mut self,
        declaration: FunctionDeclaration,
    ) -> Result<Box<dyn FunctionEmitter + 'a>, EmitError> {
        if self.defined.contains(&declaration.name) {
            return Err(EmitError::DuplicateFunction(declaration.name));
        }
        self.declare(&declaration)?;
        self.defined.insert(declaration.name.clone());
        Ok(Box::new(LlvmFunction::new(self, declaration)?))
    }

    fn declare_external(&mut self, declaration: FunctionDeclaration) -> Result<(), EmitError> {
        if self.defined.contains(&declaration.name) {
            return Err(EmitError::DuplicateFunction(declaration.name));
        }
        self.declare(&declaration)
    }

    fn link_precompiled(
        &mut self,
        declaration: &FunctionDeclaration,
        code: &str,
    ) -> Result<(), EmitError> {
        if let Some(existing) = self.precompiled.get(&declaration.name) {
            if existing == code {
                return Ok(());
            }
            return Err(EmitError::DuplicateFunction(declaration.name.clone()));
        }
        if self.defined.contains(&declaration.name) {
            return Err(EmitError::DuplicateFunction(declaration.name.clone()));
        }
        let invalid = |message: String| EmitError::InvalidPrecompiledCode {
            function: declaration.name.clone(),
            message,
        };
        let buffer =
            MemoryBuffer::create_from_memory_range_copy(code.as_bytes(), &declaration.name);
        let other = self
            .context
            .create_module_from_ir(buffer)
            .map_err(|e| invalid(e.to_string()))?;
        if other.get_function(&declaration.name).is_none() {
            return Err(invalid("code does not define the function".into()));
        }
        self.declare(declaration)?;
        self.module
            .link_in_module(other)
            .map_err(|e| invalid(e.to_string()))?;
        self.defined.insert(declaration.name.clone());
        self.precompiled
            .insert(declaration.name.clone(), code.to_string());
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
