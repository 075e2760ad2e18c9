//! Function emission into an LLVM module.

use inkwell::basic_block::BasicBlock;
use inkwell::intrinsics::Intrinsic;
use inkwell::types::BasicTypeEnum;
use inkwell::values::{
    AnyValue, BasicMetadataValueEnum, BasicValue, BasicValueEnum, FloatValue, FunctionValue,
    IntValue,
};
use inkwell::{AddressSpace, FloatPredicate, IntPredicate};

use crate::emitter::{check_call_signature, FunctionEmitter, LoopBody, ModuleEmitter, Value};
use crate::error::EmitError;
use crate::ops::{BinaryOperationType, UnaryOperationType};
use crate::types::{ElementType, FunctionDeclaration, Scalar, VariableType};

use super::{build_err, LlvmModule};

pub struct LlvmFunction<'a, 'ctx> {
    module: &'a mut LlvmModule<'ctx>,
    declaration: FunctionDeclaration,
    function: FunctionValue<'ctx>,
    entry: BasicBlock<'ctx>,
    values: Vec<(BasicValueEnum<'ctx>, VariableType)>,
    /// Builder position of the enclosing function, restored on finish.
    saved_block: Option<BasicBlock<'ctx>>,
}

impl<'a, 'ctx> LlvmFunction<'a, 'ctx> {
    pub(super) fn new(
        module: &'a mut LlvmModule<'ctx>,
        declaration: FunctionDeclaration,
    ) -> Result<Self, EmitError> {
        let function = module.function_value(&declaration);
        let saved_block = module.builder.get_insert_block();
        let entry = module.context.append_basic_block(function, "entry");
        module.builder.position_at_end(entry);

        let mut values = Vec::with_capacity(declaration.parameters.len());
        for (i, param) in declaration.parameters.iter().enumerate() {
            let value = function
                .get_nth_param(i as u32)
                .ok_or_else(|| build_err("parameters", format!("missing parameter {i}")))?;
            values.push((value, param.ty));
        }
        Ok(Self {
            module,
            declaration,
            function,
            entry,
            values,
            saved_block,
        })
    }

    fn push(&mut self, value: BasicValueEnum<'ctx>, ty: VariableType) -> Value {
        self.values.push((value, ty));
        Value((self.values.len() - 1) as u32)
    }

    fn get(&self, value: Value) -> Result<(BasicValueEnum<'ctx>, VariableType), EmitError> {
        self.values
            .get(value.0 as usize)
            .copied()
            .ok_or_else(|| EmitError::UnknownValue(value.0, self.declaration.name.clone()))
    }

    fn scalar(
        &self,
        value: Value,
        operation: &str,
    ) -> Result<(BasicValueEnum<'ctx>, ElementType), EmitError> {
        match self.get(value)? {
            (v, VariableType::Scalar(t)) => Ok((v, t)),
            (_, other) => Err(EmitError::type_mismatch(operation, other)),
        }
    }

    fn pointer(
        &self,
        value: Value,
        operation: &str,
    ) -> Result<(BasicValueEnum<'ctx>, ElementType), EmitError> {
        match self.get(value)? {
            (v, VariableType::Pointer(t)) => Ok((v, t)),
            (_, other) => Err(EmitError::type_mismatch(operation, other)),
        }
    }

    fn llvm_type(&self, ty: ElementType) -> BasicTypeEnum<'ctx> {
        self.module.element_type(ty)
    }

    fn constant(&self, value: Scalar) -> BasicValueEnum<'ctx> {
        let ctx = self.module.context;
        match value {
            Scalar::F32(v) => ctx.f32_type().const_float(v as f64).into(),
            Scalar::F64(v) => ctx.f64_type().const_float(v).into(),
            Scalar::I32(v) => ctx.i32_type().const_int(v as i64 as u64, true).into(),
            Scalar::I64(v) => ctx.i64_type().const_int(v as u64, true).into(),
            Scalar::Bool(v) => ctx.bool_type().const_int(u64::from(v), false).into(),
        }
    }

    fn element_pointer(
        &self,
        pointer: Value,
        offset: Value,
        operation: &str,
    ) -> Result<(inkwell::values::PointerValue<'ctx>, ElementType), EmitError> {
        let (base, ty) = self.pointer(pointer, operation)?;
        let (index, index_ty) = self.scalar(offset, operation)?;
        if !index_ty.is_integer() {
            return Err(EmitError::type_mismatch(operation, format!("{index_ty} offset")));
        }
        let address = unsafe {
            self.module.builder.build_gep(
                self.llvm_type(ty),
                base.into_pointer_value(),
                &[index.into_int_value()],
                "addr",
            )
        }
        .map_err(|e| build_err(operation, e))?;
        Ok((address, ty))
    }

    fn call_intrinsic(
        &self,
        name: &str,
        types: &[BasicTypeEnum<'ctx>],
        args: &[BasicMetadataValueEnum<'ctx>],
    ) -> Result<inkwell::values::AnyValueEnum<'ctx>, EmitError> {
        let intrinsic = Intrinsic::find(name)
            .ok_or_else(|| build_err("intrinsic", format!("{name} not found")))?;
        let decl = intrinsic
            .get_declaration(&self.module.module, types)
            .ok_or_else(|| build_err("intrinsic", format!("{name} has no declaration")))?;
        let call = self
            .module
            .builder
            .build_call(decl, args, name)
            .map_err(|e| build_err(name, e))?;
        Ok(call.as_any_value_enum())
    }

    fn libm_call(&self, name: &str, operand: FloatValue<'ctx>) -> Result<FloatValue<'ctx>, EmitError> {
        let ty = operand.get_type();
        let f = self.module.module.get_function(name).unwrap_or_else(|| {
            self.module
                .module
                .add_function(name, ty.fn_type(&[ty.into()], false), None)
        });
        let call = self
            .module
            .builder
            .build_call(f, &[operand.into()], name)
            .map_err(|e| build_err(name, e))?;
        Ok(call.as_any_value_enum().into_float_value())
    }

    /// `lhs op rhs` for signed division or remainder, yielding 0 when the
    /// divisor is 0 or the quotient overflows.
    fn guarded_division(
        &self,
        op: BinaryOperationType,
        lhs: IntValue<'ctx>,
        rhs: IntValue<'ctx>,
    ) -> Result<IntValue<'ctx>, EmitError> {
        let b = &self.module.builder;
        let ty = lhs.get_type();
        let zero = ty.const_zero();
        let one = ty.const_int(1, false);
        let minus_one = ty.const_all_ones();
        let min = if ty.get_bit_width() == 32 {
            ty.const_int(i32::MIN as i64 as u64, true)
        } else {
            ty.const_int(i64::MIN as u64, true)
        };
        let e = |e| build_err(op.name(), e);
        let divisor_zero = b.build_int_compare(IntPredicate::EQ, rhs, zero, "dz").map_err(e)?;
        let lhs_min = b.build_int_compare(IntPredicate::EQ, lhs, min, "lmin").map_err(e)?;
        let rhs_neg = b.build_int_compare(IntPredicate::EQ, rhs, minus_one, "rneg").map_err(e)?;
        let overflow = b.build_and(lhs_min, rhs_neg, "ovf").map_err(e)?;
        let bad = b.build_or(divisor_zero, overflow, "bad").map_err(e)?;
        let safe_rhs = b
            .build_select(bad, one, rhs, "safe")
            .map_err(e)?
            .into_int_value();
        let raw = if op == BinaryOperationType::Divide {
            b.build_int_signed_div(lhs, safe_rhs, "div").map_err(e)?
        } else {
            b.build_int_signed_rem(lhs, safe_rhs, "rem").map_err(e)?
        };
        Ok(b.build_select(bad, zero, raw, "q").map_err(e)?.into_int_value())
    }
}

impl<'a, 'ctx> FunctionEmitter for LlvmFunction<'a, 'ctx> {
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
        self.get(value).map(|(_, ty)| ty)
    }

    fn literal(&mut self, value: Scalar) -> Result<Value, EmitError> {
        let constant = self.constant(value);
        Ok(self.push(constant, VariableType::Scalar(value.element_type())))
    }

    fn local_array(&mut self, element_type: ElementType, size: usize) -> Result<Value, EmitError> {
        // Allocas go in the entry block so loops never grow the stack.
        let current = self.module.builder.get_insert_block();
        match self.entry.get_first_instruction() {
            Some(first) => self.module.builder.position_before(&first),
            None => self.module.builder.position_at_end(self.entry),
        }
        let count = self
            .module
            .context
            .i64_type()
            .const_int(size.max(1) as u64, false);
        let array = self
            .module
            .builder
            .build_array_alloca(self.llvm_type(element_type), count, "local")
            .map_err(|e| build_err("alloca", e))?;
        if let Some(block) = current {
            self.module.builder.position_at_end(block);
        }
        Ok(self.push(array.into(), VariableType::Pointer(element_type)))
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
        let global = match self.module.globals.get(name) {
            Some(&(ty, len)) if ty != element_type || len != initial.len() => {
                return Err(EmitError::GlobalConflict {
                    name: name.to_string(),
                });
            }
            Some(_) => self
                .module
                .module
                .get_global(name)
                .ok_or_else(|| build_err("global", format!("@{name} vanished")))?,
            None => {
                let len = initial.len() as u32;
                let (array_ty, init): (BasicTypeEnum<'ctx>, BasicValueEnum<'ctx>) =
                    match element_type {
                        ElementType::Float | ElementType::Double => {
                            let ty = self.llvm_type(element_type).into_float_type();
                            let values: Vec<FloatValue<'ctx>> = initial
                                .iter()
                                .map(|v| self.constant(*v).into_float_value())
                                .collect();
                            (ty.array_type(len).into(), ty.const_array(&values).into())
                        }
                        _ => {
                            let ty = self.llvm_type(element_type).into_int_type();
                            let values: Vec<IntValue<'ctx>> = initial
                                .iter()
                                .map(|v| self.constant(*v).into_int_value())
                                .collect();
                            (ty.array_type(len).into(), ty.const_array(&values).into())
                        }
                    };
                let global =
                    self.module
                        .module
                        .add_global(array_ty, Some(AddressSpace::default()), name);
                global.set_initializer(&init);
                self.module
                    .globals
                    .insert(name.to_string(), (element_type, initial.len()));
                global
            }
        };
        Ok(self.push(
            global.as_pointer_value().into(),
            VariableType::Pointer(element_type),
        ))
    }

    fn load(&mut self, pointer: Value, offset: Value) -> Result<Value, EmitError> {
        let (address, ty) = self.element_pointer(pointer, offset, "load")?;
        let value = self
            .module
            .builder
            .build_load(self.llvm_type(ty), address, "ld")
            .map_err(|e| build_err("load", e))?;
        Ok(self.push(value, VariableType::Scalar(ty)))
    }

    fn store(&mut self, pointer: Value, offset: Value, value: Value) -> Result<(), EmitError> {
        let (address, ty) = self.element_pointer(pointer, offset, "store")?;
        let (v, vty) = self.scalar(value, "store")?;
        if vty != ty {
            return Err(EmitError::type_mismatch("store", format!("{vty} into {ty} buffer")));
        }
        self.module
            .builder
            .build_store(address, v)
            .map_err(|e| build_err("store", e))?;
        Ok(())
    }

    fn binary(
        &mut self,
        op: BinaryOperationType,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, EmitError> {
        let (l, lt) = self.scalar(lhs, op.name())?;
        let (r, rt) = self.scalar(rhs, op.name())?;
        if lt != rt {
            return Err(EmitError::type_mismatch(op.name(), format!("{lt} and {rt}")));
        }
        if !op.supports(lt) {
            return Err(EmitError::type_mismatch(op.name(), lt));
        }
        let b = &self.module.builder;
        let e = |e| build_err(op.name(), e);
        let result: BasicValueEnum<'ctx> = if lt.is_float() {
            let (l, r) = (l.into_float_value(), r.into_float_value());
            match op {
                BinaryOperationType::Add => b.build_float_add(l, r, "fadd").map_err(e)?,
                BinaryOperationType::Subtract => b.build_float_sub(l, r, "fsub").map_err(e)?,
                BinaryOperationType::Multiply => b.build_float_mul(l, r, "fmul").map_err(e)?,
                BinaryOperationType::Divide => b.build_float_div(l, r, "fdiv").map_err(e)?,
                BinaryOperationType::Remainder => b.build_float_rem(l, r, "frem").map_err(e)?,
                _ => return Err(EmitError::type_mismatch(op.name(), lt)),
            }
            .into()
        } else {
            let (l, r) = (l.into_int_value(), r.into_int_value());
            match op {
                BinaryOperationType::Add => b.build_int_add(l, r, "add").map_err(e)?,
                BinaryOperationType::Subtract => b.build_int_sub(l, r, "sub").map_err(e)?,
                BinaryOperationType::Multiply => b.build_int_mul(l, r, "mul").map_err(e)?,
                BinaryOperationType::Divide | BinaryOperationType::Remainder => {
                    self.guarded_division(op, l, r)?
                }
                BinaryOperationType::LogicalAnd => b.build_and(l, r, "and").map_err(e)?,
                BinaryOperationType::LogicalOr => b.build_or(l, r, "or").map_err(e)?,
                BinaryOperationType::LogicalXor => b.build_xor(l, r, "xor").map_err(e)?,
            }
            .into()
        };
        Ok(self.push(result, VariableType::Scalar(lt)))
    }

    fn unary(&mut self, op: UnaryOperationType, operand: Value) -> Result<Value, EmitError> {
        let (x, ty) = self.scalar(operand, op.name())?;
        if !op.supports(ty) {
            return Err(EmitError::type_mismatch(op.name(), ty));
        }
        let e = |e| build_err(op.name(), e);
        let llvm_ty = self.llvm_type(ty);
        let result: BasicValueEnum<'ctx> = if ty.is_float() {
            let xf = x.into_float_value();
            let intrinsic = |name: &str| -> Result<BasicValueEnum<'ctx>, EmitError> {
                Ok(self
                    .call_intrinsic(name, &[llvm_ty], &[xf.into()])?
                    .into_float_value()
                    .as_basic_value_enum())
            };
            match op {
                UnaryOperationType::Abs => intrinsic("llvm.fabs")?,
                UnaryOperationType::Exp => intrinsic("llvm.exp")?,
                UnaryOperationType::Log => intrinsic("llvm.log")?,
                UnaryOperationType::Sqrt => intrinsic("llvm.sqrt")?,
                UnaryOperationType::Sin => intrinsic("llvm.sin")?,
                UnaryOperationType::Cos => intrinsic("llvm.cos")?,
                UnaryOperationType::Tanh => {
                    let name = if ty == ElementType::Float { "tanhf" } else { "tanh" };
                    self.libm_call(name, xf)?.into()
                }
                UnaryOperationType::Square => self
                    .module
                    .builder
                    .build_float_mul(xf, xf, "sq")
                    .map_err(e)?
                    .into(),
                UnaryOperationType::LogicalNot => return Err(EmitError::type_mismatch(op.name(), ty)),
            }
        } else {
            let xi = x.into_int_value();
            let b = &self.module.builder;
            match op {
                UnaryOperationType::Abs => {
                    let zero = xi.get_type().const_zero();
                    let negative = b
                        .build_int_compare(IntPredicate::SLT, xi, zero, "neg")
                        .map_err(e)?;
                    let negated = b.build_int_sub(zero, xi, "negx").map_err(e)?;
                    b.build_select(negative, negated, xi, "abs").map_err(e)?
                }
                UnaryOperationType::Square => b.build_int_mul(xi, xi, "sq").map_err(e)?.into(),
                UnaryOperationType::LogicalNot => b.build_not(xi, "not").map_err(e)?.into(),
                _ => return Err(EmitError::type_mismatch(op.name(), ty)),
            }
        };
        Ok(self.push(result, VariableType::Scalar(ty)))
    }

    fn cast(&mut self, value: Value, to: ElementType) -> Result<Value, EmitError> {
        let (x, from) = self.scalar(value, "cast")?;
        if from == to {
            return Ok(self.push(x, VariableType::Scalar(to)));
        }
        let b = &self.module.builder;
        let e = |e| build_err("cast", e);
        let target = self.llvm_type(to);
        let result: BasicValueEnum<'ctx> = match (from, to) {
            (_, ElementType::Boolean) if from.is_float() => {
                let xf = x.into_float_value();
                b.build_float_compare(FloatPredicate::UNE, xf, xf.get_type().const_zero(), "tobool")
                    .map_err(e)?
                    .into()
            }
            (_, ElementType::Boolean) => {
                let xi = x.into_int_value();
                b.build_int_compare(IntPredicate::NE, xi, xi.get_type().const_zero(), "tobool")
                    .map_err(e)?
                    .into()
            }
            (ElementType::Boolean, t) if t.is_float() => b
                .build_unsigned_int_to_float(x.into_int_value(), target.into_float_type(), "bf")
                .map_err(e)?
                .into(),
            (ElementType::Boolean, _) => b
                .build_int_z_extend(x.into_int_value(), target.into_int_type(), "bi")
                .map_err(e)?
                .into(),
            (f, t) if f.is_float() && t.is_float() => {
                let xf = x.into_float_value();
                if t == ElementType::Double {
                    b.build_float_ext(xf, target.into_float_type(), "fext").map_err(e)?
                } else {
                    b.build_float_trunc(xf, target.into_float_type(), "ftrunc").map_err(e)?
                }
                .into()
            }
            (f, _) if f.is_float() => {
                // saturating, matching `as`
                let source = self.llvm_type(from);
                self.call_intrinsic("llvm.fptosi.sat", &[target, source], &[x.into()])?
                    .into_int_value()
                    .into()
            }
            (_, t) if t.is_float() => b
                .build_signed_int_to_float(x.into_int_value(), target.into_float_type(), "sf")
                .map_err(e)?
                .into(),
            _ => {
                let xi = x.into_int_value();
                if to == ElementType::Int64 {
                    b.build_int_s_extend(xi, target.into_int_type(), "sext").map_err(e)?
                } else {
                    b.build_int_truncate(xi, target.into_int_type(), "trunc").map_err(e)?
                }
                .into()
            }
        };
        Ok(self.push(result, VariableType::Scalar(to)))
    }

    fn for_loop(&mut self, count: usize, body: &mut LoopBody<'_>) -> Result<(), EmitError> {
        let ctx = self.module.context;
        let i64_ty = ctx.i64_type();
        let e = |e| build_err("loop", e);
        let preheader = self
            .module
            .builder
            .get_insert_block()
            .ok_or_else(|| build_err("loop", "builder has no block"))?;
        let header = ctx.append_basic_block(self.function, "loop.header");
        let body_block = ctx.append_basic_block(self.function, "loop.body");
        let exit = ctx.append_basic_block(self.function, "loop.exit");

        self.module
            .builder
            .build_unconditional_branch(header)
            .map_err(e)?;
        self.module.builder.position_at_end(header);
        let phi = self.module.builder.build_phi(i64_ty, "i").map_err(e)?;
        let index = phi.as_basic_value().into_int_value();
        let limit = i64_ty.const_int(count as u64, false);
        let cond = self
            .module
            .builder
            .build_int_compare(IntPredicate::SLT, index, limit, "cond")
            .map_err(e)?;
        self.module
            .builder
            .build_conditional_branch(cond, body_block, exit)
            .map_err(e)?;

        self.module.builder.position_at_end(body_block);
        let counter = self.push(index.into(), VariableType::Scalar(ElementType::Int64));
        body(self, counter)?;

        let latch = self
            .module
            .builder
            .get_insert_block()
            .ok_or_else(|| build_err("loop", "builder has no block"))?;
        let next = self
            .module
            .builder
            .build_int_add(index, i64_ty.const_int(1, false), "next")
            .map_err(e)?;
        self.module
            .builder
            .build_unconditional_branch(header)
            .map_err(e)?;
        phi.add_incoming(&[(&i64_ty.const_zero(), preheader), (&next, latch)]);
        self.module.builder.position_at_end(exit);
        Ok(())
    }

    fn call(&mut self, callee: &str, arguments: &[Value]) -> Result<(), EmitError> {
        let declaration = self
            .module
            .declarations
            .get(callee)
            .cloned()
            .ok_or_else(|| EmitError::UnknownFunction(callee.to_string()))?;
        let mut types = Vec::with_capacity(arguments.len());
        let mut values: Vec<BasicMetadataValueEnum<'ctx>> = Vec::with_capacity(arguments.len());
        for &arg in arguments {
            let (v, ty) = self.get(arg)?;
            types.push(ty);
            values.push(v.into());
        }
        check_call_signature(&declaration, &types)?;
        let f = self.module.function_value(&declaration);
        self.module
            .builder
            .build_call(f, &values, "")
            .map_err(|e| build_err("call", e))?;
        Ok(())
    }

    fn module(&mut self) -> &mut dyn ModuleEmitter {
        &mut *self.module
    }

    fn finish(self: Box<Self>) -> Result<(), EmitError> {
        let this = *self;
        this.module
            .builder
            .build_return(None)
            .map_err(|e| build_err("finish", e))?;
        if !this.function.verify(false) {
            return Err(build_err(
                "verify_function",
                format!("function `{}` failed verification", this.declaration.name),
            ));
        }
        if let Some(block) = this.saved_block {
            this.module.builder.position_at_end(block);
        }
        Ok(())
    }
}
