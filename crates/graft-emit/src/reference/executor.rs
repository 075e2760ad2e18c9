//! Interpreter for reference modules.

use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use crate::error::EmitError;
use crate::types::{Scalar, VariableType};

use super::instruction::{Instruction, Register};
use super::module::ReferenceModule;

/// Host implementation of an external function. Pointer arguments arrive
/// as the full buffer, scalar arguments as one-element vectors.
pub type Callback = Box<dyn FnMut(&[Vec<Scalar>])>;

#[derive(Debug, Clone, Copy)]
enum Slot {
    Empty,
    Scalar(Scalar),
    /// Index of a buffer in the machine's memory.
    Pointer(usize),
}

struct Machine {
    memory: Vec<Vec<Scalar>>,
    callbacks: HashMap<String, Callback>,
}

/// Runs functions of a [`ReferenceModule`].
///
/// Globals live in the first memory buffers and persist across calls, so
/// stateful functions behave as they would in a native build. Buffers
/// allocated by a call are released when it returns.
pub struct ReferenceExecutor {
    module: ReferenceModule,
    global_slots: BTreeMap<String, usize>,
    machine: Machine,
}

impl ReferenceExecutor {
    pub fn new(module: ReferenceModule) -> Self {
        let mut memory = Vec::with_capacity(module.globals().len());
        let mut global_slots = BTreeMap::new();
        for (name, global) in module.globals() {
            global_slots.insert(name.clone(), memory.len());
            memory.push(global.initial.clone());
        }
        Self {
            module,
            global_slots,
            machine: Machine {
                memory,
                callbacks: HashMap::new(),
            },
        }
    }

    pub fn module(&self) -> &ReferenceModule {
        &self.module
    }

    /// Bind a host closure to an external function.
    pub fn register_callback(&mut self, name: &str, callback: Callback) -> Result<(), EmitError> {
        if !self.module.is_external(name) {
            return Err(EmitError::UnknownFunction(name.to_string()));
        }
        self.machine.callbacks.insert(name.to_string(), callback);
        Ok(())
    }

    /// Current contents of a global array.
    pub fn global(&self, name: &str) -> Option<&[Scalar]> {
        self.global_slots
            .get(name)
            .and_then(|&slot| self.machine.memory.get(slot))
            .map(Vec::as_slice)
    }

    /// Restore every global to its initial contents.
    pub fn reset(&mut self) {
        for (name, &slot) in &self.global_slots {
            if let Some(global) = self.module.globals().get(name) {
                self.machine.memory[slot] = global.initial.clone();
            }
        }
    }

    /// Call a defined function.
    ///
    /// Pointer parameters take the matching buffer, which receives whatever
    /// the function wrote. Scalar parameters take a one-element buffer.
    pub fn call(&mut self, name: &str, arguments: &mut [Vec<Scalar>]) -> Result<(), EmitError> {
        let Self {
            module,
            global_slots,
            machine,
        } = self;
        let body = module
            .function(name)
            .ok_or_else(|| EmitError::UnknownFunction(name.to_string()))?;
        let params = &body.declaration.parameters;
        if params.len() != arguments.len() {
            return Err(EmitError::SignatureMismatch {
                function: name.to_string(),
                message: format!("expected {} arguments, got {}", params.len(), arguments.len()),
            });
        }
        trace!(function = name, "reference call");

        let base = machine.memory.len();
        let mut registers = vec![Slot::Empty; body.registers.len()];
        let mut bound = Vec::new();
        for (i, (param, argument)) in params.iter().zip(arguments.iter_mut()).enumerate() {
            if let Some(bad) = argument
                .iter()
                .find(|v| v.element_type() != param.ty.element_type())
            {
                machine.memory.truncate(base);
                return Err(EmitError::type_mismatch(
                    format!("argument {}", param.name),
                    bad.element_type(),
                ));
            }
            match param.ty {
                VariableType::Pointer(_) => {
                    registers[i] = Slot::Pointer(machine.memory.len());
                    bound.push(i);
                    machine.memory.push(std::mem::take(argument));
                }
                VariableType::Scalar(_) => match argument.first() {
                    Some(&value) => registers[i] = Slot::Scalar(value),
                    None => {
                        machine.memory.truncate(base);
                        return Err(EmitError::SignatureMismatch {
                            function: name.to_string(),
                            message: format!("scalar parameter `{}` got no value", param.name),
                        });
                    }
                },
            }
        }

        let env = Env {
            module,
            globals: global_slots,
        };
        let result = run_block(&env, machine, &body.body, &mut registers);

        for (k, &i) in bound.iter().enumerate() {
            arguments[i] = std::mem::take(&mut machine.memory[base + k]);
        }
        machine.memory.truncate(base);
        result
    }

    pub fn into_module(self) -> ReferenceModule {
        self.module
    }
}

struct Env<'a> {
    module: &'a ReferenceModule,
    globals: &'a BTreeMap<String, usize>,
}

fn scalar(registers: &[Slot], r: Register) -> Result<Scalar, EmitError> {
    match registers.get(r as usize) {
        Some(Slot::Scalar(v)) => Ok(*v),
        _ => Err(EmitError::execution(format!("%{r} does not hold a scalar"))),
    }
}

fn pointer(registers: &[Slot], r: Register) -> Result<usize, EmitError> {
    match registers.get(r as usize) {
        Some(Slot::Pointer(p)) => Ok(*p),
        _ => Err(EmitError::execution(format!("%{r} does not hold a pointer"))),
    }
}

fn offset(registers: &[Slot], r: Register) -> Result<usize, EmitError> {
    let value = scalar(registers, r)?;
    value
        .as_index()
        .ok_or_else(|| EmitError::execution(format!("%{r} = {value} is not a valid offset")))
}

fn set(registers: &mut [Slot], r: Register, slot: Slot) -> Result<(), EmitError> {
    match registers.get_mut(r as usize) {
        Some(target) => {
            *target = slot;
            Ok(())
        }
        None => Err(EmitError::execution(format!("%{r} out of range"))),
    }
}

fn run_block(
    env: &Env<'_>,
    machine: &mut Machine,
    block: &[Instruction],
    registers: &mut [Slot],
) -> Result<(), EmitError> {
    for inst in block {
        match inst {
            Instruction::Const { dest, value } => set(registers, *dest, Slot::Scalar(*value))?,
            Instruction::Alloca {
                dest,
                element_type,
                size,
            } => {
                let id = machine.memory.len();
                machine.memory.push(vec![Scalar::zero(*element_type); *size]);
                set(registers, *dest, Slot::Pointer(id))?;
            }
            Instruction::Global { dest, name } => {
                let id = env
                    .globals
                    .get(name)
                    .copied()
                    .ok_or_else(|| EmitError::execution(format!("unknown global @{name}")))?;
                set(registers, *dest, Slot::Pointer(id))?;
            }
            Instruction::Load {
                dest,
                pointer: p,
                offset: o,
            } => {
                let buffer = &machine.memory[pointer(registers, *p)?];
                let index = offset(registers, *o)?;
                let value = *buffer.get(index).ok_or(EmitError::IndexOutOfBounds {
                    index,
                    size: buffer.len(),
                })?;
                set(registers, *dest, Slot::Scalar(value))?;
            }
            Instruction::Store {
                pointer: p,
                offset: o,
                value,
            } => {
                let value = scalar(registers, *value)?;
                let index = offset(registers, *o)?;
                let buffer = &mut machine.memory[pointer(registers, *p)?];
                let size = buffer.len();
                let target = buffer
                    .get_mut(index)
                    .ok_or(EmitError::IndexOutOfBounds { index, size })?;
                *target = value;
            }
            Instruction::Binary { dest, op, lhs, rhs } => {
                let value = scalar(registers, *lhs)?.binary(*op, scalar(registers, *rhs)?)?;
                set(registers, *dest, Slot::Scalar(value))?;
            }
            Instruction::Unary { dest, op, operand } => {
                let value = scalar(registers, *operand)?.unary(*op)?;
                set(registers, *dest, Slot::Scalar(value))?;
            }
            Instruction::Cast { dest, value, to } => {
                let value = scalar(registers, *value)?.cast(*to);
                set(registers, *dest, Slot::Scalar(value))?;
            }
            Instruction::Loop {
                counter,
                count,
                body,
            } => {
                for i in 0..*count {
                    set(registers, *counter, Slot::Scalar(Scalar::I64(i as i64)))?;
                    run_block(env, machine, body, registers)?;
                }
            }
            Instruction::Call { callee, arguments } => {
                call(env, machine, callee, arguments, registers)?;
            }
        }
    }
    Ok(())
}

fn call(
    env: &Env<'_>,
    machine: &mut Machine,
    callee: &str,
    arguments: &[Register],
    registers: &[Slot],
) -> Result<(), EmitError> {
    if let Some(body) = env.module.function(callee) {
        let mut callee_registers = vec![Slot::Empty; body.registers.len()];
        for (i, &r) in arguments.iter().enumerate() {
            let slot = registers
                .get(r as usize)
                .copied()
                .ok_or_else(|| EmitError::execution(format!("%{r} out of range")))?;
            set(&mut callee_registers, i as Register, slot)?;
        }
        let mark = machine.memory.len();
        let result = run_block(env, machine, &body.body, &mut callee_registers);
        machine.memory.truncate(mark);
        return result;
    }

    if env.module.is_external(callee) {
        let values = arguments
            .iter()
            .map(|&r| match registers.get(r as usize) {
                Some(Slot::Scalar(v)) => Ok(vec![*v]),
                Some(Slot::Pointer(p)) => Ok(machine.memory[*p].clone()),
                _ => Err(EmitError::execution(format!("%{r} is undefined"))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let callback = machine.callbacks.get_mut(callee).ok_or_else(|| {
            EmitError::execution(format!("no callback registered for `{callee}`"))
        })?;
        callback(&values);
        return Ok(());
    }

    Err(EmitError::UnknownFunction(callee.to_string()))
}
