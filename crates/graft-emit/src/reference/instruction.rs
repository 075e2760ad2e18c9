//! Structured instruction set of the reference backend.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ops::{BinaryOperationType, UnaryOperationType};
use crate::types::{ElementType, FunctionDeclaration, Scalar, VariableType};

/// Virtual register index. Parameters occupy registers `0..n`.
pub type Register = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    Const {
        dest: Register,
        value: Scalar,
    },
    Alloca {
        dest: Register,
        element_type: ElementType,
        size: usize,
    },
    Global {
        dest: Register,
        name: String,
    },
    Load {
        dest: Register,
        pointer: Register,
        offset: Register,
    },
    Store {
        pointer: Register,
        offset: Register,
        value: Register,
    },
    Binary {
        dest: Register,
        op: BinaryOperationType,
        lhs: Register,
        rhs: Register,
    },
    Unary {
        dest: Register,
        op: UnaryOperationType,
        operand: Register,
    },
    Cast {
        dest: Register,
        value: Register,
        to: ElementType,
    },
    Loop {
        counter: Register,
        count: usize,
        body: Vec<Instruction>,
    },
    Call {
        callee: String,
        arguments: Vec<Register>,
    },
}

impl Instruction {
    pub(crate) fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            Instruction::Const { dest, value } => writeln!(f, "{pad}%{dest} = const {value}"),
            Instruction::Alloca {
                dest,
                element_type,
                size,
            } => writeln!(f, "{pad}%{dest} = alloca {element_type}[{size}]"),
            Instruction::Global { dest, name } => writeln!(f, "{pad}%{dest} = global @{name}"),
            Instruction::Load {
                dest,
                pointer,
                offset,
            } => writeln!(f, "{pad}%{dest} = load %{pointer}[%{offset}]"),
            Instruction::Store {
                pointer,
                offset,
                value,
            } => writeln!(f, "{pad}store %{value} -> %{pointer}[%{offset}]"),
            Instruction::Binary { dest, op, lhs, rhs } => {
                writeln!(f, "{pad}%{dest} = {op} %{lhs}, %{rhs}")
            }
            Instruction::Unary { dest, op, operand } => {
                writeln!(f, "{pad}%{dest} = {op} %{operand}")
            }
            Instruction::Cast { dest, value, to } => {
                writeln!(f, "{pad}%{dest} = cast %{value} to {to}")
            }
            Instruction::Loop {
                counter,
                count,
                body,
            } => {
                writeln!(f, "{pad}for %{counter} in 0..{count} {{")?;
                for inst in body {
                    inst.write_indented(f, depth + 1)?;
                }
                writeln!(f, "{pad}}}")
            }
            Instruction::Call { callee, arguments } => {
                let args: Vec<String> = arguments.iter().map(|r| format!("%{r}")).collect();
                writeln!(f, "{pad}call @{callee}({})", args.join(", "))
            }
        }
    }
}

/// A complete function: signature, register types and body.
///
/// The JSON form of this struct is the precompiled code format accepted by
/// [`ReferenceModule::link_precompiled`](super::ReferenceModule).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionBody {
    pub declaration: FunctionDeclaration,
    pub registers: Vec<VariableType>,
    pub body: Vec<Instruction>,
}

impl fmt::Display for FunctionBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {{", self.declaration)?;
        for inst in &self.body {
            inst.write_indented(f, 1)?;
        }
        writeln!(f, "}}")
    }
}
