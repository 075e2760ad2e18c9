//! Elementwise operation vocabularies.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ElementType;

/// Two-operand elementwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperationType {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
}

impl BinaryOperationType {
    pub const ALL: [BinaryOperationType; 8] = [
        BinaryOperationType::Add,
        BinaryOperationType::Subtract,
        BinaryOperationType::Multiply,
        BinaryOperationType::Divide,
        BinaryOperationType::Remainder,
        BinaryOperationType::LogicalAnd,
        BinaryOperationType::LogicalOr,
        BinaryOperationType::LogicalXor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BinaryOperationType::Add => "add",
            BinaryOperationType::Subtract => "subtract",
            BinaryOperationType::Multiply => "multiply",
            BinaryOperationType::Divide => "divide",
            BinaryOperationType::Remainder => "remainder",
            BinaryOperationType::LogicalAnd => "logicalAnd",
            BinaryOperationType::LogicalOr => "logicalOr",
            BinaryOperationType::LogicalXor => "logicalXor",
        }
    }

    pub fn is_logical(self) -> bool {
        matches!(
            self,
            BinaryOperationType::LogicalAnd
                | BinaryOperationType::LogicalOr
                | BinaryOperationType::LogicalXor
        )
    }

    /// Whether operands of `element_type` are valid for this operation.
    pub fn supports(self, element_type: ElementType) -> bool {
        if self.is_logical() {
            element_type == ElementType::Boolean
        } else {
            element_type.is_numeric()
        }
    }
}

impl fmt::Display for BinaryOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Single-operand elementwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperationType {
    Abs,
    Exp,
    Log,
    Sqrt,
    Square,
    Sin,
    Cos,
    Tanh,
    LogicalNot,
}

impl UnaryOperationType {
    pub const ALL: [UnaryOperationType; 9] = [
        UnaryOperationType::Abs,
        UnaryOperationType::Exp,
        UnaryOperationType::Log,
        UnaryOperationType::Sqrt,
        UnaryOperationType::Square,
        UnaryOperationType::Sin,
        UnaryOperationType::Cos,
        UnaryOperationType::Tanh,
        UnaryOperationType::LogicalNot,
    ];

    pub fn name(self) -> &'static str {
        match self {
            UnaryOperationType::Abs => "abs",
            UnaryOperationType::Exp => "exp",
            UnaryOperationType::Log => "log",
            UnaryOperationType::Sqrt => "sqrt",
            UnaryOperationType::Square => "square",
            UnaryOperationType::Sin => "sin",
            UnaryOperationType::Cos => "cos",
            UnaryOperationType::Tanh => "tanh",
            UnaryOperationType::LogicalNot => "logicalNot",
        }
    }

    pub fn supports(self, element_type: ElementType) -> bool {
        match self {
            UnaryOperationType::Abs | UnaryOperationType::Square => element_type.is_numeric(),
            UnaryOperationType::LogicalNot => element_type == ElementType::Boolean,
            _ => element_type.is_float(),
        }
    }
}

impl fmt::Display for UnaryOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_ops_only_accept_booleans() {
        for op in BinaryOperationType::ALL {
            assert_eq!(op.supports(ElementType::Boolean), op.is_logical(), "{op}");
            assert_eq!(op.supports(ElementType::Double), !op.is_logical(), "{op}");
        }
    }

    #[test]
    fn transcendental_ops_need_floats() {
        assert!(UnaryOperationType::Exp.supports(ElementType::Float));
        assert!(!UnaryOperationType::Exp.supports(ElementType::Int32));
        assert!(UnaryOperationType::Abs.supports(ElementType::Int64));
        assert!(!UnaryOperationType::LogicalNot.supports(ElementType::Double));
    }
}
