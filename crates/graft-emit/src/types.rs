//! Element types, scalar values and function signatures.
//!
//! [`Element`] is implemented by the five Rust types a port may carry. Its
//! `apply_*` kernels are the only place elementwise arithmetic is defined:
//! interpreted nodes call them directly and the reference executor calls
//! them through [`Scalar`], so both execution paths agree bit for bit.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::EmitError;
use crate::ops::{BinaryOperationType, UnaryOperationType};

/// The type tag of a port element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Float,
    Double,
    Int32,
    Int64,
    Boolean,
}

impl ElementType {
    pub const ALL: [ElementType; 5] = [
        ElementType::Float,
        ElementType::Double,
        ElementType::Int32,
        ElementType::Int64,
        ElementType::Boolean,
    ];

    /// Name used in runtime type names, e.g. `BinaryOperationNode<double>`.
    pub fn type_name(self) -> &'static str {
        match self {
            ElementType::Float => "float",
            ElementType::Double => "double",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::Boolean => "bool",
        }
    }

    /// Spelling used in generated C headers.
    pub fn c_type_name(self) -> &'static str {
        match self {
            ElementType::Float => "float",
            ElementType::Double => "double",
            ElementType::Int32 => "int32_t",
            ElementType::Int64 => "int64_t",
            ElementType::Boolean => "bool",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElementType::Float | ElementType::Double)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, ElementType::Int32 | ElementType::Int64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_float() || self.is_integer()
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A single value of any element type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    F32(f32),
    F64(f64),
    I32(i32),
    I64(i64),
    Bool(bool),
}

impl Scalar {
    pub fn element_type(self) -> ElementType {
        match self {
            Scalar::F32(_) => ElementType::Float,
            Scalar::F64(_) => ElementType::Double,
            Scalar::I32(_) => ElementType::Int32,
            Scalar::I64(_) => ElementType::Int64,
            Scalar::Bool(_) => ElementType::Boolean,
        }
    }

    /// The zero value (or `false`) of an element type.
    pub fn zero(element_type: ElementType) -> Scalar {
        match element_type {
            ElementType::Float => Scalar::F32(0.0),
            ElementType::Double => Scalar::F64(0.0),
            ElementType::Int32 => Scalar::I32(0),
            ElementType::Int64 => Scalar::I64(0),
            ElementType::Boolean => Scalar::Bool(false),
        }
    }

    pub fn binary(self, op: BinaryOperationType, rhs: Scalar) -> Result<Scalar, EmitError> {
        match (self, rhs) {
            (Scalar::F32(a), Scalar::F32(b)) => f32::apply_binary(op, a, b).map(Scalar::F32),
            (Scalar::F64(a), Scalar::F64(b)) => f64::apply_binary(op, a, b).map(Scalar::F64),
            (Scalar::I32(a), Scalar::I32(b)) => i32::apply_binary(op, a, b).map(Scalar::I32),
            (Scalar::I64(a), Scalar::I64(b)) => i64::apply_binary(op, a, b).map(Scalar::I64),
            (Scalar::Bool(a), Scalar::Bool(b)) => bool::apply_binary(op, a, b).map(Scalar::Bool),
            (a, b) => Err(EmitError::type_mismatch(
                op.name(),
                format!("{} and {}", a.element_type(), b.element_type()),
            )),
        }
    }

    pub fn unary(self, op: UnaryOperationType) -> Result<Scalar, EmitError> {
        match self {
            Scalar::F32(a) => f32::apply_unary(op, a).map(Scalar::F32),
            Scalar::F64(a) => f64::apply_unary(op, a).map(Scalar::F64),
            Scalar::I32(a) => i32::apply_unary(op, a).map(Scalar::I32),
            Scalar::I64(a) => i64::apply_unary(op, a).map(Scalar::I64),
            Scalar::Bool(a) => bool::apply_unary(op, a).map(Scalar::Bool),
        }
    }

    /// Convert to another element type.
    ///
    /// Numeric conversions follow Rust `as` (saturating float to int,
    /// wrapping int narrowing). Any non-zero value converts to `true`;
    /// booleans convert to 1 or 0.
    pub fn cast(self, to: ElementType) -> Scalar {
        match to {
            ElementType::Float => Scalar::F32(match self {
                Scalar::F32(v) => v,
                Scalar::F64(v) => v as f32,
                Scalar::I32(v) => v as f32,
                Scalar::I64(v) => v as f32,
                Scalar::Bool(v) => u8::from(v) as f32,
            }),
            ElementType::Double => Scalar::F64(match self {
                Scalar::F32(v) => v as f64,
                Scalar::F64(v) => v,
                Scalar::I32(v) => v as f64,
                Scalar::I64(v) => v as f64,
                Scalar::Bool(v) => u8::from(v) as f64,
            }),
            ElementType::Int32 => Scalar::I32(match self {
                Scalar::F32(v) => v as i32,
                Scalar::F64(v) => v as i32,
                Scalar::I32(v) => v,
                Scalar::I64(v) => v as i32,
                Scalar::Bool(v) => i32::from(v),
            }),
            ElementType::Int64 => Scalar::I64(match self {
                Scalar::F32(v) => v as i64,
                Scalar::F64(v) => v as i64,
                Scalar::I32(v) => v as i64,
                Scalar::I64(v) => v,
                Scalar::Bool(v) => i64::from(v),
            }),
            ElementType::Boolean => Scalar::Bool(match self {
                Scalar::F32(v) => v != 0.0,
                Scalar::F64(v) => v != 0.0,
                Scalar::I32(v) => v != 0,
                Scalar::I64(v) => v != 0,
                Scalar::Bool(v) => v,
            }),
        }
    }

    /// Interpret an integer scalar as a buffer offset.
    pub fn as_index(self) -> Option<usize> {
        match self {
            Scalar::I32(v) => usize::try_from(v).ok(),
            Scalar::I64(v) => usize::try_from(v).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::F32(v) => write!(f, "{v}f"),
            Scalar::F64(v) => write!(f, "{v}"),
            Scalar::I32(v) => write!(f, "{v}i"),
            Scalar::I64(v) => write!(f, "{v}l"),
            Scalar::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// A Rust type usable as a port element.
pub trait Element:
    Copy + PartialEq + fmt::Debug + Default + Serialize + DeserializeOwned + 'static
{
    const TYPE: ElementType;

    fn into_scalar(self) -> Scalar;

    /// Extract a value of exactly this type; `None` for any other variant.
    fn from_scalar(value: Scalar) -> Option<Self>;

    fn apply_binary(op: BinaryOperationType, lhs: Self, rhs: Self) -> Result<Self, EmitError>;

    fn apply_unary(op: UnaryOperationType, operand: Self) -> Result<Self, EmitError>;

    /// Convert an `f64` using the same rules as [`Scalar::cast`].
    fn from_f64(value: f64) -> Self {
        Self::from_scalar(Scalar::F64(value).cast(Self::TYPE)).unwrap_or_default()
    }

    fn to_f64(self) -> f64 {
        match self.into_scalar().cast(ElementType::Double) {
            Scalar::F64(v) => v,
            _ => 0.0,
        }
    }
}

macro_rules! impl_float_element {
    ($ty:ty, $variant:ident, $tag:expr) => {
        impl Element for $ty {
            const TYPE: ElementType = $tag;

            fn into_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }

            fn from_scalar(value: Scalar) -> Option<Self> {
                match value {
                    Scalar::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn apply_binary(
                op: BinaryOperationType,
                lhs: Self,
                rhs: Self,
            ) -> Result<Self, EmitError> {
                Ok(match op {
                    BinaryOperationType::Add => lhs + rhs,
                    BinaryOperationType::Subtract => lhs - rhs,
                    BinaryOperationType::Multiply => lhs * rhs,
                    BinaryOperationType::Divide => lhs / rhs,
                    BinaryOperationType::Remainder => lhs % rhs,
                    _ => return Err(EmitError::type_mismatch(op.name(), Self::TYPE)),
                })
            }

            fn apply_unary(op: UnaryOperationType, operand: Self) -> Result<Self, EmitError> {
                Ok(match op {
                    UnaryOperationType::Abs => operand.abs(),
                    UnaryOperationType::Exp => operand.exp(),
                    UnaryOperationType::Log => operand.ln(),
                    UnaryOperationType::Sqrt => operand.sqrt(),
                    UnaryOperationType::Square => operand * operand,
                    UnaryOperationType::Sin => operand.sin(),
                    UnaryOperationType::Cos => operand.cos(),
                    UnaryOperationType::Tanh => operand.tanh(),
                    UnaryOperationType::LogicalNot => {
                        return Err(EmitError::type_mismatch(op.name(), Self::TYPE))
                    }
                })
            }
        }
    };
}

macro_rules! impl_int_element {
    ($ty:ty, $variant:ident, $tag:expr) => {
        impl Element for $ty {
            const TYPE: ElementType = $tag;

            fn into_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }

            fn from_scalar(value: Scalar) -> Option<Self> {
                match value {
                    Scalar::$variant(v) => Some(v),
                    _ => None,
                }
            }

            // Integer arithmetic wraps; division by zero and MIN / -1 yield 0.
            fn apply_binary(
                op: BinaryOperationType,
                lhs: Self,
                rhs: Self,
            ) -> Result<Self, EmitError> {
                Ok(match op {
                    BinaryOperationType::Add => lhs.wrapping_add(rhs),
                    BinaryOperationType::Subtract => lhs.wrapping_sub(rhs),
                    BinaryOperationType::Multiply => lhs.wrapping_mul(rhs),
                    BinaryOperationType::Divide => lhs.checked_div(rhs).unwrap_or(0),
                    BinaryOperationType::Remainder => lhs.checked_rem(rhs).unwrap_or(0),
                    _ => return Err(EmitError::type_mismatch(op.name(), Self::TYPE)),
                })
            }

            fn apply_unary(op: UnaryOperationType, operand: Self) -> Result<Self, EmitError> {
                match op {
                    UnaryOperationType::Abs => Ok(operand.wrapping_abs()),
                    UnaryOperationType::Square => Ok(operand.wrapping_mul(operand)),
                    _ => Err(EmitError::type_mismatch(op.name(), Self::TYPE)),
                }
            }
        }
    };
}

impl_float_element!(f32, F32, ElementType::Float);
impl_float_element!(f64, F64, ElementType::Double);
impl_int_element!(i32, I32, ElementType::Int32);
impl_int_element!(i64, I64, ElementType::Int64);

impl Element for bool {
    const TYPE: ElementType = ElementType::Boolean;

    fn into_scalar(self) -> Scalar {
        Scalar::Bool(self)
    }

    fn from_scalar(value: Scalar) -> Option<Self> {
        match value {
            Scalar::Bool(v) => Some(v),
            _ => None,
        }
    }

    fn apply_binary(op: BinaryOperationType, lhs: Self, rhs: Self) -> Result<Self, EmitError> {
        match op {
            BinaryOperationType::LogicalAnd => Ok(lhs && rhs),
            BinaryOperationType::LogicalOr => Ok(lhs || rhs),
            BinaryOperationType::LogicalXor => Ok(lhs ^ rhs),
            _ => Err(EmitError::type_mismatch(op.name(), Self::TYPE)),
        }
    }

    fn apply_unary(op: UnaryOperationType, operand: Self) -> Result<Self, EmitError> {
        match op {
            UnaryOperationType::LogicalNot => Ok(!operand),
            _ => Err(EmitError::type_mismatch(op.name(), Self::TYPE)),
        }
    }
}

/// The type of a function parameter or emitted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Scalar(ElementType),
    /// Pointer to the first element of an array.
    Pointer(ElementType),
}

impl VariableType {
    pub fn element_type(self) -> ElementType {
        match self {
            VariableType::Scalar(t) | VariableType::Pointer(t) => t,
        }
    }

    pub fn is_pointer(self) -> bool {
        matches!(self, VariableType::Pointer(_))
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableType::Scalar(t) => write!(f, "{}", t.c_type_name()),
            VariableType::Pointer(t) => write!(f, "{}*", t.c_type_name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedVariableType {
    pub name: String,
    pub ty: VariableType,
}

impl NamedVariableType {
    pub fn new(name: impl Into<String>, ty: VariableType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Signature of an emitted or external function.
///
/// Emitted functions never return a value; results are written through
/// pointer parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub parameters: Vec<NamedVariableType>,
}

impl FunctionDeclaration {
    pub fn new(name: impl Into<String>, parameters: Vec<NamedVariableType>) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }

    pub fn parameter_types(&self) -> impl Iterator<Item = VariableType> + '_ {
        self.parameters.iter().map(|p| p.ty)
    }
}

impl fmt::Display for FunctionDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "void {}(", self.name)?;
        for (i, param) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", param.ty, param.name)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_by_zero_is_zero() {
        assert_eq!(i32::apply_binary(BinaryOperationType::Divide, 7, 0).unwrap(), 0);
        assert_eq!(i64::apply_binary(BinaryOperationType::Remainder, 7, 0).unwrap(), 0);
        assert_eq!(
            i32::apply_binary(BinaryOperationType::Divide, i32::MIN, -1).unwrap(),
            0
        );
    }

    #[test]
    fn float_division_by_zero_is_a_value() {
        let v = f64::apply_binary(BinaryOperationType::Divide, 1.0, 0.0).unwrap();
        assert!(v.is_infinite());
    }

    #[test]
    fn logical_op_on_number_is_type_mismatch() {
        let err = f32::apply_binary(BinaryOperationType::LogicalAnd, 1.0, 2.0).unwrap_err();
        assert!(matches!(err, EmitError::TypeMismatch { .. }));
        let err = Scalar::F64(1.0)
            .binary(BinaryOperationType::Add, Scalar::I32(1))
            .unwrap_err();
        assert!(matches!(err, EmitError::TypeMismatch { .. }));
    }

    #[test]
    fn casts_follow_as_semantics() {
        assert_eq!(Scalar::F64(3.9).cast(ElementType::Int32), Scalar::I32(3));
        assert_eq!(Scalar::F64(1e20).cast(ElementType::Int32), Scalar::I32(i32::MAX));
        assert_eq!(Scalar::I32(-2).cast(ElementType::Boolean), Scalar::Bool(true));
        assert_eq!(Scalar::Bool(true).cast(ElementType::Double), Scalar::F64(1.0));
        assert_eq!(Scalar::I64(1 << 40).cast(ElementType::Int32), Scalar::I32(0));
    }

    #[test]
    fn element_round_trip_through_f64() {
        assert_eq!(i64::from_f64(12.7), 12);
        assert_eq!(f32::from_f64(0.5), 0.5f32);
        assert!(bool::from_f64(2.0));
        assert_eq!(7i32.to_f64(), 7.0);
    }

    #[test]
    fn declaration_display() {
        let decl = FunctionDeclaration::new(
            "model_Predict",
            vec![
                NamedVariableType::new("input0", VariableType::Pointer(ElementType::Double)),
                NamedVariableType::new("n", VariableType::Scalar(ElementType::Int32)),
            ],
        );
        assert_eq!(decl.to_string(), "void model_Predict(double* input0, int32_t n)");
    }
}
