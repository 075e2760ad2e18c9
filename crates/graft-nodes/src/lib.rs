//! Node library for graft models.
//!
//! Every kind here implements both interpretation and, except
//! [`DotProductNode`], code generation; [`DotProductNode`] refines into
//! kinds that do. [`AccumulatorNode`], [`DelayNode`] and
//! [`MovingVarianceNode`] carry state between computations.
//! [`register_node_creators`] makes all of them readable from archives.

pub mod accumulator;
pub mod binary;
pub mod cast;
pub mod constant;
pub mod delay;
pub mod dot_product;
pub mod ir_node;
pub mod l2_norm;
pub mod moving_variance;
pub mod registry;
pub mod sink;
pub mod sum;
pub mod unary;

pub use accumulator::AccumulatorNode;
pub use binary::BinaryOperationNode;
pub use cast::TypeCastNode;
pub use constant::ConstantNode;
pub use delay::DelayNode;
pub use dot_product::DotProductNode;
pub use ir_node::{IrNode, ReferenceCompute, StateParameter};
pub use l2_norm::L2NormNode;
pub use moving_variance::MovingVarianceNode;
pub use registry::{node_registry, register_node_creators};
pub use sink::{SinkCallback, SinkNode};
pub use sum::SumNode;
pub use unary::UnaryOperationNode;
