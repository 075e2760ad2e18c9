//! Archive registration for the node library.

use graft_core::NodeRegistry;

use crate::accumulator::AccumulatorNode;
use crate::binary::BinaryOperationNode;
use crate::cast::TypeCastNode;
use crate::constant::ConstantNode;
use crate::delay::DelayNode;
use crate::dot_product::DotProductNode;
use crate::ir_node::IrNode;
use crate::l2_norm::L2NormNode;
use crate::moving_variance::MovingVarianceNode;
use crate::sink::SinkNode;
use crate::sum::SumNode;
use crate::unary::UnaryOperationNode;

macro_rules! register_for {
    ($registry:expr, $node:ident: $($ty:ty),+) => {
        $($registry.register::<$node<$ty>>();)+
    };
}

macro_rules! register_casts_from {
    ($registry:expr, $from:ty) => {
        $registry.register::<TypeCastNode<$from, f32>>();
        $registry.register::<TypeCastNode<$from, f64>>();
        $registry.register::<TypeCastNode<$from, i32>>();
        $registry.register::<TypeCastNode<$from, i64>>();
        $registry.register::<TypeCastNode<$from, bool>>();
    };
}

/// Register every library node kind for each element type it accepts.
pub fn register_node_creators(registry: &mut NodeRegistry) {
    register_for!(registry, ConstantNode: f32, f64, i32, i64, bool);
    register_for!(registry, BinaryOperationNode: f32, f64, i32, i64, bool);
    register_for!(registry, UnaryOperationNode: f32, f64, i32, i64, bool);
    register_for!(registry, SumNode: f32, f64, i32, i64);
    register_for!(registry, DotProductNode: f32, f64, i32, i64);
    register_for!(registry, AccumulatorNode: f32, f64, i32, i64);
    register_for!(registry, MovingVarianceNode: f32, f64);
    register_for!(registry, L2NormNode: f32, f64);
    register_for!(registry, DelayNode: f32, f64, i32, i64, bool);
    register_for!(registry, IrNode: f32, f64, i32, i64, bool);
    register_for!(registry, SinkNode: f32, f64, i32, i64, bool);

    register_casts_from!(registry, f32);
    register_casts_from!(registry, f64);
    register_casts_from!(registry, i32);
    register_casts_from!(registry, i64);
    register_casts_from!(registry, bool);
}

/// Core input/output nodes plus the whole library.
pub fn node_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::with_core_nodes();
    register_node_creators(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_every_kind() {
        let registry = node_registry();
        // 10 core, 6 * 5 generic kinds, 3 * 4 numeric, 2 * 2 float-only, 25 casts.
        assert_eq!(registry.len(), 10 + 30 + 12 + 4 + 25);
        assert!(registry.contains("TypeCastNode<bool,float>"));
        assert!(registry.contains("MovingVarianceNode<double>"));
        assert!(!registry.contains("MovingVarianceNode<int32>"));
        assert!(!registry.contains("SumNode<bool>"));
        assert!(registry.contains("DelayNode<bool>"));
        assert!(registry.contains("AccumulatorNode<int64>"));
        assert!(!registry.contains("L2NormNode<int32>"));
    }
}
