//! Dot product, interpreted directly and refined into multiply plus sum.

use std::any::Any;

use graft_core::{
    ArchivableNode, Archiver, InputPort, InputPortBase, Model, ModelError, ModelTransformer,
    Node, OutputPort, OutputPortBase, PortElements, Unarchiver, DEFAULT_INPUT1_PORT_NAME,
    DEFAULT_INPUT2_PORT_NAME, DEFAULT_OUTPUT_PORT_NAME,
};
use graft_emit::{BinaryOperationType, Element};

use crate::binary::BinaryOperationNode;
use crate::sum::SumNode;

/// `output[0] = sum(input1[i] * input2[i])`.
///
/// Has no code generation of its own; [`Node::refine`] replaces it with a
/// [`BinaryOperationNode`] feeding a [`SumNode`].
#[derive(Debug)]
pub struct DotProductNode<T: Element> {
    input1: InputPort<T>,
    input2: InputPort<T>,
    output: OutputPort<T>,
}

impl<T: Element> DotProductNode<T> {
    pub fn new(input1: PortElements<T>, input2: PortElements<T>) -> Result<Self, ModelError> {
        if input1.size() != input2.size() {
            return Err(ModelError::SizeMismatch {
                expected: input1.size(),
                found: input2.size(),
            });
        }
        if !BinaryOperationType::Multiply.supports(T::TYPE) {
            return Err(ModelError::TypeMismatch(format!(
                "dot product is not defined for {}",
                T::TYPE
            )));
        }
        Ok(Self {
            input1: InputPort::new(DEFAULT_INPUT1_PORT_NAME, input1),
            input2: InputPort::new(DEFAULT_INPUT2_PORT_NAME, input2),
            output: OutputPort::new(DEFAULT_OUTPUT_PORT_NAME, 1),
        })
    }

    pub fn input1(&self) -> &InputPort<T> {
        &self.input1
    }

    pub fn input2(&self) -> &InputPort<T> {
        &self.input2
    }

    pub fn output(&self) -> &OutputPort<T> {
        &self.output
    }
}

impl<T: Element> Node for DotProductNode<T> {
    fn runtime_type_name(&self) -> String {
        Self::type_name()
    }

    fn input_ports(&self) -> Vec<&dyn InputPortBase> {
        vec![&self.input1, &self.input2]
    }

    fn output_ports(&self) -> Vec<&dyn OutputPortBase> {
        vec![&self.output]
    }

    // Same association order as the refined form: products first, then a
    // left fold from zero.
    fn compute(&self, model: &Model) -> Result<(), ModelError> {
        let lhs = self.input1.value(model)?;
        let rhs = self.input2.value(model)?;
        let mut total = T::default();
        for (a, b) in lhs.into_iter().zip(rhs) {
            let product = T::apply_binary(BinaryOperationType::Multiply, a, b)?;
            total = T::apply_binary(BinaryOperationType::Add, total, product)?;
        }
        self.output.set_output(vec![total])
    }

    fn copy(&self, transformer: &mut ModelTransformer) -> Result<(), ModelError> {
        let input1 = transformer.transform_elements(self.input1.elements())?;
        let input2 = transformer.transform_elements(self.input2.elements())?;
        let elements = transformer
            .add_node(Self::new(input1, input2)?)?
            .output
            .elements();
        transformer.map_node_output(&self.output, &elements)
    }

    fn refine(&self, transformer: &mut ModelTransformer) -> Result<bool, ModelError> {
        let input1 = transformer.transform_elements(self.input1.elements())?;
        let input2 = transformer.transform_elements(self.input2.elements())?;
        let products = transformer
            .add_node(BinaryOperationNode::new(
                input1,
                input2,
                BinaryOperationType::Multiply,
            )?)?
            .output()
            .elements();
        let total = transformer.add_node(SumNode::new(products)?)?.output().elements();
        transformer.map_node_output(&self.output, &total)?;
        Ok(true)
    }

    fn write_to_archive(&self, archiver: &mut Archiver) -> Result<(), ModelError> {
        archiver.write_input(&self.input1)?;
        archiver.write_input(&self.input2)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Element> ArchivableNode for DotProductNode<T> {
    fn type_name() -> String {
        format!("DotProductNode<{}>", T::TYPE.type_name())
    }

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        Self::new(
            archive.read_elements(DEFAULT_INPUT1_PORT_NAME)?,
            archive.read_elements(DEFAULT_INPUT2_PORT_NAME)?,
        )
    }
}

#[cfg(test)]
mod tests {
    use graft_core::{InputNode, Map};

    use super::*;
    use crate::constant::ConstantNode;

    fn dot_map() -> Map {
        let mut model = Model::new();
        let a = model.add_node(InputNode::<f64>::new(3)).unwrap().output().elements();
        let b = model
            .add_node(ConstantNode::new(vec![1.0, 2.0, 3.0]))
            .unwrap()
            .output()
            .elements();
        let out = model
            .add_node(DotProductNode::new(a, b).unwrap())
            .unwrap()
            .output()
            .elements();
        Map::with_inputs(model, vec![("dot".into(), out.into_base())]).unwrap()
    }

    #[test]
    fn interprets_directly() {
        let map = dot_map();
        let out: Vec<f64> = map.compute_single(vec![1.0, 1.0, 2.0]).unwrap();
        assert_eq!(out, vec![9.0]);
        assert!(!map.is_compilable().unwrap());
    }

    #[test]
    fn refines_into_multiply_and_sum() {
        let refined = dot_map().refine(10).unwrap();
        let kinds = refined.node_kinds();
        assert_eq!(kinds.get("DotProductNode<double>"), None);
        assert_eq!(kinds.get("BinaryOperationNode<double>"), Some(&1));
        assert_eq!(kinds.get("SumNode<double>"), Some(&1));
        assert!(refined.is_compilable().unwrap());

        let out: Vec<f64> = refined.compute_single(vec![1.0, 1.0, 2.0]).unwrap();
        assert_eq!(out, vec![9.0]);
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let mut model = Model::new();
        let a = model.add_node(InputNode::<i32>::new(3)).unwrap().output().elements();
        let b = model.add_node(InputNode::<i32>::new(4)).unwrap().output().elements();
        let err = DotProductNode::new(a, b).unwrap_err();
        assert_eq!(err.kind(), graft_core::ErrorKind::SizeMismatch);
    }
}
