//! Elementwise binary operations.

use std::any::Any;

use graft_core::{
    ArchivableNode, Archiver, CompilableNode, InputPort, InputPortBase, MapCompiler, Model,
    ModelError, ModelTransformer, Node, OutputPort, OutputPortBase, PortBase, PortElements,
    Unarchiver, DEFAULT_INPUT1_PORT_NAME, DEFAULT_INPUT2_PORT_NAME, DEFAULT_OUTPUT_PORT_NAME,
};
use graft_emit::{BinaryOperationType, Element, EmitError, FunctionEmitter};

/// `output[i] = input1[i] op input2[i]`.
#[derive(Debug)]
pub struct BinaryOperationNode<T: Element> {
    input1: InputPort<T>,
    input2: InputPort<T>,
    output: OutputPort<T>,
    operation: BinaryOperationType,
}

impl<T: Element> BinaryOperationNode<T> {
    /// Both inputs must have the same size and `operation` must accept `T`.
    pub fn new(
        input1: PortElements<T>,
        input2: PortElements<T>,
        operation: BinaryOperationType,
    ) -> Result<Self, ModelError> {
        if input1.size() != input2.size() {
            return Err(ModelError::SizeMismatch {
                expected: input1.size(),
                found: input2.size(),
            });
        }
        if !operation.supports(T::TYPE) {
            return Err(ModelError::TypeMismatch(format!(
                "{operation} is not defined for {}",
                T::TYPE
            )));
        }
        let size = input1.size();
        Ok(Self {
            input1: InputPort::new(DEFAULT_INPUT1_PORT_NAME, input1),
            input2: InputPort::new(DEFAULT_INPUT2_PORT_NAME, input2),
            output: OutputPort::new(DEFAULT_OUTPUT_PORT_NAME, size),
            operation,
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

    pub fn operation(&self) -> BinaryOperationType {
        self.operation
    }
}

impl<T: Element> Node for BinaryOperationNode<T> {
    fn runtime_type_name(&self) -> String {
        Self::type_name()
    }

    fn input_ports(&self) -> Vec<&dyn InputPortBase> {
        vec![&self.input1, &self.input2]
    }

    fn output_ports(&self) -> Vec<&dyn OutputPortBase> {
        vec![&self.output]
    }

    fn compute(&self, model: &Model) -> Result<(), ModelError> {
        let lhs = self.input1.value(model)?;
        let rhs = self.input2.value(model)?;
        let values = lhs
            .into_iter()
            .zip(rhs)
            .map(|(a, b)| T::apply_binary(self.operation, a, b))
            .collect::<Result<Vec<_>, EmitError>>()?;
        self.output.set_output(values)
    }

    fn copy(&self, transformer: &mut ModelTransformer) -> Result<(), ModelError> {
        let input1 = transformer.transform_elements(self.input1.elements())?;
        let input2 = transformer.transform_elements(self.input2.elements())?;
        let node = Self::new(input1, input2, self.operation)?;
        let elements = transformer.add_node(node)?.output.elements();
        transformer.map_node_output(&self.output, &elements)
    }

    fn as_compilable(&self) -> Option<&dyn CompilableNode> {
        Some(self)
    }

    fn write_to_archive(&self, archiver: &mut Archiver) -> Result<(), ModelError> {
        archiver.write_input(&self.input1)?;
        archiver.write_input(&self.input2)?;
        archiver.write("operation", &self.operation)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Element> CompilableNode for BinaryOperationNode<T> {
    fn compile(
        &self,
        compiler: &mut MapCompiler,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), ModelError> {
        let lhs = compiler.elements_variable(function, self.input1.elements().base())?;
        let rhs = compiler.elements_variable(function, self.input2.elements().base())?;
        let output = compiler.output_variable(function, &self.output)?;
        let operation = self.operation;
        compiler.for_each_element(function, self.output.size(), &mut |f, i| {
            let a = f.load(lhs, i)?;
            let b = f.load(rhs, i)?;
            let c = f.binary(operation, a, b)?;
            f.store(output, i, c)
        })
    }
}

impl<T: Element> ArchivableNode for BinaryOperationNode<T> {
    fn type_name() -> String {
        format!("BinaryOperationNode<{}>", T::TYPE.type_name())
    }

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        Self::new(
            archive.read_elements(DEFAULT_INPUT1_PORT_NAME)?,
            archive.read_elements(DEFAULT_INPUT2_PORT_NAME)?,
            archive.read("operation")?,
        )
    }
}

#[cfg(test)]
mod tests {
    use graft_core::{ErrorKind, InputNode};

    use super::*;

    #[test]
    fn sizes_and_types_are_checked() {
        let mut model = Model::new();
        let a = model.add_node(InputNode::<f64>::new(3)).unwrap().output().elements();
        let b = model.add_node(InputNode::<f64>::new(2)).unwrap().output().elements();
        let err = BinaryOperationNode::new(a.clone(), b, BinaryOperationType::Add).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        let err =
            BinaryOperationNode::new(a.clone(), a, BinaryOperationType::LogicalAnd).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn computes_elementwise() {
        let mut model = Model::new();
        let a = model
            .add_node(InputNode::with_values(vec![7i32, -7, 3]))
            .unwrap()
            .output()
            .elements();
        let b = model
            .add_node(InputNode::with_values(vec![2i32, 2, 0]))
            .unwrap()
            .output()
            .elements();
        let node = BinaryOperationNode::new(a, b, BinaryOperationType::Divide).unwrap();
        let id = model.add_node(node).unwrap().id();
        model.compute().unwrap();
        let node = model.node_as::<BinaryOperationNode<i32>>(id).unwrap();
        assert_eq!(node.output().output().unwrap(), vec![3, -3, 0]);
    }
}
