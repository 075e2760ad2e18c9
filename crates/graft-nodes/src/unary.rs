//! Elementwise unary operations.

use std::any::Any;

use graft_core::{
    ArchivableNode, Archiver, CompilableNode, InputPort, InputPortBase, MapCompiler, Model,
    ModelError, ModelTransformer, Node, OutputPort, OutputPortBase, PortBase, PortElements,
    Unarchiver, DEFAULT_INPUT_PORT_NAME, DEFAULT_OUTPUT_PORT_NAME,
};
use graft_emit::{Element, EmitError, FunctionEmitter, UnaryOperationType};

#[derive(Debug)]
pub struct UnaryOperationNode<T: Element> {
    input: InputPort<T>,
    output: OutputPort<T>,
    operation: UnaryOperationType,
}

impl<T: Element> UnaryOperationNode<T> {
    pub fn new(input: PortElements<T>, operation: UnaryOperationType) -> Result<Self, ModelError> {
        if !operation.supports(T::TYPE) {
            return Err(ModelError::TypeMismatch(format!(
                "{operation} is not defined for {}",
                T::TYPE
            )));
        }
        let size = input.size();
        Ok(Self {
            input: InputPort::new(DEFAULT_INPUT_PORT_NAME, input),
            output: OutputPort::new(DEFAULT_OUTPUT_PORT_NAME, size),
            operation,
        })
    }

    pub fn input(&self) -> &InputPort<T> {
        &self.input
    }

    pub fn output(&self) -> &OutputPort<T> {
        &self.output
    }

    pub fn operation(&self) -> UnaryOperationType {
        self.operation
    }
}

impl<T: Element> Node for UnaryOperationNode<T> {
    fn runtime_type_name(&self) -> String {
        Self::type_name()
    }

    fn input_ports(&self) -> Vec<&dyn InputPortBase> {
        vec![&self.input]
    }

    fn output_ports(&self) -> Vec<&dyn OutputPortBase> {
        vec![&self.output]
    }

    fn compute(&self, model: &Model) -> Result<(), ModelError> {
        let values = self
            .input
            .value(model)?
            .into_iter()
            .map(|x| T::apply_unary(self.operation, x))
            .collect::<Result<Vec<_>, EmitError>>()?;
        self.output.set_output(values)
    }

    fn copy(&self, transformer: &mut ModelTransformer) -> Result<(), ModelError> {
        let input = transformer.transform_elements(self.input.elements())?;
        let elements = transformer
            .add_node(Self::new(input, self.operation)?)?
            .output
            .elements();
        transformer.map_node_output(&self.output, &elements)
    }

    fn as_compilable(&self) -> Option<&dyn CompilableNode> {
        Some(self)
    }

    fn write_to_archive(&self, archiver: &mut Archiver) -> Result<(), ModelError> {
        archiver.write_input(&self.input)?;
        archiver.write("operation", &self.operation)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Element> CompilableNode for UnaryOperationNode<T> {
    fn compile(
        &self,
        compiler: &mut MapCompiler,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), ModelError> {
        let input = compiler.elements_variable(function, self.input.elements().base())?;
        let output = compiler.output_variable(function, &self.output)?;
        let operation = self.operation;
        compiler.for_each_element(function, self.output.size(), &mut |f, i| {
            let x = f.load(input, i)?;
            let y = f.unary(operation, x)?;
            f.store(output, i, y)
        })
    }
}

impl<T: Element> ArchivableNode for UnaryOperationNode<T> {
    fn type_name() -> String {
        format!("UnaryOperationNode<{}>", T::TYPE.type_name())
    }

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        Self::new(
            archive.read_elements(DEFAULT_INPUT_PORT_NAME)?,
            archive.read("operation")?,
        )
    }
}

#[cfg(test)]
mod tests {
    use graft_core::{ErrorKind, InputNode};

    use super::*;

    #[test]
    fn float_only_operations_reject_integers() {
        let mut model = Model::new();
        let a = model.add_node(InputNode::<i64>::new(2)).unwrap().output().elements();
        let err = UnaryOperationNode::new(a.clone(), UnaryOperationType::Sqrt).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(UnaryOperationNode::new(a, UnaryOperationType::Abs).is_ok());
    }
}
