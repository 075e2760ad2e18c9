//! Euclidean length of a vector.

use std::any::Any;

use graft_core::{
    ArchivableNode, Archiver, CompilableNode, InputPort, InputPortBase, MapCompiler, Model,
    ModelError, ModelTransformer, Node, OutputPort, OutputPortBase, PortBase, PortElements,
    Unarchiver, DEFAULT_INPUT_PORT_NAME, DEFAULT_OUTPUT_PORT_NAME,
};
use graft_emit::{BinaryOperationType, Element, FunctionEmitter, Scalar, UnaryOperationType};

/// `sqrt(x[0]^2 + x[1]^2 + ...)`, summed left to right in both
/// the interpreted and the compiled form.
#[derive(Debug)]
pub struct L2NormNode<T: Element> {
    input: InputPort<T>,
    output: OutputPort<T>,
}

impl<T: Element> L2NormNode<T> {
    pub fn new(input: PortElements<T>) -> Result<Self, ModelError> {
        if !UnaryOperationType::Sqrt.supports(T::TYPE) {
            return Err(ModelError::TypeMismatch(format!(
                "L2 norm needs floating-point elements, got {}",
                T::TYPE
            )));
        }
        Ok(Self {
            input: InputPort::new(DEFAULT_INPUT_PORT_NAME, input),
            output: OutputPort::new(DEFAULT_OUTPUT_PORT_NAME, 1),
        })
    }

    pub fn input(&self) -> &InputPort<T> {
        &self.input
    }

    pub fn output(&self) -> &OutputPort<T> {
        &self.output
    }
}

impl<T: Element> Node for L2NormNode<T> {
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
        let mut total = T::default();
        for x in self.input.value(model)? {
            let square = T::apply_binary(BinaryOperationType::Multiply, x, x)?;
            total = T::apply_binary(BinaryOperationType::Add, total, square)?;
        }
        let norm = T::apply_unary(UnaryOperationType::Sqrt, total)?;
        self.output.set_output(vec![norm])
    }

    fn copy(&self, transformer: &mut ModelTransformer) -> Result<(), ModelError> {
        let input = transformer.transform_elements(self.input.elements())?;
        let elements = transformer.add_node(Self::new(input)?)?.output.elements();
        transformer.map_node_output(&self.output, &elements)
    }

    fn as_compilable(&self) -> Option<&dyn CompilableNode> {
        Some(self)
    }

    fn write_to_archive(&self, archiver: &mut Archiver) -> Result<(), ModelError> {
        archiver.write_input(&self.input)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Element> CompilableNode for L2NormNode<T> {
    fn compile(
        &self,
        compiler: &mut MapCompiler,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), ModelError> {
        let input = compiler.elements_variable(function, self.input.elements().base())?;
        let output = compiler.output_variable(function, &self.output)?;
        let zero = function.literal(Scalar::zero(T::TYPE))?;
        function.store_at(output, 0, zero)?;
        compiler.for_each_element(function, self.input.elements().size(), &mut |f, i| {
            let total = f.load_at(output, 0)?;
            let x = f.load(input, i)?;
            let square = f.binary(BinaryOperationType::Multiply, x, x)?;
            let next = f.binary(BinaryOperationType::Add, total, square)?;
            f.store_at(output, 0, next)
        })?;
        let total = function.load_at(output, 0)?;
        let norm = function.unary(UnaryOperationType::Sqrt, total)?;
        function.store_at(output, 0, norm)?;
        Ok(())
    }
}

impl<T: Element> ArchivableNode for L2NormNode<T> {
    fn type_name() -> String {
        format!("L2NormNode<{}>", T::TYPE.type_name())
    }

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        Self::new(archive.read_elements(DEFAULT_INPUT_PORT_NAME)?)
    }
}
