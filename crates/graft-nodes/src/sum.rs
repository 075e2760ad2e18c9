//! Reduction to a single sum.

use std::any::Any;

use graft_core::{
    ArchivableNode, Archiver, CompilableNode, InputPort, InputPortBase, MapCompiler, Model,
    ModelError, ModelTransformer, Node, OutputPort, OutputPortBase, PortElements, Unarchiver,
    DEFAULT_INPUT_PORT_NAME, DEFAULT_OUTPUT_PORT_NAME,
};
use graft_emit::{BinaryOperationType, Element, FunctionEmitter, Scalar};

/// `output[0] = ((0 + input[0]) + input[1]) + ...`
///
/// The compiled form accumulates in the output element in the same order.
#[derive(Debug)]
pub struct SumNode<T: Element> {
    input: InputPort<T>,
    output: OutputPort<T>,
}

impl<T: Element> SumNode<T> {
    pub fn new(input: PortElements<T>) -> Result<Self, ModelError> {
        if !BinaryOperationType::Add.supports(T::TYPE) {
            return Err(ModelError::TypeMismatch(format!("cannot sum {}", T::TYPE)));
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

impl<T: Element> Node for SumNode<T> {
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
            total = T::apply_binary(BinaryOperationType::Add, total, x)?;
        }
        self.output.set_output(vec![total])
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

impl<T: Element> CompilableNode for SumNode<T> {
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
            let next = f.binary(BinaryOperationType::Add, total, x)?;
            f.store_at(output, 0, next)
        })
    }
}

impl<T: Element> ArchivableNode for SumNode<T> {
    fn type_name() -> String {
        format!("SumNode<{}>", T::TYPE.type_name())
    }

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        Self::new(archive.read_elements(DEFAULT_INPUT_PORT_NAME)?)
    }
}
