//! Fixed values.

use std::any::Any;

use graft_core::{
    ArchivableNode, Archiver, CompilableNode, InputPortBase, MapCompiler, Model, ModelError,
    ModelTransformer, Node, OutputPort, OutputPortBase, Unarchiver, DEFAULT_OUTPUT_PORT_NAME,
};
use graft_emit::{Element, FunctionEmitter, Scalar};

/// Outputs the same values on every compute. Compiled, the output is a
/// module-level array holding them.
#[derive(Debug)]
pub struct ConstantNode<T: Element> {
    values: Vec<T>,
    output: OutputPort<T>,
}

impl<T: Element> ConstantNode<T> {
    pub fn new(values: Vec<T>) -> Self {
        Self {
            output: OutputPort::new(DEFAULT_OUTPUT_PORT_NAME, values.len()),
            values,
        }
    }

    pub fn scalar(value: T) -> Self {
        Self::new(vec![value])
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn output(&self) -> &OutputPort<T> {
        &self.output
    }
}

impl<T: Element> Node for ConstantNode<T> {
    fn runtime_type_name(&self) -> String {
        Self::type_name()
    }

    fn input_ports(&self) -> Vec<&dyn InputPortBase> {
        Vec::new()
    }

    fn output_ports(&self) -> Vec<&dyn OutputPortBase> {
        vec![&self.output]
    }

    fn compute(&self, _model: &Model) -> Result<(), ModelError> {
        self.output.set_output(self.values.clone())
    }

    fn copy(&self, transformer: &mut ModelTransformer) -> Result<(), ModelError> {
        let elements = transformer
            .add_node(Self::new(self.values.clone()))?
            .output
            .elements();
        transformer.map_node_output(&self.output, &elements)
    }

    fn as_compilable(&self) -> Option<&dyn CompilableNode> {
        Some(self)
    }

    fn write_to_archive(&self, archiver: &mut Archiver) -> Result<(), ModelError> {
        archiver.write("values", &self.values)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Element> CompilableNode for ConstantNode<T> {
    fn compile(
        &self,
        compiler: &mut MapCompiler,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), ModelError> {
        let initial: Vec<Scalar> = self.values.iter().map(|v| v.into_scalar()).collect();
        let name = compiler.global_name("constant");
        let value = function.global_array(&name, T::TYPE, &initial)?;
        compiler.bind_output_variable(&self.output, value)
    }
}

impl<T: Element> ArchivableNode for ConstantNode<T> {
    fn type_name() -> String {
        format!("ConstantNode<{}>", T::TYPE.type_name())
    }

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        Ok(Self::new(archive.read("values")?))
    }
}
