//! Entry and exit nodes every map uses.

use std::any::Any;
use std::cell::RefCell;

use graft_emit::{Element, FunctionEmitter, Scalar};

use crate::archive::{ArchivableNode, Archiver, Unarchiver};
use crate::compiler::MapCompiler;
use crate::elements::PortElements;
use crate::error::ModelError;
use crate::model::Model;
use crate::node::{CompilableNode, InputNodeBase, Node};
use crate::port::{
    InputPort, InputPortBase, OutputPort, OutputPortBase, PortBase, DEFAULT_INPUT_PORT_NAME,
    DEFAULT_OUTPUT_PORT_NAME,
};
use crate::transformer::ModelTransformer;

/// Injects externally supplied values.
///
/// In compiled form the output is bound to a parameter of the predict
/// function; the node itself emits nothing.
#[derive(Debug)]
pub struct InputNode<T: Element> {
    output: OutputPort<T>,
    values: RefCell<Vec<T>>,
}

impl<T: Element> InputNode<T> {
    pub fn new(size: usize) -> Self {
        Self::with_values(vec![T::default(); size])
    }

    pub fn with_values(values: Vec<T>) -> Self {
        Self {
            output: OutputPort::new(DEFAULT_OUTPUT_PORT_NAME, values.len()),
            values: RefCell::new(values),
        }
    }

    pub fn output(&self) -> &OutputPort<T> {
        &self.output
    }

    pub fn size(&self) -> usize {
        self.output.size()
    }

    /// Values picked up by the next compute.
    pub fn set_input(&self, values: Vec<T>) -> Result<(), ModelError> {
        if values.len() != self.output.size() {
            return Err(ModelError::SizeMismatch {
                expected: self.output.size(),
                found: values.len(),
            });
        }
        *self.values.borrow_mut() = values;
        Ok(())
    }
}

impl<T: Element> Node for InputNode<T> {
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
        self.output.set_output(self.values.borrow().clone())
    }

    fn copy(&self, transformer: &mut ModelTransformer) -> Result<(), ModelError> {
        let values = self.values.borrow().clone();
        let elements = transformer.add_node(Self::with_values(values))?.output.elements();
        transformer.map_node_output(&self.output, &elements)
    }

    fn as_compilable(&self) -> Option<&dyn CompilableNode> {
        Some(self)
    }

    fn as_input_node(&self) -> Option<&dyn InputNodeBase> {
        Some(self)
    }

    fn write_to_archive(&self, archiver: &mut Archiver) -> Result<(), ModelError> {
        archiver.write_output(&self.output)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Element> CompilableNode for InputNode<T> {
    fn compile(
        &self,
        compiler: &mut MapCompiler,
        _function: &mut dyn FunctionEmitter,
    ) -> Result<(), ModelError> {
        compiler.require_variable(&self.output).map(|_| ())
    }
}

impl<T: Element> InputNodeBase for InputNode<T> {
    fn element_type(&self) -> graft_emit::ElementType {
        T::TYPE
    }

    fn size(&self) -> usize {
        self.output.size()
    }

    fn set_scalar_input(&self, values: &[Scalar]) -> Result<(), ModelError> {
        let values = values
            .iter()
            .map(|&v| {
                T::from_scalar(v).ok_or_else(|| {
                    ModelError::TypeMismatch(format!(
                        "{} input given a {} value",
                        T::TYPE,
                        v.element_type()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.set_input(values)
    }
}

impl<T: Element> ArchivableNode for InputNode<T> {
    fn type_name() -> String {
        format!("InputNode<{}>", T::TYPE.type_name())
    }

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        let mut node = Self::new(0);
        archive.read_output(&mut node.output)?;
        *node.values.get_mut() = vec![T::default(); node.output.size()];
        Ok(node)
    }
}

/// Names a set of elements as a model result.
///
/// Compiled, its output is an alias of the input's representation.
#[derive(Debug)]
pub struct OutputNode<T: Element> {
    input: InputPort<T>,
    output: OutputPort<T>,
}

impl<T: Element> OutputNode<T> {
    pub fn new(elements: PortElements<T>) -> Self {
        let size = elements.size();
        Self {
            input: InputPort::new(DEFAULT_INPUT_PORT_NAME, elements),
            output: OutputPort::new(DEFAULT_OUTPUT_PORT_NAME, size),
        }
    }

    pub fn input(&self) -> &InputPort<T> {
        &self.input
    }

    pub fn output(&self) -> &OutputPort<T> {
        &self.output
    }
}

impl<T: Element> Node for OutputNode<T> {
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
        self.output.set_output(self.input.value(model)?)
    }

    fn copy(&self, transformer: &mut ModelTransformer) -> Result<(), ModelError> {
        let input = transformer.transform_elements(self.input.elements())?;
        let elements = transformer.add_node(Self::new(input))?.output.elements();
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

impl<T: Element> CompilableNode for OutputNode<T> {
    fn compile(
        &self,
        compiler: &mut MapCompiler,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), ModelError> {
        let value = compiler.elements_variable(function, self.input.elements().base())?;
        compiler.bind_output_variable(&self.output, value)
    }
}

impl<T: Element> ArchivableNode for OutputNode<T> {
    fn type_name() -> String {
        format!("OutputNode<{}>", T::TYPE.type_name())
    }

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        Ok(Self::new(archive.read_elements(DEFAULT_INPUT_PORT_NAME)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn input_node_checks_size_and_type() {
        let node = InputNode::<f64>::new(2);
        assert_eq!(node.set_input(vec![1.0]).unwrap_err().kind(), ErrorKind::SizeMismatch);
        let err = node
            .set_scalar_input(&[Scalar::F64(1.0), Scalar::I32(2)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        node.set_scalar_input(&[Scalar::F64(1.0), Scalar::F64(2.0)]).unwrap();
        assert_eq!(*node.values.borrow(), vec![1.0, 2.0]);
    }

    #[test]
    fn output_node_passes_values_through() {
        let mut model = Model::new();
        let input = model.add_node(InputNode::with_values(vec![1i32, 2, 3])).unwrap();
        let elements = input.output().range(1, 2).unwrap();
        let id = model.add_node(OutputNode::new(elements)).unwrap().id();
        model.compute().unwrap();
        let out = model.node_as::<OutputNode<i32>>(id).unwrap();
        assert_eq!(out.output().output().unwrap(), vec![2, 3]);
    }
}
