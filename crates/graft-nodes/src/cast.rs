//! Elementwise type conversion.

use std::any::Any;

use graft_core::{
    ArchivableNode, Archiver, CompilableNode, InputPort, InputPortBase, MapCompiler, Model,
    ModelError, ModelTransformer, Node, OutputPort, OutputPortBase, PortBase, PortElements,
    Unarchiver, DEFAULT_INPUT_PORT_NAME, DEFAULT_OUTPUT_PORT_NAME,
};
use graft_emit::{Element, FunctionEmitter};

/// Converts `T` elements to `U` with the rules of [`graft_emit::Scalar::cast`].
#[derive(Debug)]
pub struct TypeCastNode<T: Element, U: Element> {
    input: InputPort<T>,
    output: OutputPort<U>,
}

impl<T: Element, U: Element> TypeCastNode<T, U> {
    pub fn new(input: PortElements<T>) -> Self {
        let size = input.size();
        Self {
            input: InputPort::new(DEFAULT_INPUT_PORT_NAME, input),
            output: OutputPort::new(DEFAULT_OUTPUT_PORT_NAME, size),
        }
    }

    pub fn input(&self) -> &InputPort<T> {
        &self.input
    }

    pub fn output(&self) -> &OutputPort<U> {
        &self.output
    }
}

impl<T: Element, U: Element> Node for TypeCastNode<T, U> {
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
            .map(|x| {
                U::from_scalar(x.into_scalar().cast(U::TYPE)).ok_or_else(|| {
                    ModelError::TypeMismatch(format!("cannot cast {} to {}", T::TYPE, U::TYPE))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.output.set_output(values)
    }

    fn copy(&self, transformer: &mut ModelTransformer) -> Result<(), ModelError> {
        let input = transformer.transform_elements(self.input.elements())?;
        let elements = transformer
            .add_node(Self::new(input))?
            .output
            .elements();
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

impl<T: Element, U: Element> CompilableNode for TypeCastNode<T, U> {
    fn compile(
        &self,
        compiler: &mut MapCompiler,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), ModelError> {
        let input = compiler.elements_variable(function, self.input.elements().base())?;
        let output = compiler.output_variable(function, &self.output)?;
        compiler.for_each_element(function, self.output.size(), &mut |f, i| {
            let x = f.load(input, i)?;
            let y = f.cast(x, U::TYPE)?;
            f.store(output, i, y)
        })
    }
}

impl<T: Element, U: Element> ArchivableNode for TypeCastNode<T, U> {
    fn type_name() -> String {
        format!(
            "TypeCastNode<{},{}>",
            T::TYPE.type_name(),
            U::TYPE.type_name()
        )
    }

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        Ok(Self::new(archive.read_elements(DEFAULT_INPUT_PORT_NAME)?))
    }
}

#[cfg(test)]
mod tests {
    use graft_core::InputNode;

    use super::*;

    #[test]
    fn casts_saturate_and_booleans_become_integers() {
        let mut model = Model::new();
        let input = model
            .add_node(InputNode::with_values(vec![1e12f64, -2.7, 0.0]))
            .unwrap()
            .output()
            .elements();
        let id = model.add_node(TypeCastNode::<f64, i32>::new(input)).unwrap().id();
        let flags = model
            .add_node(InputNode::with_values(vec![true, false]))
            .unwrap()
            .output()
            .elements();
        let flag_id = model.add_node(TypeCastNode::<bool, i64>::new(flags)).unwrap().id();
        model.compute().unwrap();

        let ints = model.node_as::<TypeCastNode<f64, i32>>(id).unwrap();
        assert_eq!(ints.output().output().unwrap(), vec![i32::MAX, -2, 0]);
        let longs = model.node_as::<TypeCastNode<bool, i64>>(flag_id).unwrap();
        assert_eq!(longs.output().output().unwrap(), vec![1, 0]);
    }
}
