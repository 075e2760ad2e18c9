//! Running sums across computations.

use std::any::Any;
use std::cell::RefCell;

use graft_core::{
    ArchivableNode, Archiver, CompilableNode, InputPort, InputPortBase, MapCompiler, Model,
    ModelError, ModelTransformer, Node, OutputPort, OutputPortBase, PortBase, PortElements,
    Unarchiver, DEFAULT_INPUT_PORT_NAME, DEFAULT_OUTPUT_PORT_NAME,
};
use graft_emit::{BinaryOperationType, Element, FunctionEmitter, Scalar};

/// `output[i]` is the sum of every `input[i]` seen since the last reset.
///
/// Compiled, the sums live in a module-level array.
#[derive(Debug)]
pub struct AccumulatorNode<T: Element> {
    input: InputPort<T>,
    output: OutputPort<T>,
    totals: RefCell<Vec<T>>,
}

impl<T: Element> AccumulatorNode<T> {
    pub fn new(input: PortElements<T>) -> Result<Self, ModelError> {
        if !BinaryOperationType::Add.supports(T::TYPE) {
            return Err(ModelError::TypeMismatch(format!("cannot accumulate {}", T::TYPE)));
        }
        let size = input.size();
        Ok(Self {
            input: InputPort::new(DEFAULT_INPUT_PORT_NAME, input),
            output: OutputPort::new(DEFAULT_OUTPUT_PORT_NAME, size),
            totals: RefCell::new(vec![T::default(); size]),
        })
    }

    pub fn input(&self) -> &InputPort<T> {
        &self.input
    }

    pub fn output(&self) -> &OutputPort<T> {
        &self.output
    }
}

impl<T: Element> Node for AccumulatorNode<T> {
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
        let input = self.input.value(model)?;
        let mut totals = self.totals.borrow_mut();
        for (total, x) in totals.iter_mut().zip(input) {
            *total = T::apply_binary(BinaryOperationType::Add, *total, x)?;
        }
        let values = totals.clone();
        drop(totals);
        self.output.set_output(values)
    }

    fn copy(&self, transformer: &mut ModelTransformer) -> Result<(), ModelError> {
        let input = transformer.transform_elements(self.input.elements())?;
        let elements = transformer.add_node(Self::new(input)?)?.output.elements();
        transformer.map_node_output(&self.output, &elements)
    }

    fn has_state(&self) -> bool {
        true
    }

    fn reset(&self) {
        *self.totals.borrow_mut() = vec![T::default(); self.output.size()];
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

impl<T: Element> CompilableNode for AccumulatorNode<T> {
    fn compile(
        &self,
        compiler: &mut MapCompiler,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), ModelError> {
        let size = self.output.size();
        let input = compiler.elements_variable(function, self.input.elements().base())?;
        let output = compiler.output_variable(function, &self.output)?;
        let totals = function.global_array(
            &compiler.global_name("accumulator"),
            T::TYPE,
            &vec![Scalar::zero(T::TYPE); size],
        )?;
        compiler.for_each_element(function, size, &mut |f, i| {
            let total = f.load(totals, i)?;
            let x = f.load(input, i)?;
            let next = f.binary(BinaryOperationType::Add, total, x)?;
            f.store(totals, i, next)?;
            f.store(output, i, next)
        })
    }
}

impl<T: Element> ArchivableNode for AccumulatorNode<T> {
    fn type_name() -> String {
        format!("AccumulatorNode<{}>", T::TYPE.type_name())
    }

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        Self::new(archive.read_elements(DEFAULT_INPUT_PORT_NAME)?)
    }
}

#[cfg(test)]
mod tests {
    use graft_core::{CompilerSettings, ErrorKind, InputNode, Map};

    use super::*;

    fn accumulator_map() -> Map {
        let mut model = Model::new();
        let input = model.add_node(InputNode::<i32>::new(2)).unwrap().output().elements();
        let out = model
            .add_node(AccumulatorNode::new(input).unwrap())
            .unwrap()
            .output()
            .elements();
        Map::with_inputs(model, vec![("total".into(), out.into_base())]).unwrap()
    }

    #[test]
    fn sums_persist_between_computations() {
        let map = accumulator_map();
        let mut compiled = map.compile(&CompilerSettings::default()).unwrap();
        let mut expected = [0, 0];
        for step in 1..=4 {
            let input = vec![step, -2 * step];
            expected[0] += input[0];
            expected[1] += input[1];
            let interpreted: Vec<i32> = map.compute_single(input.clone()).unwrap();
            let generated: Vec<i32> = compiled.compute_single(input).unwrap();
            assert_eq!(interpreted, expected.to_vec(), "step {step}");
            assert_eq!(generated, expected.to_vec(), "step {step}");
        }
    }

    #[test]
    fn reset_starts_from_zero() {
        let map = accumulator_map();
        let mut compiled = map.compile(&CompilerSettings::default()).unwrap();
        map.compute_single::<i32, i32>(vec![5, 5]).unwrap();
        compiled.compute_single::<i32, i32>(vec![5, 5]).unwrap();
        map.reset();
        compiled.reset();
        assert_eq!(map.compute_single::<i32, i32>(vec![1, 2]).unwrap(), vec![1, 2]);
        assert_eq!(compiled.compute_single::<i32, i32>(vec![1, 2]).unwrap(), vec![1, 2]);
    }

    #[test]
    fn booleans_do_not_accumulate() {
        let mut model = Model::new();
        let flags = model.add_node(InputNode::<bool>::new(1)).unwrap().output().elements();
        let err = AccumulatorNode::new(flags).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }
}
