//! Fixed-length delay line.
//!
//! Output at computation `t` is the input from computation `t - window_size`.
//! Until the line has filled, the output is zeros (`false` for booleans).

use std::any::Any;
use std::cell::RefCell;

use graft_core::{
    ArchivableNode, Archiver, CompilableNode, InputPort, InputPortBase, MapCompiler, Model,
    ModelError, ModelTransformer, Node, OutputPort, OutputPortBase, PortBase, PortElements,
    Unarchiver, DEFAULT_INPUT_PORT_NAME, DEFAULT_OUTPUT_PORT_NAME,
};
use graft_emit::{BinaryOperationType, Element, ElementType, FunctionEmitter, Scalar};

use crate::moving_variance::to_i64;

#[derive(Debug, Clone)]
struct DelayLine<T> {
    samples: Vec<T>,
    position: usize,
}

impl<T: Element> DelayLine<T> {
    fn new(size: usize, window_size: usize) -> Self {
        Self {
            samples: vec![T::default(); size * window_size],
            position: 0,
        }
    }
}

#[derive(Debug)]
pub struct DelayNode<T: Element> {
    input: InputPort<T>,
    output: OutputPort<T>,
    window_size: usize,
    line: RefCell<DelayLine<T>>,
}

impl<T: Element> DelayNode<T> {
    pub fn new(input: PortElements<T>, window_size: usize) -> Result<Self, ModelError> {
        if window_size == 0 {
            return Err(ModelError::UnsupportedOperation(
                "delay must hold at least one sample".into(),
            ));
        }
        let size = input.size();
        Ok(Self {
            input: InputPort::new(DEFAULT_INPUT_PORT_NAME, input),
            output: OutputPort::new(DEFAULT_OUTPUT_PORT_NAME, size),
            window_size,
            line: RefCell::new(DelayLine::new(size, window_size)),
        })
    }

    pub fn input(&self) -> &InputPort<T> {
        &self.input
    }

    pub fn output(&self) -> &OutputPort<T> {
        &self.output
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

impl<T: Element> Node for DelayNode<T> {
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
        let size = self.output.size();
        let mut line = self.line.borrow_mut();
        let base = line.position * size;
        let values = line.samples[base..base + size].to_vec();
        line.samples[base..base + size].copy_from_slice(&input);
        line.position = (line.position + 1) % self.window_size;
        drop(line);
        self.output.set_output(values)
    }

    fn copy(&self, transformer: &mut ModelTransformer) -> Result<(), ModelError> {
        let input = transformer.transform_elements(self.input.elements())?;
        let elements = transformer
            .add_node(Self::new(input, self.window_size)?)?
            .output
            .elements();
        transformer.map_node_output(&self.output, &elements)
    }

    fn has_state(&self) -> bool {
        true
    }

    fn reset(&self) {
        *self.line.borrow_mut() = DelayLine::new(self.output.size(), self.window_size);
    }

    fn as_compilable(&self) -> Option<&dyn CompilableNode> {
        Some(self)
    }

    fn write_to_archive(&self, archiver: &mut Archiver) -> Result<(), ModelError> {
        archiver.write_input(&self.input)?;
        archiver.write("window_size", &self.window_size)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Element> CompilableNode for DelayNode<T> {
    fn compile(
        &self,
        compiler: &mut MapCompiler,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), ModelError> {
        use BinaryOperationType::{Add, Multiply, Remainder};

        let size = self.output.size();
        let input = compiler.elements_variable(function, self.input.elements().base())?;
        let output = compiler.output_variable(function, &self.output)?;
        let samples = function.global_array(
            &compiler.global_name("delayLine"),
            T::TYPE,
            &vec![Scalar::zero(T::TYPE); size * self.window_size],
        )?;
        let position = function.global_array(
            &compiler.global_name("delayPosition"),
            ElementType::Int64,
            &[Scalar::I64(0)],
        )?;

        let current = function.load_at(position, 0)?;
        let stride = function.literal(Scalar::I64(to_i64(size)?))?;
        let base = function.binary(Multiply, current, stride)?;
        compiler.for_each_element(function, size, &mut |f, j| {
            let slot = f.binary(Add, base, j)?;
            let delayed = f.load(samples, slot)?;
            let x = f.load(input, j)?;
            f.store(output, j, delayed)?;
            f.store(samples, slot, x)
        })?;

        let one = function.literal(Scalar::I64(1))?;
        let advanced = function.binary(Add, current, one)?;
        let count = function.literal(Scalar::I64(to_i64(self.window_size)?))?;
        let wrapped = function.binary(Remainder, advanced, count)?;
        function.store_at(position, 0, wrapped)?;
        Ok(())
    }
}

impl<T: Element> ArchivableNode for DelayNode<T> {
    fn type_name() -> String {
        format!("DelayNode<{}>", T::TYPE.type_name())
    }

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        Self::new(
            archive.read_elements(DEFAULT_INPUT_PORT_NAME)?,
            archive.read("window_size")?,
        )
    }
}

#[cfg(test)]
mod tests {
    use graft_core::{CompilerSettings, ElementwiseStrategy, InputNode, Map};

    use super::*;

    fn delay_map<T: Element>(size: usize, window_size: usize) -> Map {
        let mut model = Model::new();
        let input = model.add_node(InputNode::<T>::new(size)).unwrap().output().elements();
        let out = model
            .add_node(DelayNode::new(input, window_size).unwrap())
            .unwrap()
            .output()
            .elements();
        Map::with_inputs(model, vec![("delayed".into(), out.into_base())]).unwrap()
    }

    #[test]
    fn emits_zeros_then_the_input_from_window_steps_ago() {
        let map = delay_map::<i64>(2, 3);
        let mut compiled = map.compile(&CompilerSettings::default()).unwrap();
        for step in 0..8i64 {
            let input = vec![step + 1, -(step + 1)];
            let expected = if step < 3 { vec![0, 0] } else { vec![step - 2, -(step - 2)] };
            let interpreted: Vec<i64> = map.compute_single(input.clone()).unwrap();
            let generated: Vec<i64> = compiled.compute_single(input).unwrap();
            assert_eq!(interpreted, expected, "step {step}");
            assert_eq!(generated, expected, "step {step}");
        }
    }

    #[test]
    fn booleans_delay_under_a_loop() {
        let map = delay_map::<bool>(3, 1);
        let settings = CompilerSettings {
            elementwise_strategy: ElementwiseStrategy::Loop,
            ..CompilerSettings::default()
        };
        let mut compiled = map.compile(&settings).unwrap();
        let inputs = [vec![true, false, true], vec![false, false, true], vec![true, true, false]];
        let mut previous = vec![false; 3];
        for input in inputs {
            let generated: Vec<bool> = compiled.compute_single(input.clone()).unwrap();
            assert_eq!(generated, previous);
            previous = input;
        }
    }

    #[test]
    fn reset_empties_the_line() {
        let map = delay_map::<f32>(1, 1);
        map.compute_single::<f32, f32>(vec![4.5]).unwrap();
        map.reset();
        assert_eq!(map.compute_single::<f32, f32>(vec![1.0]).unwrap(), vec![0.0]);
    }

    #[test]
    fn empty_window_is_rejected() {
        let mut model = Model::new();
        let input = model.add_node(InputNode::<f64>::new(1)).unwrap().output().elements();
        assert!(DelayNode::new(input, 0).is_err());
    }
}
