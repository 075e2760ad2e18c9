//! Windowed variance over a stream of vectors.
//!
//! The node keeps the last `window_size` input vectors in a ring buffer
//! together with running sums of the values and of their squares. Each
//! compute replaces the oldest sample and emits, per element,
//! `E[x^2] - E[x]^2` over the window. Slots that have not been filled yet
//! count as zeros.
//!
//! Compiled, the ring and both sums live in module-level arrays so the
//! state survives between calls of the predict function, and the update is
//! emitted once as a separate function the predict function calls.

use std::any::Any;
use std::cell::RefCell;

use graft_core::{
    ArchivableNode, Archiver, CompilableNode, InputPort, InputPortBase, MapCompiler, Model,
    ModelError, ModelTransformer, Node, OutputPort, OutputPortBase, PortBase, PortElements,
    Unarchiver, DEFAULT_INPUT_PORT_NAME, DEFAULT_OUTPUT_PORT_NAME,
};
use graft_emit::{
    BinaryOperationType, Element, ElementType, EmitError, FunctionDeclaration, FunctionEmitter,
    NamedVariableType, Scalar, Value, VariableType,
};
use tracing::trace;

#[derive(Debug, Clone)]
struct WindowState<T> {
    samples: Vec<T>,
    sum: Vec<T>,
    sum_squares: Vec<T>,
    position: usize,
}

impl<T: Element> WindowState<T> {
    fn new(size: usize, window_size: usize) -> Self {
        Self {
            samples: vec![T::default(); size * window_size],
            sum: vec![T::default(); size],
            sum_squares: vec![T::default(); size],
            position: 0,
        }
    }
}

#[derive(Debug)]
pub struct MovingVarianceNode<T: Element> {
    input: InputPort<T>,
    output: OutputPort<T>,
    window_size: usize,
    state: RefCell<WindowState<T>>,
}

impl<T: Element> MovingVarianceNode<T> {
    pub fn new(input: PortElements<T>, window_size: usize) -> Result<Self, ModelError> {
        if !T::TYPE.is_float() {
            return Err(ModelError::TypeMismatch(format!(
                "moving variance needs floating-point elements, got {}",
                T::TYPE
            )));
        }
        if window_size == 0 {
            return Err(ModelError::UnsupportedOperation(
                "moving variance window must hold at least one sample".into(),
            ));
        }
        let size = input.size();
        Ok(Self {
            input: InputPort::new(DEFAULT_INPUT_PORT_NAME, input),
            output: OutputPort::new(DEFAULT_OUTPUT_PORT_NAME, size),
            window_size,
            state: RefCell::new(WindowState::new(size, window_size)),
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

    fn size(&self) -> usize {
        self.output.size()
    }

    fn function_declaration(name: String) -> FunctionDeclaration {
        let pointer = |name: &str, ty: ElementType| {
            NamedVariableType::new(name, VariableType::Pointer(ty))
        };
        FunctionDeclaration::new(
            name,
            vec![
                pointer("input", T::TYPE),
                pointer("output", T::TYPE),
                pointer("samples", T::TYPE),
                pointer("sum", T::TYPE),
                pointer("sumSquares", T::TYPE),
                pointer("position", ElementType::Int64),
            ],
        )
    }
}

impl<T: Element> Node for MovingVarianceNode<T> {
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
        use BinaryOperationType::{Add, Divide, Multiply, Subtract};

        let input = self.input.value(model)?;
        let size = self.size();
        let window = T::from_f64(self.window_size as f64);
        let mut state = self.state.borrow_mut();
        let base = state.position * size;
        let mut values = Vec::with_capacity(size);
        for (j, x) in input.into_iter().enumerate() {
            let old = state.samples[base + j];
            let sum = T::apply_binary(Add, T::apply_binary(Subtract, state.sum[j], old)?, x)?;
            let old_square = T::apply_binary(Multiply, old, old)?;
            let square = T::apply_binary(Multiply, x, x)?;
            let sum_squares = T::apply_binary(
                Add,
                T::apply_binary(Subtract, state.sum_squares[j], old_square)?,
                square,
            )?;
            state.sum[j] = sum;
            state.sum_squares[j] = sum_squares;
            state.samples[base + j] = x;

            let mean_square = T::apply_binary(Divide, sum_squares, window)?;
            let mean = T::apply_binary(Divide, sum, window)?;
            let variance =
                T::apply_binary(Subtract, mean_square, T::apply_binary(Multiply, mean, mean)?)?;
            values.push(variance);
        }
        state.position = (state.position + 1) % self.window_size;
        drop(state);
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
        *self.state.borrow_mut() = WindowState::new(self.size(), self.window_size);
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

impl<T: Element> CompilableNode for MovingVarianceNode<T> {
    fn compile(
        &self,
        compiler: &mut MapCompiler,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), ModelError> {
        let size = self.size();
        let zeros = |n: usize| vec![Scalar::zero(T::TYPE); n];
        let input = compiler.elements_variable(function, self.input.elements().base())?;
        let output = compiler.output_variable(function, &self.output)?;
        let samples = function.global_array(
            &compiler.global_name("samples"),
            T::TYPE,
            &zeros(size * self.window_size),
        )?;
        let sum = function.global_array(&compiler.global_name("sum"), T::TYPE, &zeros(size))?;
        let sum_squares =
            function.global_array(&compiler.global_name("sumSquares"), T::TYPE, &zeros(size))?;
        let position = function.global_array(
            &compiler.global_name("position"),
            ElementType::Int64,
            &[Scalar::I64(0)],
        )?;

        let name = compiler.unique_function_name("MovingVariance");
        trace!(function = %name, window = self.window_size, "emitting window update");
        let mut update = function
            .module()
            .begin_function(Self::function_declaration(name.clone()))?;
        emit_update::<T>(compiler, &mut *update, size, self.window_size)?;
        update.finish()?;

        function.call(&name, &[input, output, samples, sum, sum_squares, position])?;
        Ok(())
    }
}

/// Body of the update function; parameters as in
/// [`MovingVarianceNode::function_declaration`].
fn emit_update<T: Element>(
    compiler: &MapCompiler,
    function: &mut dyn FunctionEmitter,
    size: usize,
    window_size: usize,
) -> Result<(), ModelError> {
    use BinaryOperationType::{Add, Divide, Multiply, Remainder, Subtract};

    let arguments: Vec<Value> = (0..6)
        .map(|i| function.argument(i))
        .collect::<Result<_, _>>()?;
    let [input, output, samples, sum, sum_squares, position] = arguments[..] else {
        return Err(ModelError::UnresolvedReference(
            "window update has the wrong parameter count".into(),
        ));
    };
    let window = function.literal(T::from_f64(window_size as f64).into_scalar())?;
    let current = function.load_at(position, 0)?;
    let stride = function.literal(Scalar::I64(to_i64(size)?))?;
    let base = function.binary(Multiply, current, stride)?;

    compiler.for_each_element(function, size, &mut |f, j| -> Result<(), EmitError> {
        let slot = f.binary(Add, base, j)?;
        let old = f.load(samples, slot)?;
        let x = f.load(input, j)?;

        let previous = f.load(sum, j)?;
        let reduced = f.binary(Subtract, previous, old)?;
        let next_sum = f.binary(Add, reduced, x)?;
        f.store(sum, j, next_sum)?;

        let previous = f.load(sum_squares, j)?;
        let old_square = f.binary(Multiply, old, old)?;
        let square = f.binary(Multiply, x, x)?;
        let reduced = f.binary(Subtract, previous, old_square)?;
        let next_squares = f.binary(Add, reduced, square)?;
        f.store(sum_squares, j, next_squares)?;

        f.store(samples, slot, x)?;

        let mean_square = f.binary(Divide, next_squares, window)?;
        let mean = f.binary(Divide, next_sum, window)?;
        let mean_squared = f.binary(Multiply, mean, mean)?;
        let variance = f.binary(Subtract, mean_square, mean_squared)?;
        f.store(output, j, variance)
    })?;

    let one = function.literal(Scalar::I64(1))?;
    let advanced = function.binary(Add, current, one)?;
    let count = function.literal(Scalar::I64(to_i64(window_size)?))?;
    let wrapped = function.binary(Remainder, advanced, count)?;
    function.store_at(position, 0, wrapped)?;
    Ok(())
}

pub(crate) fn to_i64(value: usize) -> Result<i64, ModelError> {
    i64::try_from(value)
        .map_err(|_| ModelError::UnsupportedOperation(format!("{value} does not fit an int64")))
}

impl<T: Element> ArchivableNode for MovingVarianceNode<T> {
    fn type_name() -> String {
        format!("MovingVarianceNode<{}>", T::TYPE.type_name())
    }

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        Self::new(
            archive.read_elements(DEFAULT_INPUT_PORT_NAME)?,
            archive.read("window_size")?,
        )
    }
}
