//! A map compiled with the reference backend, ready to run.

use graft_emit::header::write_header;
use graft_emit::reference::{Callback, ReferenceExecutor, ReferenceModule};
use graft_emit::{Element, ElementType, Scalar};

use crate::compiler::MapCompiler;
use crate::error::ModelError;
use crate::map::Map;

#[derive(Debug, Clone)]
struct Buffer {
    element_type: ElementType,
    values: Vec<Scalar>,
}

impl Buffer {
    fn new(element_type: ElementType, size: usize) -> Self {
        Self {
            element_type,
            values: vec![Scalar::zero(element_type); size],
        }
    }
}

/// Holds the executor for a compiled map plus its input and output buffers.
///
/// Globals of stateful nodes persist between calls to [`CompiledMap::compute`]
/// until [`CompiledMap::reset`].
pub struct CompiledMap {
    executor: ReferenceExecutor,
    predict_name: String,
    step_name: Option<String>,
    inputs: Vec<Buffer>,
    outputs: Vec<Buffer>,
}

impl std::fmt::Debug for CompiledMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledMap")
            .field("predict_name", &self.predict_name)
            .field("step_name", &self.step_name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl CompiledMap {
    pub(crate) fn new(
        module: ReferenceModule,
        map: &Map,
        compiler: &MapCompiler,
    ) -> Result<Self, ModelError> {
        let inputs = map
            .input_types()?
            .into_iter()
            .zip(map.input_sizes()?)
            .map(|(ty, size)| Buffer::new(ty, size))
            .collect();
        let outputs = map
            .output_types()
            .into_iter()
            .zip(map.output_sizes())
            .map(|(ty, size)| Buffer::new(ty, size))
            .collect();
        let step_name = compiler
            .settings()
            .step_interval_ms
            .map(|_| compiler.step_function_name());
        Ok(Self {
            executor: ReferenceExecutor::new(module),
            predict_name: compiler.settings().predict_function_name(),
            step_name,
            inputs,
            outputs,
        })
    }

    pub fn predict_function_name(&self) -> &str {
        &self.predict_name
    }

    pub fn module(&self) -> &ReferenceModule {
        self.executor.module()
    }

    /// Direct access for calling the accessor functions.
    pub fn executor_mut(&mut self) -> &mut ReferenceExecutor {
        &mut self.executor
    }

    /// C header for the compiled module.
    pub fn header(&self) -> String {
        write_header(self.executor.module())
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn set_input<T: Element>(&mut self, index: usize, values: Vec<T>) -> Result<(), ModelError> {
        self.set_input_scalars(
            index,
            &values.into_iter().map(Element::into_scalar).collect::<Vec<_>>(),
        )
    }

    pub fn set_input_scalars(&mut self, index: usize, values: &[Scalar]) -> Result<(), ModelError> {
        let count = self.inputs.len();
        let buffer = self
            .inputs
            .get_mut(index)
            .ok_or_else(|| ModelError::range(index, 1, count))?;
        if values.len() != buffer.values.len() {
            return Err(ModelError::SizeMismatch {
                expected: buffer.values.len(),
                found: values.len(),
            });
        }
        if let Some(bad) = values.iter().find(|v| v.element_type() != buffer.element_type) {
            return Err(ModelError::TypeMismatch(format!(
                "{} input given a {} value",
                buffer.element_type,
                bad.element_type()
            )));
        }
        buffer.values = values.to_vec();
        Ok(())
    }

    /// Run the predict function on the current inputs.
    pub fn compute(&mut self) -> Result<(), ModelError> {
        let name = self.predict_name.clone();
        self.invoke(&name)
    }

    /// Run the step function; only present when a step interval was configured.
    pub fn step(&mut self) -> Result<(), ModelError> {
        let name = self.step_name.clone().ok_or_else(|| {
            ModelError::UnsupportedOperation("map was compiled without a step interval".into())
        })?;
        self.invoke(&name)
    }

    fn invoke(&mut self, name: &str) -> Result<(), ModelError> {
        let mut arguments: Vec<Vec<Scalar>> = self
            .inputs
            .iter()
            .chain(&self.outputs)
            .map(|buffer| buffer.values.clone())
            .collect();
        self.executor.call(name, &mut arguments)?;
        let results = arguments.split_off(self.inputs.len());
        for (buffer, values) in self.outputs.iter_mut().zip(results) {
            buffer.values = values;
        }
        Ok(())
    }

    pub fn output_scalars(&self, index: usize) -> Result<Vec<Scalar>, ModelError> {
        self.outputs
            .get(index)
            .map(|buffer| buffer.values.clone())
            .ok_or_else(|| ModelError::range(index, 1, self.outputs.len()))
    }

    pub fn output<T: Element>(&self, index: usize) -> Result<Vec<T>, ModelError> {
        self.output_scalars(index)?
            .into_iter()
            .map(|v| {
                T::from_scalar(v).ok_or_else(|| {
                    ModelError::TypeMismatch(format!(
                        "output {index} holds {}, not {}",
                        v.element_type(),
                        T::TYPE
                    ))
                })
            })
            .collect()
    }

    pub fn compute_single<T: Element, U: Element>(
        &mut self,
        input: Vec<T>,
    ) -> Result<Vec<U>, ModelError> {
        if self.inputs.len() != 1 || self.outputs.len() != 1 {
            return Err(ModelError::UnsupportedOperation(format!(
                "compute_single needs one input and one output, map has {} and {}",
                self.inputs.len(),
                self.outputs.len()
            )));
        }
        self.set_input(0, input)?;
        self.compute()?;
        self.output(0)
    }

    /// Bind a host closure to a callback the compiled code calls.
    pub fn register_callback(&mut self, name: &str, callback: Callback) -> Result<(), ModelError> {
        Ok(self.executor.register_callback(name, callback)?)
    }

    /// Restore node state to its initial values.
    pub fn reset(&mut self) {
        self.executor.reset();
    }
}
