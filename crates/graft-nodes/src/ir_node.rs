//! Nodes backed by precompiled code.
//!
//! An [`IrNode`] does not synthesize instructions. Its compile step links a
//! function body supplied as text, in the format of whichever backend is
//! compiling (JSON `FunctionBody` for the reference backend, textual IR for
//! LLVM), and calls it with the node's inputs, outputs and any declared
//! state parameters. State parameters are backed by module-level arrays so
//! they persist between invocations.
//!
//! Because the code comes from outside, nothing ties it to the node's
//! interpreted behaviour. Interpretation is only available when the
//! constructor is given a reference implementation through
//! [`IrNode::with_reference`]; each instance documents its own semantics.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use graft_core::{
    ArchivableNode, Archiver, CompilableNode, InputPort, InputPortBase, MapCompiler, Model,
    ModelError, ModelTransformer, Node, OutputPort, OutputPortBase, PortBase, PortElements,
    PortElementsBase, Unarchiver,
};
use graft_emit::{
    Element, ElementType, FunctionDeclaration, FunctionEmitter, NamedVariableType, Scalar,
    VariableType,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// An extra pointer parameter of the linked function, backed by a global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateParameter {
    pub name: String,
    pub element_type: ElementType,
    pub initial: Vec<Scalar>,
}

impl StateParameter {
    pub fn new(name: impl Into<String>, element_type: ElementType, initial: Vec<Scalar>) -> Self {
        Self {
            name: name.into(),
            element_type,
            initial,
        }
    }

    /// `size` zeros of `element_type`.
    pub fn zeroed(name: impl Into<String>, element_type: ElementType, size: usize) -> Self {
        Self::new(name, element_type, vec![Scalar::zero(element_type); size])
    }
}

/// Interpreted stand-in for the linked code: input values in, one vector
/// per output back.
pub type ReferenceCompute<T> = Rc<dyn Fn(&[Vec<T>]) -> Result<Vec<Vec<T>>, ModelError>>;

pub struct IrNode<T: Element> {
    inputs: Vec<InputPort<T>>,
    outputs: Vec<OutputPort<T>>,
    function_name: String,
    code: String,
    state: Vec<StateParameter>,
    reference: Option<ReferenceCompute<T>>,
}

impl<T: Element> fmt::Debug for IrNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrNode")
            .field("function_name", &self.function_name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("state", &self.state)
            .field("has_reference", &self.reference.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Element> IrNode<T> {
    /// Ports are named `input{i}` and `output{i}`, matching the parameter
    /// names of [`IrNode::declaration`].
    pub fn new(
        inputs: Vec<PortElements<T>>,
        output_sizes: &[usize],
        function_name: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            inputs: inputs
                .into_iter()
                .enumerate()
                .map(|(i, elements)| InputPort::new(format!("input{i}"), elements))
                .collect(),
            outputs: output_sizes
                .iter()
                .enumerate()
                .map(|(i, &size)| OutputPort::new(format!("output{i}"), size))
                .collect(),
            function_name: function_name.into(),
            code: code.into(),
            state: Vec::new(),
            reference: None,
        }
    }

    pub fn with_state(mut self, state: Vec<StateParameter>) -> Self {
        self.state = state;
        self
    }

    pub fn with_reference(mut self, reference: ReferenceCompute<T>) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn state(&self) -> &[StateParameter] {
        &self.state
    }

    pub fn output(&self, index: usize) -> Option<&OutputPort<T>> {
        self.outputs.get(index)
    }

    /// `void name(T* input0.., T* output0.., S* state0..)`.
    pub fn declaration(&self) -> FunctionDeclaration {
        let mut parameters: Vec<NamedVariableType> = self
            .inputs
            .iter()
            .map(|port| NamedVariableType::new(port.name(), VariableType::Pointer(T::TYPE)))
            .collect();
        parameters.extend(
            self.outputs
                .iter()
                .map(|port| NamedVariableType::new(port.name(), VariableType::Pointer(T::TYPE))),
        );
        parameters.extend(self.state.iter().map(|state| {
            NamedVariableType::new(state.name.clone(), VariableType::Pointer(state.element_type))
        }));
        FunctionDeclaration::new(self.function_name.clone(), parameters)
    }

    fn output_sizes(&self) -> Vec<usize> {
        self.outputs.iter().map(|port| port.size()).collect()
    }

    fn rebuild(&self, inputs: Vec<PortElements<T>>) -> Self {
        Self {
            state: self.state.clone(),
            reference: self.reference.clone(),
            ..Self::new(inputs, &self.output_sizes(), &self.function_name, &self.code)
        }
    }
}

impl<T: Element> Node for IrNode<T> {
    fn runtime_type_name(&self) -> String {
        Self::type_name()
    }

    fn input_ports(&self) -> Vec<&dyn InputPortBase> {
        self.inputs.iter().map(|p| p as &dyn InputPortBase).collect()
    }

    fn output_ports(&self) -> Vec<&dyn OutputPortBase> {
        self.outputs.iter().map(|p| p as &dyn OutputPortBase).collect()
    }

    fn compute(&self, model: &Model) -> Result<(), ModelError> {
        let reference = self.reference.as_ref().ok_or_else(|| {
            ModelError::UnsupportedOperation(format!(
                "`{}` is precompiled code without a reference implementation",
                self.function_name
            ))
        })?;
        let values = self
            .inputs
            .iter()
            .map(|port| port.value(model))
            .collect::<Result<Vec<_>, _>>()?;
        let results = reference(&values)?;
        if results.len() != self.outputs.len() {
            return Err(ModelError::SizeMismatch {
                expected: self.outputs.len(),
                found: results.len(),
            });
        }
        for (port, values) in self.outputs.iter().zip(results) {
            port.set_output(values)?;
        }
        Ok(())
    }

    fn copy(&self, transformer: &mut ModelTransformer) -> Result<(), ModelError> {
        let inputs = self
            .inputs
            .iter()
            .map(|port| transformer.transform_elements(port.elements()))
            .collect::<Result<Vec<_>, _>>()?;
        let new_outputs: Vec<PortElements<T>> = transformer
            .add_node(self.rebuild(inputs))?
            .outputs
            .iter()
            .map(OutputPort::elements)
            .collect();
        for (old, new) in self.outputs.iter().zip(&new_outputs) {
            transformer.map_node_output(old, new)?;
        }
        Ok(())
    }

    fn as_compilable(&self) -> Option<&dyn CompilableNode> {
        Some(self)
    }

    fn write_to_archive(&self, archiver: &mut Archiver) -> Result<(), ModelError> {
        let inputs: Vec<&PortElementsBase> =
            self.inputs.iter().map(|port| port.elements().base()).collect();
        archiver.write("inputs", &inputs)?;
        archiver.write("output_sizes", &self.output_sizes())?;
        archiver.write("function_name", &self.function_name)?;
        archiver.write("code", &self.code)?;
        archiver.write("state", &self.state)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Element> CompilableNode for IrNode<T> {
    fn compile(
        &self,
        compiler: &mut MapCompiler,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), ModelError> {
        let mut arguments = Vec::with_capacity(self.inputs.len() + self.outputs.len());
        for port in &self.inputs {
            arguments.push(compiler.elements_variable(function, port.elements().base())?);
        }
        for port in &self.outputs {
            arguments.push(compiler.output_variable(function, port)?);
        }
        for state in &self.state {
            let name = compiler.global_name(&state.name);
            arguments.push(function.global_array(&name, state.element_type, &state.initial)?);
        }

        let declaration = self.declaration();
        debug!(function = %declaration.name, "linking precompiled code");
        function.module().link_precompiled(&declaration, &self.code)?;
        function.call(&declaration.name, &arguments)?;
        Ok(())
    }

    fn has_precompiled_ir(&self) -> bool {
        true
    }

    fn precompiled_ir(&self) -> Option<&str> {
        Some(&self.code)
    }
}

impl<T: Element> ArchivableNode for IrNode<T> {
    fn type_name() -> String {
        format!("IrNode<{}>", T::TYPE.type_name())
    }

    /// The reference implementation is not archived; a restored node only
    /// compiles.
    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        let output_sizes: Vec<usize> = archive.read("output_sizes")?;
        let node = Self::new(
            archive.read_elements_list("inputs")?,
            &output_sizes,
            archive.read::<String>("function_name")?,
            archive.read::<String>("code")?,
        );
        Ok(node.with_state(archive.read("state")?))
    }
}
