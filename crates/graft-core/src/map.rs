//! A model with named entry and exit points.

use std::collections::HashMap;

use graft_emit::reference::ReferenceModule;
use graft_emit::{Element, ElementType, ModuleEmitter, Scalar};
use tracing::debug;

use crate::archive::{MapArchive, NodeRegistry};
use crate::builtin::InputNode;
use crate::compiled_map::CompiledMap;
use crate::compiler::MapCompiler;
use crate::elements::PortElementsBase;
use crate::error::ModelError;
use crate::model::Model;
use crate::node::{InputNodeBase, Node};
use crate::port::{NodeId, PortBase};
use crate::settings::CompilerSettings;
use crate::transformer::{ModelTransformer, TransformAction};

/// A [`Model`] together with the input nodes a caller feeds and the
/// elements it reads back.
///
/// Computing a map only evaluates the nodes its outputs depend on.
#[derive(Debug)]
pub struct Map {
    model: Model,
    inputs: Vec<(String, NodeId)>,
    outputs: Vec<(String, PortElementsBase)>,
}

impl Map {
    /// Every input must name an input node of `model`, and every output
    /// range must lie within an existing port.
    pub fn new(
        model: Model,
        inputs: Vec<(String, NodeId)>,
        outputs: Vec<(String, PortElementsBase)>,
    ) -> Result<Self, ModelError> {
        for (name, id) in &inputs {
            if model.node(*id)?.as_input_node().is_none() {
                return Err(ModelError::TypeMismatch(format!(
                    "map input `{name}` ({id}) is not an input node"
                )));
            }
        }
        for (name, elements) in &outputs {
            for range in elements.ranges() {
                let port = model.output_port(range.port)?;
                if port.element_type() != elements.element_type() {
                    return Err(ModelError::TypeMismatch(format!(
                        "map output `{name}` is {} but reads {} port {}",
                        elements.element_type(),
                        port.element_type(),
                        range.port
                    )));
                }
                if range.end() > port.size() {
                    return Err(ModelError::range(range.start, range.len, port.size()));
                }
            }
        }
        for (_, elements) in &outputs {
            for range in elements.ranges() {
                model.output_port(range.port)?.reference_port();
            }
        }
        Ok(Self {
            model,
            inputs,
            outputs,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn inputs(&self) -> &[(String, NodeId)] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[(String, PortElementsBase)] {
        &self.outputs
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|(n, _)| n == name)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|(n, _)| n == name)
    }

    pub fn input_node(&self, index: usize) -> Result<&dyn InputNodeBase, ModelError> {
        let (name, id) = self
            .inputs
            .get(index)
            .ok_or_else(|| ModelError::range(index, 1, self.inputs.len()))?;
        self.model.node(*id)?.as_input_node().ok_or_else(|| {
            ModelError::TypeMismatch(format!("map input `{name}` is not an input node"))
        })
    }

    fn output_elements(&self, index: usize) -> Result<&PortElementsBase, ModelError> {
        self.outputs
            .get(index)
            .map(|(_, elements)| elements)
            .ok_or_else(|| ModelError::range(index, 1, self.outputs.len()))
    }

    pub fn input_sizes(&self) -> Result<Vec<usize>, ModelError> {
        (0..self.inputs.len())
            .map(|i| Ok(self.input_node(i)?.size()))
            .collect()
    }

    pub fn input_types(&self) -> Result<Vec<ElementType>, ModelError> {
        (0..self.inputs.len())
            .map(|i| Ok(self.input_node(i)?.element_type()))
            .collect()
    }

    pub fn output_sizes(&self) -> Vec<usize> {
        self.outputs.iter().map(|(_, e)| e.size()).collect()
    }

    pub fn output_types(&self) -> Vec<ElementType> {
        self.outputs.iter().map(|(_, e)| e.element_type()).collect()
    }

    pub fn set_input<T: Element>(&self, index: usize, values: Vec<T>) -> Result<(), ModelError> {
        let (_, id) = self
            .inputs
            .get(index)
            .ok_or_else(|| ModelError::range(index, 1, self.inputs.len()))?;
        self.model.node_as::<InputNode<T>>(*id)?.set_input(values)
    }

    pub fn set_input_by_name<T: Element>(&self, name: &str, values: Vec<T>) -> Result<(), ModelError> {
        let index = self
            .input_index(name)
            .ok_or_else(|| ModelError::UnresolvedReference(format!("no map input `{name}`")))?;
        self.set_input(index, values)
    }

    pub fn set_input_scalars(&self, index: usize, values: &[Scalar]) -> Result<(), ModelError> {
        self.input_node(index)?.set_scalar_input(values)
    }

    /// Interpret the nodes the outputs depend on.
    pub fn compute(&self) -> Result<(), ModelError> {
        let outputs: Vec<PortElementsBase> =
            self.outputs.iter().map(|(_, e)| e.clone()).collect();
        self.model.compute_outputs(&outputs)
    }

    /// Values of output `index` from the last compute.
    pub fn output<T: Element>(&self, index: usize) -> Result<Vec<T>, ModelError> {
        self.model.resolve_base(self.output_elements(index)?)
    }

    pub fn output_scalars(&self, index: usize) -> Result<Vec<Scalar>, ModelError> {
        let elements = self.output_elements(index)?;
        let mut values = Vec::with_capacity(elements.size());
        for range in elements.ranges() {
            let cached = self.model.output_port(range.port)?.scalar_output()?;
            let slice = cached
                .get(range.start..range.end())
                .ok_or_else(|| ModelError::range(range.start, range.len, cached.len()))?;
            values.extend_from_slice(slice);
        }
        Ok(values)
    }

    /// Set the only input, compute, and read the only output.
    pub fn compute_single<T: Element, U: Element>(&self, input: Vec<T>) -> Result<Vec<U>, ModelError> {
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

    /// Reset stateful nodes and cached outputs.
    pub fn reset(&self) {
        self.model.reset();
    }

    /// Whether every node the outputs depend on can generate code.
    pub fn is_compilable(&self) -> Result<bool, ModelError> {
        let outputs: Vec<PortElementsBase> =
            self.outputs.iter().map(|(_, e)| e.clone()).collect();
        for id in self.model.dependency_order(&outputs)? {
            if !self.model.node(id)?.is_compilable() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Rewrite the model with `action` and carry inputs and outputs over.
    pub fn transform(&self, action: &mut TransformAction<'_>) -> Result<Map, ModelError> {
        let mut transformer = ModelTransformer::new();
        let model = transformer.transform_model(&self.model, action)?;
        self.rebuild(&transformer, model)
    }

    /// A structural copy.
    pub fn copy(&self) -> Result<Map, ModelError> {
        let mut transformer = ModelTransformer::new();
        let model = transformer.copy_model(&self.model)?;
        self.rebuild(&transformer, model)
    }

    /// Refine until no node changes or `max_iterations` passes ran.
    pub fn refine(&self, max_iterations: usize) -> Result<Map, ModelError> {
        let mut transformer = ModelTransformer::new();
        let model = transformer.refine_model(&self.model, max_iterations)?;
        debug!(
            before = self.model.len(),
            after = model.len(),
            compilable = transformer.is_model_compilable(),
            "refined map"
        );
        self.rebuild(&transformer, model)
    }

    fn rebuild(&self, transformer: &ModelTransformer, model: Model) -> Result<Map, ModelError> {
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for (name, id) in &self.inputs {
            let old = self.model.node(*id)?;
            inputs.push((name.clone(), transformer.corresponding_node_id(old)?));
        }
        let mut outputs = Vec::with_capacity(self.outputs.len());
        for (name, elements) in &self.outputs {
            outputs.push((name.clone(), transformer.corresponding_elements(elements)?));
        }
        Map::new(model, inputs, outputs)
    }

    /// Refine and compile into `module`.
    pub fn compile_into(
        &self,
        settings: &CompilerSettings,
        module: &mut dyn ModuleEmitter,
    ) -> Result<(), ModelError> {
        let refined = self.refine(settings.max_refine_iterations)?;
        MapCompiler::new(settings.clone()).compile_map(&refined, module)
    }

    /// Refine and compile with the reference backend.
    pub fn compile(&self, settings: &CompilerSettings) -> Result<CompiledMap, ModelError> {
        let refined = self.refine(settings.max_refine_iterations)?;
        let mut module = ReferenceModule::new(settings.namespace.clone());
        let mut compiler = MapCompiler::new(settings.clone());
        compiler.compile_map(&refined, &mut module)?;
        CompiledMap::new(module, &refined, &compiler)
    }

    pub fn to_archive(&self) -> Result<MapArchive, ModelError> {
        Ok(MapArchive {
            model: self.model.to_archive()?,
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        })
    }

    pub fn from_archive(archive: &MapArchive, registry: &NodeRegistry) -> Result<Map, ModelError> {
        let (model, node_ids) = archive.model.restore(registry)?;
        let lookup = |id: NodeId| node_ids.get(&id).copied();
        let inputs = archive
            .inputs
            .iter()
            .map(|(name, id)| {
                lookup(*id).map(|new| (name.clone(), new)).ok_or_else(|| {
                    ModelError::UnresolvedReference(format!("map input `{name}` names unknown {id}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = archive
            .outputs
            .iter()
            .map(|(name, elements)| Ok((name.clone(), elements.remap_nodes(lookup)?)))
            .collect::<Result<Vec<_>, ModelError>>()?;
        Map::new(model, inputs, outputs)
    }

    /// A map whose inputs are every input node of `model`, named `input{i}`
    /// in insertion order.
    pub fn with_inputs(
        model: Model,
        outputs: Vec<(String, PortElementsBase)>,
    ) -> Result<Self, ModelError> {
        let inputs: Vec<(String, NodeId)> = model
            .nodes()
            .enumerate()
            .filter(|(_, node)| node.as_input_node().is_some())
            .enumerate()
            .map(|(k, (index, _))| (format!("input{k}"), NodeId(index)))
            .collect();
        Map::new(model, inputs, outputs)
    }

    /// Number of nodes of each runtime type.
    pub fn node_kinds(&self) -> HashMap<String, usize> {
        let mut kinds = HashMap::new();
        for node in self.model.nodes() {
            *kinds.entry(node.runtime_type_name()).or_insert(0) += 1;
        }
        kinds
    }
}
