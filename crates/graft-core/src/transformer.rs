//! Model-to-model rewriting.
//!
//! A [`ModelTransformer`] visits a source model in dependency order and lets
//! each node re-issue itself into a fresh destination model. While doing so
//! it keeps a map from every old output port to the elements that replace it
//! in the new model, so a later node's inputs can be rewritten without the
//! node knowing whether its producers were copied verbatim or substituted.

use std::collections::HashMap;

use graft_emit::Element;
use tracing::debug;

use crate::elements::{PortElements, PortElementsBase};
use crate::error::ModelError;
use crate::model::Model;
use crate::node::Node;
use crate::port::{NodeId, OutputPort, OutputPortBase, PortBase, PortId};

/// Per-node action for [`ModelTransformer::transform_model`].
pub type TransformAction<'a> =
    dyn FnMut(&dyn Node, &mut ModelTransformer) -> Result<(), ModelError> + 'a;

#[derive(Debug)]
pub struct ModelTransformer {
    model: Model,
    elements_map: HashMap<PortId, PortElementsBase>,
    is_model_compilable: bool,
}

impl Default for ModelTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelTransformer {
    pub fn new() -> Self {
        Self {
            model: Model::new(),
            elements_map: HashMap::new(),
            is_model_compilable: true,
        }
    }

    fn begin(&mut self) {
        self.model = Model::new();
        self.elements_map.clear();
        self.is_model_compilable = true;
    }

    /// Structural copy: every node copies itself.
    pub fn copy_model(&mut self, source: &Model) -> Result<Model, ModelError> {
        self.transform_model(source, &mut |node, transformer| node.copy(transformer))
    }

    /// Visit `source` in dependency order, running `action` for each node.
    ///
    /// If `action` fails, correspondences registered for that node's outputs
    /// are removed and the error is returned; the partially built
    /// destination model should be discarded.
    pub fn transform_model(
        &mut self,
        source: &Model,
        action: &mut TransformAction<'_>,
    ) -> Result<Model, ModelError> {
        self.begin();
        for node in source.nodes() {
            if let Err(e) = action(node, self) {
                for port in node.output_ports() {
                    if let Some(id) = port.id() {
                        self.elements_map.remove(&id);
                    }
                }
                return Err(e);
            }
        }
        debug!(
            nodes = source.len(),
            new_nodes = self.model.len(),
            compilable = self.is_model_compilable,
            "transformed model"
        );
        Ok(std::mem::take(&mut self.model))
    }

    /// Refine `source` until no node changes or `max_iterations` passes ran.
    ///
    /// Afterwards the correspondence map relates `source`'s ports to the
    /// final model, across all passes.
    pub fn refine_model(
        &mut self,
        source: &Model,
        max_iterations: usize,
    ) -> Result<Model, ModelError> {
        let mut did_refine = false;
        let mut current = self.transform_model(source, &mut |node, transformer| {
            did_refine |= node.refine(transformer)?;
            Ok(())
        })?;
        let mut composed = std::mem::take(&mut self.elements_map);
        let mut is_compilable = self.is_model_compilable;
        let mut passes = 1;

        while did_refine && passes < max_iterations {
            did_refine = false;
            let next = self.transform_model(&current, &mut |node, transformer| {
                did_refine |= node.refine(transformer)?;
                Ok(())
            })?;
            for elements in composed.values_mut() {
                *elements = self.transform_port_elements(elements)?;
            }
            is_compilable = self.is_model_compilable;
            current = next;
            passes += 1;
        }
        debug!(passes, nodes = current.len(), "refined model");

        self.elements_map = composed;
        self.is_model_compilable = is_compilable;
        Ok(current)
    }

    /// Rewrite old-model elements into new-model elements.
    ///
    /// Fails with [`ModelError::UnresolvedReference`] if any referenced port
    /// has no correspondence yet, which means nodes were visited out of
    /// dependency order.
    pub fn transform_port_elements(
        &self,
        elements: &PortElementsBase,
    ) -> Result<PortElementsBase, ModelError> {
        let mut result = PortElementsBase::new(elements.element_type());
        for range in elements.ranges() {
            let fragment = self.elements_map.get(&range.port).ok_or_else(|| {
                ModelError::UnresolvedReference(format!(
                    "port {} has no correspondence in the new model",
                    range.port
                ))
            })?;
            result.append(&fragment.slice(range.start, range.len)?)?;
        }
        Ok(result)
    }

    pub fn transform_elements<T: Element>(
        &self,
        elements: &PortElements<T>,
    ) -> Result<PortElements<T>, ModelError> {
        PortElements::try_from_base(self.transform_port_elements(elements.base())?)
    }

    pub fn corresponding_elements(
        &self,
        elements: &PortElementsBase,
    ) -> Result<PortElementsBase, ModelError> {
        self.transform_port_elements(elements)
    }

    /// New-model elements corresponding to an entire old output.
    pub fn corresponding_outputs(
        &self,
        port: &dyn OutputPortBase,
    ) -> Result<PortElementsBase, ModelError> {
        self.transform_port_elements(&PortElementsBase::from_port(port))
    }

    pub fn corresponding_port<T: Element>(
        &self,
        port: &OutputPort<T>,
    ) -> Result<PortElements<T>, ModelError> {
        self.transform_elements(&port.elements())
    }

    /// Announce that `old` now corresponds to `new`, replacing any earlier entry.
    pub fn map_node_output<T: Element>(
        &mut self,
        old: &OutputPort<T>,
        new: &PortElements<T>,
    ) -> Result<(), ModelError> {
        self.map_node_output_base(old, new.base().clone())
    }

    pub fn map_node_output_base(
        &mut self,
        old: &dyn OutputPortBase,
        new: PortElementsBase,
    ) -> Result<(), ModelError> {
        let id = old.id().ok_or_else(|| {
            ModelError::UnresolvedReference(format!(
                "output `{}` belongs to a node outside any model",
                old.name()
            ))
        })?;
        if new.element_type() != old.element_type() {
            return Err(ModelError::TypeMismatch(format!(
                "port {id} is {} but was mapped to {} elements",
                old.element_type(),
                new.element_type()
            )));
        }
        if new.size() != old.size() {
            return Err(ModelError::SizeMismatch {
                expected: old.size(),
                found: new.size(),
            });
        }
        self.elements_map.insert(id, new);
        Ok(())
    }

    /// Add a node to the new model, folding its capability into the
    /// compilable flag.
    /// A rejected node leaves the flag unchanged.
    pub fn add_node<N: Node>(&mut self, node: N) -> Result<&N, ModelError> {
        let compilable = node.is_compilable();
        let added = self.model.add_node(node)?;
        self.is_model_compilable &= compilable;
        Ok(added)
    }

    /// The new-model counterpart of an old input node.
    ///
    /// Only meaningful while the destination model is being built; use
    /// [`ModelTransformer::corresponding_node_id`] once it has been returned.
    pub fn corresponding_input_node(&self, old: &dyn Node) -> Result<&dyn Node, ModelError> {
        self.model.node(self.corresponding_node_id(old)?)
    }

    /// Id of the node that now produces all of `old`'s single output.
    pub fn corresponding_node_id(&self, old: &dyn Node) -> Result<NodeId, ModelError> {
        let outputs = old.output_ports();
        let port = match outputs.as_slice() {
            [port] => *port,
            _ => {
                return Err(ModelError::UnsupportedOperation(format!(
                    "{} does not have exactly one output",
                    old.runtime_type_name()
                )))
            }
        };
        let new = self.corresponding_outputs(port)?;
        let range = new
            .single_range()
            .filter(|r| r.start == 0)
            .ok_or_else(|| {
                ModelError::UnresolvedReference(format!(
                    "output of {} was not mapped to a single node",
                    old.runtime_type_name()
                ))
            })?;
        Ok(range.port.node)
    }

    pub fn corresponding_input_node_as<N: Node>(&self, old: &N) -> Result<&N, ModelError> {
        let node = self.corresponding_input_node(old)?;
        node.as_any().downcast_ref::<N>().ok_or_else(|| {
            ModelError::TypeMismatch(format!(
                "counterpart is a {}, not the requested kind",
                node.runtime_type_name()
            ))
        })
    }

    pub fn is_model_compilable(&self) -> bool {
        self.is_model_compilable
    }

    /// The destination model under construction.
    pub fn model(&self) -> &Model {
        &self.model
    }
}
