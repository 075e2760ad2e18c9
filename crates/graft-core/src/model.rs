//! The model: an arena of nodes forming a DAG.
//!
//! Nodes are stored in insertion order and a node may only read outputs of
//! nodes added before it, so insertion order is always a valid dependency
//! order. [`Model::validate`] re-derives a topological order from the edges
//! to check that invariant independently.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

use graft_emit::Element;
use tracing::trace;
use uuid::Uuid;

use crate::elements::{PortElements, PortElementsBase};
use crate::error::ModelError;
use crate::node::Node;
use crate::port::{NodeId, OutputPort, OutputPortBase, PortBase, PortId};

#[derive(Debug)]
pub struct Model {
    id: Uuid,
    nodes: Vec<Box<dyn Node>>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            nodes: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Take ownership of `node` and return a reference to it.
    ///
    /// Every input range must name an output of a node already in this
    /// model, lie within that output, and have the input's element type.
    pub fn add_node<N: Node>(&mut self, node: N) -> Result<&N, ModelError> {
        let id = self.add_boxed(Box::new(node))?;
        self.node_as::<N>(id)
    }

    pub fn add_boxed(&mut self, node: Box<dyn Node>) -> Result<NodeId, ModelError> {
        let id = NodeId(self.nodes.len());
        for input in node.input_ports() {
            let elements = input.elements_base();
            if elements.element_type() != input.element_type() {
                return Err(ModelError::TypeMismatch(format!(
                    "input `{}` is {} but is bound to {} elements",
                    input.name(),
                    input.element_type(),
                    elements.element_type()
                )));
            }
            for range in elements.ranges() {
                let port = self.output_port(range.port)?;
                if port.element_type() != elements.element_type() {
                    return Err(ModelError::TypeMismatch(format!(
                        "input `{}` reads {} port {}",
                        input.name(),
                        port.element_type(),
                        range.port
                    )));
                }
                if range.end() > port.size() {
                    return Err(ModelError::range(range.start, range.len, port.size()));
                }
            }
        }

        for input in node.input_ports() {
            input.bind(id);
            for range in input.elements_base().ranges() {
                self.output_port(range.port)?.reference_port();
            }
        }
        for (index, output) in node.output_ports().into_iter().enumerate() {
            output.bind(PortId::new(id, index));
        }
        trace!(node = %id, kind = %node.runtime_type_name(), "added node");
        self.nodes.push(node);
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Result<&dyn Node, ModelError> {
        self.nodes
            .get(id.0)
            .map(|n| n.as_ref())
            .ok_or_else(|| ModelError::UnresolvedReference(format!("node {id} is not in the model")))
    }

    /// The node `id` as a concrete kind.
    pub fn node_as<N: Node>(&self, id: NodeId) -> Result<&N, ModelError> {
        let node = self.node(id)?;
        node.as_any().downcast_ref::<N>().ok_or_else(|| {
            ModelError::TypeMismatch(format!(
                "node {id} is a {}, not the requested kind",
                node.runtime_type_name()
            ))
        })
    }

    /// All nodes in dependency order.
    pub fn nodes(&self) -> impl Iterator<Item = &dyn Node> {
        self.nodes.iter().map(|n| n.as_ref())
    }

    pub fn output_port(&self, id: PortId) -> Result<&dyn OutputPortBase, ModelError> {
        if id.node.is_detached() {
            return Err(ModelError::UnresolvedReference(
                "elements refer to a port whose node was never added to a model".into(),
            ));
        }
        let node = self.node(id.node)?;
        node.output_ports().get(id.index).copied().ok_or_else(|| {
            ModelError::UnresolvedReference(format!("node {} has no output {}", id.node, id.index))
        })
    }

    pub fn typed_output_port<T: Element>(&self, id: PortId) -> Result<&OutputPort<T>, ModelError> {
        let port = self.output_port(id)?;
        port.as_any().downcast_ref::<OutputPort<T>>().ok_or_else(|| {
            ModelError::TypeMismatch(format!(
                "port {id} carries {}, not {}",
                port.element_type(),
                T::TYPE
            ))
        })
    }

    /// Concatenate the cached values selected by `elements`.
    pub fn resolve<T: Element>(&self, elements: &PortElements<T>) -> Result<Vec<T>, ModelError> {
        self.resolve_base(elements.base())
    }

    pub fn resolve_base<T: Element>(
        &self,
        elements: &PortElementsBase,
    ) -> Result<Vec<T>, ModelError> {
        let mut values = Vec::with_capacity(elements.size());
        for range in elements.ranges() {
            let port = self.typed_output_port::<T>(range.port)?;
            port.with_output(|cached| {
                cached
                    .get(range.start..range.end())
                    .map(|slice| values.extend_from_slice(slice))
                    .ok_or_else(|| ModelError::range(range.start, range.len, cached.len()))
            })??;
        }
        Ok(values)
    }

    /// Distinct producers of `id`'s inputs, ascending.
    pub fn parent_nodes(&self, id: NodeId) -> Result<Vec<NodeId>, ModelError> {
        let node = self.node(id)?;
        let parents: BTreeSet<NodeId> = node
            .input_ports()
            .iter()
            .flat_map(|input| input.elements_base().referenced_nodes())
            .collect();
        Ok(parents.into_iter().collect())
    }

    /// Nodes reading any output of `id`, ascending.
    pub fn dependent_nodes(&self, id: NodeId) -> Result<Vec<NodeId>, ModelError> {
        self.node(id)?;
        let mut dependents = Vec::new();
        for (index, node) in self.nodes.iter().enumerate().skip(id.0 + 1) {
            let reads = node
                .input_ports()
                .iter()
                .any(|input| input.elements_base().referenced_nodes().contains(&id));
            if reads {
                dependents.push(NodeId(index));
            }
        }
        Ok(dependents)
    }

    /// Ancestors of `outputs` (inclusive of their producers) in dependency order.
    pub fn dependency_order(&self, outputs: &[PortElementsBase]) -> Result<Vec<NodeId>, ModelError> {
        let mut needed = BTreeSet::new();
        let mut stack: Vec<NodeId> = outputs
            .iter()
            .flat_map(PortElementsBase::referenced_nodes)
            .collect();
        while let Some(id) = stack.pop() {
            if needed.insert(id) {
                stack.extend(self.parent_nodes(id)?);
            }
        }
        Ok(needed.into_iter().collect())
    }

    /// Interpret every node in dependency order.
    pub fn compute(&self) -> Result<(), ModelError> {
        for node in &self.nodes {
            node.compute(self)?;
        }
        Ok(())
    }

    /// Interpret only what `outputs` depend on.
    pub fn compute_outputs(&self, outputs: &[PortElementsBase]) -> Result<(), ModelError> {
        for id in self.dependency_order(outputs)? {
            self.nodes[id.0].compute(self)?;
        }
        Ok(())
    }

    /// Reset node state and drop cached outputs.
    pub fn reset(&self) {
        for node in &self.nodes {
            node.reset();
            for port in node.output_ports() {
                port.clear_output();
            }
        }
    }

    /// Check that the edges form a DAG whose producers precede their readers.
    pub fn validate(&self) -> Result<Vec<NodeId>, ModelError> {
        let mut edges = Vec::new();
        for (index, node) in self.nodes.iter().enumerate() {
            for input in node.input_ports() {
                for range in input.elements_base().ranges() {
                    let producer = range.port.node.0;
                    if producer >= self.nodes.len() {
                        return Err(ModelError::UnresolvedReference(format!(
                            "node n{index} reads missing node {}",
                            range.port.node
                        )));
                    }
                    edges.push((producer, index));
                }
            }
        }
        let order = topological_order(self.nodes.len(), &edges)?;
        if let Some((producer, reader)) = edges.iter().find(|(p, r)| p >= r) {
            return Err(ModelError::UnresolvedReference(format!(
                "node n{reader} reads n{producer}, which does not precede it"
            )));
        }
        Ok(order.into_iter().map(NodeId).collect())
    }
}

/// Kahn's algorithm over `(from, to)` edges with deterministic tie-breaking.
///
/// Fails with [`ModelError::CycleDetected`] naming the smallest node that
/// could not be ordered.
pub fn topological_order(node_count: usize, edges: &[(usize, usize)]) -> Result<Vec<usize>, ModelError> {
    let mut in_degree = vec![0usize; node_count];
    let mut successors: HashMap<usize, Vec<usize>> = HashMap::new();
    for &(from, to) in edges {
        in_degree[to] += 1;
        successors.entry(from).or_default().push(to);
    }

    let mut ready: Vec<usize> = (0..node_count).filter(|&n| in_degree[n] == 0).collect();
    ready.sort_unstable();
    let mut queue: VecDeque<usize> = ready.into();
    let mut order = Vec::with_capacity(node_count);

    while let Some(node) = queue.pop_front() {
        order.push(node);
        let mut next = Vec::new();
        for &succ in successors.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                next.push(succ);
            }
        }
        next.sort_unstable();
        queue.extend(next);
    }

    if order.len() != node_count {
        let stuck = (0..node_count)
            .find(|&n| in_degree[n] > 0)
            .unwrap_or_default();
        return Err(ModelError::CycleDetected(stuck));
    }
    Ok(order)
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, node) in self.nodes.iter().enumerate() {
            write!(f, "n{index} = {}(", node.runtime_type_name())?;
            for (i, input) in node.input_ports().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", input.name(), input.elements_base())?;
            }
            write!(f, ") ->")?;
            for output in node.output_ports() {
                write!(f, " {}: {}[{}]", output.name(), output.element_type(), output.size())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{InputNode, OutputNode};
    use crate::error::ErrorKind;

    /// An output node reading output 0 of node `from`, which may not exist yet.
    fn reader_of(from: usize) -> OutputNode<f64> {
        let port = OutputPort::<f64>::new("output", 1);
        port.bind(PortId::new(NodeId(from), 0));
        OutputNode::new(port.elements())
    }

    #[test]
    fn kahn_orders_a_diamond() {
        let order = topological_order(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]).unwrap();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn kahn_detects_cycles() {
        let err = topological_order(3, &[(0, 1), (1, 2), (2, 1)]).unwrap_err();
        assert!(matches!(err, ModelError::CycleDetected(1)));
        let err = topological_order(1, &[(0, 0)]).unwrap_err();
        assert!(matches!(err, ModelError::CycleDetected(0)));
    }

    #[test]
    fn empty_model_validates() {
        let model = Model::new();
        assert!(model.validate().unwrap().is_empty());
        assert!(model.is_empty());
    }

    #[test]
    fn validate_rejects_a_cycle_between_nodes() {
        // Inserted directly, since add_node refuses forward references.
        let mut model = Model::new();
        model.nodes.push(Box::new(reader_of(1)));
        model.nodes.push(Box::new(reader_of(0)));
        let err = model.validate().unwrap_err();
        assert!(matches!(err, ModelError::CycleDetected(0)));
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[test]
    fn add_node_refuses_forward_references() {
        let mut model = Model::new();
        model.add_node(InputNode::<f64>::new(1)).unwrap();
        let err = model.add_node(reader_of(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedReference);
        assert_eq!(model.len(), 1);
        assert_eq!(model.validate().unwrap(), vec![NodeId(0)]);
    }
}
