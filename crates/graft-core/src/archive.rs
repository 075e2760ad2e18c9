//! Archive contract for nodes, models and maps.
//!
//! Each node writes its identifying attributes into an [`Archiver`] as keyed
//! JSON fields. Reading goes the other way through an [`Unarchiver`], which
//! also carries the table from archived node ids to the ids the nodes
//! received in the rebuilt model, so element references are re-resolved
//! against ports that already exist. A [`NodeRegistry`] maps runtime type
//! names to the functions that rebuild each node kind.

use std::collections::HashMap;
use std::fmt;

use graft_emit::Element;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::debug;
use uuid::Uuid;

use crate::builtin::{InputNode, OutputNode};
use crate::elements::{PortElements, PortElementsBase};
use crate::error::ModelError;
use crate::model::Model;
use crate::node::Node;
use crate::port::{InputPort, NodeId, OutputPort, PortBase};

/// Collects the fields of one node.
#[derive(Debug, Default)]
pub struct Archiver {
    fields: JsonMap<String, JsonValue>,
}

impl Archiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write<V: Serialize + ?Sized>(&mut self, key: &str, value: &V) -> Result<(), ModelError> {
        self.fields.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn write_elements<T: Element>(
        &mut self,
        key: &str,
        elements: &PortElements<T>,
    ) -> Result<(), ModelError> {
        self.write(key, elements.base())
    }

    /// An input is archived as its bound elements, under the port name.
    pub fn write_input<T: Element>(&mut self, port: &InputPort<T>) -> Result<(), ModelError> {
        self.write_elements(port.name(), port.elements())
    }

    /// An output is archived as its size, under the port name.
    pub fn write_output<T: Element>(&mut self, port: &OutputPort<T>) -> Result<(), ModelError> {
        self.write(port.name(), &port.size())
    }

    pub fn into_fields(self) -> JsonMap<String, JsonValue> {
        self.fields
    }
}

/// Reads the fields of one node.
#[derive(Debug)]
pub struct Unarchiver<'a> {
    type_name: &'a str,
    fields: &'a JsonMap<String, JsonValue>,
    node_ids: &'a HashMap<NodeId, NodeId>,
}

impl<'a> Unarchiver<'a> {
    pub fn new(
        type_name: &'a str,
        fields: &'a JsonMap<String, JsonValue>,
        node_ids: &'a HashMap<NodeId, NodeId>,
    ) -> Self {
        Self {
            type_name,
            fields,
            node_ids,
        }
    }

    pub fn type_name(&self) -> &str {
        self.type_name
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn read<V: DeserializeOwned>(&self, key: &str) -> Result<V, ModelError> {
        let value = self.fields.get(key).ok_or_else(|| {
            ModelError::Archive(format!("{} has no field `{key}`", self.type_name))
        })?;
        Ok(V::deserialize(value)?)
    }

    /// Read elements and point them at the rebuilt model's nodes.
    pub fn read_elements<T: Element>(&self, key: &str) -> Result<PortElements<T>, ModelError> {
        let archived: PortElementsBase = self.read(key)?;
        let remapped = archived.remap_nodes(|id| self.node_ids.get(&id).copied())?;
        PortElements::try_from_base(remapped)
    }

    pub fn read_elements_list<T: Element>(
        &self,
        key: &str,
    ) -> Result<Vec<PortElements<T>>, ModelError> {
        let archived: Vec<PortElementsBase> = self.read(key)?;
        archived
            .into_iter()
            .map(|elements| {
                let remapped = elements.remap_nodes(|id| self.node_ids.get(&id).copied())?;
                PortElements::try_from_base(remapped)
            })
            .collect()
    }

    pub fn read_input<T: Element>(&self, name: &str) -> Result<InputPort<T>, ModelError> {
        Ok(InputPort::new(name, self.read_elements(name)?))
    }

    /// Restore the archived size of an output the node constructed itself.
    pub fn read_output<T: Element>(&self, port: &mut OutputPort<T>) -> Result<(), ModelError> {
        let size = self.read(port.name())?;
        port.resize(size);
        Ok(())
    }
}

/// A node kind that can be rebuilt from an archive.
pub trait ArchivableNode: Node + Sized {
    /// Must equal [`Node::runtime_type_name`] of every instance.
    fn type_name() -> String;

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError>;
}

pub type NodeCreator = fn(&Unarchiver<'_>) -> Result<Box<dyn Node>, ModelError>;

fn create<N: ArchivableNode>(archive: &Unarchiver<'_>) -> Result<Box<dyn Node>, ModelError> {
    Ok(Box::new(N::read_from_archive(archive)?))
}

/// Node creators keyed by runtime type name.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    creators: HashMap<String, NodeCreator>,
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.creators.keys().collect();
        names.sort();
        f.debug_struct("NodeRegistry").field("types", &names).finish()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry knowing the input and output nodes for every element type.
    pub fn with_core_nodes() -> Self {
        let mut registry = Self::new();
        registry.register::<InputNode<f32>>();
        registry.register::<InputNode<f64>>();
        registry.register::<InputNode<i32>>();
        registry.register::<InputNode<i64>>();
        registry.register::<InputNode<bool>>();
        registry.register::<OutputNode<f32>>();
        registry.register::<OutputNode<f64>>();
        registry.register::<OutputNode<i32>>();
        registry.register::<OutputNode<i64>>();
        registry.register::<OutputNode<bool>>();
        registry
    }

    pub fn register<N: ArchivableNode>(&mut self) {
        self.creators.insert(N::type_name(), create::<N>);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.creators.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.creators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.creators.is_empty()
    }

    pub fn create(&self, archive: &Unarchiver<'_>) -> Result<Box<dyn Node>, ModelError> {
        let creator = self
            .creators
            .get(archive.type_name())
            .ok_or_else(|| ModelError::UnknownNodeType(archive.type_name().to_string()))?;
        creator(archive)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub type_name: String,
    pub fields: JsonMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArchive {
    pub id: Uuid,
    pub nodes: Vec<NodeRecord>,
}

impl ModelArchive {
    /// Rebuild the model, returning it with the archived-to-new id table.
    pub fn restore(
        &self,
        registry: &NodeRegistry,
    ) -> Result<(Model, HashMap<NodeId, NodeId>), ModelError> {
        let mut model = Model::with_id(self.id);
        let mut node_ids = HashMap::with_capacity(self.nodes.len());
        for record in &self.nodes {
            let node = {
                let archive = Unarchiver::new(&record.type_name, &record.fields, &node_ids);
                registry.create(&archive)?
            };
            let id = model.add_boxed(node)?;
            node_ids.insert(record.id, id);
        }
        debug!(model = %self.id, nodes = model.len(), "restored model archive");
        Ok((model, node_ids))
    }
}

impl Model {
    pub fn to_archive(&self) -> Result<ModelArchive, ModelError> {
        let mut nodes = Vec::with_capacity(self.len());
        for (index, node) in self.nodes().enumerate() {
            let mut archiver = Archiver::new();
            node.write_to_archive(&mut archiver)?;
            nodes.push(NodeRecord {
                id: NodeId(index),
                type_name: node.runtime_type_name(),
                fields: archiver.into_fields(),
            });
        }
        Ok(ModelArchive {
            id: self.id(),
            nodes,
        })
    }

    pub fn from_archive(archive: &ModelArchive, registry: &NodeRegistry) -> Result<Model, ModelError> {
        Ok(archive.restore(registry)?.0)
    }
}

/// A model plus the names of its entry and exit points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapArchive {
    pub model: ModelArchive,
    pub inputs: Vec<(String, NodeId)>,
    pub outputs: Vec<(String, PortElementsBase)>,
}
