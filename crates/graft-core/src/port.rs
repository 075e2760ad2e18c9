//! Typed ports.
//!
//! A node owns its [`OutputPort`]s and reads other nodes' outputs through
//! [`InputPort`]s bound to [`PortElements`]. Ports learn their identity when
//! the owning node is added to a model; before that they are detached.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;

use graft_emit::{Element, ElementType, Scalar};
use serde::{Deserialize, Serialize};

use crate::elements::PortElements;
use crate::error::ModelError;
use crate::model::Model;

pub const DEFAULT_INPUT_PORT_NAME: &str = "input";
pub const DEFAULT_INPUT1_PORT_NAME: &str = "input1";
pub const DEFAULT_INPUT2_PORT_NAME: &str = "input2";
pub const DEFAULT_OUTPUT_PORT_NAME: &str = "output";

/// Index of a node in its model's node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Identity of a node that has not been added to a model.
    pub const DETACHED: NodeId = NodeId(usize::MAX);

    pub fn is_detached(self) -> bool {
        self == Self::DETACHED
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_detached() {
            write!(f, "n?")
        } else {
            write!(f, "n{}", self.0)
        }
    }
}

/// Identity of an output port: owning node plus output index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId {
    pub node: NodeId,
    pub index: usize,
}

impl PortId {
    pub const DETACHED: PortId = PortId {
        node: NodeId::DETACHED,
        index: 0,
    };

    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.index)
    }
}

pub trait PortBase: fmt::Debug {
    fn name(&self) -> &str;
    fn element_type(&self) -> ElementType;
    fn size(&self) -> usize;
}

/// Type-erased view of an [`OutputPort`].
pub trait OutputPortBase: PortBase {
    /// `None` until the owning node is added to a model.
    fn id(&self) -> Option<PortId>;

    fn bind(&self, id: PortId);

    /// Record that some input reads this port. Idempotent.
    fn reference_port(&self);

    fn is_referenced(&self) -> bool;

    fn scalar_output(&self) -> Result<Vec<Scalar>, ModelError>;

    /// Drop the cached values.
    fn clear_output(&self);

    fn as_any(&self) -> &dyn Any;
}

/// Type-erased view of an [`InputPort`].
pub trait InputPortBase: PortBase {
    fn elements_base(&self) -> &crate::elements::PortElementsBase;

    fn owner(&self) -> Option<NodeId>;

    fn bind(&self, owner: NodeId);
}

/// An output owned by a node, with its cache of interpreted values.
#[derive(Debug)]
pub struct OutputPort<T: Element> {
    name: String,
    size: usize,
    id: Cell<Option<PortId>>,
    cache: RefCell<Option<Vec<T>>>,
    referenced: Cell<bool>,
}

impl<T: Element> OutputPort<T> {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            id: Cell::new(None),
            cache: RefCell::new(None),
            referenced: Cell::new(false),
        }
    }

    /// Store exactly `size` computed values.
    pub fn set_output(&self, values: Vec<T>) -> Result<(), ModelError> {
        if values.len() != self.size {
            return Err(ModelError::SizeMismatch {
                expected: self.size,
                found: values.len(),
            });
        }
        *self.cache.borrow_mut() = Some(values);
        Ok(())
    }

    pub fn output(&self) -> Result<Vec<T>, ModelError> {
        self.with_output(<[T]>::to_vec)
    }

    pub fn output_at(&self, index: usize) -> Result<T, ModelError> {
        let size = self.size;
        self.with_output(|values| values.get(index).copied())?
            .ok_or_else(|| ModelError::range(index, 1, size))
    }

    /// Borrow the cached values without copying them.
    pub fn with_output<R>(&self, f: impl FnOnce(&[T]) -> R) -> Result<R, ModelError> {
        match self.cache.borrow().as_deref() {
            Some(values) => Ok(f(values)),
            None => Err(ModelError::NotComputed {
                port: self.describe(),
            }),
        }
    }

    /// All elements of this port.
    pub fn elements(&self) -> PortElements<T> {
        PortElements::from(self)
    }

    /// `len` elements starting at `start`.
    pub fn range(&self, start: usize, len: usize) -> Result<PortElements<T>, ModelError> {
        PortElements::range(self, start, len)
    }

    /// Change the declared size. Only meaningful while reading an archive,
    /// before the owning node is added to a model.
    pub fn resize(&mut self, size: usize) {
        self.size = size;
        *self.cache.get_mut() = None;
    }

    fn describe(&self) -> String {
        match self.id.get() {
            Some(id) => format!("{id} ({})", self.name),
            None => self.name.clone(),
        }
    }
}

impl<T: Element> PortBase for OutputPort<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn element_type(&self) -> ElementType {
        T::TYPE
    }

    fn size(&self) -> usize {
        self.size
    }
}

impl<T: Element> OutputPortBase for OutputPort<T> {
    fn id(&self) -> Option<PortId> {
        self.id.get()
    }

    fn bind(&self, id: PortId) {
        self.id.set(Some(id));
    }

    fn reference_port(&self) {
        self.referenced.set(true);
    }

    fn is_referenced(&self) -> bool {
        self.referenced.get()
    }

    fn scalar_output(&self) -> Result<Vec<Scalar>, ModelError> {
        self.with_output(|values| values.iter().map(|v| v.into_scalar()).collect())
    }

    fn clear_output(&self) {
        *self.cache.borrow_mut() = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An input bound to upstream output elements.
#[derive(Debug)]
pub struct InputPort<T: Element> {
    name: String,
    elements: PortElements<T>,
    owner: Cell<Option<NodeId>>,
}

impl<T: Element> InputPort<T> {
    pub fn new(name: impl Into<String>, elements: PortElements<T>) -> Self {
        Self {
            name: name.into(),
            elements,
            owner: Cell::new(None),
        }
    }

    pub fn elements(&self) -> &PortElements<T> {
        &self.elements
    }

    /// Resolve the bound elements against the model's current caches.
    pub fn value(&self, model: &Model) -> Result<Vec<T>, ModelError> {
        model.resolve(&self.elements)
    }
}

impl<T: Element> PortBase for InputPort<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn element_type(&self) -> ElementType {
        T::TYPE
    }

    fn size(&self) -> usize {
        self.elements.size()
    }
}

impl<T: Element> InputPortBase for InputPort<T> {
    fn elements_base(&self) -> &crate::elements::PortElementsBase {
        self.elements.base()
    }

    fn owner(&self) -> Option<NodeId> {
        self.owner.get()
    }

    fn bind(&self, owner: NodeId) {
        self.owner.set(Some(owner));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn set_output_checks_size() {
        let port = OutputPort::<f64>::new("output", 2);
        let err = port.set_output(vec![1.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        port.set_output(vec![1.0, 2.0]).unwrap();
        assert_eq!(port.output().unwrap(), vec![1.0, 2.0]);
        assert_eq!(port.output_at(1).unwrap(), 2.0);
        assert_eq!(port.output_at(2).unwrap_err().kind(), ErrorKind::RangeOutOfBounds);
    }

    #[test]
    fn reading_before_compute_fails() {
        let port = OutputPort::<i32>::new("output", 1);
        assert_eq!(port.output().unwrap_err().kind(), ErrorKind::NotComputed);
        assert_eq!(port.output_at(0).unwrap_err().kind(), ErrorKind::NotComputed);
    }

    #[test]
    fn reference_port_is_idempotent() {
        let port = OutputPort::<bool>::new("output", 1);
        assert!(!port.is_referenced());
        port.reference_port();
        port.reference_port();
        assert!(port.is_referenced());
    }

    #[test]
    fn resize_clears_cache() {
        let mut port = OutputPort::<f32>::new("output", 1);
        port.set_output(vec![1.0]).unwrap();
        port.resize(4);
        assert_eq!(port.size(), 4);
        assert_eq!(port.output().unwrap_err().kind(), ErrorKind::NotComputed);
    }
}
