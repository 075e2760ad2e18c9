//! Port elements: the edges of a model.
//!
//! A [`PortElementsBase`] is an ordered list of `(port, start, len)` ranges
//! read as one concatenated vector. Ranges may come from different output
//! ports, which is how a node fans in from several producers or reads a
//! slice of one. [`PortElements<T>`] is the same thing with its element type
//! fixed at compile time.

use std::fmt;
use std::marker::PhantomData;

use graft_emit::{Element, ElementType};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::port::{NodeId, OutputPort, OutputPortBase, PortBase, PortId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub port: PortId,
    pub start: usize,
    pub len: usize,
}

impl PortRange {
    /// One past the last element, saturating so an overflowing range
    /// still compares as out of bounds.
    pub fn end(&self) -> usize {
        self.start.saturating_add(self.len)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortElementsBase {
    element_type: ElementType,
    ranges: Vec<PortRange>,
}

impl PortElementsBase {
    /// An empty selection.
    pub fn new(element_type: ElementType) -> Self {
        Self {
            element_type,
            ranges: Vec::new(),
        }
    }

    /// Every element of `port`.
    pub fn from_port(port: &dyn OutputPortBase) -> Self {
        let mut elements = Self::new(port.element_type());
        elements.push_range(PortRange {
            port: port.id().unwrap_or(PortId::DETACHED),
            start: 0,
            len: port.size(),
        });
        elements
    }

    /// `len` elements of `port` starting at `start`.
    pub fn from_range(
        port: &dyn OutputPortBase,
        start: usize,
        len: usize,
    ) -> Result<Self, ModelError> {
        if start.checked_add(len).map_or(true, |end| end > port.size()) {
            return Err(ModelError::range(start, len, port.size()));
        }
        let mut elements = Self::new(port.element_type());
        elements.push_range(PortRange {
            port: port.id().unwrap_or(PortId::DETACHED),
            start,
            len,
        });
        Ok(elements)
    }

    /// Concatenate selections in order. All parts must share an element type.
    pub fn concat(parts: &[PortElementsBase]) -> Result<Self, ModelError> {
        let first = parts.first().ok_or_else(|| {
            ModelError::UnsupportedOperation("concatenation of zero selections".into())
        })?;
        let mut result = Self::new(first.element_type);
        for part in parts {
            result.append(part)?;
        }
        Ok(result)
    }

    pub fn append(&mut self, other: &PortElementsBase) -> Result<(), ModelError> {
        if other.element_type != self.element_type {
            return Err(ModelError::TypeMismatch(format!(
                "cannot concatenate {} elements onto {} elements",
                other.element_type, self.element_type
            )));
        }
        for range in &other.ranges {
            self.push_range(*range);
        }
        Ok(())
    }

    /// Append a range, merging it into the previous one when contiguous.
    pub fn push_range(&mut self, range: PortRange) {
        if range.len == 0 {
            return;
        }
        if let Some(last) = self.ranges.last_mut() {
            if last.port == range.port && last.end() == range.start {
                last.len += range.len;
                return;
            }
        }
        self.ranges.push(range);
    }

    /// The sub-selection `[start, start + len)` of the concatenated vector.
    pub fn slice(&self, start: usize, len: usize) -> Result<Self, ModelError> {
        let size = self.size();
        let end = match start.checked_add(len) {
            Some(end) if end <= size => end,
            _ => return Err(ModelError::range(start, len, size)),
        };
        let mut result = Self::new(self.element_type);
        let mut offset = 0usize;
        for range in &self.ranges {
            let (lo, hi) = (offset, offset + range.len);
            offset = hi;
            if hi <= start || lo >= end {
                continue;
            }
            let from = start.max(lo);
            let to = end.min(hi);
            result.push_range(PortRange {
                port: range.port,
                start: range.start + (from - lo),
                len: to - from,
            });
        }
        Ok(result)
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn ranges(&self) -> &[PortRange] {
        &self.ranges
    }

    pub fn size(&self) -> usize {
        self.ranges.iter().map(|r| r.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The port, when this selection is one contiguous range of one port.
    pub fn single_range(&self) -> Option<PortRange> {
        match self.ranges.as_slice() {
            [range] => Some(*range),
            _ => None,
        }
    }

    /// Nodes referenced by this selection, in first-use order.
    pub fn referenced_nodes(&self) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        for range in &self.ranges {
            if !nodes.contains(&range.port.node) {
                nodes.push(range.port.node);
            }
        }
        nodes
    }

    /// Rewrite node identities, e.g. when reading an archive.
    pub fn remap_nodes(
        &self,
        map: impl Fn(NodeId) -> Option<NodeId>,
    ) -> Result<Self, ModelError> {
        let mut result = Self::new(self.element_type);
        for range in &self.ranges {
            let node = map(range.port.node).ok_or_else(|| {
                ModelError::UnresolvedReference(format!("node {} is not known", range.port.node))
            })?;
            result.push_range(PortRange {
                port: PortId::new(node, range.port.index),
                ..*range
            });
        }
        Ok(result)
    }
}

impl fmt::Display for PortElementsBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return write!(f, "[]");
        }
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            write!(f, "{}[{}..{}]", range.port, range.start, range.end())?;
        }
        Ok(())
    }
}

/// [`PortElementsBase`] with a static element type.
#[derive(Debug, Clone, PartialEq)]
pub struct PortElements<T: Element> {
    base: PortElementsBase,
    _marker: PhantomData<T>,
}

impl<T: Element> PortElements<T> {
    pub fn new() -> Self {
        Self {
            base: PortElementsBase::new(T::TYPE),
            _marker: PhantomData,
        }
    }

    pub fn try_from_base(base: PortElementsBase) -> Result<Self, ModelError> {
        if base.element_type() != T::TYPE {
            return Err(ModelError::TypeMismatch(format!(
                "expected {} elements, found {}",
                T::TYPE,
                base.element_type()
            )));
        }
        Ok(Self {
            base,
            _marker: PhantomData,
        })
    }

    pub fn range(port: &OutputPort<T>, start: usize, len: usize) -> Result<Self, ModelError> {
        Self::try_from_base(PortElementsBase::from_range(port, start, len)?)
    }

    pub fn concat(parts: &[PortElements<T>]) -> Self {
        let mut result = Self::new();
        for part in parts {
            for range in part.base.ranges() {
                result.base.push_range(*range);
            }
        }
        result
    }

    pub fn slice(&self, start: usize, len: usize) -> Result<Self, ModelError> {
        Self::try_from_base(self.base.slice(start, len)?)
    }

    pub fn size(&self) -> usize {
        self.base.size()
    }

    pub fn ranges(&self) -> &[PortRange] {
        self.base.ranges()
    }

    pub fn base(&self) -> &PortElementsBase {
        &self.base
    }

    pub fn into_base(self) -> PortElementsBase {
        self.base
    }
}

impl<T: Element> Default for PortElements<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> From<&OutputPort<T>> for PortElements<T> {
    fn from(port: &OutputPort<T>) -> Self {
        Self {
            base: PortElementsBase::from_port(port),
            _marker: PhantomData,
        }
    }
}

impl<T: Element> fmt::Display for PortElements<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.base.fmt(f)
    }
}
