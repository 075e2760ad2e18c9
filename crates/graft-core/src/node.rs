//! The node contract.
//!
//! Every node interprets itself ([`Node::compute`]) and knows how to re-issue
//! itself into another model ([`Node::copy`], [`Node::refine`]). Nodes that
//! can also generate code expose [`CompilableNode`] through
//! [`Node::as_compilable`]. New node kinds are added by implementing these
//! traits; the model, transformer and compiler never match on concrete kinds.

use std::any::Any;
use std::fmt;

use graft_emit::{ElementType, FunctionEmitter, Scalar};

use crate::archive::Archiver;
use crate::compiler::MapCompiler;
use crate::error::ModelError;
use crate::model::Model;
use crate::port::{InputPortBase, NodeId, OutputPortBase};
use crate::transformer::ModelTransformer;

pub trait Node: Any + fmt::Debug {
    /// Name identifying the node kind and element type, e.g.
    /// `BinaryOperationNode<double>`. Used as the archive type key.
    fn runtime_type_name(&self) -> String;

    fn input_ports(&self) -> Vec<&dyn InputPortBase>;

    fn output_ports(&self) -> Vec<&dyn OutputPortBase>;

    /// Read resolved inputs from `model` and write this node's outputs.
    fn compute(&self, model: &Model) -> Result<(), ModelError>;

    /// Add an equivalent node to the transformer's model and register the
    /// correspondence of every output.
    fn copy(&self, transformer: &mut ModelTransformer) -> Result<(), ModelError>;

    /// Like [`Node::copy`], but may substitute lower-level nodes. Returns
    /// whether anything other than a verbatim copy happened.
    fn refine(&self, transformer: &mut ModelTransformer) -> Result<bool, ModelError> {
        self.copy(transformer)?;
        Ok(false)
    }

    /// Whether the output depends on previous invocations.
    fn has_state(&self) -> bool {
        false
    }

    /// Forget accumulated state.
    fn reset(&self) {}

    fn as_compilable(&self) -> Option<&dyn CompilableNode> {
        None
    }

    fn as_input_node(&self) -> Option<&dyn InputNodeBase> {
        None
    }

    fn write_to_archive(&self, archiver: &mut Archiver) -> Result<(), ModelError>;

    fn as_any(&self) -> &dyn Any;

    /// The identity assigned when the node was added to a model.
    fn id(&self) -> NodeId {
        if let Some(id) = self.output_ports().first().and_then(|p| p.id()) {
            return id.node;
        }
        self.input_ports()
            .first()
            .and_then(|p| p.owner())
            .unwrap_or(NodeId::DETACHED)
    }

    fn is_compilable(&self) -> bool {
        self.as_compilable().is_some()
    }
}

/// Code generation for a node.
pub trait CompilableNode: Node {
    /// Emit instructions into `function` computing this node's outputs from
    /// the compiled representations of its inputs.
    fn compile(
        &self,
        compiler: &mut MapCompiler,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), ModelError>;

    /// Whether this node links existing code instead of synthesizing it.
    fn has_precompiled_ir(&self) -> bool {
        false
    }

    fn precompiled_ir(&self) -> Option<&str> {
        None
    }
}

/// A node that injects external values into a model.
pub trait InputNodeBase: Node {
    fn element_type(&self) -> ElementType;

    fn size(&self) -> usize;

    fn set_scalar_input(&self, values: &[Scalar]) -> Result<(), ModelError>;
}
