//! Typed dataflow graphs with interpreted and compiled execution.
//!
//! A [`Model`] owns [`Node`]s whose [`InputPort`]s read other nodes'
//! [`OutputPort`]s through [`PortElements`]. Every node can compute itself;
//! nodes implementing [`CompilableNode`] can also emit code through the
//! `graft-emit` backend interface. A [`ModelTransformer`] rewrites one model
//! into another while tracking which new elements replace each old output,
//! which is how maps are copied, refined and archived.

pub mod archive;
pub mod builtin;
pub mod compiled_map;
pub mod compiler;
pub mod elements;
pub mod error;
pub mod map;
pub mod model;
pub mod node;
pub mod port;
pub mod settings;
pub mod transformer;

pub use archive::{
    ArchivableNode, Archiver, MapArchive, ModelArchive, NodeCreator, NodeRecord, NodeRegistry,
    Unarchiver,
};
pub use builtin::{InputNode, OutputNode};
pub use compiled_map::CompiledMap;
pub use compiler::MapCompiler;
pub use elements::{PortElements, PortElementsBase, PortRange};
pub use error::{ErrorKind, ModelError};
pub use map::Map;
pub use model::{topological_order, Model};
pub use node::{CompilableNode, InputNodeBase, Node};
pub use port::{
    InputPort, InputPortBase, NodeId, OutputPort, OutputPortBase, PortBase, PortId,
    DEFAULT_INPUT1_PORT_NAME, DEFAULT_INPUT2_PORT_NAME, DEFAULT_INPUT_PORT_NAME,
    DEFAULT_OUTPUT_PORT_NAME,
};
pub use settings::{CompileStrategy, CompilerSettings, ElementwiseStrategy, NativeOptimization};
pub use transformer::{ModelTransformer, TransformAction};

/// Model identity.
pub type ModelId = uuid::Uuid;
