//! Host callbacks.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use graft_core::{
    ArchivableNode, Archiver, CompilableNode, InputPort, InputPortBase, MapCompiler, Model,
    ModelError, ModelTransformer, Node, OutputPort, OutputPortBase, PortElements, Unarchiver,
    DEFAULT_INPUT_PORT_NAME, DEFAULT_OUTPUT_PORT_NAME,
};
use graft_emit::{
    Element, FunctionDeclaration, FunctionEmitter, NamedVariableType, VariableType,
    CALLBACK_FUNCTION_TAG, DECLARE_IN_HEADER_TAG,
};

/// Closure run by the interpreted form of a [`SinkNode`].
pub type SinkCallback<T> = Rc<dyn Fn(&[T])>;

/// Hands its input to a host callback and passes it through unchanged.
///
/// Compiled, the callback is an external function `void name(T* input)`
/// tagged so a host can find it and declare it in the generated header.
/// Interpreted, it is the closure given to [`SinkNode::with_callback`], if
/// any.
pub struct SinkNode<T: Element> {
    input: InputPort<T>,
    output: OutputPort<T>,
    callback_name: String,
    callback: Option<SinkCallback<T>>,
}

impl<T: Element> fmt::Debug for SinkNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkNode")
            .field("callback_name", &self.callback_name)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

impl<T: Element> SinkNode<T> {
    pub fn new(input: PortElements<T>, callback_name: impl Into<String>) -> Self {
        let size = input.size();
        Self {
            input: InputPort::new(DEFAULT_INPUT_PORT_NAME, input),
            output: OutputPort::new(DEFAULT_OUTPUT_PORT_NAME, size),
            callback_name: callback_name.into(),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: SinkCallback<T>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn callback_name(&self) -> &str {
        &self.callback_name
    }

    pub fn input(&self) -> &InputPort<T> {
        &self.input
    }

    pub fn output(&self) -> &OutputPort<T> {
        &self.output
    }

    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration::new(
            self.callback_name.clone(),
            vec![NamedVariableType::new(
                "input",
                VariableType::Pointer(T::TYPE),
            )],
        )
    }
}

impl<T: Element> Node for SinkNode<T> {
    fn runtime_type_name(&self) -> String {
        Self::type_name()
    }

    fn input_ports(&self) -> Vec<&dyn InputPortBase> {
        vec![&self.input]
    }

    fn output_ports(&self) -> Vec<&dyn OutputPortBase> {
        vec![&self.output]
    }

    fn compute(&self, model: &Model) -> Result<(), ModelError> {
        let values = self.input.value(model)?;
        if let Some(callback) = &self.callback {
            callback(&values);
        }
        self.output.set_output(values)
    }

    fn copy(&self, transformer: &mut ModelTransformer) -> Result<(), ModelError> {
        let input = transformer.transform_elements(self.input.elements())?;
        let mut node = Self::new(input, self.callback_name.clone());
        node.callback = self.callback.clone();
        let elements = transformer.add_node(node)?.output.elements();
        transformer.map_node_output(&self.output, &elements)
    }

    fn as_compilable(&self) -> Option<&dyn CompilableNode> {
        Some(self)
    }

    fn write_to_archive(&self, archiver: &mut Archiver) -> Result<(), ModelError> {
        archiver.write_input(&self.input)?;
        archiver.write("callback_name", &self.callback_name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Element> CompilableNode for SinkNode<T> {
    fn compile(
        &self,
        compiler: &mut MapCompiler,
        function: &mut dyn FunctionEmitter,
    ) -> Result<(), ModelError> {
        let input = compiler.elements_variable(function, self.input.elements().base())?;
        let module = function.module();
        if !module.has_function(&self.callback_name) {
            module.declare_external(self.declaration())?;
            let metadata = module.metadata_mut();
            metadata.insert_function_tag(&self.callback_name, CALLBACK_FUNCTION_TAG, "");
            metadata.insert_function_tag(&self.callback_name, DECLARE_IN_HEADER_TAG, "");
        }
        function.call(&self.callback_name, &[input])?;
        compiler.bind_output_variable(&self.output, input)
    }
}

impl<T: Element> ArchivableNode for SinkNode<T> {
    fn type_name() -> String {
        format!("SinkNode<{}>", T::TYPE.type_name())
    }

    fn read_from_archive(archive: &Unarchiver<'_>) -> Result<Self, ModelError> {
        Ok(Self::new(
            archive.read_elements(DEFAULT_INPUT_PORT_NAME)?,
            archive.read::<String>("callback_name")?,
        ))
    }
}
