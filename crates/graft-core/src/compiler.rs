//! Map compilation.
//!
//! [`MapCompiler`] walks the nodes a map's outputs depend on, in dependency
//! order, and lets each one emit code into a single predict function. It
//! owns the table from output ports to their compiled representations:
//! map inputs are bound to function parameters, every other output is a
//! local array created on first use unless its node aliases it to an
//! existing value. Inputs that read a slice or a concatenation get a fresh
//! array gathered from the pieces.
//!
//! Besides the predict function the compiler emits size accessors, a node
//! count accessor and, when a step interval is configured, a step function
//! with its interval accessor. All of them are tagged for the public header.

use std::collections::HashMap;

use graft_emit::{
    BinaryOperationType, ElementType, FunctionDeclaration, FunctionEmitter, LoopBody,
    ModuleEmitter, NamedVariableType, Scalar, Value, VariableType, DECLARE_IN_HEADER_TAG,
    PREDICT_FUNCTION_TAG, STEP_FUNCTION_TAG, STEP_TIME_FUNCTION_TAG,
};
use tracing::{debug, info, trace};

use crate::elements::PortElementsBase;
use crate::error::ModelError;
use crate::map::Map;
use crate::node::Node;
use crate::port::{NodeId, OutputPortBase, PortBase, PortId};
use crate::settings::{CompileStrategy, CompilerSettings};

#[derive(Debug, Clone, Copy)]
struct Variable {
    value: Value,
    size: usize,
}

#[derive(Debug)]
pub struct MapCompiler {
    settings: CompilerSettings,
    variables: HashMap<PortId, Variable>,
    current_node: Option<NodeId>,
    function_count: usize,
}

impl MapCompiler {
    pub fn new(settings: CompilerSettings) -> Self {
        Self {
            settings,
            variables: HashMap::new(),
            current_node: None,
            function_count: 0,
        }
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    pub fn namespace(&self) -> &str {
        &self.settings.namespace
    }

    pub fn step_interval_function_name(&self) -> String {
        format!("{}_GetStepInterval", self.settings.namespace)
    }

    pub fn step_function_name(&self) -> String {
        format!("{}_Step", self.settings.namespace)
    }

    /// Emit the predict function and its companions for `map` into `module`.
    ///
    /// The map should already be refined; nodes without code generation
    /// fail the whole compilation with `UnsupportedOperation`.
    pub fn compile_map(
        &mut self,
        map: &Map,
        module: &mut dyn ModuleEmitter,
    ) -> Result<(), ModelError> {
        self.variables.clear();
        let model = map.model();
        let outputs: Vec<PortElementsBase> =
            map.outputs().iter().map(|(_, e)| e.clone()).collect();
        let order = model.dependency_order(&outputs)?;
        for &id in &order {
            let node = model.node(id)?;
            if !node.is_compilable() {
                return Err(ModelError::UnsupportedOperation(format!(
                    "{} ({id}) has no code generation; refine or interpret the map",
                    node.runtime_type_name()
                )));
            }
        }

        let declaration = self.predict_declaration(map)?;
        let predict_name = declaration.name.clone();
        let mut function = module.begin_function(declaration)?;

        for (index, (name, node_id)) in map.inputs().iter().enumerate() {
            let node = model.node(*node_id)?;
            let port = single_output(node, name)?;
            let value = function.argument(index)?;
            self.bind_output_variable(port, value)?;
        }

        for &id in &order {
            let node = model.node(id)?;
            let compilable = node.as_compilable().ok_or_else(|| {
                ModelError::UnsupportedOperation(format!("{} ({id})", node.runtime_type_name()))
            })?;
            self.current_node = Some(id);
            debug!(node = %id, kind = %node.runtime_type_name(), "compiling node");
            compilable.compile(self, &mut *function)?;
            self.release_unreferenced(node);
        }
        self.current_node = None;

        for (index, (_, elements)) in map.outputs().iter().enumerate() {
            let source = self.elements_variable(&mut *function, elements)?;
            let target = function.argument(map.inputs().len() + index)?;
            self.copy_elements(&mut *function, source, 0, target, 0, elements.size())?;
        }
        function.insert_metadata(PREDICT_FUNCTION_TAG, "");
        function.insert_metadata(DECLARE_IN_HEADER_TAG, "");
        function.finish()?;

        self.emit_size_accessor(module, "GetInputSize", "InputSizes", &map.input_sizes()?)?;
        self.emit_size_accessor(module, "GetOutputSize", "OutputSizes", &map.output_sizes())?;
        self.emit_node_count(module, model.len())?;
        if let Some(interval) = self.settings.step_interval_ms {
            self.emit_step(map, module, &predict_name, interval)?;
        }

        info!(
            function = %predict_name,
            nodes = order.len(),
            inputs = map.inputs().len(),
            outputs = map.outputs().len(),
            "compiled map"
        );
        Ok(())
    }

    fn predict_declaration(&self, map: &Map) -> Result<FunctionDeclaration, ModelError> {
        let mut parameters = Vec::new();
        for (index, ty) in map.input_types()?.into_iter().enumerate() {
            parameters.push(NamedVariableType::new(
                format!("input{index}"),
                VariableType::Pointer(ty),
            ));
        }
        for (index, (_, elements)) in map.outputs().iter().enumerate() {
            parameters.push(NamedVariableType::new(
                format!("output{index}"),
                VariableType::Pointer(elements.element_type()),
            ));
        }
        Ok(FunctionDeclaration::new(
            self.settings.predict_function_name(),
            parameters,
        ))
    }

    /// `void {ns}_{name}(int32_t index, int32_t* size)` reading a constant table.
    fn emit_size_accessor(
        &self,
        module: &mut dyn ModuleEmitter,
        name: &str,
        table: &str,
        sizes: &[usize],
    ) -> Result<(), ModelError> {
        let values = sizes
            .iter()
            .map(|&size| to_int32(size).map(Scalar::I32))
            .collect::<Result<Vec<_>, _>>()?;
        let declaration = FunctionDeclaration::new(
            format!("{}_{name}", self.settings.namespace),
            vec![
                NamedVariableType::new("index", VariableType::Scalar(ElementType::Int32)),
                NamedVariableType::new("size", VariableType::Pointer(ElementType::Int32)),
            ],
        );
        let table_name = format!("{}_{table}", self.settings.namespace);
        let mut function = module.begin_function(declaration)?;
        let index = function.argument(0)?;
        let size = function.argument(1)?;
        let table = function.global_array(&table_name, ElementType::Int32, &values)?;
        let value = function.load(table, index)?;
        function.store_at(size, 0, value)?;
        function.insert_metadata(DECLARE_IN_HEADER_TAG, "");
        function.finish()?;
        Ok(())
    }

    fn emit_node_count(
        &self,
        module: &mut dyn ModuleEmitter,
        count: usize,
    ) -> Result<(), ModelError> {
        let declaration = FunctionDeclaration::new(
            format!("{}_GetNumNodes", self.settings.namespace),
            vec![NamedVariableType::new(
                "count",
                VariableType::Pointer(ElementType::Int32),
            )],
        );
        let mut function = module.begin_function(declaration)?;
        let target = function.argument(0)?;
        let value = function.literal(Scalar::I32(to_int32(count)?))?;
        function.store_at(target, 0, value)?;
        function.insert_metadata(DECLARE_IN_HEADER_TAG, "");
        function.finish()?;
        Ok(())
    }

    /// The step function forwards to predict; its tags tell a host how many
    /// outputs each step produces and which function reports the interval.
    fn emit_step(
        &self,
        map: &Map,
        module: &mut dyn ModuleEmitter,
        predict_name: &str,
        interval_ms: f64,
    ) -> Result<(), ModelError> {
        let interval_name = self.step_interval_function_name();
        let predict = module
            .function_declaration(predict_name)
            .cloned()
            .ok_or_else(|| ModelError::UnresolvedReference(predict_name.to_string()))?;
        let declaration = FunctionDeclaration::new(self.step_function_name(), predict.parameters);
        let total: usize = map.output_sizes().iter().sum();

        let mut function = module.begin_function(declaration)?;
        let arguments = (0..map.inputs().len() + map.outputs().len())
            .map(|i| function.argument(i))
            .collect::<Result<Vec<_>, _>>()?;
        function.call(predict_name, &arguments)?;
        function.insert_metadata(STEP_FUNCTION_TAG, &total.to_string());
        function.insert_metadata(STEP_TIME_FUNCTION_TAG, &interval_name);
        function.insert_metadata(DECLARE_IN_HEADER_TAG, "");
        function.finish()?;

        let declaration = FunctionDeclaration::new(
            interval_name,
            vec![NamedVariableType::new(
                "interval",
                VariableType::Pointer(ElementType::Double),
            )],
        );
        let mut function = module.begin_function(declaration)?;
        let target = function.argument(0)?;
        let value = function.literal(Scalar::F64(interval_ms))?;
        function.store_at(target, 0, value)?;
        function.insert_metadata(DECLARE_IN_HEADER_TAG, "");
        function.finish()?;
        Ok(())
    }

    fn release_unreferenced(&mut self, node: &dyn Node) {
        for port in node.output_ports() {
            if port.is_referenced() {
                continue;
            }
            if let Some(id) = port.id() {
                if self.variables.remove(&id).is_some() {
                    trace!(port = %id, "released unreferenced output");
                }
            }
        }
    }

    /// The representation already bound to `port`.
    pub fn require_variable(&self, port: &dyn OutputPortBase) -> Result<Value, ModelError> {
        let id = port_id(port)?;
        self.variables
            .get(&id)
            .map(|v| v.value)
            .ok_or_else(|| {
                ModelError::UnresolvedReference(format!(
                    "port {id} has no compiled representation"
                ))
            })
    }

    /// The representation of `port`, allocating a local array on first use.
    pub fn output_variable(
        &mut self,
        function: &mut dyn FunctionEmitter,
        port: &dyn OutputPortBase,
    ) -> Result<Value, ModelError> {
        let id = port_id(port)?;
        if let Some(variable) = self.variables.get(&id) {
            return Ok(variable.value);
        }
        let value = function.local_array(port.element_type(), port.size())?;
        self.variables.insert(
            id,
            Variable {
                value,
                size: port.size(),
            },
        );
        Ok(value)
    }

    /// Make `port` an alias of an existing representation.
    pub fn bind_output_variable(
        &mut self,
        port: &dyn OutputPortBase,
        value: Value,
    ) -> Result<(), ModelError> {
        let id = port_id(port)?;
        self.variables.insert(
            id,
            Variable {
                value,
                size: port.size(),
            },
        );
        Ok(())
    }

    /// A pointer to the concatenated values of `elements`.
    ///
    /// A whole port is returned as is; anything else is gathered into a
    /// fresh local array.
    pub fn elements_variable(
        &mut self,
        function: &mut dyn FunctionEmitter,
        elements: &PortElementsBase,
    ) -> Result<Value, ModelError> {
        if let Some(range) = elements.single_range() {
            let variable = self.variable(range.port)?;
            if range.start == 0 && range.len == variable.size {
                return Ok(variable.value);
            }
        }
        let target = function.local_array(elements.element_type(), elements.size())?;
        let mut offset = 0;
        for range in elements.ranges() {
            let source = self.variable(range.port)?.value;
            self.copy_elements(function, source, range.start, target, offset, range.len)?;
            offset += range.len;
        }
        Ok(target)
    }

    fn variable(&self, port: PortId) -> Result<Variable, ModelError> {
        self.variables.get(&port).copied().ok_or_else(|| {
            ModelError::UnresolvedReference(format!(
                "port {port} has no compiled representation"
            ))
        })
    }

    /// `target[target_offset + i] = source[source_offset + i]` for `i < len`.
    pub fn copy_elements(
        &self,
        function: &mut dyn FunctionEmitter,
        source: Value,
        source_offset: usize,
        target: Value,
        target_offset: usize,
        len: usize,
    ) -> Result<(), ModelError> {
        self.for_each_element(function, len, &mut |f, i| {
            let from = offset_index(f, i, source_offset)?;
            let value = f.load(source, from)?;
            let to = offset_index(f, i, target_offset)?;
            f.store(target, to, value)
        })
    }

    /// Run `body` for every index below `size`, expanded or as a loop
    /// according to the settings.
    pub fn for_each_element(
        &self,
        function: &mut dyn FunctionEmitter,
        size: usize,
        body: &mut LoopBody<'_>,
    ) -> Result<(), ModelError> {
        match self.settings.strategy_for(size) {
            CompileStrategy::Expanded => {
                for i in 0..size {
                    let index = function.index(i)?;
                    body(&mut *function, index)?;
                }
            }
            CompileStrategy::Loop => function.for_loop(size, body)?,
        }
        Ok(())
    }

    /// Name of a module-level global owned by the node being compiled.
    pub fn global_name(&self, suffix: &str) -> String {
        match self.current_node {
            Some(id) => format!("{}_{id}_{suffix}", self.settings.namespace),
            None => format!("{}_{suffix}", self.settings.namespace),
        }
    }

    /// A function name not handed out before by this compiler.
    pub fn unique_function_name(&mut self, base: &str) -> String {
        let name = format!("{}_{base}_{}", self.settings.namespace, self.function_count);
        self.function_count += 1;
        name
    }
}

fn offset_index(
    function: &mut dyn FunctionEmitter,
    index: Value,
    offset: usize,
) -> Result<Value, graft_emit::EmitError> {
    if offset == 0 {
        return Ok(index);
    }
    let offset = function.index(offset)?;
    function.binary(BinaryOperationType::Add, index, offset)
}

fn port_id(port: &dyn OutputPortBase) -> Result<PortId, ModelError> {
    port.id().ok_or_else(|| {
        ModelError::UnresolvedReference(format!(
            "output `{}` belongs to a node outside any model",
            port.name()
        ))
    })
}

fn single_output<'a>(node: &'a dyn Node, name: &str) -> Result<&'a dyn OutputPortBase, ModelError> {
    match node.output_ports().as_slice() {
        [port] => Ok(*port),
        _ => Err(ModelError::UnsupportedOperation(format!(
            "map input `{name}` is a {} without exactly one output",
            node.runtime_type_name()
        ))),
    }
}

fn to_int32(value: usize) -> Result<i32, ModelError> {
    i32::try_from(value).map_err(|_| {
        ModelError::UnsupportedOperation(format!("{value} does not fit an int32 accessor"))
    })
}
