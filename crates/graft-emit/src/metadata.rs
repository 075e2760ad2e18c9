//! Function and module tags.
//!
//! Tags are string key/value pairs attached while compiling. External
//! tooling reads them to find entry points: which function predicts, which
//! steps a stream and how often, which are callbacks the host must supply,
//! and what a public header has to declare. Tags are multi-valued and a
//! function may carry the same tag more than once.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::emitter::ModuleEmitter;

/// Marks a function the host implements and generated code calls.
pub const CALLBACK_FUNCTION_TAG: &str = "graft.fn.callback";
/// Marks the primary inference entry point.
pub const PREDICT_FUNCTION_TAG: &str = "graft.fn.predict";
/// Marks a streaming step function; the value is its output count.
pub const STEP_FUNCTION_TAG: &str = "graft.fn.step";
/// Names the companion function reporting a step function's interval.
pub const STEP_TIME_FUNCTION_TAG: &str = "graft.fn.stepTime";
/// On a function: declare it in the public header. At module level: the
/// value is a type name the header must declare.
pub const DECLARE_IN_HEADER_TAG: &str = "graft.header.declare";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    functions: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    module: BTreeMap<String, Vec<String>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_function_tag(&mut self, function: &str, tag: &str, value: &str) {
        self.functions
            .entry(function.to_string())
            .or_default()
            .entry(tag.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn insert_module_tag(&mut self, tag: &str, value: &str) {
        self.module
            .entry(tag.to_string())
            .or_default()
            .push(value.to_string());
    }

    /// Values recorded for `tag` on `function`, in insertion order.
    pub fn function_tag(&self, function: &str, tag: &str) -> &[String] {
        self.functions
            .get(function)
            .and_then(|tags| tags.get(tag))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn module_tag(&self, tag: &str) -> &[String] {
        self.module.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every `(function, values)` pair carrying `tag`, ordered by function name.
    pub fn functions_with_tag(&self, tag: &str) -> Vec<FunctionTagValues> {
        self.functions
            .iter()
            .filter_map(|(function, tags)| {
                tags.get(tag).map(|values| FunctionTagValues {
                    function: function.clone(),
                    values: values.clone(),
                })
            })
            .collect()
    }

    pub fn module_tag_values(&self, tag: &str) -> BTreeSet<String> {
        self.module_tag(tag).iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.module.is_empty()
    }
}

/// One function carrying a queried tag, with the tag's values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionTagValues {
    pub function: String,
    pub values: Vec<String>,
}

/// All functions in `module` tagged with `tag`. Empty if none are.
pub fn functions_with_tag(module: &dyn ModuleEmitter, tag: &str) -> Vec<FunctionTagValues> {
    module.metadata().functions_with_tag(tag)
}

/// Distinct values recorded under module-level `tag`.
pub fn module_tag_values(module: &dyn ModuleEmitter, tag: &str) -> BTreeSet<String> {
    module.metadata().module_tag_values(tag)
}
