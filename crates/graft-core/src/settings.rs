//! Compiler settings.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// How elementwise nodes lay out their generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementwiseStrategy {
    /// Expanded up to `unroll_threshold` elements, a loop beyond.
    #[default]
    Auto,
    /// One scalar instruction sequence per element, no branches.
    Expanded,
    /// One counted loop over all elements.
    Loop,
}

/// How hard a native backend optimizes emitted code. The reference
/// backend interprets instructions as recorded and ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeOptimization {
    /// Keep code as emitted, for inspecting IR.
    None,
    /// Cheap passes only, for small code.
    Size,
    #[default]
    Speed,
    /// Everything, for long-running streaming maps.
    Aggressive,
}

#[cfg(feature = "llvm")]
impl From<NativeOptimization> for inkwell::OptimizationLevel {
    fn from(level: NativeOptimization) -> Self {
        match level {
            NativeOptimization::None => inkwell::OptimizationLevel::None,
            NativeOptimization::Size => inkwell::OptimizationLevel::Less,
            NativeOptimization::Speed => inkwell::OptimizationLevel::Default,
            NativeOptimization::Aggressive => inkwell::OptimizationLevel::Aggressive,
        }
    }
}

/// The strategy chosen for a particular size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStrategy {
    Expanded,
    Loop,
}

/// Options for [`MapCompiler`](crate::compiler::MapCompiler).
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// namespace = "sensor"
/// unroll_threshold = 16
/// step_interval_ms = 10.0
/// native_optimization = "aggressive"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Prefix of every emitted function and global.
    pub namespace: String,
    /// Name of the predict function; `{namespace}_Predict` when unset.
    pub predict_function_name: Option<String>,
    /// Largest size compiled expanded under [`ElementwiseStrategy::Auto`].
    pub unroll_threshold: usize,
    pub elementwise_strategy: ElementwiseStrategy,
    /// When set, also emit a step function and its interval accessor.
    pub step_interval_ms: Option<f64>,
    /// Upper bound on refinement passes before compiling.
    pub max_refine_iterations: usize,
    /// Passed to native backends when writing object code.
    pub native_optimization: NativeOptimization,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            namespace: "model".into(),
            predict_function_name: None,
            unroll_threshold: 8,
            elementwise_strategy: ElementwiseStrategy::Auto,
            step_interval_ms: None,
            max_refine_iterations: 10,
            native_optimization: NativeOptimization::Speed,
        }
    }
}

impl CompilerSettings {
    pub fn from_toml_str(text: &str) -> Result<Self, ModelError> {
        Ok(toml::from_str(text)?)
    }

    pub fn predict_function_name(&self) -> String {
        self.predict_function_name
            .clone()
            .unwrap_or_else(|| format!("{}_Predict", self.namespace))
    }

    pub fn strategy_for(&self, size: usize) -> CompileStrategy {
        match self.elementwise_strategy {
            ElementwiseStrategy::Expanded => CompileStrategy::Expanded,
            ElementwiseStrategy::Loop => CompileStrategy::Loop,
            ElementwiseStrategy::Auto if size <= self.unroll_threshold => {
                CompileStrategy::Expanded
            }
            ElementwiseStrategy::Auto => CompileStrategy::Loop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = CompilerSettings::default();
        assert_eq!(s.predict_function_name(), "model_Predict");
        assert_eq!(s.strategy_for(8), CompileStrategy::Expanded);
        assert_eq!(s.strategy_for(9), CompileStrategy::Loop);
    }

    #[test]
    fn partial_toml() {
        let s = CompilerSettings::from_toml_str(
            r#"
            namespace = "sensor"
            elementwise_strategy = "loop"
            step_interval_ms = 10.0
            "#,
        )
        .unwrap();
        assert_eq!(s.namespace, "sensor");
        assert_eq!(s.unroll_threshold, 8);
        assert_eq!(s.strategy_for(1), CompileStrategy::Loop);
        assert_eq!(s.step_interval_ms, Some(10.0));
        assert_eq!(s.predict_function_name(), "sensor_Predict");
        assert_eq!(s.native_optimization, NativeOptimization::Speed);
    }

    #[test]
    fn native_optimization_from_toml() {
        let s = CompilerSettings::from_toml_str("native_optimization = \"size\"").unwrap();
        assert_eq!(s.native_optimization, NativeOptimization::Size);
        assert!(CompilerSettings::from_toml_str("native_optimization = \"max\"").is_err());
    }

    #[cfg(feature = "llvm")]
    #[test]
    fn native_optimization_maps_to_llvm_levels() {
        use inkwell::OptimizationLevel;
        assert_eq!(OptimizationLevel::from(NativeOptimization::None), OptimizationLevel::None);
        assert_eq!(OptimizationLevel::from(NativeOptimization::Size), OptimizationLevel::Less);
        assert_eq!(
            OptimizationLevel::from(CompilerSettings::default().native_optimization),
            OptimizationLevel::Default
        );
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err = CompilerSettings::from_toml_str("unroll_threshold = \"many\"").unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));
    }
}
