//! In-process reference backend.
//!
//! Functions are recorded as structured instruction lists and evaluated by
//! [`ReferenceExecutor`] through the same [`Element`](crate::Element)
//! kernels interpreted nodes use. Its output is therefore the exact
//! expected result for any compiled model, which makes it the default
//! backend for tests and for hosts without LLVM.

mod executor;
mod instruction;
mod module;

pub use executor::{Callback, ReferenceExecutor};
pub use instruction::{FunctionBody, Instruction, Register};
pub use module::{GlobalArray, ReferenceFunction, ReferenceModule};

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::emitter::{FunctionEmitter, ModuleEmitter};
    use crate::error::EmitError;
    use crate::ops::{BinaryOperationType, UnaryOperationType};
    use crate::types::{ElementType, FunctionDeclaration, NamedVariableType, Scalar, VariableType};

    fn ptr(name: &str, ty: ElementType) -> NamedVariableType {
        NamedVariableType::new(name, VariableType::Pointer(ty))
    }

    fn f64s(values: &[f64]) -> Vec<Scalar> {
        values.iter().map(|&v| Scalar::F64(v)).collect()
    }

    /// out[i] = exp(a[i]) + a[i], emitted as a loop.
    fn build_loop_module() -> ReferenceModule {
        let mut module = ReferenceModule::new("test");
        let decl = FunctionDeclaration::new(
            "f",
            vec![ptr("a", ElementType::Double), ptr("out", ElementType::Double)],
        );
        let mut f = module.begin_function(decl).unwrap();
        let a = f.argument(0).unwrap();
        let out = f.argument(1).unwrap();
        f.for_loop(3, &mut |f, i| {
            let x = f.load(a, i)?;
            let e = f.unary(UnaryOperationType::Exp, x)?;
            let y = f.binary(BinaryOperationType::Add, e, x)?;
            f.store(out, i, y)
        })
        .unwrap();
        f.finish().unwrap();
        module
    }

    #[test]
    fn loop_function_executes() {
        let mut exec = ReferenceExecutor::new(build_loop_module());
        let mut args = vec![f64s(&[0.0, 1.0, 2.0]), f64s(&[0.0; 3])];
        exec.call("f", &mut args).unwrap();
        for (i, x) in [0.0f64, 1.0, 2.0].iter().enumerate() {
            assert_eq!(args[1][i], Scalar::F64(x.exp() + x));
        }
        // inputs are handed back unchanged
        assert_eq!(args[0], f64s(&[0.0, 1.0, 2.0]));
    }

    #[test]
    fn emit_time_type_checks() {
        let mut module = ReferenceModule::new("test");
        let decl = FunctionDeclaration::new("g", vec![ptr("a", ElementType::Int32)]);
        let mut f = module.begin_function(decl).unwrap();
        let a = f.argument(0).unwrap();
        let x = f.load_at(a, 0).unwrap();
        let d = f.literal(Scalar::F64(1.0)).unwrap();
        assert!(matches!(
            f.binary(BinaryOperationType::Add, x, d),
            Err(EmitError::TypeMismatch { .. })
        ));
        assert!(matches!(
            f.unary(UnaryOperationType::Sqrt, x),
            Err(EmitError::TypeMismatch { .. })
        ));
        assert!(matches!(f.store_at(a, 0, d), Err(EmitError::TypeMismatch { .. })));
        assert!(matches!(f.call("nope", &[]), Err(EmitError::UnknownFunction(_))));
    }

    #[test]
    fn globals_persist_and_reset() {
        let mut module = ReferenceModule::new("test");
        let decl = FunctionDeclaration::new("count", vec![ptr("out", ElementType::Int64)]);
        let mut f = module.begin_function(decl).unwrap();
        let out = f.argument(0).unwrap();
        let g = f.global_array("counter", ElementType::Int64, &[Scalar::I64(0)]).unwrap();
        let v = f.load_at(g, 0).unwrap();
        let one = f.literal(Scalar::I64(1)).unwrap();
        let next = f.binary(BinaryOperationType::Add, v, one).unwrap();
        f.store_at(g, 0, next).unwrap();
        f.store_at(out, 0, next).unwrap();
        f.finish().unwrap();

        let mut exec = ReferenceExecutor::new(module);
        let mut args = vec![vec![Scalar::I64(0)]];
        exec.call("count", &mut args).unwrap();
        exec.call("count", &mut args).unwrap();
        assert_eq!(args[0][0], Scalar::I64(2));
        exec.reset();
        exec.call("count", &mut args).unwrap();
        assert_eq!(args[0][0], Scalar::I64(1));
        assert_eq!(exec.global("counter"), Some(&[Scalar::I64(1)][..]));
    }

    #[test]
    fn external_calls_reach_callbacks() {
        let mut module = ReferenceModule::new("test");
        let cb = FunctionDeclaration::new("on_value", vec![ptr("values", ElementType::Float)]);
        module.declare_external(cb.clone()).unwrap();
        // identical redeclaration is allowed
        module.declare_external(cb).unwrap();

        let decl = FunctionDeclaration::new("run", vec![ptr("x", ElementType::Float)]);
        let mut f = module.begin_function(decl).unwrap();
        let x = f.argument(0).unwrap();
        f.call("on_value", &[x]).unwrap();
        f.finish().unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut exec = ReferenceExecutor::new(module);
        exec.register_callback(
            "on_value",
            Box::new(move |args| sink.borrow_mut().extend_from_slice(&args[0])),
        )
        .unwrap();
        let mut args = vec![vec![Scalar::F32(1.5), Scalar::F32(2.5)]];
        exec.call("run", &mut args).unwrap();
        assert_eq!(*seen.borrow(), vec![Scalar::F32(1.5), Scalar::F32(2.5)]);
    }

    #[test]
    fn missing_callback_is_an_execution_error() {
        let mut module = ReferenceModule::new("test");
        module
            .declare_external(FunctionDeclaration::new("cb", vec![]))
            .unwrap();
        let mut f = module
            .begin_function(FunctionDeclaration::new("run", vec![]))
            .unwrap();
        f.call("cb", &[]).unwrap();
        f.finish().unwrap();
        let mut exec = ReferenceExecutor::new(module);
        assert!(matches!(
            exec.call("run", &mut []),
            Err(EmitError::Execution { .. })
        ));
    }

    #[test]
    fn precompiled_code_links_into_another_module() {
        let source = build_loop_module();
        let code = source.function_code("f").unwrap();
        let decl = source.function_declaration("f").unwrap().clone();

        let mut target = ReferenceModule::new("other");
        target.link_precompiled(&decl, &code).unwrap();
        // linking identical code twice is a no-op
        target.link_precompiled(&decl, &code).unwrap();

        let wrong = FunctionDeclaration::new("f", vec![ptr("a", ElementType::Double)]);
        assert!(matches!(
            ReferenceModule::new("x").link_precompiled(&wrong, &code),
            Err(EmitError::SignatureMismatch { .. })
        ));
        assert!(matches!(
            ReferenceModule::new("x").link_precompiled(&decl, "not json"),
            Err(EmitError::InvalidPrecompiledCode { .. })
        ));

        let mut exec = ReferenceExecutor::new(target);
        let mut args = vec![f64s(&[1.0, 1.0, 1.0]), f64s(&[0.0; 3])];
        exec.call("f", &mut args).unwrap();
        assert_eq!(args[1][2], Scalar::F64(1f64.exp() + 1.0));
    }

    #[test]
    fn duplicate_definition_is_rejected() {
        let mut module = build_loop_module();
        let decl = module.function_declaration("f").unwrap().clone();
        assert!(matches!(
            module.begin_function(decl),
            Err(EmitError::DuplicateFunction(_))
        ));
    }

    #[test]
    fn out_of_bounds_access_fails() {
        let mut module = ReferenceModule::new("test");
        let decl = FunctionDeclaration::new("f", vec![ptr("a", ElementType::Double)]);
        let mut f = module.begin_function(decl).unwrap();
        let a = f.argument(0).unwrap();
        let v = f.load_at(a, 5).unwrap();
        f.store_at(a, 0, v).unwrap();
        f.finish().unwrap();
        let mut exec = ReferenceExecutor::new(module);
        let mut args = vec![f64s(&[1.0])];
        assert!(matches!(
            exec.call("f", &mut args),
            Err(EmitError::IndexOutOfBounds { index: 5, size: 1 })
        ));
        // the argument buffer is returned even on failure
        assert_eq!(args[0].len(), 1);
    }

    #[test]
    fn listing_shows_loops_and_globals() {
        let module = build_loop_module();
        let text = module.to_string();
        assert!(text.contains("module test"));
        assert!(text.contains("for %"));
        assert!(text.contains("exp %"));
    }
}
