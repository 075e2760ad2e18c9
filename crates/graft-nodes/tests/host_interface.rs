//! Precompiled code, host callbacks, metadata queries and archives.

use std::cell::RefCell;
use std::rc::Rc;

use graft_core::{
    CompilerSettings, ErrorKind, InputNode, Map, MapArchive, Model, ModelError, PortElements,
};
use graft_emit::reference::ReferenceModule;
use graft_emit::{
    functions_with_tag, module_tag_values, BinaryOperationType, ElementType,
    FunctionDeclaration, ModuleEmitter, NamedVariableType, Scalar, UnaryOperationType,
    VariableType, CALLBACK_FUNCTION_TAG, DECLARE_IN_HEADER_TAG, PREDICT_FUNCTION_TAG,
};
use graft_nodes::{
    node_registry, AccumulatorNode, BinaryOperationNode, ConstantNode, DelayNode,
    DotProductNode, IrNode, L2NormNode, MovingVarianceNode, SinkNode, StateParameter, SumNode,
    TypeCastNode, UnaryOperationNode,
};

const SIZE: usize = 3;

/// Reference-backend code for `out[i] = in[i] * 2; calls[0] += 1`.
fn doubling_code() -> String {
    let pointer = |name: &str, ty| NamedVariableType::new(name, VariableType::Pointer(ty));
    let declaration = FunctionDeclaration::new(
        "double_and_count",
        vec![
            pointer("input0", ElementType::Double),
            pointer("output0", ElementType::Double),
            pointer("calls", ElementType::Int64),
        ],
    );
    let mut module = ReferenceModule::new("library");
    let mut function = module.begin_function(declaration).unwrap();
    let input = function.argument(0).unwrap();
    let output = function.argument(1).unwrap();
    let calls = function.argument(2).unwrap();
    let two = function.literal(Scalar::F64(2.0)).unwrap();
    function
        .for_loop(SIZE, &mut |f, i| {
            let x = f.load(input, i)?;
            let y = f.binary(BinaryOperationType::Multiply, x, two)?;
            f.store(output, i, y)
        })
        .unwrap();
    let count = function.load_at(calls, 0).unwrap();
    let one = function.literal(Scalar::I64(1)).unwrap();
    let next = function.binary(BinaryOperationType::Add, count, one).unwrap();
    function.store_at(calls, 0, next).unwrap();
    function.finish().unwrap();
    module.function_code("double_and_count").unwrap()
}

fn ir_map(with_reference: bool) -> Map {
    let mut model = Model::new();
    let input = model.add_node(InputNode::<f64>::new(SIZE)).unwrap().output().elements();
    let mut node = IrNode::new(vec![input], &[SIZE], "double_and_count", doubling_code())
        .with_state(vec![StateParameter::zeroed("calls", ElementType::Int64, 1)]);
    if with_reference {
        node = node.with_reference(Rc::new(
            |inputs: &[Vec<f64>]| -> Result<Vec<Vec<f64>>, ModelError> {
                Ok(vec![inputs[0].iter().map(|x| x * 2.0).collect()])
            },
        ));
    }
    let out = model.add_node(node).unwrap().output(0).unwrap().elements();
    Map::with_inputs(model, vec![("doubled".into(), out.into_base())]).unwrap()
}

#[test]
fn precompiled_code_is_linked_and_keeps_state() {
    let map = ir_map(true);
    let mut compiled = map.compile(&CompilerSettings::default()).unwrap();
    let calls = compiled
        .module()
        .globals()
        .keys()
        .find(|name| name.ends_with("_calls"))
        .cloned()
        .unwrap();

    for round in 1..=3i64 {
        let input = vec![1.5, -2.0, round as f64];
        let interpreted: Vec<f64> = map.compute_single(input.clone()).unwrap();
        let generated: Vec<f64> = compiled.compute_single(input).unwrap();
        assert_eq!(interpreted, generated);
        assert_eq!(
            compiled.executor_mut().global(&calls).unwrap(),
            &[Scalar::I64(round)]
        );
    }
    compiled.reset();
    assert_eq!(compiled.executor_mut().global(&calls).unwrap(), &[Scalar::I64(0)]);
}

#[test]
fn precompiled_code_without_reference_only_compiles() {
    let map = ir_map(false);
    let err = map.compute_single::<f64, f64>(vec![1.0; SIZE]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);

    let mut compiled = map.compile(&CompilerSettings::default()).unwrap();
    let out: Vec<f64> = compiled.compute_single(vec![1.0, 2.0, 3.0]).unwrap();
    assert_eq!(out, vec![2.0, 4.0, 6.0]);
}

#[test]
fn mismatched_precompiled_signature_is_rejected() {
    let mut model = Model::new();
    let input = model.add_node(InputNode::<f64>::new(SIZE)).unwrap().output().elements();
    // No state parameter, so the declaration differs from the code's.
    let out = model
        .add_node(IrNode::new(vec![input], &[SIZE], "double_and_count", doubling_code()))
        .unwrap()
        .output(0)
        .unwrap()
        .elements();
    let map = Map::with_inputs(model, vec![("doubled".into(), out.into_base())]).unwrap();
    let err = map.compile(&CompilerSettings::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}

fn sink_map(seen: Rc<RefCell<Vec<Vec<f64>>>>) -> Map {
    let mut model = Model::new();
    let input = model.add_node(InputNode::<f64>::new(2)).unwrap().output().elements();
    let squared = model
        .add_node(UnaryOperationNode::new(input, UnaryOperationType::Square).unwrap())
        .unwrap()
        .output()
        .elements();
    let sink = SinkNode::new(squared, "on_squares")
        .with_callback(Rc::new(move |values: &[f64]| seen.borrow_mut().push(values.to_vec())));
    let out = model.add_node(sink).unwrap().output().elements();
    Map::with_inputs(model, vec![("squares".into(), out.into_base())]).unwrap()
}

#[test]
fn sink_invokes_the_host_in_both_modes() {
    let interpreted_seen = Rc::new(RefCell::new(Vec::new()));
    let map = sink_map(interpreted_seen.clone());
    let out: Vec<f64> = map.compute_single(vec![3.0, -4.0]).unwrap();
    assert_eq!(out, vec![9.0, 16.0]);
    assert_eq!(*interpreted_seen.borrow(), vec![vec![9.0, 16.0]]);

    let compiled_seen = Rc::new(RefCell::new(Vec::new()));
    let mut compiled = map.compile(&CompilerSettings::default()).unwrap();
    let sink = compiled_seen.clone();
    compiled
        .register_callback(
            "on_squares",
            Box::new(move |arguments: &[Vec<Scalar>]| sink.borrow_mut().push(arguments[0].clone())),
        )
        .unwrap();
    let out: Vec<f64> = compiled.compute_single(vec![3.0, -4.0]).unwrap();
    assert_eq!(out, vec![9.0, 16.0]);
    assert_eq!(
        *compiled_seen.borrow(),
        vec![vec![Scalar::F64(9.0), Scalar::F64(16.0)]]
    );
}

#[test]
fn sink_is_tagged_for_the_host() {
    let map = sink_map(Rc::new(RefCell::new(Vec::new())));
    let compiled = map.compile(&CompilerSettings::default()).unwrap();
    let module = compiled.module();

    let callbacks = functions_with_tag(module, CALLBACK_FUNCTION_TAG);
    assert_eq!(callbacks.len(), 1);
    assert_eq!(callbacks[0].function, "on_squares");
    let predict = functions_with_tag(module, PREDICT_FUNCTION_TAG);
    assert_eq!(predict[0].function, "model_Predict");

    let header = compiled.header();
    assert!(header.contains("void on_squares(double* input);"));
    assert!(header.contains("model_Predict"));
}

#[test]
fn unknown_tags_query_empty() {
    let map = sink_map(Rc::new(RefCell::new(Vec::new())));
    let compiled = map.compile(&CompilerSettings::default()).unwrap();
    assert!(functions_with_tag(compiled.module(), "graft.fn.unused").is_empty());
    assert!(module_tag_values(compiled.module(), DECLARE_IN_HEADER_TAG).is_empty());
    assert!(compiled.module().has_function("on_squares"));
}

/// One of every interpretable library kind.
fn library_map() -> Map {
    let mut model = Model::new();
    let input = model.add_node(InputNode::<f64>::new(4)).unwrap().output().elements();
    let weights = model
        .add_node(ConstantNode::new(vec![0.5, -1.0, 2.0, 0.25]))
        .unwrap()
        .output()
        .elements();
    let shifted = model
        .add_node(
            BinaryOperationNode::new(input.clone(), weights.clone(), BinaryOperationType::Add)
                .unwrap(),
        )
        .unwrap()
        .output()
        .elements();
    let dot = model
        .add_node(DotProductNode::new(shifted.clone(), weights).unwrap())
        .unwrap()
        .output()
        .elements();
    let total = model
        .add_node(SumNode::new(input.slice(1, 3).unwrap()).unwrap())
        .unwrap()
        .output()
        .elements();
    let variance = model
        .add_node(MovingVarianceNode::new(shifted, 2).unwrap())
        .unwrap()
        .output()
        .elements();
    let rounded = model
        .add_node(TypeCastNode::<f64, i32>::new(variance.clone()))
        .unwrap()
        .output()
        .elements();
    let back = model
        .add_node(TypeCastNode::<i32, f64>::new(rounded))
        .unwrap()
        .output()
        .elements();
    let passed = model
        .add_node(SinkNode::new(back, "on_rounded"))
        .unwrap()
        .output()
        .elements();
    let delayed = model
        .add_node(DelayNode::new(input.slice(0, 2).unwrap(), 2).unwrap())
        .unwrap()
        .output()
        .elements();
    let running = model
        .add_node(AccumulatorNode::new(delayed).unwrap())
        .unwrap()
        .output()
        .elements();
    let norm = model
        .add_node(L2NormNode::new(running).unwrap())
        .unwrap()
        .output()
        .elements();
    let out = PortElements::concat(&[dot, total, variance, passed, norm]);
    Map::with_inputs(model, vec![("out".into(), out.into_base())]).unwrap()
}

#[test]
fn archived_maps_restore_with_the_library_registry() {
    let map = library_map();
    let json = serde_json::to_string(&map.to_archive().unwrap()).unwrap();
    let archive: MapArchive = serde_json::from_str(&json).unwrap();
    let restored = Map::from_archive(&archive, &node_registry()).unwrap();
    assert_eq!(restored.node_kinds(), map.node_kinds());
    assert_eq!(restored.model().to_string(), map.model().to_string());

    for step in 0..5 {
        let input = vec![step as f64, 1.0, -2.5, 4.0];
        let expected: Vec<f64> = map.compute_single(input.clone()).unwrap();
        let actual: Vec<f64> = restored.compute_single(input).unwrap();
        assert_eq!(expected, actual, "step {step}");
    }
}

#[test]
fn archived_ir_nodes_keep_code_and_state() {
    let map = ir_map(true);
    let archive = map.to_archive().unwrap();
    let restored = Map::from_archive(&archive, &node_registry()).unwrap();

    // The reference implementation is not archived.
    let err = restored.compute_single::<f64, f64>(vec![0.0; SIZE]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);

    let mut compiled = restored.compile(&CompilerSettings::default()).unwrap();
    let out: Vec<f64> = compiled.compute_single(vec![0.5, 1.0, 1.5]).unwrap();
    assert_eq!(out, vec![1.0, 2.0, 3.0]);
}
