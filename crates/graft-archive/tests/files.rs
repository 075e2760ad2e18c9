use graft_archive::{FileError, FileFlags, ModelFile};
use graft_core::{CompilerSettings, InputNode, Map, Model, NodeRegistry};
use graft_emit::BinaryOperationType;
use graft_nodes::{node_registry, BinaryOperationNode, ConstantNode, IrNode, MovingVarianceNode};

fn streaming_map() -> Map {
    let mut model = Model::new();
    let input = model.add_node(InputNode::<f64>::new(2)).unwrap().output().elements();
    let offset = model
        .add_node(ConstantNode::new(vec![1.0, -1.0]))
        .unwrap()
        .output()
        .elements();
    let shifted = model
        .add_node(BinaryOperationNode::new(input, offset, BinaryOperationType::Add).unwrap())
        .unwrap()
        .output()
        .elements();
    let variance = model
        .add_node(MovingVarianceNode::new(shifted, 3).unwrap())
        .unwrap()
        .output()
        .elements();
    Map::with_inputs(model, vec![("variance".into(), variance.into_base())]).unwrap()
}

#[test]
fn saved_maps_load_and_compute() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("streaming.grf");
    let map = streaming_map();
    let file = ModelFile::new(&map).unwrap();
    assert!(file.flags.has(FileFlags::HAS_STATE));
    assert!(!file.flags.has(FileFlags::HAS_PRECOMPILED_IR));
    file.save(&path).unwrap();

    let loaded = ModelFile::load(&path).unwrap();
    assert_eq!(loaded.flags, file.flags);
    let restored = loaded.into_map(&node_registry()).unwrap();
    assert_eq!(restored.node_kinds(), map.node_kinds());

    let mut compiled = restored.compile(&CompilerSettings::default()).unwrap();
    for step in 0..5 {
        let input = vec![step as f64, (step * step) as f64];
        let expected: Vec<f64> = map.compute_single(input.clone()).unwrap();
        let interpreted: Vec<f64> = restored.compute_single(input.clone()).unwrap();
        let generated: Vec<f64> = compiled.compute_single(input).unwrap();
        assert_eq!(expected, interpreted, "step {step}");
        assert_eq!(expected, generated, "step {step}");
    }
}

#[test]
fn library_nodes_need_the_library_registry() {
    let bytes = ModelFile::new(&streaming_map()).unwrap().to_bytes().unwrap();
    let file = ModelFile::from_bytes(&bytes).unwrap();
    let err = file.into_map(&NodeRegistry::with_core_nodes()).unwrap_err();
    assert!(matches!(err, FileError::Model(_)));
    assert!(file.into_map(&node_registry()).is_ok());
}

#[test]
fn precompiled_code_is_flagged() {
    let mut model = Model::new();
    let input = model.add_node(InputNode::<f64>::new(1)).unwrap().output().elements();
    let out = model
        .add_node(IrNode::new(vec![input], &[1], "external", "{}"))
        .unwrap()
        .output(0)
        .unwrap()
        .elements();
    let map = Map::with_inputs(model, vec![("out".into(), out.into_base())]).unwrap();
    let file = ModelFile::new(&map).unwrap();
    assert!(file.flags.has(FileFlags::HAS_PRECOMPILED_IR));
    assert!(!file.flags.has(FileFlags::HAS_STATE));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ModelFile::load(dir.path().join("absent.grf")).unwrap_err();
    assert!(matches!(err, FileError::Io(_)));
}
