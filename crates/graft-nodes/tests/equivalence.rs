//! Interpreted, copied and compiled execution agree on generated graphs.

use graft_core::{
    CompileStrategy, CompiledMap, CompilerSettings, ElementwiseStrategy, InputNode, Map, Model,
    PortElements,
};
use graft_emit::{BinaryOperationType, UnaryOperationType};
use graft_nodes::{
    AccumulatorNode, BinaryOperationNode, ConstantNode, DelayNode, DotProductNode, L2NormNode,
    MovingVarianceNode, SumNode, TypeCastNode, UnaryOperationNode,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const BINARY: [BinaryOperationType; 3] = [
    BinaryOperationType::Add,
    BinaryOperationType::Subtract,
    BinaryOperationType::Multiply,
];

const UNARY: [UnaryOperationType; 5] = [
    UnaryOperationType::Abs,
    UnaryOperationType::Square,
    UnaryOperationType::Sin,
    UnaryOperationType::Cos,
    UnaryOperationType::Tanh,
];

/// Exactly `size` elements gathered from random slices of random outputs.
fn pick(rng: &mut StdRng, pool: &[PortElements<f64>], size: usize) -> PortElements<f64> {
    let mut parts = Vec::new();
    let mut remaining = size;
    while remaining > 0 {
        let source = &pool[rng.gen_range(0..pool.len())];
        let start = rng.gen_range(0..source.size());
        let len = remaining.min(source.size() - start);
        parts.push(source.slice(start, len).unwrap());
        remaining -= len;
    }
    PortElements::concat(&parts)
}

fn random_values(rng: &mut StdRng, size: usize) -> Vec<f64> {
    (0..size).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// A random DAG of `node_count` nodes with one output gathered from
/// several of them.
fn random_map(rng: &mut StdRng, node_count: usize) -> Map {
    let mut model = Model::new();
    let mut pool: Vec<PortElements<f64>> = Vec::new();

    let input_count = node_count.min(rng.gen_range(1..=3));
    for _ in 0..input_count {
        let size = rng.gen_range(1..=6);
        let node = InputNode::with_values(random_values(rng, size));
        pool.push(model.add_node(node).unwrap().output().elements());
    }

    for _ in input_count..node_count {
        let size = rng.gen_range(1..=6);
        let elements = match rng.gen_range(0..9) {
            0 => {
                let op = BINARY[rng.gen_range(0..BINARY.len())];
                let a = pick(rng, &pool, size);
                let b = pick(rng, &pool, size);
                let node = BinaryOperationNode::new(a, b, op).unwrap();
                model.add_node(node).unwrap().output().elements()
            }
            1 => {
                let op = UNARY[rng.gen_range(0..UNARY.len())];
                let node = UnaryOperationNode::new(pick(rng, &pool, size), op).unwrap();
                model.add_node(node).unwrap().output().elements()
            }
            2 => {
                let node = ConstantNode::new(random_values(rng, size));
                model.add_node(node).unwrap().output().elements()
            }
            3 => {
                let node = SumNode::new(pick(rng, &pool, size)).unwrap();
                model.add_node(node).unwrap().output().elements()
            }
            4 => {
                let a = pick(rng, &pool, size);
                let b = pick(rng, &pool, size);
                let node = DotProductNode::new(a, b).unwrap();
                model.add_node(node).unwrap().output().elements()
            }
            5 => {
                let window = rng.gen_range(1..=4);
                let node = MovingVarianceNode::new(pick(rng, &pool, size), window).unwrap();
                model.add_node(node).unwrap().output().elements()
            }
            6 => {
                let window = rng.gen_range(1..=4);
                let node = DelayNode::new(pick(rng, &pool, size), window).unwrap();
                model.add_node(node).unwrap().output().elements()
            }
            7 => {
                let node = AccumulatorNode::new(pick(rng, &pool, size)).unwrap();
                model.add_node(node).unwrap().output().elements()
            }
            _ => {
                let node = L2NormNode::new(pick(rng, &pool, size)).unwrap();
                model.add_node(node).unwrap().output().elements()
            }
        };
        pool.push(elements);
    }

    let mut outputs = vec![pool[pool.len() - 1].clone()];
    for _ in 0..rng.gen_range(0..3) {
        outputs.push(pool[rng.gen_range(0..pool.len())].clone());
    }
    let output = PortElements::concat(&outputs);
    Map::with_inputs(model, vec![("output".into(), output.into_base())]).unwrap()
}

fn bits(values: &[f64]) -> Vec<u64> {
    values.iter().map(|v| v.to_bits()).collect()
}

/// Copy the interpreted input values into the compiled buffers.
fn feed_compiled(map: &Map, compiled: &mut CompiledMap) {
    for (index, (_, id)) in map.inputs().iter().enumerate() {
        let node = map.model().node_as::<InputNode<f64>>(*id).unwrap();
        compiled.set_input(index, node.output().output().unwrap()).unwrap();
    }
}

#[test]
fn copies_compute_identically() {
    let mut rng = StdRng::seed_from_u64(0x6772_6166);
    for round in 0..40 {
        let node_count = rng.gen_range(1..=100);
        let map = random_map(&mut rng, node_count);
        let copy = map.copy().unwrap();
        assert_eq!(copy.model().len(), map.model().len());

        map.compute().unwrap();
        copy.compute().unwrap();
        let original: Vec<f64> = map.output(0).unwrap();
        let copied: Vec<f64> = copy.output(0).unwrap();
        assert_eq!(bits(&original), bits(&copied), "round {round}, {node_count} nodes");
    }
}

#[test]
fn compiled_maps_match_interpretation() {
    let mut rng = StdRng::seed_from_u64(7);
    let settings = CompilerSettings::default();
    for round in 0..40 {
        let node_count = rng.gen_range(1..=100);
        let map = random_map(&mut rng, node_count);
        let mut compiled = map.compile(&settings).unwrap();

        // Every input node, including ones the output does not read.
        map.model().compute().unwrap();
        feed_compiled(&map, &mut compiled);
        compiled.compute().unwrap();

        let interpreted: Vec<f64> = map.output(0).unwrap();
        let generated: Vec<f64> = compiled.output(0).unwrap();
        assert_eq!(bits(&interpreted), bits(&generated), "round {round}, {node_count} nodes");
    }
}

/// input -> tanh -> multiply by a reversed copy of itself, then the
/// products and their sum through an identity cast.
fn strategy_map(size: usize) -> Map {
    let mut model = Model::new();
    let input = model.add_node(InputNode::<f64>::new(size)).unwrap().output().elements();
    let squashed = model
        .add_node(UnaryOperationNode::new(input, UnaryOperationType::Tanh).unwrap())
        .unwrap()
        .output()
        .elements();
    let reversed = PortElements::concat(
        &(0..size)
            .rev()
            .map(|i| squashed.slice(i, 1).unwrap())
            .collect::<Vec<_>>(),
    );
    let product = model
        .add_node(
            BinaryOperationNode::new(squashed, reversed, BinaryOperationType::Multiply).unwrap(),
        )
        .unwrap()
        .output()
        .elements();
    let total = model
        .add_node(SumNode::new(product.clone()).unwrap())
        .unwrap()
        .output()
        .elements();
    let joined = model
        .add_node(TypeCastNode::<f64, f64>::new(PortElements::concat(&[product, total])))
        .unwrap()
        .output()
        .elements();
    Map::with_inputs(model, vec![("output".into(), joined.into_base())]).unwrap()
}

#[test]
fn expanded_and_loop_strategies_agree() {
    for size in [1usize, 8, 1000] {
        let map = strategy_map(size);
        let input: Vec<f64> = (0..size).map(|i| (i as f64 * 0.37).sin() * 3.0).collect();
        let interpreted: Vec<f64> = map.compute_single(input.clone()).unwrap();

        for strategy in [
            ElementwiseStrategy::Expanded,
            ElementwiseStrategy::Loop,
            ElementwiseStrategy::Auto,
        ] {
            let settings = CompilerSettings {
                elementwise_strategy: strategy,
                ..CompilerSettings::default()
            };
            let mut compiled = map.compile(&settings).unwrap();
            let generated: Vec<f64> = compiled.compute_single(input.clone()).unwrap();
            assert_eq!(
                bits(&interpreted),
                bits(&generated),
                "size {size}, {strategy:?}"
            );
        }
    }
}

/// Moving variance, delay and running sum over one wide input.
fn windowed_map(size: usize) -> Map {
    let mut model = Model::new();
    let input = model.add_node(InputNode::<f64>::new(size)).unwrap().output().elements();
    let variance = model
        .add_node(MovingVarianceNode::new(input.clone(), 3).unwrap())
        .unwrap()
        .output()
        .elements();
    let delayed = model
        .add_node(DelayNode::new(input.clone(), 2).unwrap())
        .unwrap()
        .output()
        .elements();
    let running = model
        .add_node(AccumulatorNode::new(input).unwrap())
        .unwrap()
        .output()
        .elements();
    let out = PortElements::concat(&[variance, delayed, running]);
    Map::with_inputs(model, vec![("out".into(), out.into_base())]).unwrap()
}

#[test]
fn stateful_loops_match_interpretation_across_steps() {
    const SIZE: usize = 20;
    let map = windowed_map(SIZE);
    assert_eq!(
        CompilerSettings::default().strategy_for(SIZE),
        CompileStrategy::Loop
    );

    for strategy in [ElementwiseStrategy::Auto, ElementwiseStrategy::Loop] {
        let settings = CompilerSettings {
            elementwise_strategy: strategy,
            ..CompilerSettings::default()
        };
        map.reset();
        let mut compiled = map.compile(&settings).unwrap();
        // Ten steps wrap the three-sample window three times.
        for step in 0..10 {
            let input: Vec<f64> = (0..SIZE)
                .map(|i| ((step * SIZE + i) as f64 * 0.61).sin() * 4.0)
                .collect();
            map.set_input(0, input.clone()).unwrap();
            map.model().compute().unwrap();
            compiled.set_input(0, input).unwrap();
            compiled.compute().unwrap();

            let interpreted: Vec<f64> = map.output(0).unwrap();
            let generated: Vec<f64> = compiled.output(0).unwrap();
            assert_eq!(interpreted.len(), 3 * SIZE);
            assert_eq!(bits(&interpreted), bits(&generated), "{strategy:?}, step {step}");
        }
    }
}

#[test]
fn integer_division_by_zero_agrees() {
    let mut model = Model::new();
    let a = model.add_node(InputNode::<i32>::new(4)).unwrap().output().elements();
    let b = model
        .add_node(ConstantNode::new(vec![0, -1, 3, 0]))
        .unwrap()
        .output()
        .elements();
    let quotient = model
        .add_node(BinaryOperationNode::new(a.clone(), b.clone(), BinaryOperationType::Divide).unwrap())
        .unwrap()
        .output()
        .elements();
    let remainder = model
        .add_node(BinaryOperationNode::new(a, b, BinaryOperationType::Remainder).unwrap())
        .unwrap()
        .output()
        .elements();
    let out = PortElements::concat(&[quotient, remainder]);
    let map = Map::with_inputs(model, vec![("out".into(), out.into_base())]).unwrap();

    let input = vec![7, i32::MIN, -10, 0];
    let expected = vec![0, 0, -3, 0, 0, 0, -1, 0];
    let interpreted: Vec<i32> = map.compute_single(input.clone()).unwrap();
    assert_eq!(interpreted, expected);
    let mut compiled = map.compile(&CompilerSettings::default()).unwrap();
    let generated: Vec<i32> = compiled.compute_single(input).unwrap();
    assert_eq!(generated, expected);
}
