//! End-to-end tests of the network graph: compile, initialize, allocate and
//! run forward/backward through the public API.

use burn::backend::NdArray;
use burn::tensor::{Tensor, backend::Backend};
use nngraph::graph::{
    GraphDescription, GraphNode, InPlace, LayerNode, NetworkGraph, NetworkGraphConfig,
};
use nngraph::layers::{Activation, FullyConnectedConfig, InputLayer};
use nngraph::model_graph::ModelGraphConfig;
use nngraph::tensor::{ExecutionMode, Initializer, TensorDim};
use nngraph::GraphError;

type TestBackend = NdArray;

const TOLERANCE: f32 = 1e-5;

fn device() -> <TestBackend as Backend>::Device {
    <TestBackend as Backend>::Device::default()
}

fn floats_close(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < TOLERANCE)
}

fn input(name: &str, width: usize) -> LayerNode<TestBackend> {
    LayerNode::new(InputLayer::new(width)).with_name(name)
}

fn fc(name: &str, unit: usize, weight: f32) -> LayerNode<TestBackend> {
    LayerNode::new(
        FullyConnectedConfig::new(unit)
            .with_weight_initializer(Initializer::Constant(weight))
            .init(),
    )
    .with_name(name)
}

fn tensor(rows: &[&[f32]]) -> Tensor<TestBackend, 2> {
    let width = rows.first().map_or(0, |r| r.len());
    let data: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Tensor::<TestBackend, 1>::from_floats(data.as_slice(), &device()).reshape([rows.len(), width])
}

/// Runs one training iteration and returns every applied weight gradient.
fn gradients(
    graph: &mut NetworkGraph<TestBackend>,
    x: Tensor<TestBackend, 2>,
    y: Tensor<TestBackend, 2>,
) -> Vec<(String, Vec<f32>)> {
    graph.set_inputs_labels(vec![x], vec![y]).unwrap();
    graph.forwarding(true).unwrap();

    let mut grads = Vec::new();
    graph
        .backwarding(0, |step, _| {
            step.apply_gradients_on_last_access(|w| {
                grads.push((w.name.clone(), w.gradient.to_data().to_vec::<f32>().unwrap()));
            })?;
            Ok(())
        })
        .unwrap();
    grads.sort_by(|a, b| a.0.cmp(&b.0));
    grads
}

#[test]
fn test_chain_orders_and_single_step() {
    let mut graph = NetworkGraph::<TestBackend>::new(device());
    graph.add_layer(input("in", 2)).unwrap();
    graph.add_layer(fc("fc", 1, 0.5)).unwrap();
    graph.compile(Some("mse")).unwrap();

    let forward: Vec<usize> = graph.iter().map(|n| n.forward_order()).collect();
    let backward: Vec<Option<usize>> = graph.iter().map(|n| n.backward_order()).collect();
    assert_eq!(forward, vec![0, 1, 2]);
    assert_eq!(backward, vec![None, Some(1), Some(0)]);

    graph.initialize(&[], &[]).unwrap();
    graph.allocate_weights().unwrap();
    graph.allocate_tensors(ExecutionMode::Train).unwrap();

    graph
        .set_inputs_labels(vec![tensor(&[&[1.0, 3.0]])], vec![tensor(&[&[0.0]])])
        .unwrap();
    let outputs = graph.forwarding(true).unwrap();
    assert_eq!(outputs[0].dims(), [1, 1]);
    assert!((graph.get_loss() - 4.0).abs() < TOLERANCE);

    // dL/dp = 2 * (2 - 0), dW = x^T * 4, db = 4
    let mut applied = Vec::new();
    graph
        .backwarding(0, |step, _| {
            let name = step.node().name().to_string();
            step.apply_gradients_on_last_access(|w| {
                applied.push((name.clone(), w.name.clone()));
                let grad: Vec<f32> = w.gradient.to_data().to_vec().unwrap();
                if w.name.ends_with("weight") {
                    assert!(floats_close(&grad, &[4.0, 12.0]));
                } else {
                    assert!(floats_close(&grad, &[4.0]));
                }
                w.value = w.value.clone() - w.gradient.clone().mul_scalar(0.1);
            })?;
            Ok(())
        })
        .unwrap();

    assert_eq!(applied.len(), 2);
    assert!(applied.iter().all(|(node, _)| node == "fc"));
    let weight: Vec<f32> = graph
        .tensor_manager()
        .weight_value("fc:weight")
        .unwrap()
        .to_data()
        .to_vec()
        .unwrap();
    assert!(floats_close(&weight, &[0.1, -0.7]));
}

#[test]
fn test_cycle_fails_before_allocation() {
    let mut graph = NetworkGraph::<TestBackend>::new(device());
    graph.add_layer(input("in", 2)).unwrap();
    graph
        .add_layer(fc("a", 2, 0.5).with_inputs(["in", "c"]).unwrap())
        .unwrap();
    graph
        .add_layer(fc("b", 2, 0.5).with_inputs(["a"]).unwrap())
        .unwrap();
    graph
        .add_layer(fc("c", 2, 0.5).with_inputs(["b"]).unwrap())
        .unwrap();
    graph
        .add_layer(fc("out", 1, 0.5).with_inputs(["c"]).unwrap())
        .unwrap();

    let err = graph.compile(None).unwrap_err();
    assert!(matches!(err, GraphError::Cycle { .. }));
    assert!(!graph.is_compiled());
    assert_eq!(graph.tensor_manager().num_weights(), 0);
    assert!(!graph.tensor_manager().is_allocated());
    assert!(matches!(
        graph.initialize(&[], &[]),
        Err(GraphError::NotCompiled)
    ));
}

#[test]
fn test_shared_weights_are_applied_once() {
    let config = NetworkGraphConfig::new().batch_size(2);
    let mut graph = NetworkGraph::<TestBackend>::with_config(config, device());
    graph.add_layer(input("in", 2)).unwrap();
    graph.add_layer(fc("a", 2, 0.5)).unwrap();
    graph.add_layer(fc("b", 2, 0.5).with_shared_from("a")).unwrap();
    graph.compile(Some("mse")).unwrap();
    graph.initialize(&[], &[]).unwrap();

    let manager = graph.tensor_manager();
    assert_eq!(manager.num_weights(), 2);
    let names: Vec<&str> = manager.weight_names().collect();
    assert_eq!(names, vec!["a:weight", "a:bias"]);
    assert_eq!(
        graph.get_layer_node("a").unwrap().tensors().weights,
        graph.get_layer_node("b").unwrap().tensors().weights
    );

    graph.allocate_weights().unwrap();
    graph.allocate_tensors(ExecutionMode::Train).unwrap();
    graph
        .set_inputs_labels(
            vec![tensor(&[&[1.0, -1.0], &[0.5, 2.0]])],
            vec![tensor(&[&[0.0, 1.0], &[1.0, 0.0]])],
        )
        .unwrap();
    graph.forwarding(true).unwrap();

    let mut applied = Vec::new();
    graph
        .backwarding(0, |step, _| {
            let count = step.apply_gradients_on_last_access(|_| {})?;
            applied.push((step.node().name().to_string(), count));
            Ok(())
        })
        .unwrap();

    // last gradient access is the sharer that runs first in forward
    assert_eq!(
        applied,
        vec![
            ("mse0".to_string(), 0),
            ("b".to_string(), 0),
            ("a".to_string(), 2)
        ]
    );
}

/// `in -> a -> b -> c -> mse`, where b and c either share a's weights or
/// own identical copies.
fn three_layer_chain(shared: bool) -> NetworkGraph<TestBackend> {
    let config = NetworkGraphConfig::new().batch_size(2);
    let mut graph = NetworkGraph::<TestBackend>::with_config(config, device());
    graph.add_layer(input("in", 2)).unwrap();
    graph.add_layer(fc("a", 2, 0.5)).unwrap();
    for name in ["b", "c"] {
        let node = fc(name, 2, 0.5);
        let node = if shared { node.with_shared_from("a") } else { node };
        graph.add_layer(node).unwrap();
    }
    graph.compile(Some("mse")).unwrap();
    graph.initialize(&[], &[]).unwrap();
    graph.allocate_weights().unwrap();
    graph.allocate_tensors(ExecutionMode::Train).unwrap();
    graph
}

#[test]
fn test_weight_shared_by_three_nodes_sums_gradients() {
    let x = || tensor(&[&[1.0, -1.0], &[0.5, 2.0]]);
    let y = || tensor(&[&[0.0, 1.0], &[1.0, 0.0]]);

    let mut shared = three_layer_chain(true);
    let forward: Vec<(String, usize)> = shared
        .iter()
        .map(|n| (n.name().to_string(), n.forward_order()))
        .collect();
    let sharers: Vec<(&str, usize)> = forward[1..4]
        .iter()
        .map(|(name, order)| (name.as_str(), *order))
        .collect();
    assert_eq!(sharers, vec![("a", 1), ("b", 2), ("c", 3)]);

    shared.set_inputs_labels(vec![x()], vec![y()]).unwrap();
    shared.forwarding(true).unwrap();
    let mut applied = Vec::new();
    shared
        .backwarding(0, |step, _| {
            let node = step.node().name().to_string();
            step.apply_gradients_on_last_access(|w| {
                let grad: Vec<f32> = w.gradient.to_data().to_vec().unwrap();
                applied.push((node.clone(), w.name.clone(), grad));
            })?;
            Ok(())
        })
        .unwrap();

    // one apply per weight, on the sharer that runs first in forward
    let targets: Vec<(&str, &str)> = applied
        .iter()
        .map(|(node, weight, _)| (node.as_str(), weight.as_str()))
        .collect();
    assert_eq!(targets, vec![("a", "a:weight"), ("a", "a:bias")]);

    let mut separate = three_layer_chain(false);
    let per_node = gradients(&mut separate, x(), y());
    assert_eq!(per_node.len(), 6);
    for (_, weight, grad) in &applied {
        let suffix = weight.trim_start_matches("a:");
        let mut expected = vec![0.0; grad.len()];
        for (name, contribution) in &per_node {
            if name.ends_with(suffix) {
                for (e, c) in expected.iter_mut().zip(contribution) {
                    *e += c;
                }
            }
        }
        assert!(floats_close(grad, &expected), "{weight}: {grad:?} vs {expected:?}");
    }
}

#[test]
fn test_in_place_output_shares_input_buffer() {
    let mut graph = NetworkGraph::<TestBackend>::new(device());
    graph.add_layer(input("in", 3)).unwrap();
    graph
        .add_layer(fc("fc", 4, 0.1).with_activation(Activation::Relu))
        .unwrap();
    graph.add_layer(fc("head", 2, -0.2)).unwrap();
    graph.compile(Some("mse")).unwrap();
    graph.initialize(&[], &[]).unwrap();

    let act = graph.get_layer_node("fc/activation_realized").unwrap();
    assert_eq!(act.in_place(), InPlace::Restricting);
    let fc_out = graph.get_layer_node("fc").unwrap().tensors().outputs[0];
    let act_out = act.tensors().outputs[0];
    let manager = graph.tensor_manager();
    assert!(manager.is_alias(fc_out.var, act_out.var));
    assert!(manager.is_alias(fc_out.grad.unwrap(), act_out.grad.unwrap()));

    // fully connected layers always write a fresh buffer
    assert_eq!(graph.can_execute_in_place("fc").unwrap(), InPlace::None);
}

#[test]
fn test_in_place_matches_out_of_place_gradients() {
    let build = |optimize: bool| {
        let config = NetworkGraphConfig::new().batch_size(2).optimize_memory(optimize);
        let mut graph = NetworkGraph::<TestBackend>::with_config(config, device());
        graph.add_layer(input("in", 3)).unwrap();
        graph
            .add_layer(fc("fc1", 4, 0.1).with_activation(Activation::Relu))
            .unwrap();
        graph
            .add_layer(fc("fc2", 2, -0.2).with_activation(Activation::Sigmoid))
            .unwrap();
        graph.compile(Some("mse")).unwrap();
        graph.initialize(&[], &[]).unwrap();
        graph.allocate_weights().unwrap();
        graph.allocate_tensors(ExecutionMode::Train).unwrap();
        graph
    };
    let x = || tensor(&[&[1.0, 2.0, 3.0], &[0.5, -1.0, 2.0]]);
    let y = || tensor(&[&[1.0, 0.0], &[0.0, 1.0]]);

    let mut optimized = build(true);
    let mut plain = build(false);
    assert!(optimized.iter().any(|n| n.in_place() != InPlace::None));
    assert!(plain.iter().all(|n| n.in_place() == InPlace::None));

    let a = gradients(&mut optimized, x(), y());
    let b = gradients(&mut plain, x(), y());
    assert_eq!(a.len(), 4);
    for ((name_a, grad_a), (name_b, grad_b)) in a.iter().zip(&b) {
        assert_eq!(name_a, name_b);
        assert!(floats_close(grad_a, grad_b), "{name_a}: {grad_a:?} vs {grad_b:?}");
    }
    assert!(optimized.tensor_manager().num_slots() < plain.tensor_manager().num_slots());
}

#[test]
fn test_inference_plans_less_memory_than_training() {
    let mut graph = ModelGraphConfig::with_feature_size(4)
        .dense(8, Activation::Relu)
        .dense(8, Activation::Tanh)
        .dense(2, Activation::None)
        .loss("mse")
        .batch_size(4)
        .build::<TestBackend>(&device())
        .unwrap();

    graph.allocate_tensors(ExecutionMode::Inference).unwrap();
    let inference = graph.tensor_manager().planned_elements();
    graph.deallocate_tensors(false);
    graph.allocate_tensors(ExecutionMode::Train).unwrap();
    let training = graph.tensor_manager().planned_elements();

    assert!(inference < training, "{inference} vs {training}");
    assert_eq!(graph.execution_mode(), ExecutionMode::Train);
}

#[test]
fn test_memory_limit_is_enforced() {
    let config = NetworkGraphConfig::new().batch_size(8).memory_limit(16);
    let mut graph = ModelGraphConfig::with_feature_size(4)
        .dense(8, Activation::Relu)
        .loss("mse")
        .graph_config(config)
        .build::<TestBackend>(&device())
        .unwrap();

    let err = graph.allocate_tensors(ExecutionMode::Train).unwrap_err();
    assert!(matches!(err, GraphError::Resource { .. }));
    assert!(!graph.tensor_manager().is_allocated());
}

#[test]
fn test_graph_from_json_description() {
    let json = r#"{
        "layers": [
            {"name": "in", "type": "input", "input_shape": 3},
            {"name": "hidden", "type": "fully_connected", "unit": 4, "activation": "relu",
             "weight_initializer": {"constant": 0.25}},
            {"name": "out", "type": "fully_connected", "unit": 2, "inputs": ["hidden"],
             "weight_initializer": {"constant": 0.5}}
        ],
        "loss": "mse"
    }"#;
    let description = GraphDescription::from_json(json).unwrap();

    let config = NetworkGraphConfig::new().batch_size(2);
    let mut graph =
        NetworkGraph::<TestBackend>::from_description(&description, config, device()).unwrap();
    graph.compile(description.loss.as_deref()).unwrap();
    graph.initialize(&[], &[]).unwrap();
    graph.allocate_weights().unwrap();
    graph.allocate_tensors(ExecutionMode::Inference).unwrap();

    assert_eq!(graph.get_input_dimension(), vec![TensorDim::new(2, 3)]);
    graph
        .set_inputs_labels(vec![tensor(&[&[1.0, 1.0, 1.0], &[-1.0, -1.0, -1.0]])], Vec::new())
        .unwrap();
    let outputs = graph.forwarding(false).unwrap();

    // relu(3 * 0.25) * 4 * 0.5 for the first row, zero for the second
    let values: Vec<f32> = outputs[0].to_data().to_vec().unwrap();
    assert!(floats_close(&values, &[1.5, 1.5, 0.0, 0.0]));
}

#[test]
fn test_description_round_trips_through_json() {
    let json = r#"{"layers": [{"name": "in", "type": "input", "input_shape": 2}], "loss": null}"#;
    let description = GraphDescription::from_json(json).unwrap();
    let again = GraphDescription::from_json(&description.to_json().unwrap()).unwrap();
    assert_eq!(description, again);
}
