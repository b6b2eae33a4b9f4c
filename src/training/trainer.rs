//! Training loop implementation.

use burn::tensor::{Tensor, backend::Backend};

use super::{Sgd, TrainingConfig};
use crate::errors::GraphError;
use crate::graph::NetworkGraph;
use crate::tensor::ExecutionMode;

/// Training result containing the metrics of the run.
#[derive(Debug, Clone)]
pub struct TrainingResult {
    /// Mean loss per epoch.
    pub loss_history: Vec<f32>,
}

fn to_tensor<B: Backend>(
    rows: &[Vec<f32>],
    width: usize,
    device: &B::Device,
) -> Result<Tensor<B, 2>, GraphError> {
    if let Some(row) = rows.iter().find(|r| r.len() != width) {
        return Err(GraphError::config(format!(
            "expected rows of {width} values, got {}",
            row.len()
        )));
    }
    let data: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Ok(Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([rows.len(), width]))
}

/// Trains a compiled and initialized graph with SGD.
///
/// Each batch runs forwarding and backwarding; weights are updated as soon
/// as their last gradient contribution is in. Samples that do not fill a
/// whole batch are dropped.
pub fn train<B: Backend>(
    graph: &mut NetworkGraph<B>,
    inputs: &[Vec<f32>],
    targets: &[Vec<f32>],
    config: &TrainingConfig,
) -> Result<TrainingResult, GraphError> {
    if inputs.is_empty() || inputs.len() != targets.len() {
        return Err(GraphError::config(format!(
            "need matching non-empty inputs and targets, got {} and {}",
            inputs.len(),
            targets.len()
        )));
    }
    if !graph.is_initialized() {
        return Err(GraphError::NotInitialized);
    }

    let batch = config.batch_size.clamp(1, inputs.len());
    if batch != graph.get_batch_size() {
        graph.deallocate_tensors(false);
        graph.set_batch_size(batch)?;
    }

    let optimizer = Sgd::new(config.learning_rate, config.momentum);
    if !graph.tensor_manager().is_weights_allocated() {
        graph.request_optimizer_variable(|dim| optimizer.state_dims(dim))?;
    } else if graph
        .tensor_manager()
        .lacks_optimizer_state(|dim| optimizer.state_dims(dim))
    {
        return Err(GraphError::resource(
            "weights were allocated without the optimizer state momentum needs",
        ));
    }
    graph.allocate_weights()?;
    graph.allocate_tensors(ExecutionMode::Train)?;

    let input_dims = graph.get_input_dimension();
    let [input_dim] = input_dims.as_slice() else {
        return Err(GraphError::config("training needs exactly one input node"));
    };
    let target_width = targets[0].len();
    let device = graph.tensor_manager().device().clone();

    let num_batches = inputs.len() / batch;
    let dropped = inputs.len() % batch;
    if dropped > 0 {
        log::warn!("dropping {dropped} samples that do not fill a batch of {batch}");
    }

    let mut loss_history = Vec::with_capacity(config.epochs);
    let mut iteration = 0;
    for epoch in 0..config.epochs {
        let mut epoch_loss = 0.0;
        for b in 0..num_batches {
            let range = b * batch..(b + 1) * batch;
            let x = to_tensor::<B>(&inputs[range.clone()], input_dim.width, &device)?;
            let y = to_tensor::<B>(&targets[range], target_width, &device)?;
            graph.set_inputs_labels(vec![x], vec![y])?;

            graph.forwarding(true)?;
            epoch_loss += graph.get_loss();
            graph.backwarding(iteration, |step, _| {
                step.apply_gradients_on_last_access(|weight| optimizer.apply(weight))?;
                Ok(())
            })?;
            iteration += 1;
        }

        let loss_value = epoch_loss / num_batches as f32;
        loss_history.push(loss_value);

        if config.verbose && (epoch % 10 == 0 || epoch == config.epochs - 1) {
            log::info!(
                "Epoch {}/{}: loss = {:.6}",
                epoch + 1,
                config.epochs,
                loss_value
            );
        }
    }

    Ok(TrainingResult { loss_history })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Activation;
    use crate::model_graph::ModelGraphConfig;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn device() -> <TestBackend as Backend>::Device {
        <TestBackend as Backend>::Device::default()
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut graph = ModelGraphConfig::with_feature_size(2)
            .dense(4, Activation::Tanh)
            .dense(1, Activation::Sigmoid)
            .loss("cross")
            .build::<TestBackend>(&device())
            .expect("Model build should succeed");

        // OR is linearly separable
        let inputs = vec![
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
        ];
        let targets = vec![vec![0.0], vec![1.0], vec![1.0], vec![1.0]];

        let config = TrainingConfig::new()
            .epochs(100)
            .learning_rate(0.5)
            .batch_size(4)
            .verbose(false);

        let result = train(&mut graph, &inputs, &targets, &config).unwrap();

        let initial_loss = result.loss_history.first().copied().unwrap_or(f32::MAX);
        let final_loss = result.loss_history.last().copied().unwrap_or(f32::MAX);
        assert!(
            final_loss < initial_loss,
            "Loss should decrease: initial={}, final={}",
            initial_loss,
            final_loss
        );
    }

    #[test]
    fn test_training_simple_regression() {
        let mut graph = ModelGraphConfig::with_feature_size(1)
            .dense(4, Activation::Relu)
            .dense(1, Activation::None)
            .loss("mse")
            .build::<TestBackend>(&device())
            .expect("Model build should succeed");

        // Simple linear data: y = 2x
        let inputs = vec![vec![0.0], vec![0.5], vec![1.0], vec![1.5], vec![2.0]];
        let targets = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0], vec![4.0]];

        let config = TrainingConfig::new()
            .epochs(100)
            .learning_rate(0.01)
            .momentum(0.5)
            .batch_size(5)
            .verbose(false);

        let result = train(&mut graph, &inputs, &targets, &config).unwrap();
        assert_eq!(result.loss_history.len(), 100);

        let initial_loss = result.loss_history.first().copied().unwrap_or(f32::MAX);
        let final_loss = result.loss_history.last().copied().unwrap_or(f32::MAX);
        assert!(
            final_loss < initial_loss,
            "Loss should decrease: initial={}, final={}",
            initial_loss,
            final_loss
        );
    }

    #[test]
    fn test_momentum_needs_state_before_weight_allocation() {
        let build = || {
            ModelGraphConfig::with_feature_size(2)
                .dense(1, Activation::None)
                .loss("mse")
                .batch_size(2)
                .build::<TestBackend>(&device())
                .unwrap()
        };
        let inputs = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let targets = vec![vec![1.0], vec![0.0]];
        let momentum = TrainingConfig::new()
            .epochs(2)
            .batch_size(2)
            .momentum(0.9)
            .verbose(false);

        let mut graph = build();
        graph.allocate_weights().unwrap();
        let result = train(&mut graph, &inputs, &targets, &momentum);
        assert!(matches!(result, Err(GraphError::Resource { .. })));

        // plain SGD keeps no state, so pre-allocated weights are fine
        let plain = momentum.clone().momentum(0.0);
        assert!(train(&mut graph, &inputs, &targets, &plain).is_ok());

        let mut graph = build();
        let optimizer = Sgd::new(0.001, 0.9);
        graph
            .request_optimizer_variable(|dim| optimizer.state_dims(dim))
            .unwrap();
        graph.allocate_weights().unwrap();
        assert!(train(&mut graph, &inputs, &targets, &momentum).is_ok());
    }

    #[test]
    fn test_mismatched_data_is_rejected() {
        let mut graph = ModelGraphConfig::with_feature_size(2)
            .dense(1, Activation::None)
            .loss("mse")
            .build::<TestBackend>(&device())
            .unwrap();

        let config = TrainingConfig::new().epochs(1).verbose(false);
        let result = train(&mut graph, &[vec![1.0, 2.0]], &[], &config);
        assert!(matches!(result, Err(GraphError::Configuration { .. })));

        let result = train(&mut graph, &[vec![1.0]], &[vec![1.0]], &config);
        assert!(matches!(result, Err(GraphError::Configuration { .. })));
    }
}
