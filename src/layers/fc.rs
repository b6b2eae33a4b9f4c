//! Fully connected layer: `Y = X W + b`.

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use super::{InitLayerContext, Layer, RunLayerContext};
use crate::errors::GraphError;
use crate::tensor::{Initializer, TensorDim};

const WEIGHT: usize = 0;
const BIAS: usize = 1;

/// Configuration for a fully connected layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FullyConnectedConfig {
    /// Number of output features.
    pub unit: usize,
    #[serde(default = "default_weight_initializer")]
    pub weight_initializer: Initializer,
    #[serde(default)]
    pub bias_initializer: Initializer,
}

fn default_weight_initializer() -> Initializer {
    Initializer::XavierUniform
}

impl FullyConnectedConfig {
    /// Creates a new FullyConnectedConfig.
    pub fn new(unit: usize) -> Self {
        Self {
            unit,
            weight_initializer: default_weight_initializer(),
            bias_initializer: Initializer::Zeros,
        }
    }

    /// Sets the weight initializer.
    pub fn with_weight_initializer(mut self, initializer: Initializer) -> Self {
        self.weight_initializer = initializer;
        self
    }

    /// Sets the bias initializer.
    pub fn with_bias_initializer(mut self, initializer: Initializer) -> Self {
        self.bias_initializer = initializer;
        self
    }

    pub fn init(&self) -> FullyConnectedLayer {
        FullyConnectedLayer {
            config: *self,
            input_size: 0,
        }
    }
}

/// A fully connected layer.
///
/// The weight is stored as `[input_size, unit]` and the bias as `[1, unit]`,
/// both requested from the tensor manager during finalize.
#[derive(Debug, Clone)]
pub struct FullyConnectedLayer {
    config: FullyConnectedConfig,
    input_size: usize,
}

impl FullyConnectedLayer {
    /// Returns the input size of this layer, known once finalized.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Returns the output size of this layer.
    pub fn output_size(&self) -> usize {
        self.config.unit
    }
}

impl<B: Backend> Layer<B> for FullyConnectedLayer {
    fn layer_type(&self) -> &'static str {
        "fully_connected"
    }

    fn finalize(&mut self, ctx: &mut InitLayerContext) -> Result<(), GraphError> {
        ctx.expect_inputs(1)?;
        if self.config.unit == 0 {
            return Err(GraphError::config(format!(
                "{}: unit must be positive",
                ctx.name()
            )));
        }
        let input = ctx.input_dims()[0];
        self.input_size = input.width;

        ctx.set_output_dims(vec![TensorDim::new(input.batch, self.config.unit)]);
        ctx.request_weight(
            "weight",
            TensorDim::new(input.width, self.config.unit),
            self.config.weight_initializer,
            true,
        );
        ctx.request_weight(
            "bias",
            TensorDim::new(1, self.config.unit),
            self.config.bias_initializer,
            true,
        );
        Ok(())
    }

    fn forward(&self, ctx: &mut RunLayerContext<'_, B>, _training: bool) -> Result<(), GraphError> {
        let output = ctx.input(0)?.matmul(ctx.weight(WEIGHT)?) + ctx.weight(BIAS)?;
        ctx.set_output(0, output)
    }

    fn calc_gradient(&self, ctx: &mut RunLayerContext<'_, B>) -> Result<(), GraphError> {
        let output_grad = ctx.output_grad(0)?;
        if ctx.is_weight_trainable(WEIGHT) {
            let weight_grad = ctx.input(0)?.transpose().matmul(output_grad.clone());
            ctx.add_weight_gradient(WEIGHT, weight_grad)?;
        }
        if ctx.is_weight_trainable(BIAS) {
            ctx.add_weight_gradient(BIAS, output_grad.sum_dim(0))?;
        }
        Ok(())
    }

    fn calc_derivative(&self, ctx: &mut RunLayerContext<'_, B>) -> Result<(), GraphError> {
        if !ctx.wants_input_grad(0) {
            return Ok(());
        }
        let derivative = ctx.output_grad(0)?.matmul(ctx.weight(WEIGHT)?.transpose());
        ctx.set_input_grad(0, derivative)
    }

    fn is_trainable(&self) -> bool {
        true
    }
}
