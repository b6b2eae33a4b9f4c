//! Standalone activation node, produced when a layer's `activation`
//! property is realized.

use burn::tensor::backend::Backend;

use super::{Activation, InPlaceSupport, InitLayerContext, Layer, RunLayerContext};
use crate::errors::GraphError;

#[derive(Debug, Clone, Copy)]
pub struct ActivationLayer {
    activation: Activation,
}

impl ActivationLayer {
    pub fn new(activation: Activation) -> Self {
        Self { activation }
    }
}

impl<B: Backend> Layer<B> for ActivationLayer {
    fn layer_type(&self) -> &'static str {
        "activation"
    }

    fn finalize(&mut self, ctx: &mut InitLayerContext) -> Result<(), GraphError> {
        ctx.expect_inputs(1)?;
        let dim = ctx.input_dims()[0];
        ctx.set_output_dims(vec![dim]);
        Ok(())
    }

    fn forward(&self, ctx: &mut RunLayerContext<'_, B>, _training: bool) -> Result<(), GraphError> {
        let output = self.activation.apply(ctx.input(0)?);
        ctx.set_output(0, output)
    }

    fn calc_derivative(&self, ctx: &mut RunLayerContext<'_, B>) -> Result<(), GraphError> {
        let derivative = self.activation.derivative(ctx.output(0)?, ctx.output_grad(0)?);
        ctx.set_input_grad(0, derivative)
    }

    fn in_place(&self) -> InPlaceSupport {
        InPlaceSupport::ElementWise
    }

    fn needs_output_for_backward(&self) -> bool {
        true
    }

    fn activation(&self) -> Option<Activation> {
        Some(self.activation)
    }
}
