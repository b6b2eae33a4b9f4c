//! Identity layer: passes its input through unchanged.

use burn::tensor::backend::Backend;

use super::{InPlaceSupport, InitLayerContext, Layer, RunLayerContext};
use crate::errors::GraphError;

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityLayer;

impl<B: Backend> Layer<B> for IdentityLayer {
    fn layer_type(&self) -> &'static str {
        "identity"
    }

    fn finalize(&mut self, ctx: &mut InitLayerContext) -> Result<(), GraphError> {
        ctx.expect_inputs(1)?;
        let dim = ctx.input_dims()[0];
        ctx.set_output_dims(vec![dim]);
        Ok(())
    }

    fn forward(&self, ctx: &mut RunLayerContext<'_, B>, _training: bool) -> Result<(), GraphError> {
        let input = ctx.input(0)?;
        ctx.set_output(0, input)
    }

    fn calc_derivative(&self, ctx: &mut RunLayerContext<'_, B>) -> Result<(), GraphError> {
        let derivative = ctx.output_grad(0)?;
        ctx.set_input_grad(0, derivative)
    }

    fn in_place(&self) -> InPlaceSupport {
        InPlaceSupport::View
    }
}
