//! Fan-out marker inserted when one output slot feeds several consumers.

use burn::tensor::backend::Backend;

use super::{InPlaceSupport, InitLayerContext, Layer, RunLayerContext};
use crate::errors::GraphError;

/// Copies its single input to every output and sums the derivatives that
/// come back.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiOutLayer;

impl<B: Backend> Layer<B> for MultiOutLayer {
    fn layer_type(&self) -> &'static str {
        "multiout"
    }

    fn finalize(&mut self, ctx: &mut InitLayerContext) -> Result<(), GraphError> {
        ctx.expect_inputs(1)?;
        let dim = ctx.input_dims()[0];
        ctx.set_output_dims(vec![dim; ctx.num_outputs().max(1)]);
        Ok(())
    }

    fn forward(&self, ctx: &mut RunLayerContext<'_, B>, _training: bool) -> Result<(), GraphError> {
        let input = ctx.input(0)?;
        for i in 0..ctx.num_outputs() {
            ctx.set_output(i, input.clone())?;
        }
        Ok(())
    }

    fn calc_derivative(&self, ctx: &mut RunLayerContext<'_, B>) -> Result<(), GraphError> {
        let mut derivative = ctx.output_grad(0)?;
        for i in 1..ctx.num_outputs() {
            derivative = derivative + ctx.output_grad(i)?;
        }
        ctx.set_input_grad(0, derivative)
    }

    fn in_place(&self) -> InPlaceSupport {
        InPlaceSupport::View
    }
}
