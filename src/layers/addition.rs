//! Element-wise sum of any number of same-shaped inputs.

use burn::tensor::backend::Backend;

use super::{InitLayerContext, Layer, RunLayerContext};
use crate::errors::GraphError;

#[derive(Debug, Clone, Copy, Default)]
pub struct AdditionLayer;

impl<B: Backend> Layer<B> for AdditionLayer {
    fn layer_type(&self) -> &'static str {
        "addition"
    }

    fn finalize(&mut self, ctx: &mut InitLayerContext) -> Result<(), GraphError> {
        let Some(&first) = ctx.input_dims().first() else {
            return Err(GraphError::config(format!(
                "{} needs at least one input",
                ctx.name()
            )));
        };
        if let Some(other) = ctx.input_dims().iter().find(|d| **d != first) {
            return Err(GraphError::shape(ctx.name(), first, *other));
        }
        ctx.set_output_dims(vec![first]);
        Ok(())
    }

    fn forward(&self, ctx: &mut RunLayerContext<'_, B>, _training: bool) -> Result<(), GraphError> {
        let mut sum = ctx.input(0)?;
        for i in 1..ctx.num_inputs() {
            sum = sum + ctx.input(i)?;
        }
        ctx.set_output(0, sum)
    }

    fn calc_derivative(&self, ctx: &mut RunLayerContext<'_, B>) -> Result<(), GraphError> {
        let derivative = ctx.output_grad(0)?;
        for i in 0..ctx.num_inputs() {
            ctx.set_input_grad(i, derivative.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorDim;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_addition_rejects_mismatched_inputs() {
        let mut layer = AdditionLayer;
        let mut ctx = InitLayerContext::new(
            "add",
            vec![TensorDim::new(2, 3), TensorDim::new(2, 4)],
            1,
            2,
            true,
        );
        let err = Layer::<TestBackend>::finalize(&mut layer, &mut ctx).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    }
}
