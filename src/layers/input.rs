//! Graph input layer.

use burn::tensor::backend::Backend;

use super::{InitLayerContext, Layer, RunLayerContext};
use crate::errors::GraphError;
use crate::tensor::TensorDim;

/// Entry point of the graph. Its output buffer is fed by
/// `NetworkGraph::set_inputs_labels`, so running it is a no-op.
#[derive(Debug, Clone, Copy)]
pub struct InputLayer {
    input_shape: usize,
}

impl InputLayer {
    pub fn new(input_shape: usize) -> Self {
        Self { input_shape }
    }

    pub fn input_shape(&self) -> usize {
        self.input_shape
    }
}

impl<B: Backend> Layer<B> for InputLayer {
    fn layer_type(&self) -> &'static str {
        "input"
    }

    fn finalize(&mut self, ctx: &mut InitLayerContext) -> Result<(), GraphError> {
        ctx.expect_inputs(0)?;
        if self.input_shape == 0 {
            return Err(GraphError::config(format!(
                "{}: input_shape must be positive",
                ctx.name()
            )));
        }
        let dim = TensorDim::new(ctx.batch(), self.input_shape);
        ctx.set_output_dims(vec![dim]);
        Ok(())
    }

    fn forward(&self, _ctx: &mut RunLayerContext<'_, B>, _training: bool) -> Result<(), GraphError> {
        Ok(())
    }

    fn calc_derivative(&self, _ctx: &mut RunLayerContext<'_, B>) -> Result<(), GraphError> {
        Ok(())
    }

    fn is_graph_input(&self) -> bool {
        true
    }
}
