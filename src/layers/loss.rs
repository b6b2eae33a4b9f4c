//! Loss layers.
//!
//! A loss layer outputs its prediction (the input for MSE, the activated
//! input for the fused cross-entropy variants) and records the scalar loss
//! against the label tensor it requests.

use burn::tensor::{ElementConversion, Tensor, backend::Backend};
use serde::{Deserialize, Serialize};

use super::{Activation, InPlaceSupport, InitLayerContext, Layer, RunLayerContext};
use crate::errors::GraphError;

const EPSILON: f32 = 1e-7;

/// Supported loss functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    /// Mean Squared Error loss.
    Mse,
    /// Cross entropy without a known activation. Only valid once fused.
    Cross,
    /// Categorical cross entropy over a softmax.
    CrossSoftmax,
    /// Binary cross entropy over a sigmoid.
    CrossSigmoid,
}

impl LossKind {
    /// Returns the name used in configurations and as node type.
    pub fn name(&self) -> &'static str {
        match self {
            LossKind::Mse => "mse",
            LossKind::Cross => "cross",
            LossKind::CrossSoftmax => "cross_softmax",
            LossKind::CrossSigmoid => "cross_sigmoid",
        }
    }

    /// Creates a LossKind from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "mse" => Some(LossKind::Mse),
            "cross" => Some(LossKind::Cross),
            "cross_softmax" => Some(LossKind::CrossSoftmax),
            "cross_sigmoid" => Some(LossKind::CrossSigmoid),
            _ => None,
        }
    }

    /// Activation applied to the input before the loss is taken.
    pub fn activation(&self) -> Activation {
        match self {
            LossKind::CrossSoftmax => Activation::Softmax,
            LossKind::CrossSigmoid => Activation::Sigmoid,
            LossKind::Mse | LossKind::Cross => Activation::None,
        }
    }

    /// Computes the loss between predictions and targets.
    pub fn compute<B: Backend>(
        &self,
        predictions: Tensor<B, 2>,
        targets: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        match self {
            LossKind::Mse => {
                let diff = predictions - targets;
                let squared = diff.clone() * diff;
                squared.mean()
            }
            LossKind::CrossSoftmax | LossKind::Cross => {
                // -sum(t * log(p)) / batch
                let [batch, _] = predictions.dims();
                let log_p = predictions.clamp(EPSILON, 1.0).log();
                (targets * log_p).sum().neg() / batch.max(1) as f32
            }
            LossKind::CrossSigmoid => {
                // -mean(t * log(p) + (1 - t) * log(1 - p))
                let ones = Tensor::ones_like(&predictions);
                let p_clipped = predictions.clamp(EPSILON, 1.0 - EPSILON);
                let log_p = p_clipped.clone().log();
                let log_1_minus_p = (ones.clone() - p_clipped).log();
                let bce = targets.clone() * log_p + (ones - targets) * log_1_minus_p;
                bce.neg().mean()
            }
        }
    }

    /// Derivative of the loss with respect to the layer input, given the
    /// prediction. The fused activations fold into `p - t`.
    pub fn derivative<B: Backend>(
        &self,
        predictions: Tensor<B, 2>,
        targets: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let [batch, width] = predictions.dims();
        let diff = predictions - targets;
        match self {
            LossKind::Mse => diff * (2.0 / (batch * width).max(1) as f32),
            LossKind::CrossSoftmax | LossKind::Cross => diff / batch.max(1) as f32,
            LossKind::CrossSigmoid => diff / (batch * width).max(1) as f32,
        }
    }
}

/// A loss node.
#[derive(Debug, Clone, Copy)]
pub struct LossLayer {
    kind: LossKind,
}

impl LossLayer {
    pub fn new(kind: LossKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> LossKind {
        self.kind
    }
}

impl<B: Backend> Layer<B> for LossLayer {
    fn layer_type(&self) -> &'static str {
        self.kind.name()
    }

    fn finalize(&mut self, ctx: &mut InitLayerContext) -> Result<(), GraphError> {
        ctx.expect_inputs(1)?;
        if self.kind == LossKind::Cross {
            return Err(GraphError::config(format!(
                "{}: cross entropy needs a softmax or sigmoid activation to fuse with",
                ctx.name()
            )));
        }
        let dim = ctx.input_dims()[0];
        ctx.set_output_dims(vec![dim]);
        ctx.request_label(dim);
        Ok(())
    }

    fn forward(&self, ctx: &mut RunLayerContext<'_, B>, _training: bool) -> Result<(), GraphError> {
        let prediction = self.kind.activation().apply(ctx.input(0)?);
        ctx.set_output(0, prediction.clone())?;

        let loss = self.kind.compute(prediction, ctx.label()?);
        ctx.set_loss(loss.into_scalar().elem());
        Ok(())
    }

    fn calc_derivative(&self, ctx: &mut RunLayerContext<'_, B>) -> Result<(), GraphError> {
        let derivative = self.kind.derivative(ctx.output(0)?, ctx.label()?);
        ctx.set_input_grad(0, derivative)
    }

    fn in_place(&self) -> InPlaceSupport {
        match self.kind {
            LossKind::Mse => InPlaceSupport::View,
            _ => InPlaceSupport::ElementWise,
        }
    }

    fn needs_output_for_backward(&self) -> bool {
        true
    }

    fn loss(&self) -> Option<LossKind> {
        Some(self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_mse_loss_zero() {
        let device = <TestBackend as Backend>::Device::default();
        let predictions = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);
        let targets = predictions.clone();

        let loss = LossKind::Mse.compute(predictions, targets);
        let loss_value: f32 = loss.into_scalar();

        assert!(
            loss_value.abs() < 1e-6,
            "MSE of identical tensors should be 0"
        );
    }

    #[test]
    fn test_mse_loss_nonzero() {
        let device = <TestBackend as Backend>::Device::default();
        let predictions = Tensor::<TestBackend, 2>::from_floats([[1.0], [2.0]], &device);
        let targets = Tensor::<TestBackend, 2>::from_floats([[2.0], [2.0]], &device);

        let loss = LossKind::Mse.compute(predictions, targets);
        let loss_value: f32 = loss.into_scalar();

        // MSE = mean((1-2)^2 + (2-2)^2) = mean(1 + 0) = 0.5
        assert!((loss_value - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mse_derivative() {
        let device = <TestBackend as Backend>::Device::default();
        let predictions = Tensor::<TestBackend, 2>::from_floats([[1.0], [2.0]], &device);
        let targets = Tensor::<TestBackend, 2>::from_floats([[2.0], [2.0]], &device);

        let derivative: Vec<f32> = LossKind::Mse
            .derivative(predictions, targets)
            .to_data()
            .to_vec()
            .unwrap();
        // 2 * (p - t) / 2
        assert_eq!(derivative, vec![-1.0, 0.0]);
    }

    #[test]
    fn test_bce_loss_perfect_prediction() {
        let device = <TestBackend as Backend>::Device::default();
        let predictions = Tensor::<TestBackend, 2>::from_floats([[0.99], [0.01]], &device);
        let targets = Tensor::<TestBackend, 2>::from_floats([[1.0], [0.0]], &device);

        let loss = LossKind::CrossSigmoid.compute(predictions, targets);
        let loss_value: f32 = loss.into_scalar();

        // Loss should be very small for near-perfect predictions
        assert!(loss_value < 0.1);
    }

    #[test]
    fn test_softmax_cross_entropy_uniform() {
        let device = <TestBackend as Backend>::Device::default();
        let predictions = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.5]], &device);
        let targets = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0]], &device);

        let loss_value: f32 = LossKind::CrossSoftmax
            .compute(predictions, targets)
            .into_scalar();
        assert!((loss_value - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_loss_names() {
        for kind in [
            LossKind::Mse,
            LossKind::Cross,
            LossKind::CrossSoftmax,
            LossKind::CrossSigmoid,
        ] {
            assert_eq!(LossKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(LossKind::from_name("hinge"), None);
    }
}
