//! Activation functions for neural network layers.

use burn::tensor::{Tensor, backend::Backend};
use serde::{Deserialize, Serialize};

/// Supported activation functions.
///
/// Every derivative is expressed through the activation's output, so an
/// activation node never needs its input after forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// No activation (identity function).
    #[default]
    None,
    /// Rectified Linear Unit: f(x) = max(0, x)
    Relu,
    /// Sigmoid: f(x) = 1 / (1 + exp(-x))
    Sigmoid,
    /// Hyperbolic tangent: f(x) = tanh(x)
    Tanh,
    /// Softmax normalization (across last dimension)
    Softmax,
}

impl Activation {
    /// Applies the activation function to a tensor.
    pub fn apply<B: Backend>(&self, tensor: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            Activation::None => tensor,
            Activation::Relu => burn::tensor::activation::relu(tensor),
            Activation::Sigmoid => burn::tensor::activation::sigmoid(tensor),
            Activation::Tanh => burn::tensor::activation::tanh(tensor),
            Activation::Softmax => burn::tensor::activation::softmax(tensor, 1),
        }
    }

    /// Back-propagates `output_grad` through the activation, given its output.
    pub fn derivative<B: Backend>(
        &self,
        output: Tensor<B, 2>,
        output_grad: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        match self {
            Activation::None => output_grad,
            Activation::Relu => {
                let mask = output.clone().greater_elem(0.0);
                output.zeros_like().mask_fill(mask, 1.0) * output_grad
            }
            Activation::Sigmoid => {
                // y * (1 - y)
                let slope = output.clone() * (output.neg() + 1.0);
                slope * output_grad
            }
            Activation::Tanh => {
                // 1 - y^2
                let slope = (output.clone() * output).neg() + 1.0;
                slope * output_grad
            }
            Activation::Softmax => {
                // y * (dy - sum(dy * y))
                let dot = (output_grad.clone() * output.clone()).sum_dim(1);
                output * (output_grad - dot)
            }
        }
    }

    /// Returns the lowercase name used in configurations.
    pub fn name(&self) -> &'static str {
        match self {
            Activation::None => "none",
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Softmax => "softmax",
        }
    }

    /// Creates an Activation from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "none" => Some(Activation::None),
            "relu" => Some(Activation::Relu),
            "sigmoid" => Some(Activation::Sigmoid),
            "tanh" => Some(Activation::Tanh),
            "softmax" => Some(Activation::Softmax),
            _ => None,
        }
    }
}
