//! Neural network layer implementations.
//!
//! Every layer implements [`Layer`]: the graph only talks to layers through
//! `finalize`, `forward`, `calc_gradient` and `calc_derivative`, and never
//! branches on the concrete layer type. Buffers are owned by the tensor
//! manager and reached through the [`InitLayerContext`] and
//! [`RunLayerContext`] handed to each hook.

pub mod activation;
mod activation_layer;
mod addition;
mod context;
mod fc;
mod identity;
mod input;
mod loss;
mod multiout;

use std::fmt::Debug;

use burn::tensor::backend::Backend;

use crate::errors::GraphError;

pub use activation::Activation;
pub use activation_layer::ActivationLayer;
pub use addition::AdditionLayer;
pub use context::{InitLayerContext, NodeTensors, RunLayerContext, TensorSpec, VarGrad, WeightSpec};
pub use fc::{FullyConnectedConfig, FullyConnectedLayer};
pub use identity::IdentityLayer;
pub use input::InputLayer;
pub use loss::{LossKind, LossLayer};
pub use multiout::MultiOutLayer;

/// How a layer behaves when its output shares the buffer of its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InPlaceSupport {
    /// Always needs a fresh output buffer.
    #[default]
    None,
    /// Element-wise writer: reading element `i` only precedes writing element `i`.
    ElementWise,
    /// Output is a view of the input; the layer never writes through it.
    View,
}

/// Capability set every graph node wraps.
pub trait Layer<B: Backend>: Debug {
    /// Type name, also the prefix of generated node names.
    fn layer_type(&self) -> &'static str;

    /// Validates input shapes, sets output shapes and requests buffers.
    fn finalize(&mut self, ctx: &mut InitLayerContext) -> Result<(), GraphError>;

    fn forward(&self, ctx: &mut RunLayerContext<'_, B>, training: bool) -> Result<(), GraphError>;

    /// Propagates the output derivative to the inputs.
    fn calc_derivative(&self, ctx: &mut RunLayerContext<'_, B>) -> Result<(), GraphError>;

    /// Adds weight gradients. Layers without weights keep the default.
    fn calc_gradient(&self, _ctx: &mut RunLayerContext<'_, B>) -> Result<(), GraphError> {
        Ok(())
    }

    /// Called when the graph batch size changes after finalize.
    fn set_batch(&mut self, _batch: usize) {}

    /// True when the layer owns weights that can be trained.
    fn is_trainable(&self) -> bool {
        false
    }

    /// Graph inputs have their output fed from outside.
    fn is_graph_input(&self) -> bool {
        false
    }

    fn in_place(&self) -> InPlaceSupport {
        InPlaceSupport::None
    }

    /// True when `calc_derivative` reads the layer's own output.
    fn needs_output_for_backward(&self) -> bool {
        false
    }

    /// The activation this layer applies, if it is an activation layer.
    fn activation(&self) -> Option<Activation> {
        None
    }

    /// The loss this layer computes, if it is a loss layer.
    fn loss(&self) -> Option<LossKind> {
        None
    }
}
