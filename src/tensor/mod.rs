//! Logical tensor descriptions and the tensor lifetime manager.
//!
//! The graph never owns buffers. Nodes hold [`TensorId`] handles, and the
//! [`TensorManager`] decides which physical slot backs each handle, based on
//! the execution-order window in which the tensor is used.

mod manager;
mod plan;

use std::fmt;

use burn::tensor::{Distribution, Tensor, backend::Backend};
use serde::{Deserialize, Serialize};

pub(crate) use manager::TensorRole;
pub use manager::{TensorManager, WeightUpdate};
pub use plan::{MemoryPlan, PlanRequest};

/// Two-dimensional tensor shape: `[batch, width]`.
///
/// Weights reuse the same shape type, with `batch` holding the fan-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDim {
    pub batch: usize,
    pub width: usize,
}

impl TensorDim {
    pub fn new(batch: usize, width: usize) -> Self {
        Self { batch, width }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.batch * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn with_batch(self, batch: usize) -> Self {
        Self { batch, ..self }
    }

    /// Shape in the form burn expects.
    pub fn shape(&self) -> [usize; 2] {
        [self.batch, self.width]
    }
}

impl fmt::Display for TensorDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.batch, self.width)
    }
}

/// Handle to a logical tensor owned by the [`TensorManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub(crate) usize);

impl TensorId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// How long a tensor has to stay alive, relative to its owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifespan {
    /// Only while the owning node runs forward.
    ForwardFunc,
    /// Only while the owning node runs its backward steps.
    BackwardFunc,
    /// From the owning node's forward step up to its backward steps.
    ForwardDerivative,
    /// One full iteration (forward and backward).
    Iteration,
    /// The whole run. Never shares its slot.
    Max,
}

/// Whether the graph runs training or inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Train,
    Inference,
}

/// Initial value of a tensor when its buffer is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    #[default]
    Zeros,
    Ones,
    Constant(f32),
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std: f32 },
    /// Glorot uniform, limit `sqrt(6 / (fan_in + fan_out))`.
    XavierUniform,
}

impl Initializer {
    /// Creates a tensor of the given shape on the device.
    pub fn init<B: Backend>(&self, dim: TensorDim, device: &B::Device) -> Tensor<B, 2> {
        let shape = dim.shape();
        match *self {
            Initializer::Zeros => Tensor::zeros(shape, device),
            Initializer::Ones => Tensor::ones(shape, device),
            Initializer::Constant(value) => Tensor::zeros(shape, device) + value,
            Initializer::Uniform { low, high } => Tensor::random(
                shape,
                Distribution::Uniform(low as f64, high as f64),
                device,
            ),
            Initializer::Normal { mean, std } => {
                Tensor::random(shape, Distribution::Normal(mean as f64, std as f64), device)
            }
            Initializer::XavierUniform => {
                let limit = (6.0 / (dim.batch + dim.width).max(1) as f64).sqrt();
                Tensor::random(shape, Distribution::Uniform(-limit, limit), device)
            }
        }
    }
}
