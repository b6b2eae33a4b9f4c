//! # nngraph
//!
//! A dependency-graph compiler and executor for layered neural networks.
//!
//! Layers are added to a [`NetworkGraph`] by name and wired through named
//! connections. Compiling the graph realizes implicit structure (activation
//! nodes, the loss node, fan-out nodes), sorts it topologically, marks the
//! nodes that take part in backwarding and decides which nodes may run in
//! place. Initializing it finalizes every layer and registers its buffers
//! with a [`TensorManager`], which plans physical memory from the usage
//! window of each tensor.
//!
//! ## Features
//!
//! - **Burn Backend**: Tensors and kernels come from the Burn framework, for
//!   any `burn::tensor::backend::Backend`.
//! - **Explicit backward**: Layers compute their own derivatives and weight
//!   gradients; no autodiff backend is involved.
//! - **Memory planning**: Tensors whose lifetimes do not overlap share
//!   buffers, and element-wise layers can overwrite their input.
//!
//! ## Example
//!
//! ```
//! use nngraph::prelude::*;
//! use burn::backend::NdArray;
//!
//! type Backend = NdArray;
//!
//! let device = <Backend as burn::tensor::backend::Backend>::Device::default();
//!
//! let mut graph: NetworkGraph<Backend> = ModelGraphConfig::with_feature_size(2)
//!     .dense(4, Activation::Relu)
//!     .dense(1, Activation::None)
//!     .loss("mse")
//!     .build(&device)
//!     .expect("Failed to build model");
//!
//! let inputs = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
//! let targets = vec![vec![1.0], vec![-1.0]];
//! let config = TrainingConfig::new().epochs(5).batch_size(2).verbose(false);
//! let result = train(&mut graph, &inputs, &targets, &config).unwrap();
//! assert_eq!(result.loss_history.len(), 5);
//! ```

pub mod errors;
pub mod graph;
pub mod layers;
pub mod model_graph;
pub mod tensor;
pub mod training;

// Re-exports for convenience
pub use errors::GraphError;
pub use graph::{LayerNode, NetworkGraph, NetworkGraphConfig};
pub use layers::activation::Activation;
pub use model_graph::ModelGraphConfig;
pub use tensor::{ExecutionMode, TensorDim, TensorManager};
pub use training::{TrainingConfig, train};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::errors::GraphError;
    pub use crate::graph::{GraphDescription, LayerNode, NetworkGraph, NetworkGraphConfig};
    pub use crate::layers::activation::Activation;
    pub use crate::layers::{FullyConnectedConfig, InputLayer};
    pub use crate::model_graph::ModelGraphConfig;
    pub use crate::tensor::{ExecutionMode, TensorDim};
    pub use crate::training::{Sgd, TrainingConfig, train};
}
