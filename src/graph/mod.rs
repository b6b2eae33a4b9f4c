//! Network graph: building, compiling and running a layer dependency graph.
//!
//! Nodes are added by name and wired through `name` / `name(index)`
//! connections. Compiling rewrites the node set (activations, loss, fan-out
//! nodes), sorts it, decides which nodes take part in backwarding and which
//! can run in place, and lays out the forward/backward timeline the tensor
//! manager plans buffers against.
//!
//! # Example
//!
//! ```
//! use nngraph::graph::{LayerNode, NetworkGraph};
//! use nngraph::layers::{Activation, FullyConnectedConfig, InputLayer};
//! use nngraph::tensor::ExecutionMode;
//! use burn::backend::NdArray;
//! use burn::tensor::backend::Backend;
//!
//! type TestBackend = NdArray;
//! let device = <TestBackend as Backend>::Device::default();
//!
//! let mut graph = NetworkGraph::<TestBackend>::new(device);
//! graph.add_layer(LayerNode::new(InputLayer::new(4)).with_name("in")).unwrap();
//! graph
//!     .add_layer(LayerNode::new(FullyConnectedConfig::new(2).init()).with_activation(Activation::Relu))
//!     .unwrap();
//! graph.compile(Some("mse")).unwrap();
//! graph.initialize(&[], &[]).unwrap();
//! graph.allocate_weights().unwrap();
//! graph.allocate_tensors(ExecutionMode::Inference).unwrap();
//!
//! assert_eq!(graph.size(), 4);
//! ```

mod config;
mod connection;
mod core;
mod inplace;
mod network;
mod node;
mod realize;

pub use config::{GraphDescription, LayerConfig, NetworkGraphConfig, NodeConfig};
pub use connection::Connection;
pub use core::{GraphCore, GraphNode, NodeId};
pub use network::{BackwardStep, NetworkGraph};
pub use node::{ExecutionOrder, InPlace, LayerNode};
pub use realize::{LossFusionRule, RESERVED_NAMES};
