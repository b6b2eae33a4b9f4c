//! ModelGraphConfig - sequential builder for common feed-forward networks.
//!
//! Stacks fully connected layers behind a single input node and hands back a
//! compiled, initialized [`NetworkGraph`]. Buffers are left unallocated so
//! the caller can still request optimizer state first.

use burn::tensor::backend::Backend;

use crate::errors::GraphError;
use crate::graph::{LayerNode, NetworkGraph, NetworkGraphConfig};
use crate::layers::{Activation, FullyConnectedConfig, InputLayer};

/// Configuration for building a sequential network.
#[derive(Debug, Clone)]
pub struct ModelGraphConfig {
    /// Names of input features.
    pub features: Vec<String>,
    /// Fully connected layers with their activation, in order.
    pub layer_configs: Vec<(FullyConnectedConfig, Activation)>,
    /// Loss type appended at compile, if any.
    pub loss: Option<String>,
    /// Graph settings.
    pub graph: NetworkGraphConfig,
}

impl ModelGraphConfig {
    /// Creates a new ModelGraphConfig with the specified features.
    pub fn new(features: Vec<String>) -> Self {
        Self {
            features,
            layer_configs: Vec::new(),
            loss: None,
            graph: NetworkGraphConfig::default(),
        }
    }

    /// Creates a ModelGraphConfig with numbered features.
    pub fn with_feature_size(size: usize) -> Self {
        Self::new((0..size).map(|i| format!("feature_{}", i)).collect())
    }

    /// Adds a fully connected layer.
    pub fn dense(mut self, units: usize, activation: Activation) -> Self {
        self.layer_configs
            .push((FullyConnectedConfig::new(units), activation));
        self
    }

    /// Sets the loss type, e.g. `"mse"` or `"cross"`.
    pub fn loss(mut self, loss: impl Into<String>) -> Self {
        self.loss = Some(loss.into());
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.graph.batch_size = batch_size;
        self
    }

    /// Replaces the graph settings.
    pub fn graph_config(mut self, graph: NetworkGraphConfig) -> Self {
        self.graph = graph;
        self
    }

    /// Builds, compiles and initializes the network on `device`.
    pub fn build<B: Backend>(&self, device: &B::Device) -> Result<NetworkGraph<B>, GraphError> {
        if self.features.is_empty() {
            return Err(GraphError::config("model needs at least one feature"));
        }
        if self.layer_configs.is_empty() {
            return Err(GraphError::NoLayers);
        }

        let mut graph = NetworkGraph::with_config(self.graph.clone(), device.clone());
        graph.add_layer(LayerNode::new(InputLayer::new(self.features.len())).with_name("features"))?;
        for (i, (config, activation)) in self.layer_configs.iter().enumerate() {
            graph.add_layer(
                LayerNode::new(config.init())
                    .with_name(format!("dense_{i}"))
                    .with_activation(*activation),
            )?;
        }

        graph.compile(self.loss.as_deref())?;
        graph.initialize(&[], &[])?;
        Ok(graph)
    }
}
