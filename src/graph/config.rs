//! Graph configuration and declarative graph descriptions.

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use super::node::LayerNode;
use super::realize::LossFusionRule;
use crate::errors::GraphError;
use crate::layers::{
    Activation, ActivationLayer, AdditionLayer, FullyConnectedConfig, IdentityLayer, InputLayer,
    Layer, LossKind, LossLayer, MultiOutLayer,
};

/// Configuration for a network graph.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkGraphConfig {
    /// Batch size tensors are finalized with.
    pub batch_size: usize,
    /// Whether in-place execution and slot sharing are enabled.
    pub optimize_memory: bool,
    /// Upper bound, in elements, on allocated buffers.
    pub memory_limit: Option<usize>,
    /// Activation/loss pairs folded into a single loss node.
    pub fusion_rules: Vec<LossFusionRule>,
}

impl Default for NetworkGraphConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            optimize_memory: true,
            memory_limit: None,
            fusion_rules: LossFusionRule::defaults(),
        }
    }
}

impl NetworkGraphConfig {
    /// Creates a new NetworkGraphConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enables or disables memory optimizations.
    pub fn optimize_memory(mut self, enable: bool) -> Self {
        self.optimize_memory = enable;
        self
    }

    /// Sets the allocation budget in elements.
    pub fn memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = Some(limit);
        self
    }

    /// Replaces the loss fusion rule table.
    pub fn fusion_rules(mut self, rules: Vec<LossFusionRule>) -> Self {
        self.fusion_rules = rules;
        self
    }
}

/// Layer type and its parameters, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerConfig {
    Input { input_shape: usize },
    FullyConnected(FullyConnectedConfig),
    /// Applies the node's `activation`.
    Activation,
    Addition,
    Multiout,
    Identity,
    Mse,
    Cross,
    CrossSoftmax,
    CrossSigmoid,
}

impl LayerConfig {
    /// Creates the layer. `activation` only matters for activation layers.
    pub fn build<B: Backend>(&self, activation: Activation) -> Box<dyn Layer<B>> {
        match self {
            LayerConfig::Input { input_shape } => Box::new(InputLayer::new(*input_shape)),
            LayerConfig::FullyConnected(config) => Box::new(config.init()),
            LayerConfig::Activation => Box::new(ActivationLayer::new(activation)),
            LayerConfig::Addition => Box::new(AdditionLayer),
            LayerConfig::Multiout => Box::new(MultiOutLayer),
            LayerConfig::Identity => Box::new(IdentityLayer),
            LayerConfig::Mse => Box::new(LossLayer::new(LossKind::Mse)),
            LayerConfig::Cross => Box::new(LossLayer::new(LossKind::Cross)),
            LayerConfig::CrossSoftmax => Box::new(LossLayer::new(LossKind::CrossSoftmax)),
            LayerConfig::CrossSigmoid => Box::new(LossLayer::new(LossKind::CrossSigmoid)),
        }
    }
}

fn default_trainable() -> bool {
    true
}

/// Declarative description of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Input connections, `name` or `name(index)`.
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default = "default_trainable")]
    pub trainable: bool,
    #[serde(default)]
    pub shared_from: Option<String>,
    #[serde(flatten)]
    pub layer: LayerConfig,
}

impl NodeConfig {
    pub fn into_node<B: Backend>(self) -> Result<LayerNode<B>, GraphError> {
        let is_activation_layer = self.layer == LayerConfig::Activation;
        let mut node = LayerNode::from_boxed(self.layer.build(self.activation))
            .with_inputs(&self.inputs)?
            .with_trainable(self.trainable);
        if !is_activation_layer {
            node = node.with_activation(self.activation);
        }
        if let Some(name) = self.name {
            node = node.with_name(name);
        }
        if let Some(shared) = self.shared_from {
            node = node.with_shared_from(shared);
        }
        Ok(node)
    }
}

/// A whole graph: nodes in insertion order plus an optional loss type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    pub layers: Vec<NodeConfig>,
    #[serde(default)]
    pub loss: Option<String>,
}

impl GraphDescription {
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphNode;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_default_config() {
        let config = NetworkGraphConfig::default();
        assert_eq!(config.batch_size, 1);
        assert!(config.optimize_memory);
        assert_eq!(config.memory_limit, None);
        assert_eq!(config.fusion_rules.len(), 2);
    }

    #[test]
    fn test_config_builder() {
        let config = NetworkGraphConfig::new()
            .batch_size(8)
            .optimize_memory(false)
            .memory_limit(1024)
            .fusion_rules(Vec::new());

        assert_eq!(config.batch_size, 8);
        assert!(!config.optimize_memory);
        assert_eq!(config.memory_limit, Some(1024));
        assert!(config.fusion_rules.is_empty());
    }

    #[test]
    fn test_description_from_json() {
        let json = r#"{
            "layers": [
                {"name": "in", "type": "input", "input_shape": 4},
                {"name": "fc", "type": "fully_connected", "unit": 2, "inputs": ["in"],
                 "activation": "softmax", "trainable": false},
                {"name": "act", "type": "activation", "activation": "relu"}
            ],
            "loss": "cross"
        }"#;
        let description = GraphDescription::from_json(json).unwrap();

        assert_eq!(description.layers.len(), 3);
        assert_eq!(description.loss.as_deref(), Some("cross"));
        assert_eq!(
            description.layers[1].layer,
            LayerConfig::FullyConnected(FullyConnectedConfig::new(2))
        );

        let nodes: Vec<LayerNode<TestBackend>> = description
            .layers
            .into_iter()
            .map(NodeConfig::into_node::<TestBackend>)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(nodes[1].name(), "fc");
        assert_eq!(nodes[1].activation(), Activation::Softmax);
        assert_eq!(nodes[2].layer().activation(), Some(Activation::Relu));
        assert_eq!(nodes[2].activation(), Activation::None);
        assert!(!nodes[1].is_trainable());
    }

    #[test]
    fn test_description_rejects_unknown_type() {
        let json = r#"{"layers": [{"type": "conv9d"}]}"#;
        let err = GraphDescription::from_json(json).unwrap_err();
        assert!(matches!(err, GraphError::Serialization(_)));
    }
}
