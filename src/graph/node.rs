//! LayerNode - one computation step of the network graph.

use burn::tensor::backend::Backend;

use super::connection::Connection;
use super::core::GraphNode;
use crate::errors::GraphError;
use crate::layers::{Activation, Layer, LossKind, NodeTensors, RunLayerContext};
use crate::tensor::{Lifespan, TensorDim, TensorManager};

/// Where a node sits on the iteration timeline.
///
/// With `n` nodes, forward steps are `0..n`. The node with backward order
/// `b` computes weight gradients at step `n + 2b` and derivatives at step
/// `n + 2b + 1`, so every buffer a node touches has a first and last use
/// step the tensor manager can plan against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionOrder {
    pub forward: usize,
    pub backward: Option<usize>,
    pub calc_gradient: Option<usize>,
    pub calc_derivative: Option<usize>,
}

impl ExecutionOrder {
    pub fn forward_only(forward: usize) -> Self {
        Self {
            forward,
            ..Self::default()
        }
    }

    pub fn with_backward(forward: usize, backward: usize, num_nodes: usize) -> Self {
        let gradient = num_nodes + 2 * backward;
        Self {
            forward,
            backward: Some(backward),
            calc_gradient: Some(gradient),
            calc_derivative: Some(gradient + 1),
        }
    }

    /// Steps of the backward hooks this node runs.
    pub fn backward_steps(&self) -> Vec<usize> {
        self.calc_gradient
            .into_iter()
            .chain(self.calc_derivative)
            .collect()
    }

    /// Steps at which a tensor of the given lifespan, owned by this node, is used.
    pub fn steps_for(&self, lifespan: Lifespan, max_step: usize) -> Vec<usize> {
        match lifespan {
            Lifespan::ForwardFunc => vec![self.forward],
            Lifespan::BackwardFunc => self.backward_steps(),
            Lifespan::ForwardDerivative => {
                let mut steps = vec![self.forward];
                steps.extend(self.backward_steps());
                steps
            }
            Lifespan::Iteration | Lifespan::Max => vec![self.forward, max_step],
        }
    }
}

/// In-place decision recorded on a node during compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InPlace {
    /// Output gets its own buffer.
    #[default]
    None,
    /// Output is a read-only view of the input buffer.
    NonRestricting,
    /// Output overwrites the input buffer, which nobody reads afterwards.
    Restricting,
}

/// A node of the network graph: a layer plus its wiring and bookkeeping.
#[derive(Debug)]
pub struct LayerNode<B: Backend> {
    name: String,
    layer: Box<dyn Layer<B>>,
    input_connections: Vec<Connection>,
    output_connections: Vec<Vec<Connection>>,
    activation: Activation,
    trainable: bool,
    shared_from: Option<String>,
    order: ExecutionOrder,
    needs_calc_derivative: bool,
    needs_calc_gradient: bool,
    in_place: InPlace,
    input_dims: Vec<TensorDim>,
    output_dims: Vec<TensorDim>,
    tensors: NodeTensors,
    loss: f32,
}

impl<B: Backend> LayerNode<B> {
    pub fn new<L: Layer<B> + 'static>(layer: L) -> Self {
        Self::from_boxed(Box::new(layer))
    }

    pub fn from_boxed(layer: Box<dyn Layer<B>>) -> Self {
        Self {
            name: String::new(),
            layer,
            input_connections: Vec::new(),
            output_connections: Vec::new(),
            activation: Activation::None,
            trainable: true,
            shared_from: None,
            order: ExecutionOrder::default(),
            needs_calc_derivative: false,
            needs_calc_gradient: false,
            in_place: InPlace::None,
            input_dims: Vec::new(),
            output_dims: Vec::new(),
            tensors: NodeTensors::default(),
            loss: 0.0,
        }
    }

    /// Sets the node name. Unnamed nodes are named when added to a graph.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the input connections, each `name` or `name(index)`.
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.input_connections = inputs
            .into_iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    /// Activation applied after the layer, split into its own node on compile.
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    /// Shares the weights of the named node instead of owning new ones.
    pub fn with_shared_from(mut self, node: impl Into<String>) -> Self {
        self.shared_from = Some(node.into());
        self
    }

    pub fn layer_type(&self) -> &'static str {
        self.layer.layer_type()
    }

    pub fn layer(&self) -> &dyn Layer<B> {
        self.layer.as_ref()
    }

    pub fn input_connections(&self) -> &[Connection] {
        &self.input_connections
    }

    pub(crate) fn input_connections_mut(&mut self) -> &mut Vec<Connection> {
        &mut self.input_connections
    }

    /// Consumers of each output slot.
    pub fn output_connections(&self) -> &[Vec<Connection>] {
        &self.output_connections
    }

    pub(crate) fn set_output_connections(&mut self, outputs: Vec<Vec<Connection>>) {
        self.output_connections = outputs;
    }

    pub fn num_outputs(&self) -> usize {
        self.output_connections.len().max(1)
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub(crate) fn take_activation(&mut self) -> Activation {
        std::mem::take(&mut self.activation)
    }

    /// True when the node has weights to train.
    pub fn is_trainable(&self) -> bool {
        self.trainable && self.layer.is_trainable()
    }

    pub fn shared_from(&self) -> Option<&str> {
        self.shared_from.as_deref()
    }

    pub(crate) fn set_shared_from(&mut self, node: Option<String>) {
        self.shared_from = node;
    }

    pub fn is_loss(&self) -> bool {
        self.layer.loss().is_some()
    }

    pub fn loss_kind(&self) -> Option<LossKind> {
        self.layer.loss()
    }

    pub fn execution_order(&self) -> ExecutionOrder {
        self.order
    }

    pub(crate) fn set_execution_order(&mut self, order: ExecutionOrder) {
        self.order = order;
    }

    pub fn forward_order(&self) -> usize {
        self.order.forward
    }

    pub fn backward_order(&self) -> Option<usize> {
        self.order.backward
    }

    /// True when the node takes part in backwarding.
    pub fn needs_gradient(&self) -> bool {
        self.needs_calc_derivative || self.needs_calc_gradient
    }

    /// True when a producer of this node wants its derivative.
    pub fn needs_calc_derivative(&self) -> bool {
        self.needs_calc_derivative
    }

    /// True when the node accumulates weight gradients.
    pub fn needs_calc_gradient(&self) -> bool {
        self.needs_calc_gradient
    }

    pub(crate) fn set_backward_flags(&mut self, calc_gradient: bool, calc_derivative: bool) {
        self.needs_calc_gradient = calc_gradient;
        self.needs_calc_derivative = calc_derivative;
    }

    pub fn in_place(&self) -> InPlace {
        self.in_place
    }

    pub(crate) fn set_in_place(&mut self, mode: InPlace) {
        self.in_place = mode;
    }

    pub fn input_dims(&self) -> &[TensorDim] {
        &self.input_dims
    }

    pub fn output_dims(&self) -> &[TensorDim] {
        &self.output_dims
    }

    pub(crate) fn set_dims(&mut self, inputs: Vec<TensorDim>, outputs: Vec<TensorDim>) {
        self.input_dims = inputs;
        self.output_dims = outputs;
    }

    /// Moves the node's batched shapes to `batch` and tells the layer.
    pub(crate) fn set_batch(&mut self, batch: usize) {
        self.layer.set_batch(batch);
        for dim in self.input_dims.iter_mut().chain(self.output_dims.iter_mut()) {
            *dim = dim.with_batch(batch);
        }
    }

    /// Buffer handles attached during initialize.
    pub fn tensors(&self) -> &NodeTensors {
        &self.tensors
    }

    pub(crate) fn set_tensors(&mut self, tensors: NodeTensors) {
        self.tensors = tensors;
    }

    pub(crate) fn layer_mut(&mut self) -> &mut dyn Layer<B> {
        self.layer.as_mut()
    }

    pub(crate) fn set_layer(&mut self, layer: Box<dyn Layer<B>>) {
        self.layer = layer;
    }

    /// Loss recorded by the last forward run; zero for non-loss nodes.
    pub fn loss(&self) -> f32 {
        self.loss
    }

    pub(crate) fn forward(
        &mut self,
        manager: &mut TensorManager<B>,
        training: bool,
    ) -> Result<(), GraphError> {
        let mut ctx =
            RunLayerContext::new(&self.name, &self.tensors, manager, self.order, &mut self.loss);
        self.layer.forward(&mut ctx, training)
    }

    pub(crate) fn calc_gradient(&mut self, manager: &mut TensorManager<B>) -> Result<(), GraphError> {
        let mut ctx =
            RunLayerContext::new(&self.name, &self.tensors, manager, self.order, &mut self.loss);
        self.layer.calc_gradient(&mut ctx)
    }

    pub(crate) fn calc_derivative(
        &mut self,
        manager: &mut TensorManager<B>,
    ) -> Result<(), GraphError> {
        let mut ctx =
            RunLayerContext::new(&self.name, &self.tensors, manager, self.order, &mut self.loss);
        self.layer.calc_derivative(&mut ctx)
    }
}

impl<B: Backend> GraphNode for LayerNode<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn input_connections(&self) -> &[Connection] {
        &self.input_connections
    }

    fn is_graph_input(&self) -> bool {
        self.layer.is_graph_input()
    }
}
