//! NetworkGraph - compiles a node set into an execution plan and runs it.
//!
//! The lifecycle is `add_layer` / `extend_graph`, then `compile`, then
//! `initialize`, then `allocate_weights` and `allocate_tensors`, after which
//! `forwarding` and `backwarding` can run any number of times.

use std::collections::{HashMap, HashSet};

use burn::tensor::{Tensor, backend::Backend};

use super::config::{GraphDescription, NetworkGraphConfig};
use super::core::{GraphCore, GraphNode, NodeId};
use super::inplace::can_execute_in_place;
use super::node::{ExecutionOrder, InPlace, LayerNode};
use super::realize::{self, LossFusionRule};
use crate::errors::GraphError;
use crate::layers::{InitLayerContext, NodeTensors, VarGrad};
use crate::tensor::{
    ExecutionMode, Initializer, Lifespan, TensorDim, TensorId, TensorManager, TensorRole,
    WeightUpdate,
};

/// The node that just finished its backward step, handed to the
/// `backwarding` callback.
pub struct BackwardStep<'a, B: Backend> {
    node: &'a LayerNode<B>,
    manager: &'a mut TensorManager<B>,
}

impl<B: Backend> BackwardStep<'_, B> {
    pub fn node(&self) -> &LayerNode<B> {
        self.node
    }

    /// Applies the gradient of every weight whose last gradient access is
    /// this node. Returns how many weights were applied.
    pub fn apply_gradients_on_last_access<F>(&mut self, apply: F) -> Result<usize, GraphError>
    where
        F: FnMut(&mut WeightUpdate<B>),
    {
        apply_on_last_access(self.node, self.manager, apply)
    }
}

fn apply_on_last_access<B, F>(
    node: &LayerNode<B>,
    manager: &mut TensorManager<B>,
    mut apply: F,
) -> Result<usize, GraphError>
where
    B: Backend,
    F: FnMut(&mut WeightUpdate<B>),
{
    let Some(step) = node.execution_order().calc_gradient else {
        return Ok(0);
    };
    let mut applied = 0;
    for &idx in &node.tensors().weights {
        if manager.weight_is_trainable(idx) && manager.is_gradient_last_access(idx, step) {
            manager.apply_gradient(idx, &mut apply)?;
            applied += 1;
        }
    }
    Ok(applied)
}

/// A network of layer nodes, compiled into a forward/backward plan whose
/// buffers live in a [`TensorManager`].
#[derive(Debug)]
pub struct NetworkGraph<B: Backend> {
    graph: GraphCore<LayerNode<B>>,
    manager: TensorManager<B>,
    sub_in_out: HashMap<String, String>,
    compiled: bool,
    initialized: bool,
    batch_size: usize,
    optimize_memory: bool,
    exec_mode: ExecutionMode,
    fusion_rules: Vec<LossFusionRule>,
    inputs: Vec<TensorId>,
    labels: Vec<TensorId>,
    outputs: Vec<TensorId>,
}

impl<B: Backend> NetworkGraph<B> {
    pub fn new(device: B::Device) -> Self {
        Self::with_config(NetworkGraphConfig::default(), device)
    }

    pub fn with_config(config: NetworkGraphConfig, device: B::Device) -> Self {
        let mut manager = TensorManager::new(device);
        manager.set_optimizations(config.optimize_memory);
        manager.set_memory_limit(config.memory_limit);
        Self {
            graph: GraphCore::new(),
            manager,
            sub_in_out: HashMap::new(),
            compiled: false,
            initialized: false,
            batch_size: config.batch_size.max(1),
            optimize_memory: config.optimize_memory,
            exec_mode: ExecutionMode::Train,
            fusion_rules: config.fusion_rules,
            inputs: Vec::new(),
            labels: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Builds an uncompiled graph holding the described nodes.
    pub fn from_description(
        description: &GraphDescription,
        config: NetworkGraphConfig,
        device: B::Device,
    ) -> Result<Self, GraphError> {
        let mut graph = Self::with_config(config, device);
        for node in &description.layers {
            graph.add_layer(node.clone().into_node()?)?;
        }
        Ok(graph)
    }

    /// Adds a node. Unnamed nodes are named after their type plus a counter.
    pub fn add_layer(&mut self, mut node: LayerNode<B>) -> Result<(), GraphError> {
        if self.compiled {
            return Err(GraphError::AlreadyCompiled);
        }
        if node.name().is_empty() {
            let name = realize::unique_name(node.layer_type(), |c| self.graph.contains(c));
            node.set_name(name);
        }
        for conn in node.input_connections_mut().iter_mut() {
            if let Some(mapped) = self.sub_in_out.get(conn.name()) {
                conn.set_name(mapped.clone());
            }
        }
        self.graph.add_node(node)?;
        Ok(())
    }

    /// Grafts a graph fragment after the last node added so far.
    ///
    /// The fragment's input nodes are dropped and whatever read from them
    /// reads from the attachment point instead. Node names get `prefix`,
    /// and later nodes may name `prefix` itself to read the fragment's
    /// last node.
    pub fn extend_graph(
        &mut self,
        nodes: Vec<LayerNode<B>>,
        prefix: &str,
    ) -> Result<(), GraphError> {
        if self.compiled {
            return Err(GraphError::AlreadyCompiled);
        }
        if self.sub_in_out.contains_key(prefix) {
            return Err(GraphError::config(format!("prefix {prefix} is already used")));
        }
        let attach = self
            .graph
            .iter()
            .last()
            .map(|n| n.name().to_string())
            .ok_or_else(|| GraphError::config("cannot extend an empty graph"))?;

        let dropped: HashSet<String> = nodes
            .iter()
            .filter(|n| n.is_graph_input())
            .map(|n| n.name().to_string())
            .collect();
        let members: HashSet<String> = nodes.iter().map(|n| n.name().to_string()).collect();

        let mut last = None;
        for mut node in nodes.into_iter().filter(|n| !n.is_graph_input()) {
            for conn in node.input_connections_mut().iter_mut() {
                let target = if dropped.contains(conn.name()) {
                    attach.clone()
                } else {
                    format!("{prefix}{}", conn.name())
                };
                conn.set_name(target);
            }
            let shared = node
                .shared_from()
                .filter(|s| members.contains(*s))
                .map(|s| format!("{prefix}{s}"));
            if shared.is_some() {
                node.set_shared_from(shared);
            }
            if !node.name().is_empty() {
                let name = format!("{prefix}{}", node.name());
                node.set_name(name);
            }
            self.add_layer(node)?;
            last = self.graph.iter().last().map(|n| n.name().to_string());
        }

        for name in dropped {
            self.sub_in_out.insert(format!("{prefix}{name}"), attach.clone());
        }
        if let Some(last) = last {
            self.sub_in_out.insert(prefix.to_string(), last);
        }
        Ok(())
    }

    /// Nodes between `input` and `output` (inclusive) in insertion order.
    /// Empty names stand for the first and last node.
    pub fn get_unsorted_layers(
        &self,
        input: &str,
        output: &str,
    ) -> Result<Vec<&LayerNode<B>>, GraphError> {
        if self.graph.is_empty() {
            return Ok(Vec::new());
        }
        let lookup = |name: &str, default: NodeId| -> Result<NodeId, GraphError> {
            if name.is_empty() {
                return Ok(default);
            }
            self.graph
                .node_id(name)
                .ok_or_else(|| GraphError::config(format!("unknown node {name}")))
        };
        let start = lookup(input, 0)?;
        let end = lookup(output, self.graph.len() - 1)?;
        if start > end {
            return Err(GraphError::config(format!(
                "{input} is added after {output}"
            )));
        }
        Ok((start..=end).map(|id| self.graph.node(id)).collect())
    }

    /// Realizes, validates, sorts and orders the graph.
    ///
    /// On failure the graph stays uncompiled.
    pub fn compile(&mut self, loss: Option<&str>) -> Result<(), GraphError> {
        if self.compiled {
            return Err(GraphError::AlreadyCompiled);
        }
        if self.graph.is_empty() {
            return Err(GraphError::NoLayers);
        }

        let mut nodes = self.graph.take_nodes();
        let realized = realize::realize_graph(&mut nodes, loss, &self.fusion_rules);
        self.graph.replace_nodes(nodes)?;
        realized?;

        self.is_compilable()?;
        self.graph.topological_sort()?;
        self.check_compiled_graph()?;
        self.mark_nodes_for_backwarding()?;
        self.set_execution_order();
        if self.optimize_memory {
            self.in_place_optimize()?;
        }

        self.compiled = true;
        log::info!(
            "compiled graph: {} nodes, {} in backward",
            self.graph.len(),
            self.graph.iter().filter(|n| n.needs_gradient()).count()
        );
        Ok(())
    }

    fn is_compilable(&self) -> Result<(), GraphError> {
        if self.graph.is_empty() {
            return Err(GraphError::NoLayers);
        }
        if !self.graph.iter().any(|n| n.is_graph_input()) {
            return Err(GraphError::config("graph has no input layer"));
        }
        if !self.graph.iter().any(|n| n.output_connections().is_empty()) {
            return Err(GraphError::config("graph has no output layer"));
        }
        Ok(())
    }

    /// Re-verifies that every node runs after all of its producers.
    fn check_compiled_graph(&self) -> Result<(), GraphError> {
        let sorted = self.graph.sorted_ids();
        if sorted.len() != self.graph.len() {
            return Err(GraphError::CompiledGraphInvalid {
                message: "sorted order does not cover every node".to_string(),
            });
        }
        let mut position = vec![0; self.graph.len()];
        for (pos, &id) in sorted.iter().enumerate() {
            position[id] = pos;
        }

        for (pos, &id) in sorted.iter().enumerate() {
            for producer in self.graph.producers(id)? {
                if position[producer] >= pos {
                    return Err(GraphError::CompiledGraphInvalid {
                        message: format!(
                            "{} runs before its input {}",
                            self.graph.node(id).name(),
                            self.graph.node(producer).name()
                        ),
                    });
                }
            }
        }

        match self.graph.get_sorted_node(0) {
            Some(first) if first.is_graph_input() => Ok(()),
            _ => Err(GraphError::CompiledGraphInvalid {
                message: "first node is not an input".to_string(),
            }),
        }
    }

    /// A node takes part in backwarding when it is trainable or reads from
    /// a node that does.
    fn mark_nodes_for_backwarding(&mut self) -> Result<(), GraphError> {
        let mut participates = vec![false; self.graph.len()];
        for pos in 0..self.graph.len() {
            let id = self.graph.sorted_ids()[pos];
            let from_producers = self
                .graph
                .producers(id)?
                .iter()
                .any(|&p| participates[p]);
            let trainable = self.graph.node(id).is_trainable();
            participates[id] = trainable || from_producers;
            self.graph
                .node_mut(id)
                .set_backward_flags(trainable, from_producers);
        }
        Ok(())
    }

    fn set_execution_order(&mut self) {
        let n = self.graph.len();
        let sorted = self.graph.sorted_ids().to_vec();

        let mut orders = vec![ExecutionOrder::default(); n];
        for (forward, &id) in sorted.iter().enumerate() {
            orders[id] = ExecutionOrder::forward_only(forward);
        }
        let mut backward = 0;
        for &id in sorted.iter().rev() {
            if self.graph.node(id).needs_gradient() {
                orders[id] = ExecutionOrder::with_backward(orders[id].forward, backward, n);
                backward += 1;
            }
        }
        for (id, order) in orders.into_iter().enumerate() {
            self.graph.node_mut(id).set_execution_order(order);
        }

        let max_step = if backward == 0 {
            n.saturating_sub(1)
        } else {
            n + 2 * backward - 1
        };
        self.manager.set_execution_bounds(n, max_step);
    }

    fn in_place_optimize(&mut self) -> Result<(), GraphError> {
        for pos in 0..self.graph.len() {
            let id = self.graph.sorted_ids()[pos];
            let mode = can_execute_in_place(&self.graph, id)?;
            if mode != InPlace::None {
                log::debug!("{} runs in place ({mode:?})", self.graph.node(id).name());
            }
            self.graph.node_mut(id).set_in_place(mode);
        }
        Ok(())
    }

    /// How the named node may share its input buffer, given the compiled graph.
    pub fn can_execute_in_place(&self, name: &str) -> Result<InPlace, GraphError> {
        if !self.compiled {
            return Err(GraphError::NotCompiled);
        }
        let id = self
            .graph
            .node_id(name)
            .ok_or_else(|| GraphError::config(format!("unknown node {name}")))?;
        can_execute_in_place(&self.graph, id)
    }

    /// Finalizes every node in sorted order and registers its buffers.
    ///
    /// Empty name lists select every input node and every loss node.
    pub fn initialize(
        &mut self,
        input_names: &[&str],
        label_names: &[&str],
    ) -> Result<(), GraphError> {
        if !self.compiled {
            return Err(GraphError::NotCompiled);
        }
        if self.initialized {
            return Err(GraphError::config("graph is already initialized"));
        }

        if let Err(err) = self.finalize_all(input_names, label_names) {
            self.manager.reset();
            return Err(err);
        }
        self.initialized = true;
        log::info!(
            "initialized graph: {} inputs, {} labels, {} outputs, {} weights",
            self.inputs.len(),
            self.labels.len(),
            self.outputs.len(),
            self.manager.num_weights()
        );
        Ok(())
    }

    fn finalize_all(&mut self, input_names: &[&str], label_names: &[&str]) -> Result<(), GraphError> {
        for pos in 0..self.graph.len() {
            let id = self.graph.sorted_ids()[pos];
            self.finalize_context(id)?;
        }

        let input_nodes = self.select_nodes(input_names, |n| n.is_graph_input(), "input")?;
        let label_nodes = self.select_nodes(label_names, |n| n.is_loss(), "loss")?;

        self.inputs = input_nodes
            .iter()
            .filter_map(|&id| self.graph.node(id).tensors().outputs.first())
            .map(|slot| slot.var)
            .collect();
        self.labels = label_nodes
            .iter()
            .filter_map(|&id| self.graph.node(id).tensors().label)
            .collect();
        self.outputs = self
            .graph
            .iter_sorted()
            .filter(|n| n.output_connections().is_empty())
            .flat_map(|n| n.tensors().outputs.iter().map(|slot| slot.var))
            .collect();
        Ok(())
    }

    /// Resolves `names` to nodes accepted by `accept`; every accepted node
    /// in sorted order when `names` is empty.
    fn select_nodes<F>(&self, names: &[&str], accept: F, what: &str) -> Result<Vec<NodeId>, GraphError>
    where
        F: Fn(&LayerNode<B>) -> bool,
    {
        if names.is_empty() {
            return Ok(self
                .graph
                .sorted_ids()
                .iter()
                .copied()
                .filter(|&id| accept(self.graph.node(id)))
                .collect());
        }
        names
            .iter()
            .map(|name| {
                self.graph
                    .node_id(name)
                    .filter(|&id| accept(self.graph.node(id)))
                    .ok_or_else(|| GraphError::config(format!("{name} is not a {what} node")))
            })
            .collect()
    }

    /// Finalizes one node against its producers' output shapes and turns
    /// its requests into manager handles bound to its execution order.
    fn finalize_context(&mut self, id: NodeId) -> Result<(), GraphError> {
        let node = self.graph.node(id);
        let name = node.name().to_string();
        let order = node.execution_order();
        let participates = node.needs_gradient();
        let calc_gradient = node.needs_calc_gradient();
        let graph_input = node.is_graph_input();
        let has_consumers = !node.output_connections().is_empty();
        let keeps_output = node.layer().needs_output_for_backward();
        let mut mode = node.in_place();

        let owner = match node.shared_from() {
            Some(shared) if !self.graph.contains(shared) => {
                return Err(GraphError::config(format!(
                    "{name} shares weights with unknown node {shared}"
                )));
            }
            Some(shared) => shared.to_string(),
            None => name.clone(),
        };

        let mut inputs = Vec::with_capacity(node.input_connections().len());
        for conn in node.input_connections() {
            let producer = self.graph.get_node(conn.name()).ok_or_else(|| {
                GraphError::UnresolvedInput {
                    node: name.clone(),
                    input: conn.name().to_string(),
                }
            })?;
            let slot = producer
                .tensors()
                .outputs
                .get(conn.index())
                .copied()
                .ok_or_else(|| GraphError::Layer {
                    node: name.clone(),
                    message: format!("{} has no output {}", conn.name(), conn.index()),
                })?;
            inputs.push(slot);
        }
        let input_dims: Vec<TensorDim> = inputs.iter().map(|s| self.manager.dim(s.var)).collect();

        let mut ctx = InitLayerContext::new(
            &name,
            input_dims.clone(),
            node.num_outputs(),
            self.batch_size,
            node.is_trainable(),
        );
        self.graph.node_mut(id).layer_mut().finalize(&mut ctx)?;
        let output_dims = ctx.output_dims().to_vec();

        if mode != InPlace::None {
            let same_shape = input_dims.len() == 1 && output_dims.iter().all(|d| *d == input_dims[0]);
            if !same_shape {
                log::warn!("{name}: output shape differs from its input, running out of place");
                mode = InPlace::None;
                self.graph.node_mut(id).set_in_place(mode);
            }
        }

        let backward_steps = order.backward_steps();
        let mut read_steps = vec![order.forward];
        read_steps.extend(&backward_steps);
        for slot in &inputs {
            self.manager.add_orders(slot.var, &read_steps);
            if let (Some(grad), Some(step)) = (slot.grad, order.calc_derivative) {
                self.manager.add_orders(grad, &[step]);
            }
        }

        let mut output_steps = vec![order.forward];
        if keeps_output {
            output_steps.extend(&backward_steps);
        }
        if !has_consumers {
            // graph outputs stay readable once the iteration is over
            let last_forward = self.graph.len().saturating_sub(1);
            output_steps.extend([last_forward, self.manager.max_step()]);
        }
        let role = if graph_input {
            TensorRole::External
        } else {
            TensorRole::Variable
        };
        let mut outputs = Vec::with_capacity(output_dims.len());
        for (i, dim) in output_dims.iter().enumerate() {
            let var_name = format!("{name}:output{i}");
            let var = match (mode, inputs.first()) {
                (InPlace::None, _) | (_, None) => self.manager.request_tensor(
                    &var_name,
                    *dim,
                    Initializer::Zeros,
                    Lifespan::ForwardDerivative,
                    role,
                    output_steps.clone(),
                )?,
                (_, Some(input)) => {
                    self.manager
                        .request_alias(input.var, &var_name, output_steps.clone())?
                }
            };

            let grad = if participates && has_consumers && !graph_input {
                let grad_name = format!("{var_name}:grad");
                let input_grad = inputs.first().and_then(|s| s.grad);
                Some(match (mode, input_grad) {
                    (InPlace::Restricting, Some(input_grad)) => {
                        self.manager
                            .request_alias(input_grad, &grad_name, backward_steps.clone())?
                    }
                    _ => self.manager.request_tensor(
                        &grad_name,
                        *dim,
                        Initializer::Zeros,
                        Lifespan::BackwardFunc,
                        TensorRole::Derivative,
                        backward_steps.clone(),
                    )?,
                })
            } else {
                None
            };
            outputs.push(VarGrad { var, grad });
        }

        let gradient_step = order.calc_gradient.filter(|_| calc_gradient);
        let mut weights = Vec::with_capacity(ctx.weights().len());
        for spec in ctx.weights() {
            let idx = self.manager.request_weight(
                &format!("{owner}:{}", spec.name),
                spec.dim,
                spec.initializer,
                spec.trainable,
                order.forward,
                gradient_step,
            )?;
            weights.push(idx);
        }

        let max_step = self.manager.max_step();
        let mut tensors = Vec::with_capacity(ctx.tensors().len());
        for spec in ctx.tensors() {
            let id = self.manager.request_tensor(
                &format!("{name}:{}", spec.name),
                spec.dim,
                spec.initializer,
                spec.lifespan,
                TensorRole::Temporary,
                order.steps_for(spec.lifespan, max_step),
            )?;
            tensors.push(id);
        }

        let label = ctx
            .label()
            .map(|dim| {
                self.manager.request_tensor(
                    &format!("{name}:label"),
                    dim,
                    Initializer::Zeros,
                    Lifespan::Iteration,
                    TensorRole::External,
                    Vec::new(),
                )
            })
            .transpose()?;

        log::debug!("finalized {name}: {input_dims:?} -> {output_dims:?}");
        let node = self.graph.node_mut(id);
        node.set_dims(input_dims, output_dims);
        node.set_tensors(NodeTensors {
            inputs,
            outputs,
            weights,
            tensors,
            label,
        });
        Ok(())
    }

    /// Plans and materializes variables and derivatives for `mode`.
    pub fn allocate_tensors(&mut self, mode: ExecutionMode) -> Result<(), GraphError> {
        if !self.initialized {
            return Err(GraphError::NotInitialized);
        }
        self.manager.allocate_tensors(mode)?;
        self.exec_mode = mode;
        Ok(())
    }

    /// Materializes weights, alive up to the last step of an iteration.
    pub fn allocate_weights(&mut self) -> Result<(), GraphError> {
        if !self.initialized {
            return Err(GraphError::NotInitialized);
        }
        let max_step = self.manager.max_step();
        self.manager.allocate_weights(max_step)
    }

    pub fn deallocate_tensors(&mut self, dealloc_weights: bool) {
        self.manager.deallocate_tensors(dealloc_weights);
    }

    pub fn deallocate_weights(&mut self) {
        self.manager.deallocate_weights();
    }

    /// Enables or disables memory optimizations. In-place decisions are
    /// taken by `compile`, so this should be set before compiling.
    pub fn set_memory_optimizations(&mut self, enable: bool) {
        self.manager.set_optimizations(enable);
        self.optimize_memory = enable;
    }

    /// Requests optimizer state for every trainable weight, with the dims
    /// returned by `dims` for each weight dim.
    pub fn request_optimizer_variable<F>(&mut self, dims: F) -> Result<(), GraphError>
    where
        F: FnMut(&TensorDim) -> Vec<TensorDim>,
    {
        if !self.initialized {
            return Err(GraphError::NotInitialized);
        }
        if self.manager.is_weights_allocated() {
            return Err(GraphError::resource(
                "optimizer variables must be requested before weights are allocated",
            ));
        }
        self.manager.request_optimizer_variables(dims)
    }

    /// Changes the batch size. Rejected while tensors are allocated.
    pub fn set_batch_size(&mut self, batch: usize) -> Result<(), GraphError> {
        if batch == 0 {
            return Err(GraphError::config("batch size must be positive"));
        }
        if self.manager.is_allocated() {
            return Err(GraphError::resource(
                "cannot change batch size while tensors are allocated",
            ));
        }
        self.batch_size = batch;
        if self.initialized {
            self.manager.set_batch(batch)?;
            for id in 0..self.graph.len() {
                self.graph.node_mut(id).set_batch(batch);
            }
        }
        Ok(())
    }

    /// Feeds the graph inputs and, for training, the labels.
    pub fn set_inputs_labels(
        &mut self,
        inputs: Vec<Tensor<B, 2>>,
        labels: Vec<Tensor<B, 2>>,
    ) -> Result<(), GraphError> {
        if !self.manager.is_allocated() {
            return Err(GraphError::NotAllocated);
        }
        if inputs.len() != self.inputs.len() {
            return Err(GraphError::config(format!(
                "expected {} inputs, got {}",
                self.inputs.len(),
                inputs.len()
            )));
        }
        if !labels.is_empty() && labels.len() != self.labels.len() {
            return Err(GraphError::config(format!(
                "expected {} labels, got {}",
                self.labels.len(),
                labels.len()
            )));
        }

        for (&id, tensor) in self.inputs.iter().zip(inputs) {
            self.manager.set(id, tensor)?;
        }
        for (&id, tensor) in self.labels.iter().zip(labels) {
            self.manager.set(id, tensor)?;
        }
        Ok(())
    }

    fn check_runnable(&self) -> Result<(), GraphError> {
        if !self.compiled {
            return Err(GraphError::NotCompiled);
        }
        if !self.initialized {
            return Err(GraphError::NotInitialized);
        }
        if !self.manager.is_allocated() || !self.manager.is_weights_allocated() {
            return Err(GraphError::NotAllocated);
        }
        Ok(())
    }

    /// Runs every node in forward order and returns the graph outputs.
    pub fn forwarding(&mut self, training: bool) -> Result<Vec<Tensor<B, 2>>, GraphError> {
        self.check_runnable()?;
        if training && self.exec_mode == ExecutionMode::Inference {
            return Err(GraphError::config(
                "training needs tensors allocated for training",
            ));
        }

        for pos in 0..self.graph.len() {
            let id = self.graph.sorted_ids()[pos];
            self.graph.node_mut(id).forward(&mut self.manager, training)?;
        }
        self.get_output_tensors()
    }

    /// Runs backward over the nodes taking part in it, in reverse order.
    ///
    /// Each node computes its weight gradients, then its derivatives, then
    /// `op` is called with the node and `iteration`.
    pub fn backwarding<F>(&mut self, iteration: usize, mut op: F) -> Result<(), GraphError>
    where
        F: FnMut(&mut BackwardStep<'_, B>, usize) -> Result<(), GraphError>,
    {
        self.check_runnable()?;
        if self.exec_mode != ExecutionMode::Train {
            return Err(GraphError::config(
                "backwarding needs tensors allocated for training",
            ));
        }

        for pos in (0..self.graph.len()).rev() {
            let id = self.graph.sorted_ids()[pos];
            let node = self.graph.node_mut(id);
            if !node.needs_gradient() {
                continue;
            }
            if node.needs_calc_gradient() {
                node.calc_gradient(&mut self.manager)?;
            }
            if node.needs_calc_derivative() {
                node.calc_derivative(&mut self.manager)?;
            }

            let mut step = BackwardStep {
                node: self.graph.node(id),
                manager: &mut self.manager,
            };
            op(&mut step, iteration)?;
        }
        Ok(())
    }

    /// Applies the gradients of the named node's weights, for those weights
    /// whose last gradient access is this node. No-op otherwise.
    pub fn apply_gradients_on_last_access<F>(
        &mut self,
        name: &str,
        apply: F,
    ) -> Result<usize, GraphError>
    where
        F: FnMut(&mut WeightUpdate<B>),
    {
        let node = self
            .graph
            .get_node(name)
            .ok_or_else(|| GraphError::config(format!("unknown node {name}")))?;
        apply_on_last_access(node, &mut self.manager, apply)
    }

    /// Current values of the graph outputs.
    pub fn get_output_tensors(&self) -> Result<Vec<Tensor<B, 2>>, GraphError> {
        self.outputs.iter().map(|&id| self.manager.get(id)).collect()
    }

    /// Sum of the losses recorded by the last forwarding.
    pub fn get_loss(&self) -> f32 {
        self.graph
            .iter()
            .filter(|n| n.is_loss())
            .map(|n| n.loss())
            .sum()
    }

    pub fn get_input_dimension(&self) -> Vec<TensorDim> {
        self.inputs.iter().map(|&id| self.manager.dim(id)).collect()
    }

    pub fn get_output_dimension(&self) -> Vec<TensorDim> {
        self.outputs.iter().map(|&id| self.manager.dim(id)).collect()
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn size(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.exec_mode
    }

    /// Nodes in sorted order; reverse it for backward traversal.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LayerNode<B>> {
        self.graph.iter_sorted()
    }

    /// All nodes: sorted once compiled, in insertion order before.
    pub fn get_layer_nodes(&self) -> Vec<&LayerNode<B>> {
        if self.compiled {
            self.graph.iter_sorted().collect()
        } else {
            self.graph.iter().collect()
        }
    }

    pub fn get_sorted_layer_node(&self, ith: usize) -> Option<&LayerNode<B>> {
        self.graph.get_sorted_node(ith)
    }

    pub fn get_layer_node(&self, name: &str) -> Option<&LayerNode<B>> {
        self.graph.get_node(name)
    }

    pub fn tensor_manager(&self) -> &TensorManager<B> {
        &self.manager
    }
}
