//! Compile-time rewrite passes.
//!
//! Each pass takes the node list in insertion order and rewrites it before
//! the graph is sorted: reserved names are renamed, missing inputs default
//! to the previous node, activation properties become their own nodes, a
//! loss node is appended and fused with a matching activation, and output
//! slots read by several consumers get an explicit fan-out node.

use std::collections::{HashMap, HashSet};

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use super::connection::Connection;
use super::core::GraphNode;
use super::node::LayerNode;
use crate::errors::GraphError;
use crate::layers::{Activation, ActivationLayer, LossKind, LossLayer, MultiOutLayer};

/// Names a node may not keep, since they name the model's boundaries.
pub const RESERVED_NAMES: [&str; 3] = ["input", "output", "label"];

/// Folds an activation node into the loss node that consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossFusionRule {
    pub activation: Activation,
    pub loss: LossKind,
    pub fused: LossKind,
}

impl LossFusionRule {
    pub fn new(activation: Activation, loss: LossKind, fused: LossKind) -> Self {
        Self {
            activation,
            loss,
            fused,
        }
    }

    /// Softmax and sigmoid in front of a generic cross entropy.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(Activation::Softmax, LossKind::Cross, LossKind::CrossSoftmax),
            Self::new(Activation::Sigmoid, LossKind::Cross, LossKind::CrossSigmoid),
        ]
    }
}

/// First `{base}{counter}` for which `taken` is false.
pub(crate) fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut counter = 0;
    loop {
        let candidate = format!("{base}{counter}");
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

fn position<B: Backend>(nodes: &[LayerNode<B>], name: &str) -> Option<usize> {
    nodes.iter().position(|n| n.name() == name)
}

fn consumer_count<B: Backend>(nodes: &[LayerNode<B>], name: &str) -> usize {
    nodes
        .iter()
        .flat_map(|n| n.input_connections())
        .filter(|c| c.name() == name)
        .count()
}

/// Points every connection (and weight sharing reference) at renamed nodes.
fn apply_renames<B: Backend>(nodes: &mut [LayerNode<B>], renames: &HashMap<String, String>) {
    for node in nodes.iter_mut() {
        for conn in node.input_connections_mut().iter_mut() {
            if let Some(new) = renames.get(conn.name()) {
                conn.set_name(new.clone());
            }
        }
        if let Some(new) = node.shared_from().and_then(|s| renames.get(s)).cloned() {
            node.set_shared_from(Some(new));
        }
    }
}

/// Force-renames nodes that use a reserved name.
pub(crate) fn ensure_names<B: Backend>(nodes: &mut [LayerNode<B>]) {
    let mut taken: HashSet<String> = nodes.iter().map(|n| n.name().to_string()).collect();
    let mut renames = HashMap::new();

    for node in nodes.iter_mut() {
        if !RESERVED_NAMES.contains(&node.name()) {
            continue;
        }
        let new = unique_name(node.name(), |c| taken.contains(c));
        log::debug!("renaming reserved node name {} to {new}", node.name());
        taken.insert(new.clone());
        renames.insert(node.name().to_string(), new.clone());
        node.set_name(new);
    }

    if !renames.is_empty() {
        apply_renames(nodes, &renames);
    }
}

/// Wires every non-input node without inputs to the node added before it.
pub(crate) fn add_default_inputs<B: Backend>(nodes: &mut [LayerNode<B>]) {
    for i in 1..nodes.len() {
        if nodes[i].input_connections().is_empty() && !nodes[i].is_graph_input() {
            let previous = nodes[i - 1].name().to_string();
            log::debug!("{} reads from {previous} by default", nodes[i].name());
            nodes[i]
                .input_connections_mut()
                .push(Connection::new(previous, 0));
        }
    }
}

/// Splits the `activation` property of a node into a node of its own,
/// placed right after it. Consumers are redirected to the new node.
pub(crate) fn realize_activations<B: Backend>(nodes: &mut Vec<LayerNode<B>>) {
    let mut i = 0;
    while i < nodes.len() {
        if nodes[i].activation() == Activation::None || nodes[i].layer().activation().is_some() {
            i += 1;
            continue;
        }
        let activation = nodes[i].take_activation();
        let name = nodes[i].name().to_string();
        let realized = format!("{name}/activation_realized");

        for node in nodes.iter_mut() {
            for conn in node.input_connections_mut().iter_mut() {
                if conn.index() == 0 && conn.name() == name {
                    conn.set_name(realized.clone());
                }
            }
        }

        let mut node = LayerNode::new(ActivationLayer::new(activation)).with_name(&realized);
        node.input_connections_mut().push(Connection::new(name, 0));
        log::debug!("realized {} activation as {realized}", activation.name());
        nodes.insert(i + 1, node);
        i += 2;
    }
}

/// Names of nodes nobody reads from.
pub(crate) fn terminal_names<B: Backend>(nodes: &[LayerNode<B>]) -> Vec<String> {
    let consumed: HashSet<&str> = nodes
        .iter()
        .flat_map(|n| n.input_connections())
        .map(|c| c.name())
        .collect();
    nodes
        .iter()
        .map(|n| n.name())
        .filter(|name| !consumed.contains(name))
        .map(str::to_string)
        .collect()
}

/// Appends a loss node of the given type after the single terminal node.
pub(crate) fn add_loss_layer<B: Backend>(
    nodes: &mut Vec<LayerNode<B>>,
    loss: Option<&str>,
) -> Result<(), GraphError> {
    let Some(loss) = loss.filter(|l| !l.is_empty()) else {
        return Ok(());
    };
    let kind = LossKind::from_name(loss)
        .ok_or_else(|| GraphError::config(format!("unknown loss type {loss}")))?;
    if let Some(existing) = nodes.iter().find(|n| n.is_loss()) {
        return Err(GraphError::config(format!(
            "loss {loss} given but {} is already a loss layer",
            existing.name()
        )));
    }

    let terminals = terminal_names(nodes);
    let [terminal] = terminals.as_slice() else {
        return Err(GraphError::config(format!(
            "loss {loss} needs exactly one output node, found {}",
            terminals.len()
        )));
    };

    let name = unique_name(kind.name(), |c| position(nodes, c).is_some());
    let mut node = LayerNode::new(LossLayer::new(kind)).with_name(&name);
    node.input_connections_mut()
        .push(Connection::new(terminal.clone(), 0));
    log::debug!("appended loss {name} after {terminal}");
    nodes.push(node);
    Ok(())
}

/// Fuses loss nodes with the activation node in front of them, following
/// `rules`. A generic cross entropy left unfused is an error.
pub(crate) fn fuse_losses<B: Backend>(
    nodes: &mut Vec<LayerNode<B>>,
    rules: &[LossFusionRule],
) -> Result<(), GraphError> {
    let mut i = 0;
    while i < nodes.len() {
        let Some(kind) = nodes[i].loss_kind() else {
            i += 1;
            continue;
        };

        if let [input] = nodes[i].input_connections() {
            let producer = input.name().to_string();
            let fusable = position(nodes, &producer).and_then(|p| {
                let activation = nodes[p].layer().activation()?;
                let rule = rules
                    .iter()
                    .find(|r| r.activation == activation && r.loss == kind)?;
                let single_consumer = consumer_count(nodes, &producer) == 1;
                (single_consumer && nodes[p].input_connections().len() == 1).then_some((p, *rule))
            });

            if let Some((p, rule)) = fusable {
                let upstream = nodes[p].input_connections()[0].clone();
                nodes[i].set_layer(Box::new(LossLayer::new(rule.fused)));
                *nodes[i].input_connections_mut() = vec![upstream];
                log::debug!(
                    "fused {} into {} as {}",
                    producer,
                    nodes[i].name(),
                    rule.fused.name()
                );
                nodes.remove(p);
                if p < i {
                    i -= 1;
                }
            }
        }

        if nodes[i].loss_kind() == Some(LossKind::Cross) {
            return Err(GraphError::config(format!(
                "{}: cross entropy needs a softmax or sigmoid activation in front of it",
                nodes[i].name()
            )));
        }
        i += 1;
    }
    Ok(())
}

/// Derives the consumers of every output slot from the input connections.
///
/// Fails on unresolved inputs, and on output slots nobody reads while a
/// later slot of the same node is read.
pub(crate) fn set_output_layers<B: Backend>(nodes: &mut [LayerNode<B>]) -> Result<(), GraphError> {
    let index: HashMap<String, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.name().to_string(), i))
        .collect();

    let mut outputs: Vec<Vec<Vec<Connection>>> = vec![Vec::new(); nodes.len()];
    for consumer in nodes.iter() {
        for (slot, conn) in consumer.input_connections().iter().enumerate() {
            let producer = *index
                .get(conn.name())
                .ok_or_else(|| GraphError::UnresolvedInput {
                    node: consumer.name().to_string(),
                    input: conn.name().to_string(),
                })?;
            let slots = &mut outputs[producer];
            if slots.len() <= conn.index() {
                slots.resize(conn.index() + 1, Vec::new());
            }
            slots[conn.index()].push(Connection::new(consumer.name(), slot));
        }
    }

    for (producer, slots) in outputs.iter().enumerate() {
        if let Some(index) = slots.iter().position(Vec::is_empty) {
            return Err(GraphError::DanglingOutput {
                node: nodes[producer].name().to_string(),
                index,
            });
        }
    }
    for (node, slots) in nodes.iter_mut().zip(outputs) {
        node.set_output_connections(slots);
    }
    Ok(())
}

/// Inserts a fan-out node behind every output slot read by several consumers.
pub(crate) fn realize_multi_output<B: Backend>(
    nodes: &mut Vec<LayerNode<B>>,
) -> Result<(), GraphError> {
    let mut i = 0;
    let mut realized = false;
    while i < nodes.len() {
        let name = nodes[i].name().to_string();
        let slots = nodes[i].output_connections().to_vec();
        let mut inserted = 0;

        for (slot, consumers) in slots.iter().enumerate() {
            if consumers.len() <= 1 {
                continue;
            }
            let fan_out = format!("{name}/generated_out_{slot}");
            for (k, consumer) in consumers.iter().enumerate() {
                let c = position(nodes, consumer.name()).ok_or_else(|| {
                    GraphError::UnresolvedInput {
                        node: consumer.name().to_string(),
                        input: name.clone(),
                    }
                })?;
                nodes[c].input_connections_mut()[consumer.index()] =
                    Connection::new(fan_out.clone(), k);
            }

            let mut node = LayerNode::new(MultiOutLayer).with_name(&fan_out);
            node.input_connections_mut()
                .push(Connection::new(name.clone(), slot));
            log::debug!("realized {fan_out} for {} consumers", consumers.len());
            nodes.insert(i + 1 + inserted, node);
            inserted += 1;
            realized = true;
        }
        i += 1 + inserted;
    }

    if realized {
        set_output_layers(nodes)?;
    }
    Ok(())
}

/// Runs every rewrite pass in order.
pub(crate) fn realize_graph<B: Backend>(
    nodes: &mut Vec<LayerNode<B>>,
    loss: Option<&str>,
    rules: &[LossFusionRule],
) -> Result<(), GraphError> {
    ensure_names(nodes);
    add_default_inputs(nodes);
    realize_activations(nodes);
    add_loss_layer(nodes, loss)?;
    fuse_losses(nodes, rules)?;
    set_output_layers(nodes)?;
    realize_multi_output(nodes)
}
