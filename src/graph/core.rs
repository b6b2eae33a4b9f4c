//! GraphCore - generic node container with topological sorting.
//!
//! Nodes live in an arena indexed by [`NodeId`]. Insertion order is the
//! arena order; the sorted order is a separate list of ids over the same
//! arena, so both views always hold the same membership.

use std::collections::{HashMap, VecDeque};

use super::connection::Connection;
use crate::errors::GraphError;

/// Stable index of a node inside its [`GraphCore`].
pub type NodeId = usize;

/// What the container needs to know about a node.
pub trait GraphNode {
    fn name(&self) -> &str;

    fn set_name(&mut self, name: String);

    /// Producers this node reads from, by name and output slot.
    fn input_connections(&self) -> &[Connection];

    /// Graph inputs are the roots every other node must be reachable from.
    fn is_graph_input(&self) -> bool;
}

/// Directed graph over named nodes.
#[derive(Debug)]
pub struct GraphCore<N> {
    nodes: Vec<N>,
    index: HashMap<String, NodeId>,
    sorted: Vec<NodeId>,
}

impl<N> Default for GraphCore<N> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            sorted: Vec::new(),
        }
    }
}

impl<N: GraphNode> GraphCore<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node in insertion order. Names must be unique.
    pub fn add_node(&mut self, node: N) -> Result<NodeId, GraphError> {
        let name = node.name().to_string();
        if name.is_empty() {
            return Err(GraphError::config("node name must not be empty"));
        }
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateName { name });
        }
        let id = self.nodes.len();
        self.index.insert(name, id);
        self.nodes.push(node);
        self.sorted.clear();
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True when `name` is already taken.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn get_node(&self, name: &str) -> Option<&N> {
        self.node_id(name).map(|id| &self.nodes[id])
    }

    pub fn get_node_mut(&mut self, name: &str) -> Option<&mut N> {
        self.node_id(name).map(|id| &mut self.nodes[id])
    }

    pub fn node(&self, id: NodeId) -> &N {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut N {
        &mut self.nodes[id]
    }

    /// The i-th node in sorted order, once [`topological_sort`](Self::topological_sort) ran.
    pub fn get_sorted_node(&self, ith: usize) -> Option<&N> {
        self.sorted.get(ith).map(|&id| &self.nodes[id])
    }

    pub fn sorted_ids(&self) -> &[NodeId] {
        &self.sorted
    }

    pub fn is_sorted(&self) -> bool {
        !self.nodes.is_empty() && self.sorted.len() == self.nodes.len()
    }

    /// Nodes in insertion order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &N> {
        self.nodes.iter()
    }

    /// Nodes in sorted order. Reverse it for backward traversal.
    pub fn iter_sorted(&self) -> impl DoubleEndedIterator<Item = &N> {
        self.sorted.iter().map(|&id| &self.nodes[id])
    }

    /// Removes every node, handing them back in insertion order.
    pub fn take_nodes(&mut self) -> Vec<N> {
        self.index.clear();
        self.sorted.clear();
        std::mem::take(&mut self.nodes)
    }

    /// Replaces the node set, e.g. with the output of a rewrite pass.
    pub fn replace_nodes(&mut self, nodes: Vec<N>) -> Result<(), GraphError> {
        self.index.clear();
        self.sorted.clear();
        self.nodes.clear();
        for node in nodes {
            self.add_node(node)?;
        }
        Ok(())
    }

    /// Renames a node. Connections referring to the old name are untouched.
    pub fn rename_node(&mut self, id: NodeId, name: String) -> Result<(), GraphError> {
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateName { name });
        }
        let old = self.nodes[id].name().to_string();
        self.index.remove(&old);
        self.index.insert(name.clone(), id);
        self.nodes[id].set_name(name);
        Ok(())
    }

    /// Resolves the producers of node `id`, one per input connection.
    pub fn producers(&self, id: NodeId) -> Result<Vec<NodeId>, GraphError> {
        let node = &self.nodes[id];
        node.input_connections()
            .iter()
            .map(|conn| {
                self.node_id(conn.name())
                    .ok_or_else(|| GraphError::UnresolvedInput {
                        node: node.name().to_string(),
                        input: conn.name().to_string(),
                    })
            })
            .collect()
    }

    /// Consumer lists per node, in consumer insertion order.
    fn consumers(&self) -> Result<Vec<Vec<NodeId>>, GraphError> {
        let mut consumers = vec![Vec::new(); self.nodes.len()];
        for id in 0..self.nodes.len() {
            for producer in self.producers(id)? {
                consumers[producer].push(id);
            }
        }
        Ok(consumers)
    }

    /// Orders all nodes so that every node comes after all its producers.
    ///
    /// Iterative depth-first traversal along consumer edges: a node is pushed
    /// onto the completion list once all its consumers are explored, and the
    /// reversed list is the sorted order. Starting points and consumers are
    /// visited last-to-first so that independent nodes keep their insertion
    /// order. Fails on cycles and on nodes not reachable from a graph input.
    pub fn topological_sort(&mut self) -> Result<(), GraphError> {
        const UNVISITED: u8 = 0;
        const ON_STACK: u8 = 1;
        const DONE: u8 = 2;

        let consumers = self.consumers()?;
        let mut state = vec![UNVISITED; self.nodes.len()];
        let mut completed = Vec::with_capacity(self.nodes.len());

        for start in (0..self.nodes.len()).rev() {
            if state[start] != UNVISITED {
                continue;
            }
            state[start] = ON_STACK;
            let mut stack: Vec<(NodeId, usize)> = vec![(start, 0)];

            while let Some(frame) = stack.last_mut() {
                let (node, next) = *frame;
                let children = &consumers[node];
                if next < children.len() {
                    frame.1 += 1;
                    let child = children[children.len() - 1 - next];
                    match state[child] {
                        UNVISITED => {
                            state[child] = ON_STACK;
                            stack.push((child, 0));
                        }
                        ON_STACK => {
                            return Err(GraphError::Cycle {
                                node: self.nodes[child].name().to_string(),
                            });
                        }
                        _ => {}
                    }
                } else {
                    state[node] = DONE;
                    completed.push(node);
                    stack.pop();
                }
            }
        }
        completed.reverse();

        self.check_reachable(&consumers)?;
        self.sorted = completed;
        Ok(())
    }

    fn check_reachable(&self, consumers: &[Vec<NodeId>]) -> Result<(), GraphError> {
        let mut reached = vec![false; self.nodes.len()];
        let mut queue: VecDeque<NodeId> = (0..self.nodes.len())
            .filter(|&id| self.nodes[id].is_graph_input())
            .collect();
        for &id in &queue {
            reached[id] = true;
        }
        while let Some(id) = queue.pop_front() {
            for &child in &consumers[id] {
                if !reached[child] {
                    reached[child] = true;
                    queue.push_back(child);
                }
            }
        }

        match reached.iter().position(|r| !r) {
            Some(id) => Err(GraphError::Disconnected {
                node: self.nodes[id].name().to_string(),
            }),
            None => Ok(()),
        }
    }
}
