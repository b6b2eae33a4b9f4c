//! TensorManager - sole owner of physical buffers.
//!
//! Requests register logical tensors together with the execution-order steps
//! at which they are used. Allocation turns those steps into windows, plans
//! slots with [`MemoryPlan`], and materializes burn tensors lazily: a slot
//! read before its current occupant wrote to it yields the occupant's
//! initializer.

use std::collections::HashMap;

use burn::tensor::{Tensor, backend::Backend};

use super::plan::{MemoryPlan, PlanRequest};
use super::{ExecutionMode, Initializer, Lifespan, TensorDim, TensorId};
use crate::errors::GraphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TensorRole {
    Weight,
    Gradient,
    Variable,
    Derivative,
    Temporary,
    External,
    OptimizerState,
}

impl TensorRole {
    fn is_persistent(self) -> bool {
        matches!(self, TensorRole::Weight | TensorRole::OptimizerState)
    }
}

#[derive(Debug, Clone)]
struct TensorEntry {
    name: String,
    dim: TensorDim,
    batched: bool,
    initializer: Initializer,
    lifespan: Lifespan,
    role: TensorRole,
    orders: Vec<usize>,
    source: Option<TensorId>,
}

#[derive(Debug, Clone)]
struct WeightEntry {
    name: String,
    value: TensorId,
    gradient: Option<TensorId>,
    trainable: bool,
    gradient_steps: Vec<usize>,
    optimizer_state: Vec<TensorId>,
}

#[derive(Debug)]
struct Slot<B: Backend> {
    value: Option<Tensor<B, 2>>,
    owner: Option<TensorId>,
}

/// A weight handed to an optimizer apply callback.
///
/// Changes to `value` and `state` are written back after the callback.
#[derive(Debug)]
pub struct WeightUpdate<B: Backend> {
    pub name: String,
    pub value: Tensor<B, 2>,
    pub gradient: Tensor<B, 2>,
    pub state: Vec<Tensor<B, 2>>,
}

/// Owns every physical buffer used by a network graph.
#[derive(Debug)]
pub struct TensorManager<B: Backend> {
    device: B::Device,
    entries: Vec<TensorEntry>,
    names: HashMap<String, TensorId>,
    weights: Vec<WeightEntry>,
    weight_names: HashMap<String, usize>,
    persistent: HashMap<TensorId, Tensor<B, 2>>,
    slots: Vec<Slot<B>>,
    slot_of: HashMap<TensorId, usize>,
    plan: MemoryPlan,
    forward_steps: usize,
    max_step: usize,
    optimize: bool,
    memory_limit: Option<usize>,
    tensors_mode: Option<ExecutionMode>,
    weights_allocated: bool,
}

impl<B: Backend> TensorManager<B> {
    pub fn new(device: B::Device) -> Self {
        Self {
            device,
            entries: Vec::new(),
            names: HashMap::new(),
            weights: Vec::new(),
            weight_names: HashMap::new(),
            persistent: HashMap::new(),
            slots: Vec::new(),
            slot_of: HashMap::new(),
            plan: MemoryPlan::default(),
            forward_steps: 0,
            max_step: 0,
            optimize: true,
            memory_limit: None,
            tensors_mode: None,
            weights_allocated: false,
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Enables or disables slot sharing between tensors with disjoint windows.
    pub fn set_optimizations(&mut self, enable: bool) {
        self.optimize = enable;
    }

    pub fn optimizations(&self) -> bool {
        self.optimize
    }

    /// Upper bound, in elements, on everything the manager may allocate.
    pub fn set_memory_limit(&mut self, limit: Option<usize>) {
        self.memory_limit = limit;
    }

    /// Records the execution timeline: steps below `forward_steps` belong to
    /// the forward pass, `max_step` is the last step of an iteration.
    pub(crate) fn set_execution_bounds(&mut self, forward_steps: usize, max_step: usize) {
        self.forward_steps = forward_steps;
        self.max_step = max_step;
    }

    pub fn max_step(&self) -> usize {
        self.max_step
    }

    /// Drops every request. Buffers must be released first.
    pub(crate) fn reset(&mut self) {
        self.entries.clear();
        self.names.clear();
        self.weights.clear();
        self.weight_names.clear();
        self.persistent.clear();
        self.slots.clear();
        self.slot_of.clear();
        self.plan = MemoryPlan::default();
        self.tensors_mode = None;
        self.weights_allocated = false;
    }

    fn push_entry(&mut self, entry: TensorEntry) -> Result<TensorId, GraphError> {
        if self.names.contains_key(&entry.name) {
            return Err(GraphError::config(format!(
                "tensor {} requested twice",
                entry.name
            )));
        }
        let id = TensorId(self.entries.len());
        self.names.insert(entry.name.clone(), id);
        self.entries.push(entry);
        Ok(id)
    }

    /// Requests a weight, or joins an existing weight of the same name.
    ///
    /// `gradient_step` is the calc-gradient step of the requesting node when
    /// it accumulates into this weight's gradient.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn request_weight(
        &mut self,
        name: &str,
        dim: TensorDim,
        initializer: Initializer,
        trainable: bool,
        forward_step: usize,
        gradient_step: Option<usize>,
    ) -> Result<usize, GraphError> {
        let idx = match self.weight_names.get(name) {
            Some(&idx) => {
                let existing = self.entries[self.weights[idx].value.0].dim;
                if existing != dim {
                    return Err(GraphError::shape(name, existing, dim));
                }
                // trainable as soon as any sharer trains it
                self.weights[idx].trainable |= trainable;
                idx
            }
            None => {
                let value = self.push_entry(TensorEntry {
                    name: name.to_string(),
                    dim,
                    batched: false,
                    initializer,
                    lifespan: Lifespan::Max,
                    role: TensorRole::Weight,
                    orders: Vec::new(),
                    source: None,
                })?;
                self.weights.push(WeightEntry {
                    name: name.to_string(),
                    value,
                    gradient: None,
                    trainable,
                    gradient_steps: Vec::new(),
                    optimizer_state: Vec::new(),
                });
                self.weight_names.insert(name.to_string(), self.weights.len() - 1);
                self.weights.len() - 1
            }
        };

        let value = self.weights[idx].value;
        self.entries[value.0].orders.push(forward_step);

        if let Some(step) = gradient_step.filter(|_| self.weights[idx].trainable) {
            let gradient = match self.weights[idx].gradient {
                Some(gradient) => gradient,
                None => {
                    let gradient = self.push_entry(TensorEntry {
                        name: format!("{name}:grad"),
                        dim,
                        batched: false,
                        initializer: Initializer::Zeros,
                        lifespan: Lifespan::BackwardFunc,
                        role: TensorRole::Gradient,
                        orders: Vec::new(),
                        source: None,
                    })?;
                    self.weights[idx].gradient = Some(gradient);
                    gradient
                }
            };
            // applied right after the node's derivative step
            self.entries[gradient.0].orders.extend([step, step + 1]);
            self.weights[idx].gradient_steps.push(step);
        }

        Ok(idx)
    }

    /// Requests a tensor used at the given execution-order steps.
    pub(crate) fn request_tensor(
        &mut self,
        name: &str,
        dim: TensorDim,
        initializer: Initializer,
        lifespan: Lifespan,
        role: TensorRole,
        orders: Vec<usize>,
    ) -> Result<TensorId, GraphError> {
        let orders = if role == TensorRole::External || lifespan == Lifespan::Max {
            vec![0, self.max_step]
        } else {
            orders
        };
        self.push_entry(TensorEntry {
            name: name.to_string(),
            dim,
            batched: true,
            initializer,
            lifespan,
            role,
            orders,
            source: None,
        })
    }

    /// Requests a tensor that shares the buffer of `source`.
    ///
    /// The alias's usage steps extend the source's window.
    pub(crate) fn request_alias(
        &mut self,
        source: TensorId,
        name: &str,
        orders: Vec<usize>,
    ) -> Result<TensorId, GraphError> {
        let root = self.resolve(source);
        let entry = &self.entries[root.0];
        let alias = TensorEntry {
            name: name.to_string(),
            dim: entry.dim,
            batched: entry.batched,
            initializer: entry.initializer,
            lifespan: entry.lifespan,
            role: entry.role,
            orders: Vec::new(),
            source: Some(root),
        };
        let id = self.push_entry(alias)?;
        self.add_orders(id, &orders);
        Ok(id)
    }

    /// Marks the tensor as used at additional steps.
    pub(crate) fn add_orders(&mut self, id: TensorId, orders: &[usize]) {
        let root = self.resolve(id);
        self.entries[root.0].orders.extend_from_slice(orders);
    }

    /// Requests zero-initialized optimizer state for every trainable weight.
    pub fn request_optimizer_variables<F>(&mut self, mut dims: F) -> Result<(), GraphError>
    where
        F: FnMut(&TensorDim) -> Vec<TensorDim>,
    {
        for idx in 0..self.weights.len() {
            if !self.weights[idx].trainable || !self.weights[idx].optimizer_state.is_empty() {
                continue;
            }
            let weight_dim = self.entries[self.weights[idx].value.0].dim;
            for (i, dim) in dims(&weight_dim).into_iter().enumerate() {
                let name = format!("{}:opt{i}", self.weights[idx].name);
                let id = self.push_entry(TensorEntry {
                    name,
                    dim,
                    batched: false,
                    initializer: Initializer::Zeros,
                    lifespan: Lifespan::Max,
                    role: TensorRole::OptimizerState,
                    orders: vec![0, self.max_step],
                    source: None,
                })?;
                self.weights[idx].optimizer_state.push(id);
            }
        }
        Ok(())
    }

    /// True when some trainable weight holds fewer optimizer state tensors
    /// than `dims` asks for.
    pub fn lacks_optimizer_state<F>(&self, mut dims: F) -> bool
    where
        F: FnMut(&TensorDim) -> Vec<TensorDim>,
    {
        self.weights.iter().filter(|w| w.trainable).any(|w| {
            let weight_dim = self.entries[w.value.0].dim;
            w.optimizer_state.len() < dims(&weight_dim).len()
        })
    }

    fn resolve(&self, id: TensorId) -> TensorId {
        self.entries[id.0].source.unwrap_or(id)
    }

    pub fn tensor_id(&self, name: &str) -> Option<TensorId> {
        self.names.get(name).copied()
    }

    pub fn dim(&self, id: TensorId) -> TensorDim {
        self.entries[self.resolve(id).0].dim
    }

    /// Usage window `[first, last]` of the tensor's buffer, over all aliases.
    pub fn window(&self, id: TensorId) -> Option<(usize, usize)> {
        let orders = &self.entries[self.resolve(id).0].orders;
        Some((*orders.iter().min()?, *orders.iter().max()?))
    }

    /// True when both handles are backed by the same logical buffer.
    pub fn is_alias(&self, a: TensorId, b: TensorId) -> bool {
        self.resolve(a) == self.resolve(b)
    }

    /// True when both handles currently map to the same physical slot.
    pub fn shares_slot(&self, a: TensorId, b: TensorId) -> bool {
        match (
            self.slot_of.get(&self.resolve(a)),
            self.slot_of.get(&self.resolve(b)),
        ) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    pub fn num_weights(&self) -> usize {
        self.weights.len()
    }

    pub fn weight_names(&self) -> impl Iterator<Item = &str> {
        self.weights.iter().map(|w| w.name.as_str())
    }

    pub(crate) fn weight_index(&self, name: &str) -> Option<usize> {
        self.weight_names.get(name).copied()
    }

    pub(crate) fn weight_is_trainable(&self, idx: usize) -> bool {
        self.weights[idx].trainable && self.weights[idx].gradient.is_some()
    }

    /// Number of physical slots planned for non-persistent tensors.
    pub fn num_slots(&self) -> usize {
        self.plan.num_slots()
    }

    /// Elements reserved by the current slot plan.
    pub fn planned_elements(&self) -> usize {
        self.plan.total_elements()
    }

    fn persistent_elements(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.source.is_none() && e.role.is_persistent())
            .map(|e| e.dim.len())
            .sum()
    }

    pub fn is_allocated(&self) -> bool {
        self.tensors_mode.is_some()
    }

    pub fn allocation_mode(&self) -> Option<ExecutionMode> {
        self.tensors_mode
    }

    pub fn is_weights_allocated(&self) -> bool {
        self.weights_allocated
    }

    /// Updates the batch dimension of every batched tensor.
    pub fn set_batch(&mut self, batch: usize) -> Result<(), GraphError> {
        if self.is_allocated() {
            return Err(GraphError::resource(
                "cannot change batch size while tensors are allocated",
            ));
        }
        for entry in self.entries.iter_mut().filter(|e| e.batched) {
            entry.dim = entry.dim.with_batch(batch);
        }
        Ok(())
    }

    fn check_limit(&self, elements: usize) -> Result<(), GraphError> {
        match self.memory_limit {
            Some(limit) if elements > limit => Err(GraphError::resource(format!(
                "allocation of {elements} elements exceeds limit of {limit}"
            ))),
            _ => Ok(()),
        }
    }

    /// Materializes weights and optimizer state, which must outlive every
    /// step up to `max_order`.
    pub fn allocate_weights(&mut self, max_order: usize) -> Result<(), GraphError> {
        if self.weights_allocated {
            return Ok(());
        }
        self.check_limit(self.persistent_elements() + self.plan.total_elements())?;

        for idx in 0..self.entries.len() {
            let entry = &self.entries[idx];
            if entry.source.is_some() || !entry.role.is_persistent() {
                continue;
            }
            let tensor = entry.initializer.init::<B>(entry.dim, &self.device);
            if !entry.orders.contains(&max_order) {
                self.entries[idx].orders.push(max_order);
            }
            self.persistent.insert(TensorId(idx), tensor);
        }
        self.weights_allocated = true;
        log::debug!(
            "allocated {} weights ({} elements)",
            self.weights.len(),
            self.persistent_elements()
        );
        Ok(())
    }

    /// Plans and materializes every non-persistent tensor used in `mode`.
    ///
    /// Inference ignores backward steps, so tensors used only while
    /// backwarding (derivatives, gradients) get no buffer at all.
    pub fn allocate_tensors(&mut self, mode: ExecutionMode) -> Result<(), GraphError> {
        if self.tensors_mode == Some(mode) {
            return Ok(());
        }
        if self.tensors_mode.is_some() {
            self.deallocate_tensors(false);
        }

        let mut roots = Vec::new();
        let mut requests = Vec::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.source.is_some() || entry.role.is_persistent() {
                continue;
            }
            let used: Vec<usize> = entry
                .orders
                .iter()
                .copied()
                .filter(|&step| mode == ExecutionMode::Train || step < self.forward_steps)
                .collect();
            let (Some(&start), Some(&end)) = (used.iter().min(), used.iter().max()) else {
                continue;
            };
            roots.push(TensorId(idx));
            requests.push(PlanRequest {
                start,
                end,
                size: entry.dim.len(),
                exclusive: entry.role == TensorRole::External || entry.lifespan == Lifespan::Max,
            });
        }

        let plan = MemoryPlan::plan(&requests, self.optimize);
        let persistent = if self.weights_allocated {
            self.persistent_elements()
        } else {
            0
        };
        self.check_limit(plan.total_elements() + persistent)?;

        self.slots = (0..plan.num_slots())
            .map(|_| Slot {
                value: None,
                owner: None,
            })
            .collect();
        self.slot_of = roots
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, plan.slot(i)))
            .collect();

        log::info!(
            "allocated {} tensors into {} slots ({} elements, optimized: {})",
            roots.len(),
            plan.num_slots(),
            plan.total_elements(),
            self.optimize
        );
        self.plan = plan;
        self.tensors_mode = Some(mode);
        Ok(())
    }

    /// Releases tensor buffers, and weights too when `dealloc_weights` is set.
    pub fn deallocate_tensors(&mut self, dealloc_weights: bool) {
        self.slots.clear();
        self.slot_of.clear();
        self.plan = MemoryPlan::default();
        self.tensors_mode = None;
        if dealloc_weights {
            self.deallocate_weights();
        }
    }

    pub fn deallocate_weights(&mut self) {
        self.persistent.clear();
        self.weights_allocated = false;
    }

    /// Reads the current value of a tensor.
    pub fn get(&self, id: TensorId) -> Result<Tensor<B, 2>, GraphError> {
        let root = self.resolve(id);
        let entry = &self.entries[root.0];
        if entry.role.is_persistent() {
            return self
                .persistent
                .get(&root)
                .cloned()
                .ok_or(GraphError::NotAllocated);
        }

        let slot = self.slot_of.get(&root).ok_or(GraphError::NotAllocated)?;
        let slot = &self.slots[*slot];
        match (&slot.value, slot.owner) {
            (Some(value), Some(owner)) if owner == root => Ok(value.clone()),
            _ => Ok(entry.initializer.init::<B>(entry.dim, &self.device)),
        }
    }

    /// Writes a tensor, taking over its slot.
    pub fn set(&mut self, id: TensorId, value: Tensor<B, 2>) -> Result<(), GraphError> {
        let root = self.resolve(id);
        let entry = &self.entries[root.0];
        let [batch, width] = value.dims();
        let actual = TensorDim::new(batch, width);
        if actual != entry.dim {
            return Err(GraphError::shape(&entry.name, entry.dim, actual));
        }

        if entry.role.is_persistent() {
            if !self.weights_allocated {
                return Err(GraphError::NotAllocated);
            }
            self.persistent.insert(root, value);
            return Ok(());
        }

        let slot = *self.slot_of.get(&root).ok_or(GraphError::NotAllocated)?;
        let slot = &mut self.slots[slot];
        slot.value = Some(value);
        slot.owner = Some(root);
        Ok(())
    }

    pub fn weight_value(&self, name: &str) -> Result<Tensor<B, 2>, GraphError> {
        let idx = self
            .weight_index(name)
            .ok_or_else(|| GraphError::config(format!("unknown weight {name}")))?;
        self.get(self.weights[idx].value)
    }

    pub(crate) fn weight(&self, idx: usize) -> Result<Tensor<B, 2>, GraphError> {
        self.get(self.weights[idx].value)
    }

    /// Adds a gradient contribution for weight `idx` made at `step`.
    ///
    /// The first access in the backward traversal overwrites whatever the
    /// buffer held; later accesses accumulate.
    pub(crate) fn accumulate_gradient(
        &mut self,
        idx: usize,
        step: usize,
        gradient: Tensor<B, 2>,
    ) -> Result<(), GraphError> {
        let weight = &self.weights[idx];
        let Some(id) = weight.gradient else {
            return Ok(());
        };
        let first = weight.gradient_steps.iter().min().copied();
        let value = if first == Some(step) {
            gradient
        } else {
            self.get(id)? + gradient
        };
        self.set(id, value)
    }

    pub fn weight_gradient(&self, name: &str) -> Result<Option<Tensor<B, 2>>, GraphError> {
        let idx = self
            .weight_index(name)
            .ok_or_else(|| GraphError::config(format!("unknown weight {name}")))?;
        self.weights[idx]
            .gradient
            .map(|id| self.get(id))
            .transpose()
    }

    /// True when `step` is the last calc-gradient access of weight `idx`.
    pub(crate) fn is_gradient_last_access(&self, idx: usize, step: usize) -> bool {
        self.weights[idx].gradient_steps.iter().max() == Some(&step)
    }

    /// Hands weight `idx` with its gradient to `apply` and stores the result.
    pub(crate) fn apply_gradient<F>(&mut self, idx: usize, apply: &mut F) -> Result<(), GraphError>
    where
        F: FnMut(&mut WeightUpdate<B>),
    {
        let weight = &self.weights[idx];
        let Some(gradient) = weight.gradient else {
            return Ok(());
        };
        let state_ids = weight.optimizer_state.clone();
        let value_id = weight.value;
        let mut update = WeightUpdate {
            name: weight.name.clone(),
            value: self.get(value_id)?,
            gradient: self.get(gradient)?,
            state: state_ids
                .iter()
                .map(|&id| self.get(id))
                .collect::<Result<_, _>>()?,
        };
        apply(&mut update);

        self.set(value_id, update.value)?;
        for (id, tensor) in state_ids.into_iter().zip(update.state) {
            self.set(id, tensor)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn manager() -> TensorManager<TestBackend> {
        let device = <TestBackend as Backend>::Device::default();
        let mut manager = TensorManager::new(device);
        manager.set_execution_bounds(4, 11);
        manager
    }

    fn variable(
        manager: &mut TensorManager<TestBackend>,
        name: &str,
        orders: Vec<usize>,
    ) -> TensorId {
        manager
            .request_tensor(
                name,
                TensorDim::new(2, 3),
                Initializer::Zeros,
                Lifespan::ForwardFunc,
                TensorRole::Variable,
                orders,
            )
            .unwrap()
    }

    #[test]
    fn test_disjoint_variables_share_slot() {
        let mut manager = manager();
        let a = variable(&mut manager, "a", vec![0, 1]);
        let b = variable(&mut manager, "b", vec![2, 3]);
        manager.allocate_tensors(ExecutionMode::Train).unwrap();

        assert!(manager.shares_slot(a, b));
        assert_eq!(manager.num_slots(), 1);
    }

    #[test]
    fn test_optimizations_disabled_keeps_slots_apart() {
        let mut manager = manager();
        manager.set_optimizations(false);
        let a = variable(&mut manager, "a", vec![0, 1]);
        let b = variable(&mut manager, "b", vec![2, 3]);
        manager.allocate_tensors(ExecutionMode::Train).unwrap();

        assert!(!manager.shares_slot(a, b));
    }

    #[test]
    fn test_alias_extends_window() {
        let mut manager = manager();
        let a = variable(&mut manager, "a", vec![0]);
        let alias = manager.request_alias(a, "a_alias", vec![2]).unwrap();

        assert!(manager.is_alias(a, alias));
        assert_eq!(manager.window(a), Some((0, 2)));
    }

    #[test]
    fn test_inference_skips_backward_only_tensors() {
        let mut manager = manager();
        let deriv = manager
            .request_tensor(
                "d",
                TensorDim::new(2, 3),
                Initializer::Zeros,
                Lifespan::BackwardFunc,
                TensorRole::Derivative,
                vec![5, 6],
            )
            .unwrap();
        manager.allocate_tensors(ExecutionMode::Inference).unwrap();

        assert!(matches!(manager.get(deriv), Err(GraphError::NotAllocated)));
    }

    #[test]
    fn test_read_before_write_yields_initializer() {
        let mut manager = manager();
        let a = variable(&mut manager, "a", vec![0, 1]);
        let b = variable(&mut manager, "b", vec![2, 3]);
        manager.allocate_tensors(ExecutionMode::Train).unwrap();

        let device = manager.device().clone();
        manager
            .set(a, Tensor::<TestBackend, 2>::ones([2, 3], &device))
            .unwrap();
        let stale: Vec<f32> = manager.get(b).unwrap().to_data().to_vec().unwrap();
        assert_eq!(stale, vec![0.0; 6]);
    }

    #[test]
    fn test_set_rejects_wrong_shape() {
        let mut manager = manager();
        let a = variable(&mut manager, "a", vec![0]);
        manager.allocate_tensors(ExecutionMode::Train).unwrap();

        let device = manager.device().clone();
        let result = manager.set(a, Tensor::<TestBackend, 2>::ones([3, 3], &device));
        assert!(matches!(result, Err(GraphError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_memory_limit_is_a_resource_error() {
        let mut manager = manager();
        manager.set_memory_limit(Some(4));
        variable(&mut manager, "a", vec![0]);

        let result = manager.allocate_tensors(ExecutionMode::Train);
        assert!(matches!(result, Err(GraphError::Resource { .. })));
        assert!(!manager.is_allocated());
    }

    #[test]
    fn test_shared_weight_gradient_accumulates() {
        let mut manager = manager();
        let dim = TensorDim::new(2, 2);
        let w = manager
            .request_weight("w", dim, Initializer::Ones, true, 1, Some(8))
            .unwrap();
        let again = manager
            .request_weight("w", dim, Initializer::Ones, true, 2, Some(6))
            .unwrap();
        assert_eq!(w, again);

        manager.allocate_weights(11).unwrap();
        manager.allocate_tensors(ExecutionMode::Train).unwrap();

        let device = manager.device().clone();
        let ones = Tensor::<TestBackend, 2>::ones([2, 2], &device);
        manager.accumulate_gradient(w, 6, ones.clone()).unwrap();
        manager.accumulate_gradient(w, 8, ones).unwrap();

        let grad: Vec<f32> = manager
            .weight_gradient("w")
            .unwrap()
            .unwrap()
            .to_data()
            .to_vec()
            .unwrap();
        assert_eq!(grad, vec![2.0; 4]);
        assert!(manager.is_gradient_last_access(w, 8));
        assert!(!manager.is_gradient_last_access(w, 6));
    }

    #[test]
    fn test_frozen_owner_trains_with_trainable_sharer() {
        let mut manager = manager();
        let dim = TensorDim::new(2, 2);
        let w = manager
            .request_weight("w", dim, Initializer::Ones, false, 1, None)
            .unwrap();
        assert!(!manager.weight_is_trainable(w));

        manager
            .request_weight("w", dim, Initializer::Ones, true, 2, Some(6))
            .unwrap();
        assert!(manager.weight_is_trainable(w));
        assert!(manager.is_gradient_last_access(w, 6));

        manager.allocate_weights(11).unwrap();
        manager.allocate_tensors(ExecutionMode::Train).unwrap();
        assert!(manager.weight_gradient("w").unwrap().is_some());
    }

    #[test]
    fn test_reallocating_weights_keeps_orders_bounded() {
        let mut manager = manager();
        let w = manager
            .request_weight("w", TensorDim::new(2, 2), Initializer::Ones, false, 1, None)
            .unwrap();
        let value = manager.weights[w].value;

        manager.allocate_weights(11).unwrap();
        let orders = manager.entries[value.0].orders.len();
        for _ in 0..3 {
            manager.deallocate_weights();
            manager.allocate_weights(11).unwrap();
        }
        assert_eq!(manager.entries[value.0].orders.len(), orders);
        assert_eq!(manager.window(value), Some((1, 11)));
    }

    #[test]
    fn test_shared_weight_shape_mismatch() {
        let mut manager = manager();
        manager
            .request_weight("w", TensorDim::new(2, 2), Initializer::Ones, true, 1, None)
            .unwrap();
        let result =
            manager.request_weight("w", TensorDim::new(3, 2), Initializer::Ones, true, 2, None);
        assert!(matches!(result, Err(GraphError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_set_batch_rejected_while_allocated() {
        let mut manager = manager();
        variable(&mut manager, "a", vec![0]);
        manager.allocate_tensors(ExecutionMode::Train).unwrap();
        assert!(manager.set_batch(4).is_err());

        manager.deallocate_tensors(false);
        manager.set_batch(4).unwrap();
        assert_eq!(manager.dim(TensorId(0)), TensorDim::new(4, 3));
    }
}
