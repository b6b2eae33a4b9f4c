//! Contexts handed to layers while finalizing and while running.

use burn::tensor::{Tensor, backend::Backend};

use crate::errors::GraphError;
use crate::graph::ExecutionOrder;
use crate::tensor::{Initializer, Lifespan, TensorDim, TensorId, TensorManager};

/// A weight requested by a layer during finalize.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSpec {
    /// Local name, prefixed with the node (or shared node) name.
    pub name: String,
    pub dim: TensorDim,
    pub initializer: Initializer,
    pub trainable: bool,
}

/// A scratch tensor requested by a layer during finalize.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
    pub name: String,
    pub dim: TensorDim,
    pub initializer: Initializer,
    pub lifespan: Lifespan,
}

/// Shape information and buffer requests gathered while finalizing a node.
#[derive(Debug, Clone)]
pub struct InitLayerContext {
    name: String,
    input_dims: Vec<TensorDim>,
    num_outputs: usize,
    batch: usize,
    trainable: bool,
    output_dims: Vec<TensorDim>,
    weights: Vec<WeightSpec>,
    tensors: Vec<TensorSpec>,
    label: Option<TensorDim>,
}

impl InitLayerContext {
    pub fn new(
        name: impl Into<String>,
        input_dims: Vec<TensorDim>,
        num_outputs: usize,
        batch: usize,
        trainable: bool,
    ) -> Self {
        Self {
            name: name.into(),
            input_dims,
            num_outputs,
            batch,
            trainable,
            output_dims: Vec::new(),
            weights: Vec::new(),
            tensors: Vec::new(),
            label: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_dims(&self) -> &[TensorDim] {
        &self.input_dims
    }

    pub fn num_inputs(&self) -> usize {
        self.input_dims.len()
    }

    /// Number of output slots the graph wired for this node.
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    /// Batch size the graph is finalized with.
    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn trainable(&self) -> bool {
        self.trainable
    }

    /// Fails unless the node has exactly `count` inputs.
    pub fn expect_inputs(&self, count: usize) -> Result<(), GraphError> {
        if self.input_dims.len() != count {
            return Err(GraphError::config(format!(
                "{} expects {count} input(s), got {}",
                self.name,
                self.input_dims.len()
            )));
        }
        Ok(())
    }

    pub fn set_output_dims(&mut self, dims: Vec<TensorDim>) {
        self.output_dims = dims;
    }

    pub fn output_dims(&self) -> &[TensorDim] {
        &self.output_dims
    }

    /// Requests a weight and returns its index for [`RunLayerContext::weight`].
    pub fn request_weight(
        &mut self,
        name: &str,
        dim: TensorDim,
        initializer: Initializer,
        trainable: bool,
    ) -> usize {
        self.weights.push(WeightSpec {
            name: name.to_string(),
            dim,
            initializer,
            trainable: trainable && self.trainable,
        });
        self.weights.len() - 1
    }

    /// Requests a scratch tensor and returns its index for [`RunLayerContext::tensor`].
    pub fn request_tensor(
        &mut self,
        name: &str,
        dim: TensorDim,
        initializer: Initializer,
        lifespan: Lifespan,
    ) -> usize {
        self.tensors.push(TensorSpec {
            name: name.to_string(),
            dim,
            initializer,
            lifespan,
        });
        self.tensors.len() - 1
    }

    /// Declares that the layer reads a label of the given shape.
    pub fn request_label(&mut self, dim: TensorDim) {
        self.label = Some(dim);
    }

    pub fn weights(&self) -> &[WeightSpec] {
        &self.weights
    }

    pub fn tensors(&self) -> &[TensorSpec] {
        &self.tensors
    }

    pub fn label(&self) -> Option<TensorDim> {
        self.label
    }
}

/// A variable and, when backwarding needs it, its derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarGrad {
    pub var: TensorId,
    pub grad: Option<TensorId>,
}

/// Handles to everything a finalized node reads or writes.
#[derive(Debug, Clone, Default)]
pub struct NodeTensors {
    pub inputs: Vec<VarGrad>,
    pub outputs: Vec<VarGrad>,
    pub weights: Vec<usize>,
    pub tensors: Vec<TensorId>,
    pub label: Option<TensorId>,
}

/// View of a node's buffers while it runs forward or backward.
pub struct RunLayerContext<'a, B: Backend> {
    name: &'a str,
    handles: &'a NodeTensors,
    manager: &'a mut TensorManager<B>,
    order: ExecutionOrder,
    loss: &'a mut f32,
}

impl<'a, B: Backend> RunLayerContext<'a, B> {
    pub(crate) fn new(
        name: &'a str,
        handles: &'a NodeTensors,
        manager: &'a mut TensorManager<B>,
        order: ExecutionOrder,
        loss: &'a mut f32,
    ) -> Self {
        Self {
            name,
            handles,
            manager,
            order,
            loss,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn device(&self) -> &B::Device {
        self.manager.device()
    }

    pub fn num_inputs(&self) -> usize {
        self.handles.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.handles.outputs.len()
    }

    fn slot<'h>(&self, list: &'h [VarGrad], i: usize, what: &str) -> Result<&'h VarGrad, GraphError> {
        list.get(i).ok_or_else(|| GraphError::Layer {
            node: self.name.to_string(),
            message: format!("no {what} {i}"),
        })
    }

    pub fn input(&self, i: usize) -> Result<Tensor<B, 2>, GraphError> {
        let slot = self.slot(&self.handles.inputs, i, "input")?;
        self.manager.get(slot.var)
    }

    pub fn output(&self, i: usize) -> Result<Tensor<B, 2>, GraphError> {
        let slot = self.slot(&self.handles.outputs, i, "output")?;
        self.manager.get(slot.var)
    }

    pub fn set_output(&mut self, i: usize, value: Tensor<B, 2>) -> Result<(), GraphError> {
        let var = self.slot(&self.handles.outputs, i, "output")?.var;
        self.manager.set(var, value)
    }

    /// Derivative of the loss with respect to output `i`.
    ///
    /// Outputs nobody propagates into read as zeros.
    pub fn output_grad(&self, i: usize) -> Result<Tensor<B, 2>, GraphError> {
        let slot = self.slot(&self.handles.outputs, i, "output")?;
        match slot.grad {
            Some(grad) => self.manager.get(grad),
            None => Ok(Tensor::zeros(
                self.manager.dim(slot.var).shape(),
                self.manager.device(),
            )),
        }
    }

    /// True when the producer of input `i` wants its derivative.
    pub fn wants_input_grad(&self, i: usize) -> bool {
        self.handles
            .inputs
            .get(i)
            .is_some_and(|slot| slot.grad.is_some())
    }

    /// Stores the derivative with respect to input `i`; dropped when the
    /// producer does not take part in backwarding.
    pub fn set_input_grad(&mut self, i: usize, value: Tensor<B, 2>) -> Result<(), GraphError> {
        let grad = self.slot(&self.handles.inputs, i, "input")?.grad;
        match grad {
            Some(grad) => self.manager.set(grad, value),
            None => Ok(()),
        }
    }

    fn weight_index(&self, i: usize) -> Result<usize, GraphError> {
        self.handles
            .weights
            .get(i)
            .copied()
            .ok_or_else(|| GraphError::Layer {
                node: self.name.to_string(),
                message: format!("no weight {i}"),
            })
    }

    pub fn weight(&self, i: usize) -> Result<Tensor<B, 2>, GraphError> {
        self.manager.weight(self.weight_index(i)?)
    }

    pub fn is_weight_trainable(&self, i: usize) -> bool {
        self.weight_index(i)
            .is_ok_and(|idx| self.manager.weight_is_trainable(idx))
    }

    /// Adds this node's contribution to the gradient of weight `i`.
    pub fn add_weight_gradient(&mut self, i: usize, value: Tensor<B, 2>) -> Result<(), GraphError> {
        let idx = self.weight_index(i)?;
        let Some(step) = self.order.calc_gradient else {
            return Ok(());
        };
        self.manager.accumulate_gradient(idx, step, value)
    }

    pub fn tensor(&self, i: usize) -> Result<Tensor<B, 2>, GraphError> {
        let id = self.handles.tensors.get(i).ok_or_else(|| GraphError::Layer {
            node: self.name.to_string(),
            message: format!("no tensor {i}"),
        })?;
        self.manager.get(*id)
    }

    pub fn set_tensor(&mut self, i: usize, value: Tensor<B, 2>) -> Result<(), GraphError> {
        let id = *self.handles.tensors.get(i).ok_or_else(|| GraphError::Layer {
            node: self.name.to_string(),
            message: format!("no tensor {i}"),
        })?;
        self.manager.set(id, value)
    }

    pub fn label(&self) -> Result<Tensor<B, 2>, GraphError> {
        let id = self.handles.label.ok_or_else(|| GraphError::Layer {
            node: self.name.to_string(),
            message: "no label requested".to_string(),
        })?;
        self.manager.get(id)
    }

    pub fn set_loss(&mut self, loss: f32) {
        *self.loss = loss;
    }
}
