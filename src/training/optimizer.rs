//! Stochastic gradient descent, applied through weight update callbacks.

use burn::tensor::backend::Backend;

use crate::tensor::{TensorDim, WeightUpdate};

/// SGD with optional momentum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    learning_rate: f64,
    momentum: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        Self {
            learning_rate,
            momentum,
        }
    }

    /// Optimizer state needed per weight: one velocity buffer with momentum.
    pub fn state_dims(&self, weight: &TensorDim) -> Vec<TensorDim> {
        if self.momentum > 0.0 {
            vec![*weight]
        } else {
            Vec::new()
        }
    }

    /// Updates `update.value` in place from its gradient.
    pub fn apply<B: Backend>(&self, update: &mut WeightUpdate<B>) {
        let step = match update.state.first_mut() {
            Some(velocity) if self.momentum > 0.0 => {
                let next = velocity.clone().mul_scalar(self.momentum) + update.gradient.clone();
                *velocity = next.clone();
                next
            }
            _ => update.gradient.clone(),
        };
        update.value = update.value.clone() - step.mul_scalar(self.learning_rate);
    }
}
