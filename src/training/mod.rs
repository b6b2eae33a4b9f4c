//! Training utilities for network graphs.
//!
//! This module provides:
//! - Training configuration
//! - An SGD optimizer applied through weight update callbacks
//! - A training loop driving forwarding and backwarding

mod config;
mod optimizer;
mod trainer;

pub use config::TrainingConfig;
pub use optimizer::Sgd;
pub use trainer::{TrainingResult, train};
