//! Multi-layer kernel networks.
//!
//! A kernel network is a stack of layers, each made of Gaussian kernel
//! machines. Networks are trained either greedily, one layer at a time with
//! a kernel-alignment objective for the hidden layers, or end to end with
//! backpropagation.

mod traits;
pub use traits::{Layer, Loss, Metric, Optimizer, Prefix};

mod error;
pub use error::{Error, Result};

mod model;
pub use model::KnClassifier;

mod options;
pub use options::FitOptions;

pub mod data;
pub mod hidden;
pub mod kernel;
pub mod layers;
pub mod loss;
pub mod optim;
