//! Errors reported while building or training a network.
//!
//! Shape violations inside the numeric routines are bugs in the caller and
//! panic. The errors here are the ones a user can cause through configuration.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("the network has no layers")]
    NoLayers,

    #[error("no loss function was added for the output layer")]
    MissingLoss,

    #[error("no optimizer was added for layer {layer}")]
    MissingOptimizer { layer: usize },

    #[error("expected {expected} epoch counts (one per layer), got {got}")]
    EpochCount { expected: usize, got: usize },

    #[error("shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("dataset is empty")]
    EmptyDataset,

    #[error("label {label} is out of range for a layer with {n_class} outputs")]
    LabelOutOfRange { label: usize, n_class: usize },

    #[error("invalid value for {name}: {value}")]
    InvalidHyperparameter { name: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;
