use ndarray::prelude::*;

use crate::error::{Error, Result};
use crate::hidden::HiddenCost;

/// Training configuration for `KnClassifier::fit` and `fit_backprop`.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Number of epochs for each layer (layer-wise training), or a single
    /// entry for end-to-end training.
    pub n_epoch: Vec<usize>,
    /// Mini-batch size. `None` trains on the whole set at once.
    pub batch_size: Option<usize>,
    /// Reshuffle the training set at the start of every epoch.
    pub shuffle: bool,
    /// Take one optimizer step per epoch, with the gradient accumulated over
    /// all mini-batches, instead of one step per mini-batch.
    pub accumulate_grad: bool,
    pub hidden_cost: HiddenCost,
    /// Pull examples of the same class together in the hidden objective. When
    /// false, hidden layers only push different classes apart.
    pub cluster_class: bool,
    /// Validation set used to pick the best parameters seen during training.
    pub validation: Option<(Array2<f32>, Array1<usize>)>,
    /// Check the validation set every this many epochs.
    pub val_window: usize,
    /// Print progress to stdout.
    pub verbose: bool,
    /// Seed for shuffling.
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            n_epoch: vec![],
            batch_size: None,
            shuffle: false,
            accumulate_grad: false,
            hidden_cost: HiddenCost::Alignment,
            cluster_class: true,
            validation: None,
            val_window: 30,
            verbose: false,
            seed: 1234,
        }
    }
}

impl FitOptions {
    #[must_use]
    pub fn new(n_epoch: impl Into<Vec<usize>>) -> Self {
        FitOptions {
            n_epoch: n_epoch.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    #[must_use]
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    #[must_use]
    pub fn accumulate_grad(mut self, accumulate_grad: bool) -> Self {
        self.accumulate_grad = accumulate_grad;
        self
    }

    #[must_use]
    pub fn hidden_cost(mut self, hidden_cost: HiddenCost) -> Self {
        self.hidden_cost = hidden_cost;
        self
    }

    #[must_use]
    pub fn cluster_class(mut self, cluster_class: bool) -> Self {
        self.cluster_class = cluster_class;
        self
    }

    #[must_use]
    pub fn validation(mut self, x: Array2<f32>, y: Array1<usize>) -> Self {
        self.validation = Some((x, y));
        self
    }

    #[must_use]
    pub fn val_window(mut self, val_window: usize) -> Self {
        self.val_window = val_window;
        self
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.batch_size == Some(0) {
            return Err(Error::InvalidHyperparameter {
                name: "batch_size",
                value: "0".to_string(),
            });
        }
        if self.val_window == 0 {
            return Err(Error::InvalidHyperparameter {
                name: "val_window",
                value: "0".to_string(),
            });
        }
        if let Some((x, y)) = &self.validation {
            if x.nrows() != y.len() {
                return Err(Error::ShapeMismatch {
                    what: "validation labels",
                    expected: x.nrows(),
                    got: y.len(),
                });
            }
        }
        Ok(())
    }
}
