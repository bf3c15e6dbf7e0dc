//! Loss functions and metrics for the output layer.

use ndarray::prelude::*;
use ndarray::Zip;

use crate::data::argmax_rows;
use crate::traits::{Loss, Metric};

fn check_labels(y: ArrayView1<'_, usize>, yh: ArrayView2<'_, f32>) {
    let n = yh.shape()[0]; // number of examples
    let c = yh.shape()[1]; // number of categories
    assert_eq!(y.shape(), &[n]);
    assert!(y.iter().all(|&y| y < c), "label out of range");
}

fn accuracy_of(y: ArrayView1<'_, usize>, yh: ArrayView2<'_, f32>) -> f32 {
    let n = yh.shape()[0];
    if n == 0 {
        return 0.0;
    }
    let pred = argmax_rows(yh);
    let num_good = Zip::from(&y)
        .and(&pred)
        .fold(0usize, |acc, &y, &p| acc + usize::from(y == p));
    num_good as f32 / n as f32
}

/// A loss function for classification problems, computed directly on the raw
/// outputs (logits) of the network: softmax followed by negative log
/// likelihood, averaged over examples.
#[derive(Debug, Clone, Copy)]
pub struct CrossEntropyLoss;

fn log_softmax_row(row: ArrayView1<'_, f32>) -> Array1<f32> {
    let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    let lse = max + row.mapv(|v| (v - max).exp()).sum().ln();
    row.mapv(|v| v - lse)
}

impl Loss for CrossEntropyLoss {
    fn loss(&self, y: ArrayView1<'_, usize>, yh: ArrayView2<'_, f32>) -> f32 {
        check_labels(y, yh);
        let n = yh.shape()[0];
        if n == 0 {
            0.0
        } else {
            let mut total = 0.0;
            Zip::from(y).and(yh.rows()).for_each(|&y, yh| {
                total += -log_softmax_row(yh)[y];
            });
            total / n as f32
        }
    }

    // ∂loss/∂yh[i, j] = (softmax(yh[i])[j] - [j == y[i]]) / n
    fn deriv(&self, y: ArrayView1<'_, usize>, yh: ArrayView2<'_, f32>) -> Array2<f32> {
        check_labels(y, yh);
        let n = yh.shape()[0];
        let mut dyh = Array2::<f32>::zeros(yh.raw_dim());
        Zip::from(dyh.rows_mut())
            .and(y)
            .and(yh.rows())
            .for_each(|mut dyh, &y, yh| {
                dyh.assign(&log_softmax_row(yh).mapv(f32::exp));
                dyh[y] -= 1.0;
                dyh /= n as f32;
            });
        dyh
    }

    fn accuracy(&self, y: ArrayView1<'_, usize>, yh: ArrayView2<'_, f32>) -> f32 {
        accuracy_of(y, yh)
    }
}

/// Mean squared error between the raw outputs and one-hot encoded labels.
#[derive(Debug, Clone, Copy)]
pub struct MseLoss;

impl Loss for MseLoss {
    fn loss(&self, y: ArrayView1<'_, usize>, yh: ArrayView2<'_, f32>) -> f32 {
        check_labels(y, yh);
        if yh.is_empty() {
            return 0.0;
        }
        let diff = &yh - &crate::data::one_hot(y, yh.shape()[1]);
        diff.mapv(|d| d * d).mean().unwrap_or(0.0)
    }

    fn deriv(&self, y: ArrayView1<'_, usize>, yh: ArrayView2<'_, f32>) -> Array2<f32> {
        check_labels(y, yh);
        let size = yh.len().max(1) as f32;
        (&yh - &crate::data::one_hot(y, yh.shape()[1])) * (2.0 / size)
    }

    fn accuracy(&self, y: ArrayView1<'_, usize>, yh: ArrayView2<'_, f32>) -> f32 {
        accuracy_of(y, yh)
    }
}

/// Classification error rate: the fraction of examples whose highest-scoring
/// output is not the label.
#[derive(Debug, Clone, Copy)]
pub struct L0Loss;

impl Metric for L0Loss {
    fn metric(&self, y: ArrayView1<'_, usize>, yh: ArrayView2<'_, f32>) -> f32 {
        if yh.shape()[0] == 0 {
            0.0
        } else {
            1.0 - accuracy_of(y, yh)
        }
    }
}
