//! The layer-wise objective for hidden layers.
//!
//! A hidden layer is trained without looking at the layers after it. Its
//! output `h` is judged by the kernel matrix the *next* layer would compute on
//! it: `G = k_next(h, h)`. Ideally that matrix is 1 for pairs of examples in
//! the same class and 0 for pairs in different classes, so examples of one
//! class collapse together and different classes are pushed apart.

use ndarray::prelude::*;
use ndarray::Zip;

use crate::kernel::Gaussian;

/// How far a kernel matrix is from its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HiddenCost {
    /// Negative kernel alignment, `-<G, T> / (|G| |T|)` with Frobenius inner
    /// product and norms. Ranges over `[-1, 0]`.
    #[default]
    Alignment,
    /// Mean squared difference between `G` and `T`.
    Mse,
}

impl std::str::FromStr for HiddenCost {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "alignment" => Ok(HiddenCost::Alignment),
            "mse" => Ok(HiddenCost::Mse),
            _ => Err(format!("unknown hidden cost {s:?} (expected alignment or mse)")),
        }
    }
}

impl HiddenCost {
    /// Compute the cost of `g` against `t` and its derivative with respect to
    /// `g`. `t` is treated as a constant.
    pub fn eval(&self, g: ArrayView2<'_, f32>, t: ArrayView2<'_, f32>) -> (f32, Array2<f32>) {
        assert_eq!(g.shape(), t.shape());
        match self {
            HiddenCost::Alignment => {
                let gt = (&g * &t).sum();
                let gg = g.mapv(|v| v * v).sum().sqrt();
                let tt = t.mapv(|v| v * v).sum().sqrt();
                if gg == 0.0 || tt == 0.0 {
                    return (0.0, Array2::zeros(g.raw_dim()));
                }
                let loss = -gt / (gg * tt);
                let dg = (&g * (gt / (gg * gg * gg * tt))) - &t * (1.0 / (gg * tt));
                (loss, dg)
            }
            HiddenCost::Mse => {
                let size = g.len().max(1) as f32;
                let diff = &g - &t;
                let loss = diff.mapv(|d| d * d).sum() / size;
                (loss, diff * (2.0 / size))
            }
        }
    }
}

/// The ideal kernel matrix between two labelled sets: 1 where the labels
/// agree, 0 elsewhere.
pub fn ideal_gram(y1: ArrayView1<'_, usize>, y2: ArrayView1<'_, usize>) -> Array2<f32> {
    let mut t = Array2::<f32>::zeros((y1.len(), y2.len()));
    Zip::indexed(&mut t).for_each(|(i, j), t| {
        if y1[i] == y2[j] {
            *t = 1.0;
        }
    });
    t
}

/// Target kernel matrix for the examples labelled `y`, whose current kernel
/// matrix is `g`.
///
/// With `cluster_class`, this is the ideal kernel matrix. Without it,
/// examples of the same class are left where they are: their entries in the
/// target are copied from `g`, so only different-class pairs are pushed
/// toward 0.
pub fn hidden_target(
    g: ArrayView2<'_, f32>,
    y: ArrayView1<'_, usize>,
    cluster_class: bool,
) -> Array2<f32> {
    let mut t = ideal_gram(y, y);
    if !cluster_class {
        Zip::from(&mut t).and(g).for_each(|t, &g| {
            if *t == 1.0 {
                *t = g;
            }
        });
    }
    t
}

/// Evaluate the layer-wise objective on a hidden layer's output `h` for
/// examples labelled `y`, where `next` is the kernel of the following layer.
///
/// Returns the loss and ∂loss/∂h.
pub fn hidden_loss(
    cost: HiddenCost,
    h: ArrayView2<'_, f32>,
    y: ArrayView1<'_, usize>,
    next: Gaussian,
    cluster_class: bool,
) -> (f32, Array2<f32>) {
    assert_eq!(h.nrows(), y.len());
    let g = next.gram(h, h);
    let t = hidden_target(g.view(), y, cluster_class);
    let (loss, dg) = cost.eval(g.view(), t.view());
    let dh = next.gram_derivative_sym(h, g.view(), dg.view());
    (loss, dh)
}
