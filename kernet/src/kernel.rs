//! The Gaussian kernel and its kernel (Gram) matrices.

use ndarray::prelude::*;
use ndarray::Zip;

/// The Gaussian kernel `k(x, y) = exp(-|x - y|² / (2σ²))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaussian {
    sigma: f32,
}

impl Gaussian {
    pub fn new(sigma: f32) -> Self {
        assert!(sigma > 0.0, "kernel width must be positive, got {sigma}");
        Gaussian { sigma }
    }

    pub fn sigma(&self) -> f32 {
        self.sigma
    }

    fn gamma(&self) -> f32 {
        1.0 / (2.0 * self.sigma * self.sigma)
    }

    /// Evaluate the kernel on a single pair of points.
    pub fn eval(&self, x: ArrayView1<'_, f32>, y: ArrayView1<'_, f32>) -> f32 {
        assert_eq!(x.len(), y.len());
        let d: f32 = Zip::from(x).and(y).fold(0.0, |acc, &a, &b| acc + (a - b) * (a - b));
        (-d * self.gamma()).exp()
    }

    /// Kernel matrix between the rows of `a` (shape `(n, d)`) and the rows of
    /// `b` (shape `(m, d)`). The result has shape `(n, m)`.
    pub fn gram(&self, a: ArrayView2<'_, f32>, b: ArrayView2<'_, f32>) -> Array2<f32> {
        assert_eq!(
            a.shape()[1],
            b.shape()[1],
            "points being compared must have the same number of features"
        );
        let gamma = self.gamma();
        let mut g = Array2::<f32>::zeros((a.shape()[0], b.shape()[0]));
        Zip::from(g.rows_mut())
            .and(a.rows())
            .par_for_each(|mut g, x| {
                for (g, y) in g.iter_mut().zip(b.rows()) {
                    let d: f32 = Zip::from(x).and(y).fold(0.0, |acc, &p, &q| acc + (p - q) * (p - q));
                    *g = (-d * gamma).exp();
                }
            });
        g
    }

    /// Given `g = self.gram(a, b)` and `dg` = ∂L/∂g, compute ∂L/∂a.
    ///
    /// `∂L/∂a[i] = Σ_j dg[i,j] g[i,j] (b[j] - a[i]) / σ²`
    pub fn gram_derivative_lhs(
        &self,
        a: ArrayView2<'_, f32>,
        b: ArrayView2<'_, f32>,
        g: ArrayView2<'_, f32>,
        dg: ArrayView2<'_, f32>,
    ) -> Array2<f32> {
        assert_eq!(g.shape(), [a.shape()[0], b.shape()[0]]);
        assert_eq!(g.shape(), dg.shape());
        let w = &dg * &g;
        let row_sums = w.sum_axis(Axis(1));
        let s2 = self.sigma * self.sigma;
        (w.dot(&b) - &a * &row_sums.slice(s![.., NewAxis])) / s2
    }

    /// Given `g = self.gram(a, b)` and `dg` = ∂L/∂g, compute ∂L/∂b.
    pub fn gram_derivative_rhs(
        &self,
        a: ArrayView2<'_, f32>,
        b: ArrayView2<'_, f32>,
        g: ArrayView2<'_, f32>,
        dg: ArrayView2<'_, f32>,
    ) -> Array2<f32> {
        self.gram_derivative_lhs(b, a, g.t(), dg.t())
    }

    /// Given `g = self.gram(a, a)` and `dg` = ∂L/∂g, compute ∂L/∂a, counting
    /// the dependence through both arguments.
    pub fn gram_derivative_sym(
        &self,
        a: ArrayView2<'_, f32>,
        g: ArrayView2<'_, f32>,
        dg: ArrayView2<'_, f32>,
    ) -> Array2<f32> {
        let dg_sym = &dg + &dg.t();
        self.gram_derivative_lhs(a, a, g, dg_sym.view())
    }
}
