use std::ops::Range;

use ndarray::prelude::*;
use rand::RngCore;
use rayon::prelude::*;

use crate::kernel::Gaussian;
use crate::layers::KerLinear;
use crate::traits::{Layer, Prefix};

/// A `KerLinear` evaluated as a sum of smaller components.
///
/// The centers are divided into chunks of `chunk` rows. Each chunk gets its
/// own (smaller) kernel matrix and its own slice of the weight matrix; the
/// partial outputs are added together. Components run as separate Rayon tasks.
///
/// Parameters are laid out exactly as in the wrapped `KerLinear`, so a
/// parameter vector can be moved between the two forms unchanged.
#[derive(Debug, Clone)]
pub struct KerLinearEnsemble {
    inner: KerLinear,
    /// Number of centers per component.
    chunk: usize,
}

impl KerLinearEnsemble {
    pub fn new(inner: KerLinear, chunk: usize) -> Self {
        assert!(chunk > 0);
        KerLinearEnsemble { inner, chunk }
    }

    pub fn num_centers(&self) -> usize {
        self.inner.num_centers()
    }

    /// Center index ranges of each component.
    fn components(&self) -> Vec<Range<usize>> {
        let m = self.inner.num_centers();
        (0..m)
            .step_by(self.chunk)
            .map(|start| start..(start + self.chunk).min(m))
            .collect()
    }
}

impl Layer for KerLinearEnsemble {
    fn input_dim(&self) -> usize {
        self.inner.input_dim()
    }

    fn raw_dim(&self) -> usize {
        self.inner.raw_dim()
    }

    fn output_dim(&self) -> usize {
        self.inner.output_dim()
    }

    fn num_params(&self) -> usize {
        self.inner.num_params()
    }

    fn init_params(&self, rng: &mut dyn RngCore) -> Array1<f32> {
        self.inner.init_params(rng)
    }

    fn hidden_activations_shape(&self, n: usize) -> Ix2 {
        self.inner.hidden_activations_shape(n)
    }

    fn apply(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView2<'_, f32>,
        mut tmp: ArrayViewMut2<'_, f32>,
        mut y: ArrayViewMut2<'_, f32>,
    ) {
        assert_eq!(x.ncols(), self.input_dim());
        let (w, b) = self.inner.split_params(params);
        let kernel = self.inner.kernel();
        let centers = self.inner.centers();

        let parts: Vec<(Range<usize>, Array2<f32>, Array2<f32>)> = self
            .components()
            .into_par_iter()
            .map(|r| {
                let phi = kernel.gram(x, centers.slice(s![r.clone(), ..]));
                let z = phi.dot(&w.slice(s![.., r.clone()]).t());
                (r, phi, z)
            })
            .collect();

        y.fill(0.0);
        for (r, phi, z) in parts {
            tmp.slice_mut(s![.., r]).assign(&phi);
            y += &z;
        }
        if let Some(b) = b {
            y += &b;
        }
    }

    fn derivatives(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView2<'_, f32>,
        tmp: ArrayView2<'_, f32>,
        dz: ArrayView2<'_, f32>,
        dp: ArrayViewMut1<'_, f32>,
    ) -> Array2<f32> {
        let n = x.nrows();
        assert_eq!(dz.shape(), [n, self.output_dim()]);
        let (w, _) = self.inner.split_params(params);
        let kernel = self.inner.kernel();
        let centers = self.inner.centers();

        let parts: Vec<(Range<usize>, Array2<f32>, Array2<f32>)> = self
            .components()
            .into_par_iter()
            .map(|r| {
                let phi = tmp.slice(s![.., r.clone()]);
                let dw = dz.t().dot(&phi);
                let dphi = dz.dot(&w.slice(s![.., r.clone()]));
                let dx = kernel.gram_derivative_lhs(
                    x,
                    centers.slice(s![r.clone(), ..]),
                    phi,
                    dphi.view(),
                );
                (r, dw, dx)
            })
            .collect();

        let (mut dw_all, db) = self.inner.split_params_mut(dp);
        let mut dx = Array2::<f32>::zeros(x.raw_dim());
        for (r, dw, dx_part) in parts {
            dw_all.slice_mut(s![.., r]).assign(&dw);
            dx += &dx_part;
        }
        if let Some(mut db) = db {
            db.assign(&dz.sum_axis(Axis(0)));
        }
        dx
    }

    fn update_centers(&mut self, params: ArrayView1<'_, f32>, prefix: &Prefix<'_>) {
        self.inner.update_centers(params, prefix);
    }

    fn kernel(&self) -> Gaussian {
        self.inner.kernel()
    }

    fn into_ensemble(self: Box<Self>, chunk: usize) -> Box<dyn Layer> {
        Box::new(KerLinearEnsemble::new(self.inner, chunk))
    }
}
