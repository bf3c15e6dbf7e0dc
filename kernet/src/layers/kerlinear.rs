use ndarray::prelude::*;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::RngCore;

use crate::kernel::Gaussian;
use crate::layers::KerLinearEnsemble;
use crate::traits::{Layer, Prefix};

/// A layer of kernel machines sharing one set of centers.
///
/// Output `j` is `Σ_i W[j, i] k(x, c_i) + b[j]`, that is, the layer computes
/// the kernel matrix `φ = k(x, C)` and then applies a dense linear map to it.
///
/// Parameters are `W` with shape `(out_dim, num_centers)` in row-major order,
/// followed by `b` (`out_dim` values) if the layer has a bias.
#[derive(Debug, Clone)]
pub struct KerLinear {
    /// Centers in the input space of the whole network.
    raw_centers: Array2<f32>,
    /// Centers in this layer's input space. For the first layer these are the
    /// raw centers; deeper layers get them from `update_centers`.
    centers: Array2<f32>,
    kernel: Gaussian,
    out_dim: usize,
    bias: bool,
}

impl KerLinear {
    /// Build a layer whose kernel machines are centered on the rows of
    /// `centers`, given in the network's input space.
    pub fn new(centers: Array2<f32>, out_dim: usize, sigma: f32, bias: bool) -> Self {
        assert!(centers.nrows() > 0, "a kernel layer needs at least one center");
        assert!(out_dim > 0);
        KerLinear {
            centers: centers.clone(),
            raw_centers: centers,
            kernel: Gaussian::new(sigma),
            out_dim,
            bias,
        }
    }

    pub fn num_centers(&self) -> usize {
        self.raw_centers.nrows()
    }

    pub fn centers(&self) -> ArrayView2<'_, f32> {
        self.centers.view()
    }

    pub fn raw_centers(&self) -> ArrayView2<'_, f32> {
        self.raw_centers.view()
    }

    /// Split this layer into a sum of components with at most `chunk`
    /// centers each. The result computes the same function with the same
    /// parameters.
    pub fn to_ensemble(self, chunk: usize) -> KerLinearEnsemble {
        KerLinearEnsemble::new(self, chunk)
    }

    pub(crate) fn num_weights(&self) -> usize {
        self.out_dim * self.num_centers()
    }

    /// Split `params` into the weight matrix and the bias.
    pub(crate) fn split_params<'a>(
        &self,
        params: ArrayView1<'a, f32>,
    ) -> (ArrayView2<'a, f32>, Option<ArrayView1<'a, f32>>) {
        assert_eq!(params.len(), self.num_params());
        let (w, b) = params.split_at(Axis(0), self.num_weights());
        let w = w
            .into_shape((self.out_dim, self.num_centers()))
            .expect("size of params should be self.num_params()");
        (w, self.bias.then_some(b))
    }

    pub(crate) fn split_params_mut<'a>(
        &self,
        params: ArrayViewMut1<'a, f32>,
    ) -> (ArrayViewMut2<'a, f32>, Option<ArrayViewMut1<'a, f32>>) {
        assert_eq!(params.len(), self.num_params());
        let (w, b) = params.split_at(Axis(0), self.num_weights());
        let w = w
            .into_shape((self.out_dim, self.num_centers()))
            .expect("size of params should be self.num_params()");
        (w, self.bias.then_some(b))
    }
}

impl Layer for KerLinear {
    fn input_dim(&self) -> usize {
        self.centers.ncols()
    }

    fn raw_dim(&self) -> usize {
        self.raw_centers.ncols()
    }

    fn output_dim(&self) -> usize {
        self.out_dim
    }

    fn num_params(&self) -> usize {
        self.num_weights() + if self.bias { self.out_dim } else { 0 }
    }

    fn init_params(&self, rng: &mut dyn RngCore) -> Array1<f32> {
        let bound = 1.0 / (self.num_centers() as f32).sqrt();
        Array::random_using(self.num_params(), Uniform::new(-bound, bound), rng)
    }

    fn hidden_activations_shape(&self, n: usize) -> Ix2 {
        Ix2(n, self.num_centers())
    }

    fn apply(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView2<'_, f32>,
        mut tmp: ArrayViewMut2<'_, f32>,
        mut y: ArrayViewMut2<'_, f32>,
    ) {
        assert_eq!(x.ncols(), self.input_dim());
        let (w, b) = self.split_params(params);
        let phi = self.kernel.gram(x, self.centers.view());
        y.assign(&phi.dot(&w.t()));
        if let Some(b) = b {
            y += &b;
        }
        tmp.assign(&phi);
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
        assert_eq!(dz.shape(), [n, self.out_dim]);
        let (w, _) = self.split_params(params);
        let phi = tmp;
        assert_eq!(phi.shape(), [n, self.num_centers()]);

        let (mut dw, db) = self.split_params_mut(dp);
        dw.assign(&dz.t().dot(&phi));
        if let Some(mut db) = db {
            db.assign(&dz.sum_axis(Axis(0)));
        }

        let dphi = dz.dot(&w);
        self.kernel
            .gram_derivative_lhs(x, self.centers.view(), phi, dphi.view())
    }

    fn update_centers(&mut self, _params: ArrayView1<'_, f32>, prefix: &Prefix<'_>) {
        self.centers = prefix(self.raw_centers.view());
    }

    fn kernel(&self) -> Gaussian {
        self.kernel
    }

    fn into_ensemble(self: Box<Self>, chunk: usize) -> Box<dyn Layer> {
        Box::new((*self).to_ensemble(chunk))
    }
}
