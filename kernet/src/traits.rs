use std::fmt::Debug;

use ndarray::prelude::*;
use rand::RngCore;

use crate::kernel::Gaussian;

/// Maps points from the network's input space into the input space of some
/// layer, by running them through every layer in front of it.
pub type Prefix<'a> = dyn Fn(ArrayView2<'_, f32>) -> Array2<f32> + 'a;

/// A layer of kernel machines.
///
/// Inputs and outputs are matrices. Axis 0 is always the mini-batch axis;
/// each row is a single example.
pub trait Layer: Debug + Send + Sync {
    /// Number of features each input row must have.
    fn input_dim(&self) -> usize;

    /// Number of features of the raw centers, i.e. of the network's input.
    fn raw_dim(&self) -> usize;

    /// Number of features in each output row.
    fn output_dim(&self) -> usize;

    /// Number of parameters required for this layer.
    ///
    /// The caller provides parameters to the other methods as a single flat
    /// array, which the methods will slice up and reshape into whatever they
    /// need.
    fn num_params(&self) -> usize;

    /// Draw a fresh parameter vector.
    fn init_params(&self, rng: &mut dyn RngCore) -> Array1<f32>;

    /// Amount of temporary space this layer needs for hidden activations,
    /// for a batch of `n` examples.
    ///
    /// During training, to avoid redoing work during backpropagation, we save
    /// the kernel matrices computed by `apply`.
    fn hidden_activations_shape(&self, n: usize) -> Ix2;

    /// Compute the output of this layer, given the `params` and the input `x`.
    /// Store the output in `y` and hidden activations in `tmp`.
    fn apply(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView2<'_, f32>,
        tmp: ArrayViewMut2<'_, f32>,
        y: ArrayViewMut2<'_, f32>,
    );

    /// Given x and ∂L/∂z at x, compute partial derivatives ∂L/∂x and ∂L/∂p.
    ///
    /// Store ∂L/∂p in the out-param `dp`, a 1D vector of derivatives. Return
    /// ∂L/∂x. `tmp` must be the hidden activations stored by `apply` for the
    /// same `params` and `x`.
    ///
    /// The kernel centers are treated as constants.
    fn derivatives(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView2<'_, f32>,
        tmp: ArrayView2<'_, f32>,
        dz: ArrayView2<'_, f32>,
        dp: ArrayViewMut1<'_, f32>,
    ) -> Array2<f32>;

    /// Recompute the effective centers of every kernel machine in this layer.
    ///
    /// Raw centers live in the network's input space; `prefix` maps them into
    /// this layer's input space.
    fn update_centers(&mut self, params: ArrayView1<'_, f32>, prefix: &Prefix<'_>);

    /// The kernel applied to this layer's input.
    fn kernel(&self) -> Gaussian;

    /// The same layer with its kernel machines evaluated in parallel
    /// components of at most `chunk` centers. Parameters keep their layout.
    fn into_ensemble(self: Box<Self>, chunk: usize) -> Box<dyn Layer>;
}

/// A loss function for the output layer.
///
/// `yh` holds raw network outputs, one row per example.
pub trait Loss: Debug + Send + Sync {
    fn loss(&self, y: ArrayView1<'_, usize>, yh: ArrayView2<'_, f32>) -> f32;
    fn deriv(&self, y: ArrayView1<'_, usize>, yh: ArrayView2<'_, f32>) -> Array2<f32>;
    fn accuracy(&self, y: ArrayView1<'_, usize>, yh: ArrayView2<'_, f32>) -> f32;
}

/// Updates one flat parameter vector from its gradient.
pub trait Optimizer: Debug + Send {
    fn step(&mut self, params: ArrayViewMut1<'_, f32>, grads: ArrayView1<'_, f32>);
}

/// A score reported during training and evaluation but never differentiated.
/// Lower is better.
pub trait Metric: Debug + Send + Sync {
    fn metric(&self, y: ArrayView1<'_, usize>, yh: ArrayView2<'_, f32>) -> f32;
}
