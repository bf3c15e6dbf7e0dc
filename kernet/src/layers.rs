//! Kernel layers.
//!
//! Every layer here is built from kernel machines: a layer computes the
//! kernel matrix between its inputs and a set of centers and then applies a
//! linear map to it.

use ndarray::prelude::*;

use crate::traits::Layer;

mod ensemble;
mod kerlinear;
mod stack;

pub use ensemble::KerLinearEnsemble;
pub use kerlinear::KerLinear;
pub use stack::KerLinearStack;

/// Run `layer` on `x`, allocating the output and a throwaway scratch buffer.
pub fn forward(layer: &dyn Layer, params: ArrayView1<'_, f32>, x: ArrayView2<'_, f32>) -> Array2<f32> {
    let n = x.nrows();
    let mut tmp = Array2::<f32>::zeros(layer.hidden_activations_shape(n));
    let mut y = Array2::<f32>::zeros((n, layer.output_dim()));
    layer.apply(params, x, tmp.view_mut(), y.view_mut());
    y
}
