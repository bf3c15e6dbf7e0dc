use std::ops::Range;

use ndarray::prelude::*;
use rand::RngCore;

use crate::error::{Error, Result};
use crate::kernel::Gaussian;
use crate::layers::forward;
use crate::traits::{Layer, Prefix};

/// Several kernel layers applied one after another and trained as a single
/// layer.
///
/// The hidden activations of member `k` are stored in `tmp` followed by its
/// output (except for the last member, whose output is the stack's output).
///
/// A stack always has at least one member.
#[derive(Debug)]
pub struct KerLinearStack {
    members: Vec<Box<dyn Layer>>,
}

/// Where one member's data lives within the stack's buffers.
struct Slot {
    params: Range<usize>,
    hidden: Range<usize>,
    /// Columns of `tmp` holding this member's output. `None` for the last
    /// member.
    output: Option<Range<usize>>,
}

impl KerLinearStack {
    /// A stack whose first member is `first`.
    pub fn new<L: Layer + 'static>(first: L) -> Self {
        KerLinearStack {
            members: vec![Box::new(first)],
        }
    }

    /// Append a layer. All members must have their raw centers in the same
    /// space.
    pub fn add<L: Layer + 'static>(&mut self, layer: L) -> Result<()> {
        if let Some(first) = self.members.first() {
            if first.raw_dim() != layer.raw_dim() {
                return Err(Error::ShapeMismatch {
                    what: "raw center width",
                    expected: first.raw_dim(),
                    got: layer.raw_dim(),
                });
            }
        }
        self.members.push(Box::new(layer));
        Ok(())
    }

    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> &[Box<dyn Layer>] {
        &self.members
    }

    /// Convert every member to ensemble form with components of at most
    /// `chunk` centers. Parameters keep their layout.
    pub fn to_ensemble(self, chunk: usize) -> KerLinearStack {
        KerLinearStack {
            members: self
                .members
                .into_iter()
                .map(|layer| layer.into_ensemble(chunk))
                .collect(),
        }
    }

    fn slots(&self, n: usize) -> Vec<Slot> {
        let last = self.members.len() - 1;
        let mut p = 0;
        let mut c = 0;
        self.members
            .iter()
            .enumerate()
            .map(|(k, layer)| {
                let params = p..p + layer.num_params();
                p = params.end;
                let hidden = c..c + layer.hidden_activations_shape(n)[1];
                c = hidden.end;
                let output = (k != last).then(|| {
                    let r = c..c + layer.output_dim();
                    c = r.end;
                    r
                });
                Slot {
                    params,
                    hidden,
                    output,
                }
            })
            .collect()
    }

    fn last(&self) -> &dyn Layer {
        self.members
            .last()
            .expect("a stack must have at least one member")
            .as_ref()
    }
}

/// Apply `members` in sequence, with a scratch buffer per member.
fn forward_members(
    members: &[Box<dyn Layer>],
    params: ArrayView1<'_, f32>,
    x: ArrayView2<'_, f32>,
) -> Array2<f32> {
    let mut h = x.to_owned();
    let mut p = 0;
    for layer in members {
        let pk = params.slice(s![p..p + layer.num_params()]);
        p += layer.num_params();
        h = forward(layer.as_ref(), pk, h.view());
    }
    h
}

impl Layer for KerLinearStack {
    fn input_dim(&self) -> usize {
        self.members[0].input_dim()
    }

    fn raw_dim(&self) -> usize {
        self.members[0].raw_dim()
    }

    fn output_dim(&self) -> usize {
        self.last().output_dim()
    }

    fn num_params(&self) -> usize {
        self.members.iter().map(|l| l.num_params()).sum()
    }

    fn init_params(&self, rng: &mut dyn RngCore) -> Array1<f32> {
        let mut params = Array1::zeros(self.num_params());
        for (slot, layer) in self.slots(0).into_iter().zip(&self.members) {
            params
                .slice_mut(s![slot.params])
                .assign(&layer.init_params(&mut *rng));
        }
        params
    }

    fn hidden_activations_shape(&self, n: usize) -> Ix2 {
        let cols = self
            .slots(n)
            .last()
            .map(|slot| slot.hidden.end)
            .unwrap_or(0);
        Ix2(n, cols)
    }

    fn apply(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView2<'_, f32>,
        mut tmp: ArrayViewMut2<'_, f32>,
        mut y: ArrayViewMut2<'_, f32>,
    ) {
        let n = x.nrows();
        let mut h = x.to_owned();
        for (slot, layer) in self.slots(n).into_iter().zip(&self.members) {
            let pk = params.slice(s![slot.params]);
            let tk = tmp.slice_mut(s![.., slot.hidden]);
            match slot.output {
                Some(out) => {
                    let mut z = Array2::zeros((n, layer.output_dim()));
                    layer.apply(pk, h.view(), tk, z.view_mut());
                    tmp.slice_mut(s![.., out]).assign(&z);
                    h = z;
                }
                None => layer.apply(pk, h.view(), tk, y.view_mut()),
            }
        }
    }

    fn derivatives(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView2<'_, f32>,
        tmp: ArrayView2<'_, f32>,
        dz: ArrayView2<'_, f32>,
        mut dp: ArrayViewMut1<'_, f32>,
    ) -> Array2<f32> {
        let slots = self.slots(x.nrows());
        let mut dh = dz.to_owned();
        for k in (0..self.members.len()).rev() {
            let slot = &slots[k];
            // The input of member k is the output of member k - 1, saved by
            // apply() in tmp.
            let input = match k {
                0 => x.view(),
                _ => {
                    let prev = slots[k - 1]
                        .output
                        .clone()
                        .expect("only the last member has no saved output");
                    tmp.slice(s![.., prev])
                }
            };
            dh = self.members[k].derivatives(
                params.slice(s![slot.params.clone()]),
                input,
                tmp.slice(s![.., slot.hidden.clone()]),
                dh.view(),
                dp.slice_mut(s![slot.params.clone()]),
            );
        }
        dh
    }

    fn update_centers(&mut self, params: ArrayView1<'_, f32>, prefix: &Prefix<'_>) {
        let slots = self.slots(0);
        for k in 0..self.members.len() {
            let (before, rest) = self.members.split_at_mut(k);
            let before: &[Box<dyn Layer>] = before;
            let before_params = params.slice(s![..slots[k].params.start]);
            let inner: &Prefix<'_> = &|z| {
                let h = prefix(z);
                forward_members(before, before_params, h.view())
            };
            rest[0].update_centers(params.slice(s![slots[k].params.clone()]), inner);
        }
    }

    fn kernel(&self) -> Gaussian {
        self.members[0].kernel()
    }

    fn into_ensemble(self: Box<Self>, chunk: usize) -> Box<dyn Layer> {
        Box::new((*self).to_ensemble(chunk))
    }
}
