//! Small helpers for handling in-memory datasets.

use std::ops::Range;

use ndarray::prelude::*;
use ndarray::Zip;
use rand::seq::SliceRandom;
use rand::Rng;

/// Permute the rows of `x` and the entries of `y` with the same random
/// permutation.
pub fn rand_shuffle<R: Rng + ?Sized>(
    x: ArrayView2<'_, f32>,
    y: ArrayView1<'_, usize>,
    rng: &mut R,
) -> (Array2<f32>, Array1<usize>) {
    assert_eq!(x.nrows(), y.len());
    let mut order: Vec<usize> = (0..y.len()).collect();
    order.shuffle(rng);
    (x.select(Axis(0), &order), y.select(Axis(0), &order))
}

/// The first `n` examples, after shuffling if an `rng` is given.
///
/// Useful for picking the kernel centers of a layer from a subset of the
/// training data.
pub fn get_subset<R: Rng + ?Sized>(
    x: ArrayView2<'_, f32>,
    y: ArrayView1<'_, usize>,
    n: usize,
    rng: Option<&mut R>,
) -> (Array2<f32>, Array1<usize>) {
    assert_eq!(x.nrows(), y.len());
    let n = n.min(y.len());
    match rng {
        Some(rng) => {
            let (x, y) = rand_shuffle(x, y, rng);
            (x.slice(s![..n, ..]).to_owned(), y.slice(s![..n]).to_owned())
        }
        None => (x.slice(s![..n, ..]).to_owned(), y.slice(s![..n]).to_owned()),
    }
}

/// Encode labels as rows of a `(n, n_class)` indicator matrix.
pub fn one_hot(y: ArrayView1<'_, usize>, n_class: usize) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros((y.len(), n_class));
    Zip::from(out.rows_mut()).and(y).for_each(|mut row, &y| {
        assert!(y < n_class, "label {y} out of range for {n_class} classes");
        row[y] = 1.0;
    });
    out
}

/// Index of the largest entry of each row. Ties go to the lowest index.
pub fn argmax_rows(yh: ArrayView2<'_, f32>) -> Array1<usize> {
    yh.rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            for (j, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = j;
                }
            }
            best
        })
        .collect()
}

/// Row ranges of consecutive mini-batches covering `0..n`. A `batch_size` of
/// `None` means one batch with everything.
pub fn batches(n: usize, batch_size: Option<usize>) -> impl Iterator<Item = Range<usize>> {
    let size = batch_size.unwrap_or(n).max(1);
    (0..n).step_by(size).map(move |begin| begin..(begin + size).min(n))
}
