//! Layer-wise training of a kernel network on noisy XOR. The two hidden
//! layers form a stack, trained as one against the output layer's kernel.

use std::time::Instant;

use ndarray::prelude::*;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

use kernet::data::get_subset;
use kernet::layers::{KerLinear, KerLinearStack};
use kernet::loss::{CrossEntropyLoss, L0Loss};
use kernet::optim::{Adam, Sgd};
use kernet::{FitOptions, KnClassifier};

/// Points in `[-1, 1]²`, labelled by whether their coordinates have the same
/// sign.
fn xor(n: usize, rng: &mut StdRng) -> (Array2<f32>, Array1<usize>) {
    let x = Array2::random_using((n, 2), Uniform::new(-1.0f32, 1.0), rng);
    let y = x
        .rows()
        .into_iter()
        .map(|row| usize::from(row[0] * row[1] < 0.0))
        .collect();
    (x, y)
}

fn main() -> kernet::Result<()> {
    let mut rng = StdRng::seed_from_u64(1234);
    let (x_train, y_train) = xor(1000, &mut rng);
    let (x_val, y_val) = xor(200, &mut rng);
    let (x_test, y_test) = xor(1000, &mut rng);
    let (centers, _) = get_subset(x_train.view(), y_train.view(), 300, Some(&mut rng));

    let mut net = KnClassifier::new();
    let mut hidden = KerLinearStack::new(KerLinear::new(centers.clone(), 10, 0.3, true));
    hidden.add(KerLinear::new(centers.clone(), 6, 1.0, true))?;
    net.add_layer(hidden.to_ensemble(100))?;
    net.add_optimizer(Adam::new(0.05));
    net.add_layer(KerLinear::new(centers, 2, 0.5, true))?;
    net.add_optimizer(Sgd::new(0.5).with_momentum(0.9));
    net.add_loss(CrossEntropyLoss);
    net.add_metric(L0Loss);

    let options = FitOptions::new([60, 100])
        .batch_size(250)
        .shuffle(true)
        .validation(x_val, y_val)
        .val_window(10)
        .verbose(true);
    let t0 = Instant::now();
    net.fit(x_train.view(), y_train.view(), &options)?;
    println!("trained in {:?}", t0.elapsed());

    let yh = net.evaluate(x_test.view(), None, Some(256))?;
    let predicted = kernet::data::argmax_rows(yh.view());
    let n_test = y_test.len();
    let num_bad = predicted.iter().zip(&y_test).filter(|(p, y)| p != y).count();
    let accuracy = 100.0 * (n_test - num_bad) as f32 / n_test as f32;
    println!("{num_bad}/{n_test} test points misclassified ({accuracy:.1}% accuracy)");
    Ok(())
}
