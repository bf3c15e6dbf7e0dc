use std::f32::consts::PI;
use std::time::Instant;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use ndarray::prelude::*;
use ndarray_rand::rand_distr::{Normal, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use kernet::data::get_subset;
use kernet::hidden::HiddenCost;
use kernet::layers::{KerLinear, KerLinearEnsemble};
use kernet::loss::{CrossEntropyLoss, L0Loss};
use kernet::optim::Adam;
use kernet::{FitOptions, KnClassifier};

#[derive(Parser)]
#[command(about = "Train a multi-layer kernel network on concentric rings", long_about = None)]
struct Options {
    /// Number of classes (one ring each)
    #[arg(long, default_value_t = 3)]
    classes: usize,

    /// Number of training examples
    #[arg(long = "train", value_name = "N", default_value_t = 600)]
    n_train: usize,

    /// Number of test examples
    #[arg(long = "test", value_name = "N", default_value_t = 300)]
    n_test: usize,

    /// Use N training examples as kernel centers for every layer
    #[arg(long = "centers", value_name = "N", default_value_t = 200)]
    n_centers: usize,

    /// Width of the hidden layer
    #[arg(long, default_value_t = 8)]
    hidden: usize,

    /// Kernel width of the first layer
    #[arg(long, default_value_t = 0.5)]
    sigma: f32,

    /// Kernel width of the output layer
    #[arg(long = "sigma-out", default_value_t = 1.0)]
    sigma_out: f32,

    /// Epochs for the hidden layer (or for everything with --backprop)
    #[arg(long = "epochs-hidden", value_name = "N", default_value_t = 50)]
    epochs_hidden: usize,

    /// Epochs for the output layer
    #[arg(long = "epochs-out", value_name = "N", default_value_t = 100)]
    epochs_out: usize,

    /// Adam learning rate
    #[arg(long, default_value_t = 0.01)]
    lr: f32,

    /// Mini-batch size; default is the whole training set
    #[arg(long = "batch-size", value_name = "N")]
    batch_size: Option<usize>,

    /// Objective for hidden layers: alignment or mse
    #[arg(long = "hidden-cost", default_value = "alignment")]
    hidden_cost: HiddenCost,

    /// Only push different classes apart in hidden layers
    #[arg(long = "no-cluster-class")]
    no_cluster_class: bool,

    /// Evaluate each layer's kernel machines in chunks of N centers, in
    /// parallel
    #[arg(long, value_name = "N")]
    chunk: Option<usize>,

    /// Train all layers together with backpropagation
    #[arg(long)]
    backprop: bool,

    /// Seed for data generation and initialization
    #[arg(long, default_value_t = 1234)]
    seed: u64,

    /// Don't print training progress
    #[arg(long, short)]
    quiet: bool,
}

/// Points on `classes` noisy concentric rings, the ring of class `c` having
/// radius `c + 1`.
fn rings(n: usize, classes: usize, rng: &mut StdRng) -> Result<(Array2<f32>, Array1<usize>)> {
    let angle = Uniform::new(0.0, 2.0 * PI);
    let noise = Normal::new(0.0, 0.15)?;
    let mut x = Array2::zeros((n, 2));
    let mut y = Array1::zeros(n);
    for (i, mut row) in x.rows_mut().into_iter().enumerate() {
        let class = i % classes;
        let radius = (class + 1) as f32 + rng.sample(noise);
        let t = rng.sample(angle);
        row[0] = radius * t.cos();
        row[1] = radius * t.sin();
        y[i] = class;
    }
    Ok((x, y))
}

fn add_layer(net: &mut KnClassifier, layer: KerLinear, chunk: Option<usize>) -> kernet::Result<()> {
    match chunk {
        Some(chunk) => net.add_layer(KerLinearEnsemble::new(layer, chunk)),
        None => net.add_layer(layer),
    }
}

fn main() -> Result<()> {
    let options = Options::parse();
    ensure!(options.classes >= 2, "need at least two classes");
    ensure!(options.n_centers > 0, "need at least one center");
    ensure!(options.chunk != Some(0), "--chunk must be positive");

    let mut rng = StdRng::seed_from_u64(options.seed);
    let (x_train, y_train) = rings(options.n_train, options.classes, &mut rng)?;
    let (x_test, y_test) = rings(options.n_test, options.classes, &mut rng)?;
    let (centers, _) = get_subset(x_train.view(), y_train.view(), options.n_centers, Some(&mut rng));

    let mut net = KnClassifier::with_seed(options.seed);
    add_layer(
        &mut net,
        KerLinear::new(centers.clone(), options.hidden, options.sigma, true),
        options.chunk,
    )
    .context("adding hidden layer")?;
    add_layer(
        &mut net,
        KerLinear::new(centers, options.classes, options.sigma_out, true),
        options.chunk,
    )
    .context("adding output layer")?;
    net.add_optimizer(Adam::new(options.lr));
    if !options.backprop {
        net.add_optimizer(Adam::new(options.lr));
    }
    net.add_loss(CrossEntropyLoss);
    net.add_metric(L0Loss);
    println!(
        "network: {} -> {} -> {} with {} centers, {} parameters",
        net.layer(0).input_dim(),
        net.layer(0).output_dim(),
        net.layer(1).output_dim(),
        options.n_centers.min(options.n_train),
        (0..net.num_layers()).map(|i| net.params(i).len()).sum::<usize>(),
    );

    let n_epoch = if options.backprop {
        vec![options.epochs_hidden]
    } else {
        vec![options.epochs_hidden, options.epochs_out]
    };
    let mut fit_options = FitOptions::new(n_epoch)
        .shuffle(true)
        .hidden_cost(options.hidden_cost)
        .cluster_class(!options.no_cluster_class)
        .verbose(!options.quiet)
        .seed(options.seed);
    if let Some(batch_size) = options.batch_size {
        fit_options = fit_options.batch_size(batch_size);
    }

    let t0 = Instant::now();
    if options.backprop {
        net.fit_backprop(x_train.view(), y_train.view(), &fit_options)
    } else {
        net.fit(x_train.view(), y_train.view(), &fit_options)
    }
    .context("training failed")?;
    println!("trained in {:?}", t0.elapsed());

    let (loss, error) = net
        .score(x_test.view(), y_test.view())
        .context("scoring test set")?;
    let error = error.unwrap_or(f32::NAN);
    let n_bad = (error * options.n_test as f32).round() as usize;
    println!(
        "test loss {loss:.4}; {n_bad}/{} test points misclassified ({:.1}% accuracy)",
        options.n_test,
        100.0 * (1.0 - error)
    );
    Ok(())
}
