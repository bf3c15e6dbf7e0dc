//! Training behavior of whole networks on small problems.

use ndarray::prelude::*;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

use kernet::hidden::{hidden_target, HiddenCost};
use kernet::kernel::Gaussian;
use kernet::layers::{self, KerLinear, KerLinearEnsemble, KerLinearStack};
use kernet::loss::{CrossEntropyLoss, L0Loss};
use kernet::optim::{Adam, Sgd};
use kernet::*;

fn assert_close(actual: ArrayView2<'_, f32>, expected: ArrayView2<'_, f32>, tol: f32) {
    assert_eq!(actual.shape(), expected.shape());
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert!(
            (a - e).abs() <= tol * e.abs().max(1e-3),
            "got {actual:?}, expected {expected:?}"
        );
    }
}

fn toy_data() -> (Array2<f32>, Array1<usize>) {
    (array![[1.0f32, 2.0], [3.0, 4.0]], array![0usize, 1])
}

fn toy_params() -> [Array1<f32>; 2] {
    [
        array![0.1f32, 0.2, 0.5, 0.7, 0.0, 0.0],
        array![1.2f32, 0.3, 0.2, 1.7, 0.1, 0.2],
    ]
}

/// The two-layer toy network, with every layer split into components of
/// `chunk` centers if a chunk size is given.
fn toy_network(chunk: Option<usize>, lr: f32) -> KnClassifier {
    let (x, _) = toy_data();
    let mut net = KnClassifier::new();
    for sigma in [3.0, 2.0] {
        let layer = KerLinear::new(x.clone(), 2, sigma, true);
        match chunk {
            Some(chunk) => net.add_layer(KerLinearEnsemble::new(layer, chunk)).unwrap(),
            None => net.add_layer(layer).unwrap(),
        }
        net.add_optimizer(Sgd::new(lr));
    }
    for (i, p) in toy_params().into_iter().enumerate() {
        net.set_params(i, p).unwrap();
    }
    net.add_loss(CrossEntropyLoss);
    net
}

/// One Gaussian blob per class in the plane, at opposite ends of a
/// diagonal.
fn blobs(n_per_class: usize, seed: u64) -> (Array2<f32>, Array1<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Array2::<f32>::random_using((2 * n_per_class, 2), Normal::new(0.0, 0.3).unwrap(), &mut rng);
    let mut x = noise;
    let mut y = Array1::zeros(2 * n_per_class);
    for i in 0..2 * n_per_class {
        let class = i % 2;
        y[i] = class;
        let offset = if class == 0 { -1.5 } else { 1.5 };
        x[[i, 0]] += offset;
        x[[i, 1]] += offset;
    }
    (x, y)
}

fn blob_network(x: &Array2<f32>) -> KnClassifier {
    let mut net = KnClassifier::with_seed(7);
    net.add_layer(KerLinear::new(x.clone(), 4, 1.0, true)).unwrap();
    net.add_optimizer(Adam::new(0.05));
    net.add_layer(KerLinear::new(x.clone(), 2, 0.5, true)).unwrap();
    net.add_optimizer(Adam::new(0.05));
    net.add_loss(CrossEntropyLoss);
    net.add_metric(L0Loss);
    net
}

#[test]
fn test_forward() {
    for chunk in [None, Some(1)] {
        let net = toy_network(chunk, 0.0);
        let (x, _) = toy_data();
        let out = net.forward(x.view(), None).unwrap();
        assert_close(
            out.view(),
            array![[1.5997587f32, 2.0986326], [1.5990349, 2.0998392]].view(),
            1e-5,
        );
        let hidden = net.forward(x.view(), Some(0)).unwrap();
        assert_close(
            hidden.view(),
            array![[0.22823608f32, 0.9488263], [0.26411805, 1.0205902]].view(),
            1e-5,
        );
    }
}

#[test]
fn test_layerwise_gradients() {
    for chunk in [None, Some(1)] {
        let mut net = toy_network(chunk, 0.0);
        let (x, y) = toy_data();
        net.fit(x.view(), y.view(), &FitOptions::new([1, 1])).unwrap();

        let g0 = net.grad(0).unwrap();
        let (dw0, db0) = g0.split_at(Axis(0), 4);
        assert_close(
            dw0.into_shape((2, 2)).unwrap(),
            array![[0.00113756f32, -0.00113756], [0.00227511, -0.00227511]].view(),
            1e-4,
        );
        assert!(db0.iter().all(|d| d.abs() < 1e-6), "db0 = {db0:?}");

        let g1 = net.grad(1).unwrap();
        let (dw1, db1) = g1.split_at(Axis(0), 4);
        assert_close(
            dw1.into_shape((2, 2)).unwrap(),
            array![[-0.12257326f32, -0.12217124], [0.12257326, 0.12217124]].view(),
            1e-4,
        );
        assert_close(
            db1.insert_axis(Axis(0)),
            array![[-0.12242149f32, 0.12242149]].view(),
            1e-4,
        );

        // zero learning rate, so training changed nothing
        for (i, p) in toy_params().iter().enumerate() {
            assert_eq!(net.params(i), p.view());
        }
    }
}

#[test]
fn test_ensemble_trains_like_kerlinear() {
    let (x, y) = toy_data();
    let mut plain = toy_network(None, 1.0);
    let mut ensemble = toy_network(Some(1), 1.0);
    let options = FitOptions::new([10, 10]);
    plain.fit(x.view(), y.view(), &options).unwrap();
    ensemble.fit(x.view(), y.view(), &options).unwrap();

    for i in 0..2 {
        let a = plain.params(i).insert_axis(Axis(0));
        let b = ensemble.params(i).insert_axis(Axis(0));
        assert_close(a, b, 1e-3);
    }
    let out = plain.forward(x.view(), None).unwrap();
    assert_close(ensemble.forward(x.view(), None).unwrap().view(), out.view(), 1e-3);
    assert_eq!(plain.evaluate(x.view(), None, Some(1)).unwrap(), out);
    let hidden = plain.forward(x.view(), Some(0)).unwrap();
    assert_eq!(plain.evaluate(x.view(), Some(0), Some(1)).unwrap(), hidden);
}

#[test]
fn test_later_centers_follow_earlier_params() {
    let (x, _) = toy_data();
    let net = toy_network(None, 0.0);
    let mapped = net.forward(x.view(), Some(0)).unwrap();
    // layer 1's centers are its raw centers pushed through layer 0
    let mut expected = KerLinear::new(x.clone(), 2, 2.0, true);
    expected.update_centers(toy_params()[1].view(), &|_| mapped.clone());
    let direct = layers::forward(&expected, toy_params()[1].view(), mapped.view());
    assert_close(net.forward(x.view(), None).unwrap().view(), direct.view(), 1e-5);
}

#[test]
fn test_layerwise_training_separates_blobs() {
    let (x, y) = blobs(20, 1);
    let (x_test, y_test) = blobs(20, 2);
    let mut net = blob_network(&x);
    let options = FitOptions::new([30, 60])
        .batch_size(10)
        .shuffle(true)
        .validation(x_test.clone(), y_test.clone())
        .val_window(10);
    net.fit(x.view(), y.view(), &options).unwrap();

    let (_, error) = net.score(x_test.view(), y_test.view()).unwrap();
    assert!(error.unwrap() <= 0.1, "test error {error:?}");
    let predicted = net.predict(x.view()).unwrap();
    let wrong = predicted.iter().zip(&y).filter(|(p, y)| p != y).count();
    assert!(wrong <= 4, "{wrong} training examples misclassified");
}

#[test]
fn test_accumulated_gradients_match_full_batch() {
    // the output loss is a mean over examples, so batch gradients weighted by
    // batch size add up to the full-batch gradient
    let (x, y) = blobs(6, 3);
    let single_layer = || {
        let mut net = KnClassifier::with_seed(11);
        net.add_layer(KerLinear::new(x.clone(), 2, 1.0, true)).unwrap();
        net.add_optimizer(Sgd::new(0.5));
        net.add_loss(CrossEntropyLoss);
        net
    };
    let mut a = single_layer();
    let mut b = single_layer();
    a.fit(x.view(), y.view(), &FitOptions::new([3])).unwrap();
    b.fit(
        x.view(),
        y.view(),
        &FitOptions::new([3]).batch_size(4).accumulate_grad(true),
    )
    .unwrap();
    assert_close(
        a.params(0).insert_axis(Axis(0)),
        b.params(0).insert_axis(Axis(0)),
        1e-3,
    );
}

#[test]
fn test_backprop_reduces_loss() {
    let (x, y) = blobs(15, 4);
    let mut net = KnClassifier::with_seed(3);
    net.add_layer(KerLinear::new(x.clone(), 3, 1.0, true)).unwrap();
    net.add_layer(KerLinear::new(x.clone(), 2, 1.0, true)).unwrap();
    net.add_optimizer(Adam::new(0.05));
    net.add_loss(CrossEntropyLoss);

    let (before, _) = net.score(x.view(), y.view()).unwrap();
    net.fit_backprop(x.view(), y.view(), &FitOptions::new([40])).unwrap();
    let (after, _) = net.score(x.view(), y.view()).unwrap();
    assert!(after < before, "loss went from {before} to {after}");
    assert!(net.grad(0).is_some() && net.grad(1).is_some());
}

#[test]
fn test_configuration_errors() {
    let (x, y) = toy_data();

    let mut empty = KnClassifier::new();
    assert_eq!(
        empty.fit(x.view(), y.view(), &FitOptions::new([1])),
        Err(Error::NoLayers)
    );
    assert_eq!(empty.forward(x.view(), None), Err(Error::NoLayers));

    let mut net = KnClassifier::new();
    net.add_layer(KerLinear::new(x.clone(), 2, 1.0, true)).unwrap();
    assert_eq!(
        net.fit(x.view(), y.view(), &FitOptions::new([1])),
        Err(Error::MissingLoss)
    );
    net.add_loss(CrossEntropyLoss);
    assert_eq!(
        net.fit(x.view(), y.view(), &FitOptions::new([1])),
        Err(Error::MissingOptimizer { layer: 0 })
    );
    net.add_optimizer(Sgd::new(0.1));
    assert_eq!(
        net.fit(x.view(), y.view(), &FitOptions::new([1, 1])),
        Err(Error::EpochCount {
            expected: 1,
            got: 2
        })
    );
    assert_eq!(
        net.fit(x.view(), array![0usize, 2].view(), &FitOptions::new([1])),
        Err(Error::LabelOutOfRange { label: 2, n_class: 2 })
    );
    assert_eq!(
        net.fit(
            Array2::<f32>::zeros((0, 2)).view(),
            Array1::<usize>::zeros(0).view(),
            &FitOptions::new([1])
        ),
        Err(Error::EmptyDataset)
    );
    assert_eq!(
        net.fit(x.view(), y.view(), &FitOptions::new([1]).batch_size(0)),
        Err(Error::InvalidHyperparameter {
            name: "batch_size",
            value: "0".to_string()
        })
    );
    assert_eq!(
        net.set_params(0, Array1::zeros(3)),
        Err(Error::ShapeMismatch {
            what: "layer parameters",
            expected: 6,
            got: 3
        })
    );
    assert_eq!(
        net.add_layer(KerLinear::new(Array2::zeros((2, 5)), 2, 1.0, true)),
        Err(Error::ShapeMismatch {
            what: "raw center width",
            expected: 2,
            got: 5
        })
    );
    assert_eq!(
        net.forward(Array2::<f32>::zeros((1, 3)).view(), None),
        Err(Error::ShapeMismatch {
            what: "input features",
            expected: 2,
            got: 3
        })
    );
}

/// A two-member stack over `x`, as a fresh layer.
fn two_member_stack(x: &Array2<f32>) -> KerLinearStack {
    let mut stack = KerLinearStack::new(KerLinear::new(x.clone(), 3, 1.0, true));
    stack.add(KerLinear::new(x.clone(), 2, 1.0, true)).unwrap();
    stack
}

fn stack_network(x: &Array2<f32>) -> KnClassifier {
    let mut net = KnClassifier::with_seed(5);
    net.add_layer(two_member_stack(x)).unwrap();
    net.add_optimizer(Adam::new(0.05));
    net.add_layer(KerLinear::new(x.clone(), 2, 0.5, true)).unwrap();
    net.add_optimizer(Adam::new(0.05));
    net.add_loss(CrossEntropyLoss);
    net
}

/// Check the network's outputs against a stack and output layer built from
/// scratch with the network's current parameters.
fn assert_stack_network_consistent(net: &KnClassifier, x: &Array2<f32>) {
    let mut stack = two_member_stack(x);
    stack.update_centers(net.params(0), &|z| z.to_owned());
    let hidden = layers::forward(&stack, net.params(0), x.view());
    assert_close(net.forward(x.view(), Some(0)).unwrap().view(), hidden.view(), 1e-3);

    let mut out_layer = KerLinear::new(x.clone(), 2, 0.5, true);
    out_layer.update_centers(net.params(1), &|z| layers::forward(&stack, net.params(0), z));
    let out = layers::forward(&out_layer, net.params(1), hidden.view());
    assert_close(net.forward(x.view(), None).unwrap().view(), out.view(), 1e-3);
}

#[test]
fn test_stack_centers_follow_set_params() {
    let (x, _) = blobs(5, 6);
    let mut net = stack_network(&x);
    let p = Array1::from_elem(net.params(0).len(), 0.3f32);
    net.set_params(0, p).unwrap();
    assert_stack_network_consistent(&net, &x);
}

#[test]
fn test_stack_centers_follow_training() {
    let (x, y) = blobs(8, 7);
    let mut net = stack_network(&x);
    net.fit(x.view(), y.view(), &FitOptions::new([20, 5]).batch_size(6))
        .unwrap();
    assert_stack_network_consistent(&net, &x);

    let mut net = stack_network(&x);
    net.fit_backprop(x.view(), y.view(), &FitOptions::new([10])).unwrap();
    assert_stack_network_consistent(&net, &x);
}

/// Labels flipped, so that fitting the training set makes this set worse.
fn flipped(y: &Array1<usize>) -> Array1<usize> {
    y.mapv(|c| 1 - c)
}

#[test]
fn test_layerwise_validation_keeps_best_params() {
    let (x, y) = blobs(6, 8);
    let single_layer = || {
        let mut net = KnClassifier::with_seed(2);
        net.add_layer(KerLinear::new(x.clone(), 2, 1.0, true)).unwrap();
        net.add_optimizer(Sgd::new(2.0));
        net.add_loss(CrossEntropyLoss);
        net
    };
    let y_val = flipped(&y);
    let n_epoch = 8;

    // the same training without validation, stopped after each epoch
    let runs: Vec<(f32, Array1<f32>)> = (1..=n_epoch)
        .map(|k| {
            let mut net = single_layer();
            net.fit(x.view(), y.view(), &FitOptions::new([k])).unwrap();
            let (loss, _) = net.score(x.view(), y_val.view()).unwrap();
            (loss, net.params(0).to_owned())
        })
        .collect();
    let mut best = 0;
    for (k, (loss, _)) in runs.iter().enumerate() {
        if *loss < runs[best].0 {
            best = k;
        }
    }

    let mut net = single_layer();
    let options = FitOptions::new([n_epoch])
        .validation(x.clone(), y_val.clone())
        .val_window(1);
    net.fit(x.view(), y.view(), &options).unwrap();
    assert_eq!(net.params(0), runs[best].1.view());
    assert_ne!(net.params(0), runs[n_epoch - 1].1.view());
}

#[test]
fn test_backprop_validation_keeps_best_params() {
    let (x, y) = blobs(6, 9);
    let two_layers = || {
        let mut net = KnClassifier::with_seed(4);
        net.add_layer(KerLinear::new(x.clone(), 3, 1.0, true)).unwrap();
        net.add_layer(KerLinear::new(x.clone(), 2, 1.0, true)).unwrap();
        net.add_optimizer(Sgd::new(2.0));
        net.add_loss(CrossEntropyLoss);
        net
    };
    let y_val = flipped(&y);
    let n_epoch = 6;

    let runs: Vec<(f32, KnClassifier)> = (1..=n_epoch)
        .map(|k| {
            let mut net = two_layers();
            net.fit_backprop(x.view(), y.view(), &FitOptions::new([k])).unwrap();
            let (loss, _) = net.score(x.view(), y_val.view()).unwrap();
            (loss, net)
        })
        .collect();
    let mut best = 0;
    for (k, (loss, _)) in runs.iter().enumerate() {
        if *loss < runs[best].0 {
            best = k;
        }
    }

    let mut net = two_layers();
    let options = FitOptions::new([n_epoch])
        .validation(x.clone(), y_val.clone())
        .val_window(1);
    net.fit_backprop(x.view(), y.view(), &options).unwrap();
    for i in 0..2 {
        assert_eq!(net.params(i), runs[best].1.params(i));
    }
    assert_ne!(net.params(1), runs[n_epoch - 1].1.params(1));
    assert_eq!(
        net.forward(x.view(), None).unwrap(),
        runs[best].1.forward(x.view(), None).unwrap()
    );
}

#[test]
fn test_backprop_accumulated_gradients_match_full_batch() {
    let (x, y) = blobs(6, 10);
    let two_layers = || {
        let mut net = KnClassifier::with_seed(12);
        net.add_layer(KerLinear::new(x.clone(), 3, 1.0, true)).unwrap();
        net.add_layer(KerLinear::new(x.clone(), 2, 1.0, true)).unwrap();
        net.add_optimizer(Sgd::new(0.5));
        net.add_loss(CrossEntropyLoss);
        net
    };
    let mut a = two_layers();
    let mut b = two_layers();
    a.fit_backprop(x.view(), y.view(), &FitOptions::new([3])).unwrap();
    b.fit_backprop(
        x.view(),
        y.view(),
        &FitOptions::new([3]).batch_size(5).accumulate_grad(true),
    )
    .unwrap();
    for i in 0..2 {
        assert_close(
            a.params(i).insert_axis(Axis(0)),
            b.params(i).insert_axis(Axis(0)),
            1e-3,
        );
    }
}

#[test]
fn test_hidden_gradient_for_each_objective() {
    let (x, y) = blobs(6, 11);
    let next = Gaussian::new(0.5);
    let mut grads = vec![];
    for (cost, cluster_class) in [
        (HiddenCost::Alignment, true),
        (HiddenCost::Alignment, false),
        (HiddenCost::Mse, true),
        (HiddenCost::Mse, false),
    ] {
        let mut net = KnClassifier::with_seed(3);
        net.add_layer(KerLinear::new(x.clone(), 3, 1.0, true)).unwrap();
        net.add_optimizer(Sgd::new(0.0));
        net.add_layer(KerLinear::new(x.clone(), 2, next.sigma(), true)).unwrap();
        net.add_optimizer(Sgd::new(0.0));
        net.add_loss(CrossEntropyLoss);
        let options = FitOptions::new([1, 0])
            .hidden_cost(cost)
            .cluster_class(cluster_class);
        net.fit(x.view(), y.view(), &options).unwrap();
        let grad = net.grad(0).unwrap().to_owned();

        // the target is a constant, computed from the starting kernel matrix
        let p0 = net.params(0).to_owned();
        let h0 = net.forward(x.view(), Some(0)).unwrap();
        let g0 = next.gram(h0.view(), h0.view());
        let target = hidden_target(g0.view(), y.view(), cluster_class);
        let mut objective = |p: &Array1<f32>| {
            net.set_params(0, p.clone()).unwrap();
            let h = net.forward(x.view(), Some(0)).unwrap();
            cost.eval(next.gram(h.view(), h.view()).view(), target.view()).0
        };

        let h = 0.01;
        for j in 0..p0.len() {
            let mut plus = p0.clone();
            plus[j] += h;
            let mut minus = p0.clone();
            minus[j] -= h;
            let measured = (objective(&plus) - objective(&minus)) / (2.0 * h);
            let error = (grad[j] - measured).abs() / measured.abs().max(0.01);
            assert!(
                error <= 0.05,
                "{cost:?} cluster_class={cluster_class} parameter {j}: computed {}, measured {measured}",
                grad[j]
            );
        }
        grads.push(grad);
    }
    for k in 1..grads.len() {
        assert_ne!(grads[0], grads[k]);
    }
}
