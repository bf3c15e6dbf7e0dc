use std::io::{self, Write};

use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::data::{argmax_rows, batches, rand_shuffle};
use crate::error::{Error, Result};
use crate::hidden::hidden_loss;
use crate::layers::forward;
use crate::options::FitOptions;
use crate::traits::{Layer, Loss, Metric, Optimizer, Prefix};

/// A multi-layer kernel network for classification.
///
/// Layers are added in order. Deeper layers' kernel machines are centered on
/// their raw centers mapped through the layers in front of them; the
/// classifier keeps those centers in sync with the parameters.
#[derive(Debug)]
pub struct KnClassifier {
    layers: Vec<Box<dyn Layer>>,
    /// One flat parameter vector per layer.
    params: Vec<Array1<f32>>,
    /// The last gradient computed for each layer during training.
    grads: Vec<Option<Array1<f32>>>,
    optimizers: Vec<Box<dyn Optimizer>>,
    loss: Option<Box<dyn Loss>>,
    metric: Option<Box<dyn Metric>>,
    rng: StdRng,
}

/// Apply `layers` in order.
fn apply_layers(
    layers: &[Box<dyn Layer>],
    params: &[Array1<f32>],
    x: ArrayView2<'_, f32>,
) -> Array2<f32> {
    let mut h = x.to_owned();
    for (layer, p) in layers.iter().zip(params) {
        h = forward(layer.as_ref(), p.view(), h.view());
    }
    h
}

/// Everything `apply` produced for one layer on one batch.
struct Activations {
    tmp: Array2<f32>,
    out: Array2<f32>,
}

fn apply_saving(layer: &dyn Layer, params: ArrayView1<'_, f32>, x: ArrayView2<'_, f32>) -> Activations {
    let n = x.nrows();
    let mut tmp = Array2::<f32>::zeros(layer.hidden_activations_shape(n));
    let mut out = Array2::<f32>::zeros((n, layer.output_dim()));
    layer.apply(params, x, tmp.view_mut(), out.view_mut());
    Activations { tmp, out }
}

fn progress_bar(progress: f32, len: usize) -> String {
    let n = (len as f32 * progress.clamp(0.0, 1.0)) as usize;
    format!("[{}{}]", "#".repeat(n), " ".repeat(len - n))
}

impl Default for KnClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl KnClassifier {
    pub fn new() -> Self {
        Self::with_seed(1234)
    }

    /// A classifier whose initial parameters are drawn from an rng seeded
    /// with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        KnClassifier {
            layers: vec![],
            params: vec![],
            grads: vec![],
            optimizers: vec![],
            loss: None,
            metric: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Append a layer. Its raw centers must live in the same space as the
    /// first layer's, i.e. have the width of the network input.
    pub fn add_layer<L: Layer + 'static>(&mut self, layer: L) -> Result<()> {
        if let Some(first) = self.layers.first() {
            if first.raw_dim() != layer.raw_dim() {
                return Err(Error::ShapeMismatch {
                    what: "raw center width",
                    expected: first.raw_dim(),
                    got: layer.raw_dim(),
                });
            }
        }
        let params = layer.init_params(&mut self.rng);
        self.layers.push(Box::new(layer));
        self.params.push(params);
        self.grads.push(None);
        self.refresh_centers(self.layers.len() - 1);
        Ok(())
    }

    /// Set the loss function for the output layer.
    pub fn add_loss<L: Loss + 'static>(&mut self, loss: L) {
        self.loss = Some(Box::new(loss));
    }

    /// Set a metric to report. It is not used for training except to choose
    /// the best output layer parameters on a validation set.
    pub fn add_metric<M: Metric + 'static>(&mut self, metric: M) {
        self.metric = Some(Box::new(metric));
    }

    /// Add the optimizer for the next layer. Layer-wise training needs one
    /// per layer; end-to-end training uses only the first.
    pub fn add_optimizer<O: Optimizer + 'static>(&mut self, optimizer: O) {
        self.optimizers.push(Box::new(optimizer));
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, i: usize) -> &dyn Layer {
        self.layers[i].as_ref()
    }

    pub fn params(&self, i: usize) -> ArrayView1<'_, f32> {
        self.params[i].view()
    }

    /// Replace the parameters of layer `i`. The centers of layer `i` (which
    /// for a stack depend on its own members) and of every later layer are
    /// recomputed.
    pub fn set_params(&mut self, i: usize, params: Array1<f32>) -> Result<()> {
        let expected = self.layers[i].num_params();
        if params.len() != expected {
            return Err(Error::ShapeMismatch {
                what: "layer parameters",
                expected,
                got: params.len(),
            });
        }
        self.params[i] = params;
        self.refresh_centers_from(i);
        Ok(())
    }

    /// The gradient of layer `i` from the last training step that touched it.
    pub fn grad(&self, i: usize) -> Option<ArrayView1<'_, f32>> {
        self.grads[i].as_ref().map(|g| g.view())
    }

    /// Recompute the centers of layer `l` from the current parameters of the
    /// layers in front of it.
    fn refresh_centers(&mut self, l: usize) {
        let (before, rest) = self.layers.split_at_mut(l);
        let before: &[Box<dyn Layer>] = before;
        let params = &self.params;
        let prefix: &Prefix<'_> = &|x| apply_layers(before, &params[..l], x);
        rest[0].update_centers(params[l].view(), prefix);
    }

    fn refresh_centers_from(&mut self, i: usize) {
        for l in i..self.layers.len() {
            self.refresh_centers(l);
        }
    }

    fn check_input(&self, x: ArrayView2<'_, f32>) -> Result<()> {
        let first = self.layers.first().ok_or(Error::NoLayers)?;
        if x.ncols() != first.input_dim() {
            return Err(Error::ShapeMismatch {
                what: "input features",
                expected: first.input_dim(),
                got: x.ncols(),
            });
        }
        Ok(())
    }

    fn check_labels(&self, x: ArrayView2<'_, f32>, y: ArrayView1<'_, usize>) -> Result<()> {
        self.check_input(x)?;
        if x.nrows() != y.len() {
            return Err(Error::ShapeMismatch {
                what: "labels",
                expected: x.nrows(),
                got: y.len(),
            });
        }
        let n_class = self.layers[self.layers.len() - 1].output_dim();
        if let Some(&label) = y.iter().find(|&&label| label >= n_class) {
            return Err(Error::LabelOutOfRange { label, n_class });
        }
        Ok(())
    }

    /// Run the network on `x`, stopping after layer `upto` (default: the
    /// output layer).
    pub fn forward(&self, x: ArrayView2<'_, f32>, upto: Option<usize>) -> Result<Array2<f32>> {
        self.check_input(x)?;
        let end = upto.map_or(self.layers.len(), |l| (l + 1).min(self.layers.len()));
        Ok(apply_layers(&self.layers[..end], &self.params[..end], x))
    }

    /// Same as `forward`, but `x` is processed `batch_size` rows at a time.
    pub fn evaluate(
        &self,
        x: ArrayView2<'_, f32>,
        layer: Option<usize>,
        batch_size: Option<usize>,
    ) -> Result<Array2<f32>> {
        self.check_input(x)?;
        let end = layer.map_or(self.layers.len(), |l| (l + 1).min(self.layers.len()));
        let mut out = Array2::<f32>::zeros((x.nrows(), self.layers[end - 1].output_dim()));
        for r in batches(x.nrows(), batch_size) {
            let xb = x.slice(s![r.clone(), ..]);
            out.slice_mut(s![r, ..])
                .assign(&apply_layers(&self.layers[..end], &self.params[..end], xb));
        }
        Ok(out)
    }

    /// Predicted class of each row of `x`.
    pub fn predict(&self, x: ArrayView2<'_, f32>) -> Result<Array1<usize>> {
        Ok(argmax_rows(self.forward(x, None)?.view()))
    }

    /// Output loss and metric (if one was added) on a labelled set.
    pub fn score(&self, x: ArrayView2<'_, f32>, y: ArrayView1<'_, usize>) -> Result<(f32, Option<f32>)> {
        self.check_labels(x, y)?;
        let loss = self.loss.as_ref().ok_or(Error::MissingLoss)?;
        let yh = self.forward(x, None)?;
        Ok((
            loss.loss(y, yh.view()),
            self.metric.as_ref().map(|m| m.metric(y, yh.view())),
        ))
    }

    /// Loss of layer `i` on its input `z` and ∂loss/∂params.
    ///
    /// Hidden layers use the layer-wise objective with the kernel of layer
    /// `i + 1`; the output layer uses the output loss.
    fn layer_loss_and_grad(
        &self,
        i: usize,
        z: ArrayView2<'_, f32>,
        y: ArrayView1<'_, usize>,
        options: &FitOptions,
    ) -> (f32, Array2<f32>, Array1<f32>) {
        let layer = self.layers[i].as_ref();
        let params = self.params[i].view();
        let act = apply_saving(layer, params, z);
        let (loss, dz) = match self.layers.get(i + 1) {
            Some(next) => hidden_loss(
                options.hidden_cost,
                act.out.view(),
                y,
                next.kernel(),
                options.cluster_class,
            ),
            None => {
                let loss = self
                    .loss
                    .as_ref()
                    .expect("checked before training started");
                (loss.loss(y, act.out.view()), loss.deriv(y, act.out.view()))
            }
        };
        let mut dp = Array1::<f32>::zeros(layer.num_params());
        let _ = layer.derivatives(params, z, act.tmp.view(), dz.view(), dp.view_mut());
        (loss, act.out, dp)
    }

    /// Validation score of layer `i`; lower is better.
    fn layer_validation_score(
        &self,
        i: usize,
        z: ArrayView2<'_, f32>,
        y: ArrayView1<'_, usize>,
        options: &FitOptions,
    ) -> f32 {
        let out = forward(self.layers[i].as_ref(), self.params[i].view(), z);
        match self.layers.get(i + 1) {
            Some(next) => {
                hidden_loss(options.hidden_cost, out.view(), y, next.kernel(), options.cluster_class).0
            }
            None => match &self.metric {
                Some(metric) => metric.metric(y, out.view()),
                None => self
                    .loss
                    .as_ref()
                    .expect("checked before training started")
                    .loss(y, out.view()),
            },
        }
    }

    fn check_fit(&self, x: ArrayView2<'_, f32>, y: ArrayView1<'_, usize>, options: &FitOptions) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::NoLayers);
        }
        if self.loss.is_none() {
            return Err(Error::MissingLoss);
        }
        if x.nrows() == 0 {
            return Err(Error::EmptyDataset);
        }
        self.check_labels(x, y)?;
        if let Some((xv, yv)) = &options.validation {
            self.check_labels(xv.view(), yv.view())?;
        }
        options.check()
    }

    /// Train the network greedily, one layer at a time.
    ///
    /// While layer `i` trains, every other layer is frozen: its input is the
    /// output of layers `0..i` on the training data and only its own
    /// parameters receive gradients. Hidden layers are trained to make the
    /// next layer's kernel matrix match the ideal kernel matrix of the labels;
    /// the output layer is trained on the output loss.
    pub fn fit(&mut self, x: ArrayView2<'_, f32>, y: ArrayView1<'_, usize>, options: &FitOptions) -> Result<()> {
        self.check_fit(x, y, options)?;
        let num_layers = self.layers.len();
        if options.n_epoch.len() != num_layers {
            return Err(Error::EpochCount {
                expected: num_layers,
                got: options.n_epoch.len(),
            });
        }
        if self.optimizers.len() < num_layers {
            return Err(Error::MissingOptimizer {
                layer: self.optimizers.len(),
            });
        }

        let mut rng = StdRng::seed_from_u64(options.seed);
        let n = x.nrows();
        for i in 0..num_layers {
            let n_epoch = options.n_epoch[i];
            // Layers in front of i are already trained, so their output is
            // fixed for the rest of this layer's training.
            let z = apply_layers(&self.layers[..i], &self.params[..i], x);
            let z_val = options.validation.as_ref().map(|(xv, yv)| {
                (apply_layers(&self.layers[..i], &self.params[..i], xv.view()), yv.view())
            });

            let mut best: Option<(f32, usize, Array1<f32>)> = None;
            for epoch in 0..n_epoch {
                let (zs, ys) = if options.shuffle {
                    rand_shuffle(z.view(), y, &mut rng)
                } else {
                    (z.clone(), y.to_owned())
                };

                if options.verbose {
                    print!("layer {i} epoch {epoch} - \x1b[s");
                    let _ = io::stdout().flush();
                }

                let mut accumulated = options
                    .accumulate_grad
                    .then(|| Array1::<f32>::zeros(self.params[i].len()));
                let mut n_total = 0;
                let mut loss_total = 0.0;
                let mut metric_total = 0.0;
                let report_metric = self.metric.is_some() && i + 1 == num_layers;
                for r in batches(n, options.batch_size) {
                    let zb = zs.slice(s![r.clone(), ..]);
                    let yb = ys.slice(s![r.clone()]);
                    let (loss, out, dp) = self.layer_loss_and_grad(i, zb, yb, options);
                    let len = r.len();
                    n_total += len;
                    loss_total += loss * len as f32;
                    if report_metric {
                        if let Some(metric) = &self.metric {
                            metric_total += metric.metric(yb, out.view()) * len as f32;
                        }
                    }

                    match accumulated.as_mut() {
                        Some(acc) => acc.scaled_add(len as f32 / n as f32, &dp),
                        None => {
                            self.optimizers[i].step(self.params[i].view_mut(), dp.view());
                            self.refresh_centers(i);
                            self.grads[i] = Some(dp);
                        }
                    }

                    if options.verbose {
                        let progress = n_total as f32 / n as f32;
                        print!(
                            "\x1b[u{}\x1b[u{} loss={:.4}",
                            " ".repeat(60),
                            progress_bar(progress, 30),
                            loss_total / n_total as f32,
                        );
                        if report_metric {
                            print!(" metric={:.4}", metric_total / n_total as f32);
                        }
                        let _ = io::stdout().flush();
                    }
                }
                if let Some(acc) = accumulated {
                    self.optimizers[i].step(self.params[i].view_mut(), acc.view());
                    self.refresh_centers(i);
                    self.grads[i] = Some(acc);
                }

                if let Some((zv, yv)) = &z_val {
                    if (epoch + 1) % options.val_window == 0 || epoch + 1 == n_epoch {
                        let score = self.layer_validation_score(i, zv.view(), *yv, options);
                        if options.verbose {
                            print!(" validation={score:.4}");
                        }
                        if best.as_ref().map_or(true, |(b, _, _)| score < *b) {
                            best = Some((score, epoch, self.params[i].clone()));
                        }
                    }
                }
                if options.verbose {
                    println!();
                }
            }

            if let Some((score, epoch, params)) = best {
                if options.verbose {
                    println!("layer {i}: keeping parameters from epoch {epoch} (validation={score:.4})");
                }
                self.params[i] = params;
            }
            self.refresh_centers_from(i);
        }
        Ok(())
    }

    /// Train all layers together by backpropagating the output loss, using
    /// the first optimizer on all parameters at once.
    ///
    /// `options.n_epoch` must have exactly one entry. Within a step the kernel
    /// centers are held constant; they are recomputed after every step.
    pub fn fit_backprop(
        &mut self,
        x: ArrayView2<'_, f32>,
        y: ArrayView1<'_, usize>,
        options: &FitOptions,
    ) -> Result<()> {
        self.check_fit(x, y, options)?;
        if options.n_epoch.len() != 1 {
            return Err(Error::EpochCount {
                expected: 1,
                got: options.n_epoch.len(),
            });
        }
        if self.optimizers.is_empty() {
            return Err(Error::MissingOptimizer { layer: 0 });
        }

        let mut rng = StdRng::seed_from_u64(options.seed);
        let n = x.nrows();
        let n_epoch = options.n_epoch[0];
        let offsets: Vec<usize> = std::iter::once(0)
            .chain(self.params.iter().scan(0, |acc, p| {
                *acc += p.len();
                Some(*acc)
            }))
            .collect();
        let total = offsets[offsets.len() - 1];
        let mut best: Option<(f32, usize, Vec<Array1<f32>>)> = None;

        for epoch in 0..n_epoch {
            let (xs, ys) = if options.shuffle {
                rand_shuffle(x, y, &mut rng)
            } else {
                (x.to_owned(), y.to_owned())
            };
            if options.verbose {
                print!("epoch {epoch} - \x1b[s");
                let _ = io::stdout().flush();
            }

            let mut accumulated = options.accumulate_grad.then(|| Array1::<f32>::zeros(total));
            let mut n_total = 0;
            let mut loss_total = 0.0;
            for r in batches(n, options.batch_size) {
                let xb = xs.slice(s![r.clone(), ..]);
                let yb = ys.slice(s![r.clone()]);
                let (loss, dp) = self.backprop(xb, yb, &offsets);
                let len = r.len();
                n_total += len;
                loss_total += loss * len as f32;
                match accumulated.as_mut() {
                    Some(acc) => acc.scaled_add(len as f32 / n as f32, &dp),
                    None => self.step_all(&dp, &offsets),
                }
                if options.verbose {
                    print!(
                        "\x1b[u{}\x1b[u{} loss={:.4}",
                        " ".repeat(60),
                        progress_bar(n_total as f32 / n as f32, 30),
                        loss_total / n_total as f32,
                    );
                    let _ = io::stdout().flush();
                }
            }
            if let Some(acc) = accumulated {
                self.step_all(&acc, &offsets);
            }

            if let Some((xv, yv)) = &options.validation {
                if (epoch + 1) % options.val_window == 0 || epoch + 1 == n_epoch {
                    let (loss, metric) = self.score(xv.view(), yv.view())?;
                    let score = metric.unwrap_or(loss);
                    if options.verbose {
                        print!(" validation={score:.4}");
                    }
                    if best.as_ref().map_or(true, |(b, _, _)| score < *b) {
                        best = Some((score, epoch, self.params.clone()));
                    }
                }
            }
            if options.verbose {
                println!();
            }
        }

        if let Some((score, epoch, params)) = best {
            if options.verbose {
                println!("keeping parameters from epoch {epoch} (validation={score:.4})");
            }
            self.params = params;
            self.refresh_centers_from(0);
        }
        Ok(())
    }

    /// Loss on one batch and the gradient with respect to all parameters,
    /// concatenated in layer order.
    fn backprop(&self, x: ArrayView2<'_, f32>, y: ArrayView1<'_, usize>, offsets: &[usize]) -> (f32, Array1<f32>) {
        let mut inputs = vec![x.to_owned()];
        let mut saved = Vec::with_capacity(self.layers.len());
        for (layer, p) in self.layers.iter().zip(&self.params) {
            let input = inputs.last().expect("starts non-empty").view();
            let act = apply_saving(layer.as_ref(), p.view(), input);
            inputs.push(act.out.clone());
            saved.push(act.tmp);
        }
        let yh = inputs.pop().expect("one output per layer");
        let loss_fn = self.loss.as_ref().expect("checked before training started");
        let loss = loss_fn.loss(y, yh.view());
        let mut dz = loss_fn.deriv(y, yh.view());

        let mut dp = Array1::<f32>::zeros(offsets[offsets.len() - 1]);
        for l in (0..self.layers.len()).rev() {
            dz = self.layers[l].derivatives(
                self.params[l].view(),
                inputs[l].view(),
                saved[l].view(),
                dz.view(),
                dp.slice_mut(s![offsets[l]..offsets[l + 1]]),
            );
        }
        (loss, dp)
    }

    fn step_all(&mut self, dp: &Array1<f32>, offsets: &[usize]) {
        let mut flat = Array1::<f32>::zeros(dp.len());
        for (l, p) in self.params.iter().enumerate() {
            flat.slice_mut(s![offsets[l]..offsets[l + 1]]).assign(p);
        }
        self.optimizers[0].step(flat.view_mut(), dp.view());
        for (l, p) in self.params.iter_mut().enumerate() {
            p.assign(&flat.slice(s![offsets[l]..offsets[l + 1]]));
            self.grads[l] = Some(dp.slice(s![offsets[l]..offsets[l + 1]]).to_owned());
        }
        self.refresh_centers_from(0);
    }
}
