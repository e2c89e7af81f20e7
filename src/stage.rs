//! One stage of the network: a chain of bias-free dense layers sharing an activation.
//!
//! The batched hot path panics on shape misuse (`assert!`); shape-checked entry
//! points live on [`crate::TwoStageModel`].

use std::fmt;

use rand::Rng;

use crate::{Activation, Error, Layer, Result};

/// Which of the two sub-networks a stage, optimizer or gradient buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    /// Stage 1: terrain → convex-hull edge points.
    EdgePoints,
    /// Stage 2: (edge points ++ terrain) → contact points.
    ContactPoints,
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageId::EdgePoints => f.write_str("edge_points"),
            StageId::ContactPoints => f.write_str("contact_points"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stage {
    id: StageId,
    layers: Vec<Layer>,
}

/// Per-layer activations of the most recent batched forward pass.
///
/// Buffers grow to the largest batch seen and are reused afterwards.
#[derive(Debug, Clone, Default)]
pub struct BatchScratch {
    batch: usize,
    layer_outputs: Vec<Vec<f32>>,
}

/// Parameter gradients for one stage (overwrite semantics).
#[derive(Debug, Clone)]
pub struct Gradients {
    stage: StageId,
    d_weights: Vec<Vec<f32>>,
    // Gradient w.r.t. each layer output, including the final one, which the loss
    // writes through `d_output_mut`.
    d_layer_outputs: Vec<Vec<f32>>,
    d_input: Vec<f32>,
}

impl Stage {
    /// Build a stage from `(name, in_dim, out_dim)` triples.
    pub fn new_with_rng<R: Rng + ?Sized>(
        id: StageId,
        shapes: &[(&str, usize, usize)],
        activation: Activation,
        rng: &mut R,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(shapes.len());
        for &(name, in_dim, out_dim) in shapes {
            layers.push(Layer::new_with_rng(name, in_dim, out_dim, activation, rng)?);
        }
        Self::from_layers(id, layers)
    }

    pub fn from_layers(id: StageId, layers: Vec<Layer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "stage {id} must have at least one layer"
            )));
        }
        for pair in layers.windows(2) {
            if pair[0].out_dim() != pair[1].in_dim() {
                return Err(Error::InvalidShape(format!(
                    "stage {id}: layer {} out_dim {} does not match layer {} in_dim {}",
                    pair[0].name(),
                    pair[0].out_dim(),
                    pair[1].name(),
                    pair[1].in_dim()
                )));
            }
        }
        Ok(Self { id, layers })
    }

    #[inline]
    pub fn id(&self) -> StageId {
        self.id
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.layers[0].in_dim()
    }

    #[inline]
    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].out_dim()
    }

    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[inline]
    pub fn layer(&self, idx: usize) -> Option<&Layer> {
        self.layers.get(idx)
    }

    #[inline]
    pub fn layer_mut(&mut self, idx: usize) -> Option<&mut Layer> {
        self.layers.get_mut(idx)
    }

    pub fn gradients(&self) -> Gradients {
        Gradients::new(self)
    }

    /// Forward pass for `batch` rows of `input` (row-major `(batch, input_dim)`).
    ///
    /// Writes intermediate activations into `scratch` and returns the final output.
    pub fn forward_batch<'a>(
        &self,
        batch: usize,
        input: &[f32],
        scratch: &'a mut BatchScratch,
    ) -> &'a [f32] {
        assert!(batch > 0, "batch must be > 0");
        assert_eq!(
            input.len(),
            batch * self.input_dim(),
            "input len {} does not match batch {batch} * input_dim {}",
            input.len(),
            self.input_dim()
        );

        scratch.prepare(self, batch);

        for (idx, layer) in self.layers.iter().enumerate() {
            if idx == 0 {
                layer.forward_batch(batch, input, &mut scratch.layer_outputs[0]);
            } else {
                // Borrow the previous output immutably and the current output mutably.
                let (left, right) = scratch.layer_outputs.split_at_mut(idx);
                layer.forward_batch(batch, &left[idx - 1], &mut right[0]);
            }
        }

        scratch.output()
    }

    /// Backward pass for the batch last run through `forward_batch`.
    ///
    /// Before calling this, write `dL/d(output)` into `grads.d_output_mut(batch)`.
    /// When `input_grad` is false the gradient w.r.t. the stage input is skipped.
    pub fn backward_batch(
        &self,
        input: &[f32],
        scratch: &BatchScratch,
        grads: &mut Gradients,
        input_grad: bool,
    ) {
        let batch = scratch.batch;
        assert_eq!(
            grads.stage, self.id,
            "gradients for stage {} used with stage {}",
            grads.stage, self.id
        );
        assert_eq!(
            scratch.layer_outputs.len(),
            self.layers.len(),
            "scratch has {} layer outputs, stage has {} layers",
            scratch.layer_outputs.len(),
            self.layers.len()
        );
        assert_eq!(input.len(), batch * self.input_dim());

        for idx in (0..self.layers.len()).rev() {
            let layer = &self.layers[idx];
            let layer_input: &[f32] = if idx == 0 {
                input
            } else {
                &scratch.layer_outputs[idx - 1]
            };
            let layer_output = &scratch.layer_outputs[idx];

            if idx == 0 {
                let d_input = if input_grad {
                    grads.d_input.resize(batch * self.input_dim(), 0.0);
                    Some(grads.d_input.as_mut_slice())
                } else {
                    None
                };
                layer.backward_batch(
                    batch,
                    layer_input,
                    layer_output,
                    &mut grads.d_layer_outputs[0],
                    &mut grads.d_weights[0],
                    d_input,
                );
            } else {
                // `d_outputs` of this layer is consumed in place; its `d_inputs`
                // becomes the `d_outputs` of the previous layer.
                let (left, right) = grads.d_layer_outputs.split_at_mut(idx);
                let d_inputs_prev = &mut left[idx - 1];
                d_inputs_prev.resize(batch * layer.in_dim(), 0.0);
                layer.backward_batch(
                    batch,
                    layer_input,
                    layer_output,
                    &mut right[0],
                    &mut grads.d_weights[idx],
                    Some(d_inputs_prev.as_mut_slice()),
                );
            }
        }
    }
}

impl BatchScratch {
    fn prepare(&mut self, stage: &Stage, batch: usize) {
        self.batch = batch;
        self.layer_outputs.resize_with(stage.layers.len(), Vec::new);
        for (out, layer) in self.layer_outputs.iter_mut().zip(&stage.layers) {
            out.resize(batch * layer.out_dim(), 0.0);
        }
    }

    #[inline]
    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Post-activation output of layer `idx` for the last batch.
    #[inline]
    pub fn layer_output(&self, idx: usize) -> &[f32] {
        &self.layer_outputs[idx]
    }

    /// Output of the final layer, row-major `(batch, output_dim)`.
    #[inline]
    pub fn output(&self) -> &[f32] {
        self.layer_outputs
            .last()
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl Gradients {
    pub fn new(stage: &Stage) -> Self {
        let d_weights = stage
            .layers
            .iter()
            .map(|l| vec![0.0; l.in_dim() * l.out_dim()])
            .collect();
        let d_layer_outputs = stage.layers.iter().map(|_| Vec::new()).collect();
        Self {
            stage: stage.id,
            d_weights,
            d_layer_outputs,
            d_input: Vec::new(),
        }
    }

    #[inline]
    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Upstream gradient buffer for the stage output, sized for `batch` rows.
    pub fn d_output_mut(&mut self, batch: usize, output_dim: usize) -> &mut [f32] {
        let last = self
            .d_layer_outputs
            .last_mut()
            .expect("stage has at least one layer");
        last.resize(batch * output_dim, 0.0);
        last.as_mut_slice()
    }

    #[inline]
    pub fn d_input(&self) -> &[f32] {
        &self.d_input
    }

    #[inline]
    pub fn d_weights(&self, layer_idx: usize) -> &[f32] {
        &self.d_weights[layer_idx]
    }

    #[inline]
    pub fn d_weights_mut(&mut self, layer_idx: usize) -> &mut [f32] {
        &mut self.d_weights[layer_idx]
    }

    #[inline]
    pub fn num_layers(&self) -> usize {
        self.d_weights.len()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::loss;

    fn small_stage(activation: Activation, seed: u64) -> Stage {
        let mut rng = StdRng::seed_from_u64(seed);
        Stage::new_with_rng(
            StageId::EdgePoints,
            &[("a", 3, 4), ("b", 4, 2)],
            activation,
            &mut rng,
        )
        .unwrap()
    }

    fn loss_for(stage: &Stage, input: &[f32], target: &[f32]) -> f32 {
        let mut scratch = BatchScratch::default();
        let out = stage.forward_batch(2, input, &mut scratch);
        loss::sum_squared(out, target)
    }

    fn assert_close(analytic: f32, numeric: f32, abs_tol: f32, rel_tol: f32) {
        let diff = (analytic - numeric).abs();
        let scale = analytic.abs().max(numeric.abs()).max(1.0);
        assert!(
            diff <= abs_tol || diff / scale <= rel_tol,
            "analytic={analytic} numeric={numeric} diff={diff}"
        );
    }

    #[test]
    fn rejects_mismatched_layer_chain() {
        let a = Layer::from_parts("a", 2, 3, Activation::ReLU, vec![0.0; 6]).unwrap();
        let b = Layer::from_parts("b", 2, 1, Activation::ReLU, vec![0.0; 2]).unwrap();
        assert!(Stage::from_layers(StageId::EdgePoints, vec![a, b]).is_err());
    }

    #[test]
    fn backward_matches_numeric_gradients() {
        let mut stage = small_stage(Activation::Sigmoid, 3);
        let input = [0.3_f32, -0.7, 0.5, 0.1, 0.9, -0.4];
        let target = [0.2_f32, 0.8, 1.0, 0.0];

        let mut scratch = BatchScratch::default();
        let mut grads = stage.gradients();
        let out = stage.forward_batch(2, &input, &mut scratch).to_vec();
        loss::sum_squared_backward(&out, &target, grads.d_output_mut(2, 2));
        stage.backward_batch(&input, &scratch, &mut grads, true);

        let eps = 1e-3_f32;
        for layer_idx in 0..stage.num_layers() {
            let w_len = stage.layers[layer_idx].weights().len();
            for p in 0..w_len {
                let orig = stage.layers[layer_idx].weights()[p];
                stage.layers[layer_idx].weights_mut()[p] = orig + eps;
                let plus = loss_for(&stage, &input, &target);
                stage.layers[layer_idx].weights_mut()[p] = orig - eps;
                let minus = loss_for(&stage, &input, &target);
                stage.layers[layer_idx].weights_mut()[p] = orig;

                let numeric = (plus - minus) / (2.0 * eps);
                assert_close(grads.d_weights(layer_idx)[p], numeric, 1e-3, 1e-2);
            }
        }

        let mut input_var = input;
        for i in 0..input_var.len() {
            let orig = input_var[i];
            input_var[i] = orig + eps;
            let plus = loss_for(&stage, &input_var, &target);
            input_var[i] = orig - eps;
            let minus = loss_for(&stage, &input_var, &target);
            input_var[i] = orig;

            let numeric = (plus - minus) / (2.0 * eps);
            assert_close(grads.d_input()[i], numeric, 1e-3, 1e-2);
        }
    }

    #[test]
    fn seeded_init_is_deterministic() {
        let a = small_stage(Activation::ReLU, 11);
        let b = small_stage(Activation::ReLU, 11);
        for (la, lb) in a.layers().iter().zip(b.layers()) {
            assert_eq!(la.weights(), lb.weights());
        }
    }

    #[test]
    #[should_panic]
    fn forward_panics_on_input_shape_mismatch() {
        let stage = small_stage(Activation::ReLU, 0);
        let mut scratch = BatchScratch::default();
        stage.forward_batch(1, &[0.0; 4], &mut scratch);
    }
}
