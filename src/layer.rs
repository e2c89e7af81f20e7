use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::matmul;
use crate::{Activation, Error, Result};

/// Standard deviation of the truncated normal used for every weight matrix.
pub const INIT_STDDEV: f32 = 0.1;

/// A bias-free dense layer: `y = activation(x W)`.
#[derive(Debug, Clone)]
pub struct Layer {
    name: String,
    in_dim: usize,
    out_dim: usize,
    activation: Activation,
    /// Row-major matrix with shape (out_dim, in_dim).
    weights: Vec<f32>,
}

impl Layer {
    /// Build a layer initialized from a truncated normal (σ = 0.1, resampled
    /// outside two standard deviations).
    pub fn new_with_rng<R: Rng + ?Sized>(
        name: impl Into<String>,
        in_dim: usize,
        out_dim: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "layer dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }

        let normal = Normal::new(0.0_f32, INIT_STDDEV)
            .map_err(|e| Error::InvalidConfig(format!("invalid init distribution: {e}")))?;
        let bound = 2.0 * INIT_STDDEV;
        let weights = (0..in_dim * out_dim)
            .map(|_| loop {
                let v = normal.sample(&mut *rng);
                if v.abs() <= bound {
                    break v;
                }
            })
            .collect();

        Ok(Self {
            name: name.into(),
            in_dim,
            out_dim,
            activation,
            weights,
        })
    }

    /// Build a layer from explicit weights (row-major `(out_dim, in_dim)`).
    pub fn from_parts(
        name: impl Into<String>,
        in_dim: usize,
        out_dim: usize,
        activation: Activation,
        weights: Vec<f32>,
    ) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidShape(format!(
                "layer dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }
        if weights.len() != in_dim * out_dim {
            return Err(Error::InvalidShape(format!(
                "weights length {} does not match out_dim * in_dim ({out_dim} * {in_dim})",
                weights.len()
            )));
        }
        if weights.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "weights must contain only finite values".to_owned(),
            ));
        }
        Ok(Self {
            name: name.into(),
            in_dim,
            out_dim,
            activation,
            weights,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    #[inline]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    #[inline]
    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    /// Forward pass for a batch.
    ///
    /// Shape contract:
    /// - `inputs.len() == batch * self.in_dim`
    /// - `outputs.len() == batch * self.out_dim`
    #[inline]
    pub fn forward_batch(&self, batch: usize, inputs: &[f32], outputs: &mut [f32]) {
        matmul::forward(batch, self.in_dim, self.out_dim, inputs, &self.weights, outputs);
        self.activation.apply(outputs);
    }

    /// Backward pass for a batch.
    ///
    /// Overwrite semantics: `d_outputs` is turned into `dL/dz` in place,
    /// `d_weights` is overwritten with the batch-summed weight gradient and, when
    /// given, `d_inputs` is overwritten with `dL/d(inputs)`.
    ///
    /// `outputs` are the post-activation values produced by `forward_batch`.
    pub fn backward_batch(
        &self,
        batch: usize,
        inputs: &[f32],
        outputs: &[f32],
        d_outputs: &mut [f32],
        d_weights: &mut [f32],
        d_inputs: Option<&mut [f32]>,
    ) {
        assert_eq!(outputs.len(), batch * self.out_dim);
        assert_eq!(d_outputs.len(), outputs.len());

        for (d, &y) in d_outputs.iter_mut().zip(outputs) {
            *d *= self.activation.grad_from_output(y);
        }

        matmul::weight_grad(batch, self.in_dim, self.out_dim, d_outputs, inputs, d_weights);
        if let Some(d_inputs) = d_inputs {
            matmul::input_grad(
                batch,
                self.in_dim,
                self.out_dim,
                d_outputs,
                &self.weights,
                d_inputs,
            );
        }
    }

    /// `w -= lr * step` element-wise.
    #[inline]
    pub(crate) fn apply_update(&mut self, step: &[f32], lr: f32) {
        debug_assert_eq!(step.len(), self.weights.len());
        for (w, &s) in self.weights.iter_mut().zip(step) {
            *w -= lr * s;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn init_is_truncated_at_two_stddev() {
        let mut rng = StdRng::seed_from_u64(7);
        let layer = Layer::new_with_rng("w", 100, 100, Activation::ReLU, &mut rng).unwrap();
        assert!(layer.weights().iter().all(|w| w.abs() <= 0.2));
        assert!(layer.weights().iter().any(|w| *w != 0.0));
    }

    #[test]
    fn from_parts_validates_shape() {
        assert!(Layer::from_parts("w", 2, 2, Activation::ReLU, vec![0.0; 3]).is_err());
        assert!(Layer::from_parts("w", 2, 2, Activation::ReLU, vec![f32::NAN; 4]).is_err());
        assert!(Layer::from_parts("w", 2, 2, Activation::ReLU, vec![0.0; 4]).is_ok());
    }

    #[test]
    fn forward_batch_applies_activation() {
        let layer =
            Layer::from_parts("w", 2, 1, Activation::ReLU, vec![1.0, -1.0]).unwrap();
        let mut out = [0.0_f32; 2];
        layer.forward_batch(2, &[1.0, 2.0, 3.0, 1.0], &mut out);
        assert_eq!(out, [0.0, 2.0]);
    }
}
