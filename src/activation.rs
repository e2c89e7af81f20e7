//! Activation functions.
//!
//! A dense layer computes a pre-activation value `z = x W` and then applies an
//! activation function element-wise: `y = activation(z)`.
//!
//! Post-activation outputs `y` are cached per layer during the forward pass and
//! backprop computes `dL/dz` from `dL/dy` using `y` alone, so no separate `z`
//! buffer is kept.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Element-wise activation function.
pub enum Activation {
    /// Used by every stage-1 layer.
    ReLU,
    /// Used by every stage-2 layer.
    Sigmoid,
}

impl Activation {
    #[inline]
    pub(crate) fn forward(self, x: f32) -> f32 {
        match self {
            Activation::ReLU => x.max(0.0),
            Activation::Sigmoid => sigmoid(x),
        }
    }

    /// Derivative of the activation with respect to its input, expressed in terms
    /// of the cached post-activation output `y`.
    #[inline]
    pub(crate) fn grad_from_output(self, y: f32) -> f32 {
        match self {
            Activation::ReLU => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => y * (1.0 - y),
        }
    }

    /// Apply the activation in place over a whole buffer.
    #[inline]
    pub(crate) fn apply(self, values: &mut [f32]) {
        for v in values {
            *v = self.forward(*v);
        }
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}
