//! Loss functions.
//!
//! Both training phases minimize the summed squared error between predicted and
//! ground-truth indicator vectors, reduced over every feature of every row in
//! the batch (not averaged). Typical use:
//!
//! - run `stage.forward_batch(...)`
//! - write `d_output` via `sum_squared_backward`
//! - run `stage.backward_batch(...)`
//! - update parameters with the stage's optimizer

/// Summed squared error: `Σ (pred - target)^2`.
#[inline]
pub fn sum_squared(pred: &[f32], target: &[f32]) -> f32 {
    assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );

    let mut sum_sq = 0.0_f32;
    for (&p, &t) in pred.iter().zip(target) {
        let diff = p - t;
        sum_sq = diff.mul_add(diff, sum_sq);
    }
    sum_sq
}

/// Summed squared error + gradient w.r.t. `pred`.
///
/// Writes `d_pred[i] = 2 * (pred[i] - target[i])` and returns the loss.
#[inline]
pub fn sum_squared_backward(pred: &[f32], target: &[f32], d_pred: &mut [f32]) -> f32 {
    assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );
    assert_eq!(
        pred.len(),
        d_pred.len(),
        "pred len {} does not match d_pred len {}",
        pred.len(),
        d_pred.len()
    );

    let mut sum_sq = 0.0_f32;
    for i in 0..pred.len() {
        let diff = pred[i] - target[i];
        d_pred[i] = 2.0 * diff;
        sum_sq = diff.mul_add(diff, sum_sq);
    }
    sum_sq
}
