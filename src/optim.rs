//! Optimizers.
//!
//! Optimizer state is bound to exactly one [`StageId`]. Stepping it touches only
//! that stage's weight matrices; the other stage's parameters are never read or
//! written, which is how each training phase restricts its variable list.
//!
//! Design notes:
//! - Optimizer *state* (Adam moments) lives outside the model.
//! - The training loop owns the state and reuses it across steps.

use crate::stage::{Gradients, StageId};
use crate::{Error, Result, TwoStageModel};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
/// Optimizer choice for a training phase.
pub enum Optimizer {
    /// Plain SGD.
    Sgd,
    /// Adam (bias-corrected).
    #[default]
    Adam,
    /// Adam with explicit hyperparameters.
    AdamWith { beta1: f32, beta2: f32, eps: f32 },
}

const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPS: f32 = 1e-8;

impl Optimizer {
    /// Validate optimizer hyperparameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Optimizer::Sgd | Optimizer::Adam => Ok(()),
            Optimizer::AdamWith { beta1, beta2, eps } => {
                if !(beta1.is_finite() && (0.0..1.0).contains(&beta1)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta1 must be finite and in [0,1), got {beta1}"
                    )));
                }
                if !(beta2.is_finite() && (0.0..1.0).contains(&beta2)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta2 must be finite and in [0,1), got {beta2}"
                    )));
                }
                if !(eps.is_finite() && eps > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "adam eps must be finite and > 0, got {eps}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Allocate optimizer state for the parameters of `stage`.
    pub fn state(self, model: &TwoStageModel, stage: StageId) -> Result<OptimizerState> {
        self.validate()?;

        let (beta1, beta2, eps) = match self {
            Optimizer::Sgd => return Ok(OptimizerState::Sgd { stage }),
            Optimizer::Adam => (ADAM_BETA1, ADAM_BETA2, ADAM_EPS),
            Optimizer::AdamWith { beta1, beta2, eps } => (beta1, beta2, eps),
        };

        Ok(OptimizerState::Adam {
            stage,
            beta1,
            beta2,
            eps,
            t: 0,
            beta1_pow: 1.0,
            beta2_pow: 1.0,
            m_weights: zeros_like_stage(model, stage),
            v_weights: zeros_like_stage(model, stage),
        })
    }
}

#[derive(Debug, Clone)]
/// Owned optimizer state for one stage.
pub enum OptimizerState {
    Sgd {
        stage: StageId,
    },
    Adam {
        stage: StageId,
        beta1: f32,
        beta2: f32,
        eps: f32,
        t: u64,
        beta1_pow: f32,
        beta2_pow: f32,
        m_weights: Vec<Vec<f32>>,
        v_weights: Vec<Vec<f32>>,
    },
}

impl OptimizerState {
    /// The stage whose variables this optimizer updates.
    pub fn stage(&self) -> StageId {
        match self {
            OptimizerState::Sgd { stage } | OptimizerState::Adam { stage, .. } => *stage,
        }
    }

    /// Number of steps applied so far (always 0 for SGD).
    pub fn steps(&self) -> u64 {
        match self {
            OptimizerState::Sgd { .. } => 0,
            OptimizerState::Adam { t, .. } => *t,
        }
    }

    /// Apply one optimizer step to the owning stage.
    ///
    /// `grads` must belong to the same stage; it is overwritten with the update
    /// direction.
    pub fn step(&mut self, model: &mut TwoStageModel, grads: &mut Gradients, lr: f32) {
        assert!(lr.is_finite() && lr > 0.0, "lr must be finite and > 0");
        assert_eq!(
            grads.stage(),
            self.stage(),
            "gradients for stage {} passed to the optimizer of stage {}",
            grads.stage(),
            self.stage()
        );

        match self {
            OptimizerState::Sgd { stage } => {
                apply(model, *stage, grads, lr);
            }
            OptimizerState::Adam {
                stage,
                beta1,
                beta2,
                eps,
                t,
                beta1_pow,
                beta2_pow,
                m_weights,
                v_weights,
            } => {
                *t += 1;
                *beta1_pow *= *beta1;
                *beta2_pow *= *beta2;

                let one_minus_beta1 = 1.0 - *beta1;
                let one_minus_beta2 = 1.0 - *beta2;
                let corr1 = 1.0 - *beta1_pow;
                let corr2 = 1.0 - *beta2_pow;

                // Overwrite `grads` with the Adam update direction, then apply it like SGD.
                for layer_idx in 0..grads.num_layers() {
                    let mw = &mut m_weights[layer_idx];
                    let vw = &mut v_weights[layer_idx];
                    let upd = grads.d_weights_mut(layer_idx);
                    debug_assert_eq!(mw.len(), upd.len());

                    for i in 0..upd.len() {
                        let g = upd[i];
                        mw[i] = (*beta1) * mw[i] + one_minus_beta1 * g;
                        vw[i] = (*beta2) * vw[i] + one_minus_beta2 * (g * g);

                        let m_hat = mw[i] / corr1;
                        let v_hat = vw[i] / corr2;
                        upd[i] = m_hat / (v_hat.sqrt() + *eps);
                    }
                }

                apply(model, *stage, grads, lr);
            }
        }
    }
}

fn apply(model: &mut TwoStageModel, stage: StageId, grads: &Gradients, lr: f32) {
    let stage = model.stage_mut(stage);
    assert_eq!(stage.num_layers(), grads.num_layers());
    for idx in 0..grads.num_layers() {
        if let Some(layer) = stage.layer_mut(idx) {
            layer.apply_update(grads.d_weights(idx), lr);
        }
    }
}

fn zeros_like_stage(model: &TwoStageModel, stage: StageId) -> Vec<Vec<f32>> {
    model
        .stage(stage)
        .layers()
        .iter()
        .map(|l| vec![0.0; l.weights().len()])
        .collect()
}
