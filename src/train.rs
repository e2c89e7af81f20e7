//! Training loop driver for the two phases.
//!
//! Both phases walk the training partition in fixed order with
//! [`batch_windows`](crate::data::batch_windows): no shuffling, and the trailing
//! window is never used. The loops here only do numeric work; the `on_report`
//! callback receives every periodic and final report and owns the side effects
//! (logging, plotting, checkpointing).

use tracing::debug;

use crate::config::PhaseConfig;
use crate::data::{Partition, batch_windows};
use crate::model::ModelScratch;
use crate::optim::OptimizerState;
use crate::stage::StageId;
use crate::{Error, Result, TwoStageModel, loss};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Emitted when `epoch % report_every == 0`.
    Periodic,
    /// Emitted once after the last epoch.
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Test-set costs at one point of a phase.
pub struct EpochReport {
    pub stage: StageId,
    pub kind: ReportKind,
    pub epoch: usize,
    /// Summed squared error of predicted vs. raw edge points.
    pub edge_cost: f32,
    /// Summed squared error of predicted vs. thresholded contact points
    /// (contact phase only).
    pub contact_cost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseReport {
    pub stage: StageId,
    pub epochs: usize,
    /// Optimizer steps taken (batches seen) over the whole phase.
    pub steps: usize,
    pub last: EpochReport,
}

/// Test-set cost of stage 1 against raw edge points.
pub fn edge_cost(model: &TwoStageModel, data: &Partition) -> Result<f32> {
    let pred = model.predict_edge_points(&data.terrain)?;
    Ok(loss::sum_squared(pred.as_slice(), data.edge_pts.as_slice()))
}

/// Test-set cost of the full network against thresholded contact points.
pub fn contact_cost(model: &TwoStageModel, data: &Partition) -> Result<f32> {
    let pred = model.predict_contact_points(&data.terrain)?;
    Ok(loss::sum_squared(pred.as_slice(), data.ct_pts_ones.as_slice()))
}

/// Phase 1: fit stage 1 to the edge points. Only `opt`'s stage is updated.
pub fn train_edge_points<F>(
    model: &mut TwoStageModel,
    opt: &mut OptimizerState,
    train: &Partition,
    test: &Partition,
    cfg: &PhaseConfig,
    mut on_report: F,
) -> Result<PhaseReport>
where
    F: FnMut(&TwoStageModel, &EpochReport) -> Result<()>,
{
    check_phase(StageId::EdgePoints, opt, train, test, cfg)?;

    let mut scratch = ModelScratch::default();
    let mut grads = model.stage(StageId::EdgePoints).gradients();
    let out_dim = model.stage(StageId::EdgePoints).output_dim();
    let mut steps = 0;

    let report = |model: &TwoStageModel, epoch, kind| -> Result<EpochReport> {
        Ok(EpochReport {
            stage: StageId::EdgePoints,
            kind,
            epoch,
            edge_cost: edge_cost(model, test)?,
            contact_cost: None,
        })
    };

    for epoch in 0..cfg.epochs {
        for w in batch_windows(train.len(), cfg.batch_size) {
            let batch = w.len();
            let x = train.terrain.window(w.clone());
            let y = train.edge_pts.window(w);

            let pred = model.forward_edge_points(batch, x, &mut scratch);
            let batch_loss =
                loss::sum_squared_backward(pred, y, grads.d_output_mut(batch, out_dim));
            model
                .stage(StageId::EdgePoints)
                .backward_batch(x, &scratch.edge, &mut grads, false);
            opt.step(model, &mut grads, cfg.lr);
            steps += 1;
            debug!(epoch, step = steps, loss = batch_loss, "edge points step");
        }

        if epoch % cfg.report_every == 0 {
            let r = report(&*model, epoch, ReportKind::Periodic)?;
            on_report(&*model, &r)?;
        }
    }

    let last = report(&*model, cfg.epochs - 1, ReportKind::Final)?;
    on_report(&*model, &last)?;

    Ok(PhaseReport {
        stage: StageId::EdgePoints,
        epochs: cfg.epochs,
        steps,
        last,
    })
}

/// Phase 2: fit stage 2 to the thresholded contact points.
///
/// Stage 2 consumes stage 1's live output, but gradients are not propagated
/// into stage 1: its weights are outside this phase's optimizer.
pub fn train_contact_points<F>(
    model: &mut TwoStageModel,
    opt: &mut OptimizerState,
    train: &Partition,
    test: &Partition,
    cfg: &PhaseConfig,
    mut on_report: F,
) -> Result<PhaseReport>
where
    F: FnMut(&TwoStageModel, &EpochReport) -> Result<()>,
{
    check_phase(StageId::ContactPoints, opt, train, test, cfg)?;

    let mut scratch = ModelScratch::default();
    let mut grads = model.stage(StageId::ContactPoints).gradients();
    let out_dim = model.output_dim();
    let mut steps = 0;

    let report = |model: &TwoStageModel, epoch, kind| -> Result<EpochReport> {
        Ok(EpochReport {
            stage: StageId::ContactPoints,
            kind,
            epoch,
            edge_cost: edge_cost(model, test)?,
            contact_cost: Some(contact_cost(model, test)?),
        })
    };

    for epoch in 0..cfg.epochs {
        for w in batch_windows(train.len(), cfg.batch_size) {
            let batch = w.len();
            let x = train.terrain.window(w.clone());
            let y = train.ct_pts_ones.window(w);

            let pred = model.forward_contact_points(batch, x, &mut scratch);
            let batch_loss =
                loss::sum_squared_backward(pred, y, grads.d_output_mut(batch, out_dim));
            model.stage(StageId::ContactPoints).backward_batch(
                &scratch.joint,
                &scratch.contact,
                &mut grads,
                false,
            );
            opt.step(model, &mut grads, cfg.lr);
            steps += 1;
            debug!(epoch, step = steps, loss = batch_loss, "contact points step");
        }

        if epoch % cfg.report_every == 0 {
            let r = report(&*model, epoch, ReportKind::Periodic)?;
            on_report(&*model, &r)?;
        }
    }

    let last = report(&*model, cfg.epochs - 1, ReportKind::Final)?;
    on_report(&*model, &last)?;

    Ok(PhaseReport {
        stage: StageId::ContactPoints,
        epochs: cfg.epochs,
        steps,
        last,
    })
}

fn check_phase(
    stage: StageId,
    opt: &OptimizerState,
    train: &Partition,
    test: &Partition,
    cfg: &PhaseConfig,
) -> Result<()> {
    cfg.validate(&stage.to_string())?;
    if opt.stage() != stage {
        return Err(Error::InvalidConfig(format!(
            "{stage} phase was given the optimizer of stage {}",
            opt.stage()
        )));
    }
    if test.is_empty() {
        return Err(Error::InvalidData("test partition must not be empty".to_owned()));
    }
    if batch_windows(train.len(), cfg.batch_size).next().is_none() {
        return Err(Error::InvalidConfig(format!(
            "{stage}: {} training samples yield no full batch of {}",
            train.len(),
            cfg.batch_size
        )));
    }
    Ok(())
}
