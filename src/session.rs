//! The model context: one object owning the model, both optimizers, the run's
//! output paths and its summary writer, driven through explicit transitions.
//!
//! | from                              | transition             | to               |
//! |-----------------------------------|------------------------|------------------|
//! | `Uninitialized`                   | `initialize`           | `Stage1Training` |
//! | any but `Frozen`                  | `restore`              | `Stage2Training` |
//! | `Stage1Training`/`Stage2Training` | `train_edge_points`    | `Stage2Training` |
//! | `Stage2Training`                  | `train_contact_points` | `Stage2Training` |
//! | `Stage1Training`/`Stage2Training` | `freeze`               | `Frozen`         |
//!
//! Anything else is [`Error::InvalidState`].

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{RunConfig, RunPaths};
use crate::data::{Partition, StageData, ZMP};
use crate::freeze::{FrozenGraph, freeze_model};
use crate::optim::OptimizerState;
use crate::plot::{self, MAX_SAMPLES};
use crate::stage::StageId;
use crate::summary::{SummaryWriter, TAG_CONTACT_COST, TAG_EDGE_COST};
use crate::train::{self, EpochReport, PhaseReport, ReportKind};
use crate::{Error, Result, Rows, TwoStageModel, checkpoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    /// No parameters exist yet.
    Uninitialized,
    /// Fresh parameters; stage 1 is next.
    Stage1Training,
    /// Stage 1 is trained (or restored); stage 2 trains next, possibly repeatedly.
    Stage2Training,
    /// A frozen graph was written; the context no longer changes.
    Frozen,
}

impl fmt::Display for TrainingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrainingState::Uninitialized => "uninitialized",
            TrainingState::Stage1Training => "awaiting stage 1 training",
            TrainingState::Stage2Training => "awaiting stage 2 training",
            TrainingState::Frozen => "frozen",
        };
        f.write_str(s)
    }
}

/// Predictions of both stages for one terrain matrix.
#[derive(Debug, Clone)]
pub struct FullStagePrediction {
    pub edge_pts: Rows,
    pub ct_pts: Rows,
}

#[derive(Debug)]
pub struct ModelContext {
    cfg: RunConfig,
    paths: RunPaths,
    state: TrainingState,
    model: Option<TwoStageModel>,
    edge_opt: Option<OptimizerState>,
    contact_opt: Option<OptimizerState>,
    summary: Option<SummaryWriter>,
}

impl ModelContext {
    pub fn new(cfg: RunConfig, paths: RunPaths) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            paths,
            state: TrainingState::Uninitialized,
            model: None,
            edge_opt: None,
            contact_opt: None,
            summary: None,
        })
    }

    #[inline]
    pub fn state(&self) -> TrainingState {
        self.state
    }

    #[inline]
    pub fn config(&self) -> &RunConfig {
        &self.cfg
    }

    #[inline]
    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    #[inline]
    pub fn model(&self) -> Option<&TwoStageModel> {
        self.model.as_ref()
    }

    /// Create fresh parameters from the configured seed and both optimizers.
    pub fn initialize(&mut self) -> Result<()> {
        self.expect_state("initialize", &[TrainingState::Uninitialized])?;
        let model = TwoStageModel::new_with_seed(self.cfg.seed)?;
        self.install(model)?;
        self.state = TrainingState::Stage1Training;
        info!(seed = self.cfg.seed, "model initialized");
        Ok(())
    }

    /// Restore every variable from a checkpoint. Creates the model if needed.
    pub fn restore<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.expect_state(
            "restore",
            &[
                TrainingState::Uninitialized,
                TrainingState::Stage1Training,
                TrainingState::Stage2Training,
            ],
        )?;
        // A failed restore leaves the live model untouched.
        let mut model = match &self.model {
            Some(m) => m.clone(),
            None => TwoStageModel::new_with_seed(self.cfg.seed)?,
        };
        checkpoint::restore(&mut model, path)?;
        self.install(model)?;
        self.state = TrainingState::Stage2Training;
        Ok(())
    }

    /// Phase 1. Every `report_every` epochs: log the test cost, plot and checkpoint.
    pub fn train_edge_points(&mut self, data: &StageData) -> Result<PhaseReport> {
        self.expect_state(
            "train edge points",
            &[TrainingState::Stage1Training, TrainingState::Stage2Training],
        )?;
        self.paths.create_dirs()?;
        info!("training edge points");

        self.open_summary()?;
        let state = self.state;
        let Self {
            cfg,
            paths,
            model,
            edge_opt,
            summary,
            ..
        } = self;
        let (Some(model), Some(opt), Some(summary)) =
            (model.as_mut(), edge_opt.as_mut(), summary.as_mut())
        else {
            return Err(missing_model("train edge points", state));
        };
        let report = train::train_edge_points(
            model,
            opt,
            &data.train,
            &data.test,
            &cfg.edge_phase,
            |model, r| on_report(model, r, &data.test, paths, summary),
        )?;
        summary.flush()?;

        self.state = TrainingState::Stage2Training;
        Ok(report)
    }

    /// Phase 2. Every `report_every` epochs: log both test costs, plot and checkpoint.
    pub fn train_contact_points(&mut self, data: &StageData) -> Result<PhaseReport> {
        self.expect_state("train contact points", &[TrainingState::Stage2Training])?;
        self.paths.create_dirs()?;
        info!("training contact points");
        warn!(
            "stage 1 weights are outside the contact-point optimizer and stay fixed during this phase"
        );

        self.open_summary()?;
        let state = self.state;
        let Self {
            cfg,
            paths,
            model,
            contact_opt,
            summary,
            ..
        } = self;
        let (Some(model), Some(opt), Some(summary)) =
            (model.as_mut(), contact_opt.as_mut(), summary.as_mut())
        else {
            return Err(missing_model("train contact points", state));
        };
        let report = train::train_contact_points(
            model,
            opt,
            &data.train,
            &data.test,
            &cfg.contact_phase,
            |model, r| on_report(model, r, &data.test, paths, summary),
        )?;
        summary.flush()?;
        Ok(report)
    }

    pub fn predict_edge_points(&self, terrain: &Rows) -> Result<Rows> {
        self.live_model("predict")?.predict_edge_points(terrain)
    }

    pub fn predict_contact_points(&self, terrain: &Rows) -> Result<Rows> {
        self.live_model("predict")?.predict_contact_points(terrain)
    }

    /// Run both stages over `terrain`.
    pub fn predict_full_stages(&self, terrain: &Rows) -> Result<FullStagePrediction> {
        let model = self.live_model("predict")?;
        Ok(FullStagePrediction {
            edge_pts: model.predict_edge_points(terrain)?,
            ct_pts: model.predict_contact_points(terrain)?,
        })
    }

    /// Restore `checkpoint`, predict the test set and render the configured
    /// number of overlays. Returns the written image paths.
    pub fn restore_and_predict<P: AsRef<Path>>(
        &mut self,
        checkpoint: P,
        test: &Partition,
    ) -> Result<Vec<PathBuf>> {
        self.restore(checkpoint)?;
        if test.is_empty() {
            return Err(Error::InvalidData("test partition must not be empty".to_owned()));
        }
        let pred = self.predict_full_stages(&test.terrain)?;

        let mut written = Vec::with_capacity(self.cfg.prediction_plots);
        for i in 0..self.cfg.prediction_plots {
            let first = (i * MAX_SAMPLES) % test.len();
            let path = self.plot_dir().join(format!("full_stages_{i}.png"));
            plot::save_overlay(
                &path,
                &test.edge_pts,
                &test.ct_pts_ones,
                &pred.ct_pts,
                ZMP,
                first,
            )?;
            written.push(path);
        }
        info!(plots = written.len(), "rendered full-stage predictions");
        Ok(written)
    }

    /// Write the constants-folded inference graph to the run's frozen-model path.
    pub fn freeze(&mut self) -> Result<FrozenGraph> {
        self.expect_state(
            "freeze",
            &[TrainingState::Stage1Training, TrainingState::Stage2Training],
        )?;
        let model = self.live_model("freeze")?;
        let graph = freeze_model(model, &self.paths.frozen_model)?;
        self.state = TrainingState::Frozen;
        Ok(graph)
    }

    fn install(&mut self, model: TwoStageModel) -> Result<()> {
        self.edge_opt = Some(self.cfg.optimizer.state(&model, StageId::EdgePoints)?);
        self.contact_opt = Some(self.cfg.optimizer.state(&model, StageId::ContactPoints)?);
        self.model = Some(model);
        Ok(())
    }

    fn open_summary(&mut self) -> Result<()> {
        if self.summary.is_none() {
            self.summary = Some(SummaryWriter::create(&self.paths.log_dir)?);
        }
        Ok(())
    }

    fn live_model(&self, action: &'static str) -> Result<&TwoStageModel> {
        self.model
            .as_ref()
            .ok_or_else(|| missing_model(action, self.state))
    }

    fn plot_dir(&self) -> PathBuf {
        self.paths.log_dir.join("plots")
    }

    fn expect_state(&self, action: &'static str, allowed: &[TrainingState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                action,
                state: self.state.to_string(),
            })
        }
    }
}

fn missing_model(action: &'static str, state: TrainingState) -> Error {
    Error::InvalidState {
        action,
        state: state.to_string(),
    }
}

/// Side effects of one training report: structured log line, scalar summaries,
/// overlay plot and (unless this is the edge phase's final report) a checkpoint.
fn on_report(
    model: &TwoStageModel,
    r: &EpochReport,
    test: &Partition,
    paths: &RunPaths,
    summary: &mut SummaryWriter,
) -> Result<()> {
    info!(
        stage = %r.stage,
        epoch = r.epoch,
        final_report = r.kind == ReportKind::Final,
        edge_cost = r.edge_cost,
        contact_cost = ?r.contact_cost,
        "test cost"
    );
    summary.add_scalar(TAG_EDGE_COST, r.edge_cost, r.epoch)?;
    if let Some(c) = r.contact_cost {
        summary.add_scalar(TAG_CONTACT_COST, c, r.epoch)?;
    }

    let name = match r.kind {
        ReportKind::Periodic => format!("{}_{:05}.png", r.stage, r.epoch),
        ReportKind::Final => format!("{}_final.png", r.stage),
    };
    let plot_path = paths.log_dir.join("plots").join(name);
    match r.stage {
        StageId::EdgePoints => {
            let pred = model.predict_edge_points(&test.terrain)?;
            plot::save_overlay(&plot_path, &test.terrain, &test.edge_pts, &pred, ZMP, 0)?;
        }
        StageId::ContactPoints => {
            let pred = model.predict_contact_points(&test.terrain)?;
            plot::save_overlay(&plot_path, &test.edge_pts, &test.ct_pts_ones, &pred, ZMP, 0)?;
        }
    }

    let checkpoint_now = r.kind == ReportKind::Periodic || r.stage == StageId::ContactPoints;
    if checkpoint_now {
        checkpoint::save(model, &paths.checkpoint)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhaseConfig;

    fn context(dir: &Path) -> ModelContext {
        let cfg = RunConfig {
            models_dir: dir.join("models"),
            logs_dir: dir.join("logs"),
            frozen_dir: dir.to_path_buf(),
            ..RunConfig::default()
        };
        let paths = RunPaths::with_timestamp(&cfg, "01_02_03_04".to_owned());
        ModelContext::new(cfg, paths).unwrap()
    }

    #[test]
    fn transitions_out_of_order_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        assert_eq!(ctx.state(), TrainingState::Uninitialized);
        assert!(matches!(ctx.freeze(), Err(Error::InvalidState { .. })));

        ctx.initialize().unwrap();
        assert_eq!(ctx.state(), TrainingState::Stage1Training);
        assert!(matches!(ctx.initialize(), Err(Error::InvalidState { .. })));

        ctx.freeze().unwrap();
        assert_eq!(ctx.state(), TrainingState::Frozen);
        assert!(ctx.paths().frozen_model.exists());
        assert!(ctx.restore(dir.path().join("x.ckpt")).is_err());
    }

    #[test]
    fn restore_moves_to_stage_two() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = dir.path().join("saved.ckpt");
        let saved = TwoStageModel::new_with_seed(77).unwrap();
        checkpoint::save(&saved, &ckpt).unwrap();

        let mut ctx = context(dir.path());
        ctx.restore(&ckpt).unwrap();
        assert_eq!(ctx.state(), TrainingState::Stage2Training);
        let live = ctx.model().unwrap();
        for (a, b) in saved.layers().zip(live.layers()) {
            assert_eq!(a.weights(), b.weights());
        }
    }

    #[test]
    fn failed_restore_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        assert!(ctx.restore(dir.path().join("missing.ckpt")).is_err());
        assert_eq!(ctx.state(), TrainingState::Uninitialized);
        assert!(ctx.model().is_none());
        let terrain = Rows::from_flat(vec![0.0; 100], 100).unwrap();
        assert!(matches!(
            ctx.predict_full_stages(&terrain),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn failed_restore_keeps_live_weights() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.initialize().unwrap();
        let before: Vec<Vec<f32>> = ctx
            .model()
            .unwrap()
            .layers()
            .map(|l| l.weights().to_vec())
            .collect();

        let bad = dir.path().join("bad.ckpt");
        std::fs::write(&bad, "{\"format_version\": 1, \"variables\": []}").unwrap();
        assert!(ctx.restore(&bad).is_err());
        assert_eq!(ctx.state(), TrainingState::Stage1Training);

        let after: Vec<Vec<f32>> = ctx
            .model()
            .unwrap()
            .layers()
            .map(|l| l.weights().to_vec())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn predict_requires_a_model() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let terrain = Rows::from_flat(vec![0.0; 100], 100).unwrap();
        assert!(ctx.predict_full_stages(&terrain).is_err());
    }

    #[test]
    fn phase_config_validation_surfaces_on_new() {
        let cfg = RunConfig {
            contact_phase: PhaseConfig {
                lr: -1.0,
                ..PhaseConfig::contact_points()
            },
            ..RunConfig::default()
        };
        let paths = RunPaths::with_timestamp(&cfg, "t".to_owned());
        assert!(ModelContext::new(cfg, paths).is_err());
    }
}
