//! Run configuration and derived output paths.
//!
//! Defaults reproduce the reference training run; a JSON file can override any
//! field and the CLI can override the most common ones on top of that.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::optim::Optimizer;
use crate::{Error, Result};

/// Timestamp layout used in every output name (easy to sort by filename).
pub const TIMESTAMP_FORMAT: &str = "%m_%d_%H_%M";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Hyperparameters and reporting cadence of one training phase.
pub struct PhaseConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub lr: f32,
    /// Log, plot and checkpoint whenever `epoch % report_every == 0`.
    pub report_every: usize,
}

impl PhaseConfig {
    /// Phase 1: edge points.
    pub fn edge_points() -> Self {
        Self {
            epochs: 1000,
            batch_size: 128,
            lr: 1e-4,
            report_every: 100,
        }
    }

    /// Phase 2: contact points.
    pub fn contact_points() -> Self {
        Self {
            epochs: 5000,
            batch_size: 32,
            lr: 1e-3,
            report_every: 50,
        }
    }

    pub fn validate(&self, phase: &str) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig(format!("{phase}: epochs must be > 0")));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "{phase}: batch_size must be > 0"
            )));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "{phase}: lr must be finite and > 0, got {}",
                self.lr
            )));
        }
        if self.report_every == 0 {
            return Err(Error::InvalidConfig(format!(
                "{phase}: report_every must be > 0"
            )));
        }
        Ok(())
    }
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self::edge_points()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// `.mat` file holding the sample matrix.
    pub data_file: PathBuf,
    /// Name of the array inside the `.mat` file.
    pub mat_name: String,
    /// Percentage of samples used for training.
    pub train_test_split: u32,
    /// Column boundaries between terrain, edge points and contact points.
    pub class_idxs: Vec<usize>,
    /// Prefix of every generated directory and file.
    pub dataset_tag: String,
    /// Program name embedded in output directories.
    pub script_name: String,
    /// Root for checkpoints.
    pub models_dir: PathBuf,
    /// Root for scalar summaries and plots.
    pub logs_dir: PathBuf,
    /// Directory receiving the frozen graph.
    pub frozen_dir: PathBuf,
    pub seed: u64,
    #[serde(skip)]
    pub optimizer: Optimizer,
    pub edge_phase: PhaseConfig,
    pub contact_phase: PhaseConfig,
    /// Plots rendered by `restore_and_predict`.
    pub prediction_plots: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("training_data/a_stages_cnn_10_10/data_stages_cnn_10_10.mat"),
            mat_name: "data".to_owned(),
            train_test_split: 66,
            class_idxs: vec![100, 200],
            dataset_tag: "a_stages_cnn_10_10".to_owned(),
            script_name: "a_contact_points_predict_twostage".to_owned(),
            models_dir: PathBuf::from("generated_models"),
            logs_dir: PathBuf::from("training_logs"),
            frozen_dir: PathBuf::from("."),
            seed: 0,
            optimizer: Optimizer::Adam,
            edge_phase: PhaseConfig::edge_points(),
            contact_phase: PhaseConfig::contact_points(),
            prediction_plots: 4,
        }
    }
}

impl RunConfig {
    /// Load a JSON config; missing fields fall back to the defaults.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p).map_err(|e| Error::io(p, e))?;
        let cfg: RunConfig = serde_json::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.train_test_split > 100 {
            return Err(Error::InvalidConfig(format!(
                "train_test_split must be in 0..=100, got {}",
                self.train_test_split
            )));
        }
        if self.class_idxs.len() != 2 {
            return Err(Error::InvalidConfig(format!(
                "class_idxs must hold 2 boundaries, got {:?}",
                self.class_idxs
            )));
        }
        if self.mat_name.is_empty() {
            return Err(Error::InvalidConfig("mat_name must not be empty".to_owned()));
        }
        self.edge_phase.validate("edge_phase")?;
        self.contact_phase.validate("contact_phase")?;
        self.optimizer.validate()
    }
}

/// Every output location of one process run, derived once at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub timestamp: String,
    /// `<models>/<tag>_<script>/<tag>_<timestamp>.ckpt`
    pub checkpoint: PathBuf,
    /// `<logs>/<tag>_<script>/logs_mycnn_<timestamp>`
    pub log_dir: PathBuf,
    /// `<frozen>/frozen_model_stages_10_10_<timestamp>.pb`
    pub frozen_model: PathBuf,
}

impl RunPaths {
    pub fn new(cfg: &RunConfig, started: DateTime<Local>) -> Self {
        Self::with_timestamp(cfg, started.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn with_timestamp(cfg: &RunConfig, timestamp: String) -> Self {
        let run_dir = format!("{}_{}", cfg.dataset_tag, cfg.script_name);
        let checkpoint = cfg
            .models_dir
            .join(&run_dir)
            .join(format!("{}_{timestamp}.ckpt", cfg.dataset_tag));
        let log_dir = cfg
            .logs_dir
            .join(&run_dir)
            .join(format!("logs_mycnn_{timestamp}"));
        let frozen_model = cfg
            .frozen_dir
            .join(format!("frozen_model_stages_10_10_{timestamp}.pb"));
        Self {
            timestamp,
            checkpoint,
            log_dir,
            frozen_model,
        }
    }

    /// Create the checkpoint and log directories.
    pub fn create_dirs(&self) -> Result<()> {
        let dirs = [self.checkpoint.parent(), Some(self.log_dir.as_path())];
        for dir in dirs.into_iter().flatten() {
            std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn defaults_match_the_reference_run() {
        let cfg = RunConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.train_test_split, 66);
        assert_eq!(cfg.class_idxs, vec![100, 200]);
        assert_eq!(cfg.edge_phase.batch_size, 128);
        assert_eq!(cfg.contact_phase.epochs, 5000);
        assert_eq!(cfg.contact_phase.report_every, 50);
    }

    #[test]
    fn paths_embed_tag_script_and_timestamp() {
        let cfg = RunConfig::default();
        let started = Local.with_ymd_and_hms(2017, 1, 31, 9, 47, 0).unwrap();
        let paths = RunPaths::new(&cfg, started);

        assert_eq!(paths.timestamp, "01_31_09_47");
        assert_eq!(
            paths.checkpoint,
            PathBuf::from(
                "generated_models/a_stages_cnn_10_10_a_contact_points_predict_twostage/a_stages_cnn_10_10_01_31_09_47.ckpt"
            )
        );
        assert_eq!(
            paths.log_dir,
            PathBuf::from(
                "training_logs/a_stages_cnn_10_10_a_contact_points_predict_twostage/logs_mycnn_01_31_09_47"
            )
        );
        assert_eq!(
            paths.frozen_model,
            PathBuf::from("./frozen_model_stages_10_10_01_31_09_47.pb")
        );
    }

    #[test]
    fn json_overrides_merge_with_defaults() {
        let cfg: RunConfig =
            serde_json::from_str(r#"{"seed": 42, "contact_phase": {"epochs": 3}}"#).unwrap();
        assert_eq!(cfg.seed, 42);
        assert_eq!(cfg.contact_phase.epochs, 3);
        // Unspecified phase fields fall back to `PhaseConfig::default()`.
        assert_eq!(cfg.contact_phase.batch_size, 128);
        assert_eq!(cfg.train_test_split, 66);
    }

    #[test]
    fn validation_rejects_bad_phase() {
        let mut cfg = RunConfig::default();
        cfg.edge_phase.batch_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = RunConfig::default();
        cfg.class_idxs = vec![100];
        assert!(cfg.validate().is_err());
    }
}
