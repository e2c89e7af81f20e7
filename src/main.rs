use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use contact_stages::{ModelContext, RunConfig, RunPaths, StageData, mat};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Checkpoint restored by `run` when none is given.
const DEFAULT_CHECKPOINT: &str =
    "generated_models/a_stages_cnn_10_10_a_cnn_stages_10_10/a_stages_cnn_10_10_01_31_09_47.ckpt";

#[derive(Parser, Debug)]
#[command(name = "contact-stages", about = "Two-stage foot contact-point predictor")]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Overrides {
    /// JSON run configuration; flags below override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// MAT file holding the dataset.
    #[arg(long, global = true)]
    data_file: Option<PathBuf>,
    /// Seed for weight initialization.
    #[arg(long, global = true)]
    seed: Option<u64>,
    /// Epochs of the edge-point phase.
    #[arg(long, global = true)]
    edge_epochs: Option<usize>,
    /// Epochs of the contact-point phase.
    #[arg(long, global = true)]
    contact_epochs: Option<usize>,
    /// Directory for checkpoints.
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,
    /// Directory for summaries and plots.
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train stage 1, then stage 2, checkpointing along the way.
    Train,
    /// Restore a checkpoint and render predictions on the test split.
    Predict {
        #[arg(long)]
        checkpoint: PathBuf,
    },
    /// Restore a checkpoint and write the frozen inference graph.
    Freeze {
        #[arg(long)]
        checkpoint: PathBuf,
    },
    /// Restore, predict, then freeze.
    Run {
        #[arg(long, default_value = DEFAULT_CHECKPOINT)]
        checkpoint: PathBuf,
    },
}

impl Overrides {
    fn resolve(&self) -> Result<RunConfig> {
        let mut cfg = match &self.config {
            Some(path) => RunConfig::load_json(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => RunConfig::default(),
        };
        if let Some(p) = &self.data_file {
            cfg.data_file = p.clone();
        }
        if let Some(seed) = self.seed {
            cfg.seed = seed;
        }
        if let Some(n) = self.edge_epochs {
            cfg.edge_phase.epochs = n;
        }
        if let Some(n) = self.contact_epochs {
            cfg.contact_phase.epochs = n;
        }
        if let Some(p) = &self.models_dir {
            cfg.models_dir = p.clone();
        }
        if let Some(p) = &self.logs_dir {
            cfg.logs_dir = p.clone();
        }
        cfg.validate().context("invalid run configuration")?;
        Ok(cfg)
    }
}

fn load_data(cfg: &RunConfig) -> Result<StageData> {
    let rows = mat::load_rows(&cfg.data_file, &cfg.mat_name)
        .with_context(|| format!("reading {}", cfg.data_file.display()))?;
    mat::check_sample_width(&rows, &cfg.class_idxs)?;
    let data = StageData::from_rows(&rows, cfg.train_test_split, &cfg.class_idxs)?;
    info!(
        train = data.train.len(),
        test = data.test.len(),
        "dataset split"
    );
    Ok(data)
}

fn predict(ctx: &mut ModelContext, checkpoint: &Path) -> Result<()> {
    let data = load_data(ctx.config())?;
    let plots = ctx
        .restore_and_predict(checkpoint, &data.test)
        .with_context(|| format!("predicting from {}", checkpoint.display()))?;
    for p in plots {
        info!(path = %p.display(), "prediction plot");
    }
    Ok(())
}

fn freeze(ctx: &mut ModelContext) -> Result<()> {
    let graph = ctx.freeze()?;
    info!(
        nodes = graph.nodes.len(),
        path = %ctx.paths().frozen_model.display(),
        "frozen graph written"
    );
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let cfg = cli.overrides.resolve()?;
    let paths = RunPaths::new(&cfg, Local::now());
    info!(timestamp = %paths.timestamp, "run started");
    let mut ctx = ModelContext::new(cfg, paths)?;

    match cli.command {
        Command::Train => {
            let data = load_data(ctx.config())?;
            ctx.initialize()?;
            let edge = ctx.train_edge_points(&data)?;
            let contact = ctx.train_contact_points(&data)?;
            info!(
                edge_steps = edge.steps,
                contact_steps = contact.steps,
                checkpoint = %ctx.paths().checkpoint.display(),
                "training finished"
            );
        }
        Command::Predict { checkpoint } => predict(&mut ctx, &checkpoint)?,
        Command::Freeze { checkpoint } => {
            ctx.restore(&checkpoint)
                .with_context(|| format!("restoring {}", checkpoint.display()))?;
            freeze(&mut ctx)?;
        }
        Command::Run { checkpoint } => {
            predict(&mut ctx, &checkpoint)?;
            freeze(&mut ctx)?;
        }
    }
    Ok(())
}
