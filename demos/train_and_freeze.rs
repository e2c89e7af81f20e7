use std::path::PathBuf;

use contact_stages::data::PATCH_LEN;
use contact_stages::model::OUTPUT_NAME;
use contact_stages::{FrozenGraph, ModelContext, PhaseConfig, RunConfig, RunPaths, Rows, StageData};

/// Synthetic samples: a tilted terrain patch, its border as edge points and a
/// square under the centre as contact points.
fn synthetic(n: usize) -> contact_stages::Result<Rows> {
    let rows: Vec<Vec<f32>> = (0..n)
        .map(|s| {
            let tilt = (s as f32 * 0.37).sin();
            let mut row = Vec::with_capacity(3 * PATCH_LEN);
            for i in 0..PATCH_LEN {
                let (x, y) = ((i % 10) as f32, (i / 10) as f32);
                row.push(0.05 * tilt * (x - y));
            }
            for i in 0..PATCH_LEN {
                let (x, y) = (i % 10, i / 10);
                row.push(if x == 0 || y == 0 || x == 9 || y == 9 { 1.0 } else { 0.0 });
            }
            for i in 0..PATCH_LEN {
                let (x, y) = (i % 10, i / 10);
                row.push(if (3..7).contains(&x) && (3..7).contains(&y) { 1.0 } else { 0.0 });
            }
            row
        })
        .collect();
    Rows::from_rows(&rows)
}

fn main() -> contact_stages::Result<()> {
    let out = PathBuf::from("target/demo_contact_stages");
    let cfg = RunConfig {
        models_dir: out.join("generated_models"),
        logs_dir: out.join("training_logs"),
        frozen_dir: out.clone(),
        edge_phase: PhaseConfig {
            epochs: 20,
            batch_size: 8,
            lr: 1e-3,
            report_every: 10,
        },
        contact_phase: PhaseConfig {
            epochs: 50,
            batch_size: 8,
            lr: 1e-3,
            report_every: 25,
        },
        ..RunConfig::default()
    };

    let data = StageData::from_rows(&synthetic(64)?, cfg.train_test_split, &cfg.class_idxs)?;
    let paths = RunPaths::with_timestamp(&cfg, "demo".to_owned());
    let mut ctx = ModelContext::new(cfg, paths)?;

    ctx.initialize()?;
    let edge = ctx.train_edge_points(&data)?;
    let contact = ctx.train_contact_points(&data)?;
    println!(
        "edge cost {:.3}, contact cost {:.3}",
        edge.last.edge_cost,
        contact.last.contact_cost.unwrap_or(f32::NAN)
    );

    ctx.freeze()?;
    let frozen = FrozenGraph::load(&ctx.paths().frozen_model)?;
    let pred = frozen.run(&data.test.terrain, OUTPUT_NAME)?;
    println!(
        "frozen graph at {} predicts {} samples",
        ctx.paths().frozen_model.display(),
        pred.len()
    );
    Ok(())
}
