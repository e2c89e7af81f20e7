use std::path::Path;

use contact_stages::data::PATCH_LEN;
use contact_stages::model::OUTPUT_NAME;
use contact_stages::summary::{self, SCALARS_FILE, TAG_CONTACT_COST, TAG_EDGE_COST};
use contact_stages::{
    Error, FrozenGraph, ModelContext, PhaseConfig, RunConfig, RunPaths, StageData, TrainingState,
    mat,
};

const MI_INT8: u32 = 1;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_DOUBLE: u32 = 9;
const MI_MATRIX: u32 = 14;
const MX_DOUBLE_CLASS: u32 = 6;

fn element(out: &mut Vec<u8>, ty: u32, payload: &[u8]) {
    out.extend_from_slice(&ty.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    while out.len() % 8 != 0 {
        out.push(0);
    }
}

/// Write a level-5 MAT file holding one real double matrix given row-major.
fn write_mat(path: &Path, name: &str, n_rows: usize, n_cols: usize, row_major: &[f64]) {
    assert_eq!(row_major.len(), n_rows * n_cols);

    let mut header = b"MATLAB 5.0 MAT-file, Platform: test, Created on: fixture".to_vec();
    header.resize(116, b' ');
    header.extend_from_slice(&[0u8; 8]);
    header.extend_from_slice(&0x0100u16.to_le_bytes());
    header.extend_from_slice(b"IM");

    let mut body = Vec::new();
    let mut flags = Vec::new();
    flags.extend_from_slice(&MX_DOUBLE_CLASS.to_le_bytes());
    flags.extend_from_slice(&0u32.to_le_bytes());
    element(&mut body, MI_UINT32, &flags);

    let mut dims = Vec::new();
    dims.extend_from_slice(&(n_rows as i32).to_le_bytes());
    dims.extend_from_slice(&(n_cols as i32).to_le_bytes());
    element(&mut body, MI_INT32, &dims);

    element(&mut body, MI_INT8, name.as_bytes());

    let mut real = Vec::with_capacity(row_major.len() * 8);
    for c in 0..n_cols {
        for r in 0..n_rows {
            real.extend_from_slice(&row_major[r * n_cols + c].to_le_bytes());
        }
    }
    element(&mut body, MI_DOUBLE, &real);

    let mut file = header;
    element(&mut file, MI_MATRIX, &body);
    std::fs::write(path, file).unwrap();
}

fn config(dir: &Path, data_file: &Path) -> RunConfig {
    RunConfig {
        data_file: data_file.to_path_buf(),
        models_dir: dir.join("generated_models"),
        logs_dir: dir.join("training_logs"),
        frozen_dir: dir.to_path_buf(),
        edge_phase: PhaseConfig {
            epochs: 3,
            batch_size: 2,
            lr: 1e-4,
            report_every: 1,
        },
        contact_phase: PhaseConfig {
            epochs: 100,
            batch_size: 2,
            lr: 1e-3,
            report_every: 50,
        },
        ..RunConfig::default()
    }
}

fn load(cfg: &RunConfig) -> StageData {
    let rows = mat::load_rows(&cfg.data_file, &cfg.mat_name).unwrap();
    mat::check_sample_width(&rows, &cfg.class_idxs).unwrap();
    StageData::from_rows(&rows, cfg.train_test_split, &cfg.class_idxs).unwrap()
}

#[test]
fn mat_fixture_loads_row_major() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small.mat");
    write_mat(&path, "data", 2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    let rows = mat::load_rows(&path, "data").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.row(0), &[1.0, 2.0, 3.0]);
    assert_eq!(rows.row(1), &[4.0, 5.0, 6.0]);

    assert!(matches!(
        mat::load_rows(&path, "other"),
        Err(Error::Mat(_))
    ));
}

#[test]
fn split_follows_class_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ramp.mat");
    let width = 3 * PATCH_LEN;
    let values: Vec<f64> = (0..10 * width)
        .map(|i| ((i % width) / PATCH_LEN) as f64 + 0.25)
        .collect();
    write_mat(&path, "data", 10, width, &values);

    let cfg = config(dir.path(), &path);
    let data = load(&cfg);
    assert_eq!(data.train.len(), 6);
    assert_eq!(data.test.len(), 4);
    assert!(data.train.terrain.as_slice().iter().all(|&v| v == 0.25));
    assert!(data.train.edge_pts.as_slice().iter().all(|&v| v == 1.25));
    assert!(data.test.ct_pts.as_slice().iter().all(|&v| v == 2.25));
    assert!(data.test.ct_pts_ones.as_slice().iter().all(|&v| v == 1.0));
}

#[test]
fn zero_dataset_trains_freezes_and_restores() {
    let dir = tempfile::tempdir().unwrap();
    let data_file = dir.path().join("zeros.mat");
    write_mat(&data_file, "data", 10, 3 * PATCH_LEN, &vec![0.0; 10 * 3 * PATCH_LEN]);

    let cfg = config(dir.path(), &data_file);
    let data = load(&cfg);
    let paths = RunPaths::with_timestamp(&cfg, "01_31_09_47".to_owned());
    let mut ctx = ModelContext::new(cfg.clone(), paths.clone()).unwrap();

    ctx.initialize().unwrap();
    let edge = ctx.train_edge_points(&data).unwrap();
    assert_eq!(edge.steps, 3 * 2);
    assert_eq!(ctx.state(), TrainingState::Stage2Training);

    let contact = ctx.train_contact_points(&data).unwrap();
    assert_eq!(contact.steps, 100 * 2);
    let cost = contact.last.contact_cost.unwrap();
    assert!(cost.is_finite());

    let pred = ctx.predict_full_stages(&data.test.terrain).unwrap();
    assert!(pred.edge_pts.as_slice().iter().all(|&v| v == 0.0));
    assert!(
        pred.ct_pts.as_slice().iter().all(|&p| p <= 0.5 + 1e-6),
        "trained contact predictions should fall below 0.5 on an all-zero dataset"
    );

    // Side effects of the reports.
    assert!(paths.checkpoint.exists());
    let scalars = summary::read_scalars(paths.log_dir.join(SCALARS_FILE)).unwrap();
    assert_eq!(scalars.iter().filter(|e| e.tag == TAG_EDGE_COST).count(), 4 + 3);
    assert_eq!(scalars.iter().filter(|e| e.tag == TAG_CONTACT_COST).count(), 3);
    assert!(paths.log_dir.join("plots/edge_points_final.png").exists());
    assert!(paths.log_dir.join("plots/contact_points_00050.png").exists());

    let graph = ctx.freeze().unwrap();
    assert_eq!(ctx.state(), TrainingState::Frozen);
    assert!(matches!(
        ctx.train_contact_points(&data),
        Err(Error::InvalidState { .. })
    ));

    let loaded = FrozenGraph::load(&paths.frozen_model).unwrap();
    assert_eq!(loaded, graph);
    let frozen = loaded.run(&data.test.terrain, OUTPUT_NAME).unwrap();
    for (a, b) in frozen.as_slice().iter().zip(pred.ct_pts.as_slice()) {
        assert!((a - b).abs() <= 1e-5, "frozen {a} vs live {b}");
    }

    // A new context picks the checkpoint up and renders the prediction plots.
    let later = RunPaths::with_timestamp(&cfg, "02_01_00_00".to_owned());
    let mut restored = ModelContext::new(cfg.clone(), later.clone()).unwrap();
    let plots = restored
        .restore_and_predict(&paths.checkpoint, &data.test)
        .unwrap();
    assert_eq!(plots.len(), cfg.prediction_plots);
    assert!(plots.iter().all(|p| p.exists()));
    assert_eq!(restored.state(), TrainingState::Stage2Training);

    let again = restored.predict_full_stages(&data.test.terrain).unwrap();
    assert_eq!(again.ct_pts, pred.ct_pts);
}

#[test]
fn training_twice_from_the_same_seed_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let data_file = dir.path().join("ramp.mat");
    let width = 3 * PATCH_LEN;
    let values: Vec<f64> = (0..10 * width)
        .map(|i| ((i as f64) * 0.013).sin().abs())
        .collect();
    write_mat(&data_file, "data", 10, width, &values);

    let mut cfg = config(dir.path(), &data_file);
    cfg.contact_phase.epochs = 5;
    let data = load(&cfg);

    let run = |ts: &str| {
        let paths = RunPaths::with_timestamp(&cfg, ts.to_owned());
        let mut ctx = ModelContext::new(cfg.clone(), paths).unwrap();
        ctx.initialize().unwrap();
        ctx.train_edge_points(&data).unwrap();
        ctx.train_contact_points(&data).unwrap();
        ctx.predict_full_stages(&data.test.terrain).unwrap()
    };
    let a = run("a");
    let b = run("b");
    assert_eq!(a.edge_pts, b.edge_pts);
    assert_eq!(a.ct_pts, b.ct_pts);
}
