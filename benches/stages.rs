use criterion::{Criterion, black_box, criterion_group, criterion_main};

use contact_stages::data::PATCH_LEN;
use contact_stages::{ModelScratch, StageId, TwoStageModel, loss};

const BATCH: usize = 32;

fn contact_forward_bench(c: &mut Criterion) {
    let model = TwoStageModel::new_with_seed(0).unwrap();
    let mut scratch = ModelScratch::default();
    let terrain = vec![0.1_f32; BATCH * PATCH_LEN];

    c.bench_function("contact_points_forward_b32", |b| {
        b.iter(|| {
            let out = model.forward_contact_points(BATCH, black_box(&terrain), &mut scratch);
            black_box(out);
        })
    });
}

fn contact_backward_bench(c: &mut Criterion) {
    let model = TwoStageModel::new_with_seed(0).unwrap();
    let mut scratch = ModelScratch::default();
    let stage = model.stage(StageId::ContactPoints);
    let mut grads = stage.gradients();
    let terrain = vec![0.1_f32; BATCH * PATCH_LEN];
    let target = vec![0.0_f32; BATCH * model.output_dim()];

    let out_dim = model.output_dim();

    c.bench_function("contact_points_forward_backward_b32", |b| {
        b.iter(|| {
            let pred = model.forward_contact_points(BATCH, black_box(&terrain), &mut scratch);
            loss::sum_squared_backward(pred, &target, grads.d_output_mut(BATCH, out_dim));
            stage.backward_batch(black_box(scratch.joint()), scratch.contact(), &mut grads, false);
        })
    });
}

fn edge_forward_bench(c: &mut Criterion) {
    let model = TwoStageModel::new_with_seed(0).unwrap();
    let mut scratch = ModelScratch::default();
    let terrain = vec![0.1_f32; 128 * PATCH_LEN];

    c.bench_function("edge_points_forward_b128", |b| {
        b.iter(|| {
            let out = model.forward_edge_points(128, black_box(&terrain), &mut scratch);
            black_box(out);
        })
    });
}

criterion_group!(
    benches,
    edge_forward_bench,
    contact_forward_bench,
    contact_backward_bench
);
criterion_main!(benches);
