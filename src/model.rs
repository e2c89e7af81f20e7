//! The two-stage contact-point network.
//!
//! ```text
//! X (100) ─▶ W1..W4, relu ─▶ edge points (100) ─┐
//!  └──────────────────────────────────────────────┴─▶ concat (200) ─▶ W5..W8, sigmoid ─▶ myypred (100)
//! ```
//!
//! Stage 2 always consumes stage 1's live output, never a frozen copy.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::PATCH_LEN;
use crate::stage::{BatchScratch, Stage, StageId};
use crate::{Activation, Error, Layer, Result, Rows};

/// Name of the terrain input placeholder.
pub const INPUT_NAME: &str = "X";
/// Name of the final contact-point prediction.
pub const OUTPUT_NAME: &str = "myypred";

const EDGE_LAYERS: [(&str, usize, usize); 4] = [
    ("wdense1", PATCH_LEN, PATCH_LEN),
    ("wdense2", PATCH_LEN, PATCH_LEN),
    ("wdense3", PATCH_LEN, PATCH_LEN),
    ("wdense4", PATCH_LEN, PATCH_LEN),
];

const CONTACT_LAYERS: [(&str, usize, usize); 4] = [
    ("wdense5", 2 * PATCH_LEN, PATCH_LEN),
    ("wdense6", PATCH_LEN, 2 * PATCH_LEN),
    ("wdense7", 2 * PATCH_LEN, 2 * PATCH_LEN),
    ("wdense8", 2 * PATCH_LEN, PATCH_LEN),
];

#[derive(Debug, Clone)]
pub struct TwoStageModel {
    edge: Stage,
    contact: Stage,
}

/// Reusable buffers for a full two-stage forward pass.
#[derive(Debug, Clone, Default)]
pub struct ModelScratch {
    pub(crate) edge: BatchScratch,
    pub(crate) joint: Vec<f32>,
    pub(crate) contact: BatchScratch,
}

impl ModelScratch {
    /// Stage-1 activations of the last pass.
    #[inline]
    pub fn edge(&self) -> &BatchScratch {
        &self.edge
    }

    /// Stage-2 input (`edge points ++ terrain` per row) of the last full pass.
    #[inline]
    pub fn joint(&self) -> &[f32] {
        &self.joint
    }

    /// Stage-2 activations of the last full pass.
    #[inline]
    pub fn contact(&self) -> &BatchScratch {
        &self.contact
    }
}

impl TwoStageModel {
    pub fn new_with_seed(seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::new_with_rng(&mut rng)
    }

    pub fn new_with_rng<R: Rng + ?Sized>(rng: &mut R) -> Result<Self> {
        let edge = Stage::new_with_rng(StageId::EdgePoints, &EDGE_LAYERS, Activation::ReLU, rng)?;
        let contact = Stage::new_with_rng(
            StageId::ContactPoints,
            &CONTACT_LAYERS,
            Activation::Sigmoid,
            rng,
        )?;
        Self::from_stages(edge, contact)
    }

    /// Assemble a model, checking that stage 2 accepts `edge output ++ terrain`.
    pub fn from_stages(edge: Stage, contact: Stage) -> Result<Self> {
        if edge.id() != StageId::EdgePoints || contact.id() != StageId::ContactPoints {
            return Err(Error::InvalidConfig(format!(
                "stages passed in the wrong order: {} then {}",
                edge.id(),
                contact.id()
            )));
        }
        if contact.input_dim() != edge.output_dim() + edge.input_dim() {
            return Err(Error::InvalidShape(format!(
                "contact stage input_dim {} does not match edge output {} + terrain {}",
                contact.input_dim(),
                edge.output_dim(),
                edge.input_dim()
            )));
        }
        Ok(Self { edge, contact })
    }

    /// Declared `(name, in_dim, out_dim)` of every weight matrix, in graph order.
    pub fn declared_variables() -> impl Iterator<Item = (&'static str, usize, usize)> {
        EDGE_LAYERS.into_iter().chain(CONTACT_LAYERS)
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.edge.input_dim()
    }

    #[inline]
    pub fn output_dim(&self) -> usize {
        self.contact.output_dim()
    }

    #[inline]
    pub fn stage(&self, id: StageId) -> &Stage {
        match id {
            StageId::EdgePoints => &self.edge,
            StageId::ContactPoints => &self.contact,
        }
    }

    #[inline]
    pub fn stage_mut(&mut self, id: StageId) -> &mut Stage {
        match id {
            StageId::EdgePoints => &mut self.edge,
            StageId::ContactPoints => &mut self.contact,
        }
    }

    /// All eight weight layers, stage 1 first.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.edge.layers().iter().chain(self.contact.layers())
    }

    /// Look up a weight layer by variable name (`wdense1`..`wdense8`).
    pub fn layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.layers().find(|l| l.name() == name)
    }

    /// Stage-1 forward pass. Returns `(batch, 100)` predicted edge points.
    pub fn forward_edge_points<'a>(
        &self,
        batch: usize,
        terrain: &[f32],
        scratch: &'a mut ModelScratch,
    ) -> &'a [f32] {
        self.edge.forward_batch(batch, terrain, &mut scratch.edge)
    }

    /// Full forward pass. Returns `(batch, 100)` predicted contact points; the
    /// stage-1 prediction stays available in `scratch`.
    pub fn forward_contact_points<'a>(
        &self,
        batch: usize,
        terrain: &[f32],
        scratch: &'a mut ModelScratch,
    ) -> &'a [f32] {
        let edge = self.edge.forward_batch(batch, terrain, &mut scratch.edge);
        concat_rows(
            batch,
            edge,
            self.edge.output_dim(),
            terrain,
            self.edge.input_dim(),
            &mut scratch.joint,
        );
        self.contact
            .forward_batch(batch, &scratch.joint, &mut scratch.contact)
    }

    /// Predicted edge points for every terrain row.
    pub fn predict_edge_points(&self, terrain: &Rows) -> Result<Rows> {
        self.check_terrain(terrain)?;
        let mut scratch = ModelScratch::default();
        let out = self.forward_edge_points(terrain.len(), terrain.as_slice(), &mut scratch);
        Rows::from_flat(out.to_vec(), self.edge.output_dim())
    }

    /// Predicted contact points for every terrain row.
    pub fn predict_contact_points(&self, terrain: &Rows) -> Result<Rows> {
        self.check_terrain(terrain)?;
        let mut scratch = ModelScratch::default();
        let out = self.forward_contact_points(terrain.len(), terrain.as_slice(), &mut scratch);
        Rows::from_flat(out.to_vec(), self.output_dim())
    }

    fn check_terrain(&self, terrain: &Rows) -> Result<()> {
        if terrain.is_empty() {
            return Err(Error::InvalidData("terrain must not be empty".to_owned()));
        }
        if terrain.row_len() != self.input_dim() {
            return Err(Error::InvalidShape(format!(
                "terrain row_len {} does not match model input_dim {}",
                terrain.row_len(),
                self.input_dim()
            )));
        }
        Ok(())
    }
}

/// Row-wise concatenation `out[i] = a[i] ++ b[i]`.
pub(crate) fn concat_rows(
    batch: usize,
    a: &[f32],
    a_dim: usize,
    b: &[f32],
    b_dim: usize,
    out: &mut Vec<f32>,
) {
    assert_eq!(a.len(), batch * a_dim);
    assert_eq!(b.len(), batch * b_dim);
    out.clear();
    for i in 0..batch {
        out.extend_from_slice(&a[i * a_dim..(i + 1) * a_dim]);
        out.extend_from_slice(&b[i * b_dim..(i + 1) * b_dim]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_shapes_match_the_graph() {
        let model = TwoStageModel::new_with_seed(0).unwrap();
        let shapes: Vec<_> = model
            .layers()
            .map(|l| (l.name().to_owned(), l.in_dim(), l.out_dim()))
            .collect();
        let declared: Vec<_> = TwoStageModel::declared_variables()
            .map(|(n, i, o)| (n.to_owned(), i, o))
            .collect();
        assert_eq!(shapes, declared);
        assert_eq!(shapes.len(), 8);
        assert_eq!(model.input_dim(), 100);
        assert_eq!(model.output_dim(), 100);
        assert_eq!(model.layer_by_name("wdense5").unwrap().in_dim(), 200);
    }

    #[test]
    fn concat_interleaves_rows() {
        let mut out = Vec::new();
        concat_rows(2, &[1.0, 2.0], 1, &[3.0, 4.0, 5.0, 6.0], 2, &mut out);
        assert_eq!(out, vec![1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);
    }

    #[test]
    fn zero_terrain_reaches_stage_two_as_sigmoid_midpoint() {
        let model = TwoStageModel::new_with_seed(5).unwrap();
        let terrain = Rows::from_flat(vec![0.0; 3 * PATCH_LEN], PATCH_LEN).unwrap();

        let edge = model.predict_edge_points(&terrain).unwrap();
        assert!(edge.as_slice().iter().all(|&v| v == 0.0));

        let mut scratch = ModelScratch::default();
        model.forward_contact_points(3, terrain.as_slice(), &mut scratch);
        assert!(scratch.joint.iter().all(|&v| v == 0.0));
        // No biases: the first sigmoid layer sees z = 0 everywhere.
        assert!(
            scratch
                .contact
                .layer_output(0)
                .iter()
                .all(|&v| (v - 0.5).abs() < 1e-6)
        );

        let contact = model.predict_contact_points(&terrain).unwrap();
        assert_eq!(contact.len(), 3);
        assert_eq!(contact.row(0), contact.row(2));
    }

    #[test]
    fn predictions_are_independent_of_batching() {
        let model = TwoStageModel::new_with_seed(9).unwrap();
        let values: Vec<f32> = (0..2 * PATCH_LEN).map(|i| (i as f32 * 0.37).sin()).collect();
        let both = Rows::from_flat(values.clone(), PATCH_LEN).unwrap();
        let first = Rows::from_flat(values[..PATCH_LEN].to_vec(), PATCH_LEN).unwrap();

        let a = model.predict_contact_points(&both).unwrap();
        let b = model.predict_contact_points(&first).unwrap();
        for (x, y) in a.row(0).iter().zip(b.row(0)) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn rejects_wrong_terrain_width() {
        let model = TwoStageModel::new_with_seed(0).unwrap();
        let terrain = Rows::from_flat(vec![0.0; 50], 50).unwrap();
        assert!(matches!(
            model.predict_contact_points(&terrain),
            Err(Error::InvalidShape(_))
        ));
    }
}
