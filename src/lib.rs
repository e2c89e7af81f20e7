//! Two-stage contact-point prediction for a legged robot's foot placement.
//!
//! `contact-stages` learns, from a 10×10 terrain height patch around the foot, which cells
//! touch the sole. Stage 1 predicts the patch's edge points (4 dense ReLU layers); stage 2
//! concatenates the terrain with those predictions and outputs per-cell contact
//! probabilities (4 dense sigmoid layers). The two stages are trained one after another,
//! each with its own Adam state.
//!
//! # Panics vs `Result`
//!
//! - Low-level hot path (panics on misuse):
//!   - [`stage::Stage::forward_batch`], [`stage::Stage::backward_batch`]
//!   - [`model::TwoStageModel::forward_edge_points`]
//!   - [`model::TwoStageModel::forward_contact_points`]
//!     Shape mismatches are programmer error and panic via `assert!`.
//!
//! - Everything that touches data, files or configuration returns [`Result`]:
//!   - [`TwoStageModel::predict_edge_points`], [`TwoStageModel::predict_contact_points`]
//!   - [`train::train_edge_points`], [`train::train_contact_points`]
//!   - [`ModelContext`] transitions, [`checkpoint`] and [`freeze`] I/O.
//!
//! # Data layout and shapes
//!
//! - Scalars are `f32`.
//! - [`Rows`] stores samples contiguously in row-major layout.
//! - Layer weights are row-major with shape `(out_dim, in_dim)`; the layers carry no bias.
//! - A sample row of the dataset is `terrain | edge points | contact points`, split at the
//!   configured class boundaries; each group is reshaped to 100 values.
//!
//! # Quick start
//!
//! ```rust
//! use contact_stages::{Rows, TwoStageModel};
//!
//! # fn main() -> contact_stages::Result<()> {
//! let model = TwoStageModel::new_with_seed(0)?;
//! let terrain = Rows::from_flat(vec![0.0; 2 * 100], 100)?;
//!
//! let edge = model.predict_edge_points(&terrain)?;
//! let contact = model.predict_contact_points(&terrain)?;
//! assert_eq!((edge.len(), edge.row_len()), (2, 100));
//! assert!(contact.as_slice().iter().all(|p| (0.0..=1.0).contains(p)));
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod freeze;
pub mod layer;
pub mod loss;
pub mod mat;
pub(crate) mod matmul;
pub mod model;
pub mod optim;
pub mod plot;
pub mod session;
pub mod stage;
pub mod summary;
pub mod train;

pub use activation::Activation;
pub use config::{PhaseConfig, RunConfig, RunPaths};
pub use data::{Partition, Rows, StageData};
pub use error::{Error, Result};
pub use freeze::FrozenGraph;
pub use layer::Layer;
pub use model::{ModelScratch, TwoStageModel};
pub use optim::{Optimizer, OptimizerState};
pub use session::{FullStagePrediction, ModelContext, TrainingState};
pub use stage::{BatchScratch, Gradients, Stage, StageId};
pub use train::{EpochReport, PhaseReport, ReportKind};
