//! Checkpoint save/restore.
//!
//! A checkpoint is a full-state snapshot of all eight weight matrices, written as
//! versioned JSON. Internal `Layer`/`Stage` structs are not serialized directly so
//! the on-disk format stays stable if their representation changes.
//!
//! Restoring validates every recorded variable against the live model's declared
//! variables: a missing variable, an unknown one or a shape mismatch fails the
//! restore and leaves the live model untouched.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::stage::StageId;
use crate::{Error, Layer, Result, TwoStageModel};

pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub variables: Vec<SavedVariable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedVariable {
    pub name: String,
    /// `[in_dim, out_dim]`, the shape of the matrix in `x W` form.
    pub shape: [usize; 2],
    /// Row-major in `shape` order: `values[i * out_dim + o]` is the weight from
    /// input `i` to output `o`.
    pub values: Vec<f32>,
}

impl From<&TwoStageModel> for Checkpoint {
    fn from(model: &TwoStageModel) -> Self {
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            variables: model.layers().map(SavedVariable::from).collect(),
        }
    }
}

impl From<&Layer> for SavedVariable {
    fn from(layer: &Layer) -> Self {
        Self {
            name: layer.name().to_owned(),
            shape: [layer.in_dim(), layer.out_dim()],
            values: transpose(layer.weights(), layer.out_dim(), layer.in_dim()),
        }
    }
}

/// Transpose a row-major `(rows, cols)` matrix.
fn transpose(values: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut out = vec![0.0; values.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = values[r * cols + c];
        }
    }
    out
}

impl Checkpoint {
    pub fn validate(&self) -> Result<()> {
        if self.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported checkpoint format_version {}; expected {}",
                self.format_version, CHECKPOINT_FORMAT_VERSION
            )));
        }

        let declared: Vec<_> = TwoStageModel::declared_variables().collect();
        if self.variables.len() != declared.len() {
            return Err(Error::InvalidData(format!(
                "checkpoint holds {} variables, model declares {}",
                self.variables.len(),
                declared.len()
            )));
        }

        for (name, in_dim, out_dim) in declared {
            let var = self
                .variables
                .iter()
                .find(|v| v.name == name)
                .ok_or_else(|| Error::InvalidData(format!("variable {name} missing")))?;
            if var.shape != [in_dim, out_dim] {
                return Err(Error::InvalidShape(format!(
                    "variable {name} has shape {:?} in checkpoint, model declares [{in_dim}, {out_dim}]",
                    var.shape
                )));
            }
            if var.values.len() != in_dim * out_dim {
                return Err(Error::InvalidShape(format!(
                    "variable {name} holds {} values, shape needs {}",
                    var.values.len(),
                    in_dim * out_dim
                )));
            }
            if var.values.iter().any(|v| !v.is_finite()) {
                return Err(Error::InvalidData(format!(
                    "variable {name} must contain only finite values"
                )));
            }
        }
        Ok(())
    }

    /// Copy every variable into `model`.
    pub fn restore_into(&self, model: &mut TwoStageModel) -> Result<()> {
        self.validate()?;
        for id in [StageId::EdgePoints, StageId::ContactPoints] {
            let stage = model.stage_mut(id);
            for idx in 0..stage.num_layers() {
                let Some(layer) = stage.layer_mut(idx) else {
                    continue;
                };
                let var = self
                    .variables
                    .iter()
                    .find(|v| v.name == layer.name())
                    .ok_or_else(|| {
                        Error::InvalidData(format!("variable {} missing", layer.name()))
                    })?;
                let [in_dim, out_dim] = var.shape;
                layer
                    .weights_mut()
                    .copy_from_slice(&transpose(&var.values, in_dim, out_dim));
            }
        }
        Ok(())
    }
}

/// Save every model variable to `path`, creating parent directories.
pub fn save<P: AsRef<Path>>(model: &TwoStageModel, path: P) -> Result<()> {
    let p = path.as_ref();
    if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let json = serde_json::to_string(&Checkpoint::from(model))?;
    std::fs::write(p, json).map_err(|e| Error::io(p, e))?;
    info!(path = %p.display(), "model saved");
    Ok(())
}

/// Restore every model variable from `path`.
pub fn restore<P: AsRef<Path>>(model: &mut TwoStageModel, path: P) -> Result<()> {
    let p = path.as_ref();
    let s = std::fs::read_to_string(p).map_err(|e| Error::io(p, e))?;
    let ckpt: Checkpoint = serde_json::from_str(&s)?;
    ckpt.restore_into(model)?;
    info!(path = %p.display(), "model restored");
    Ok(())
}
