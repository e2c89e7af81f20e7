//! Scalar summaries for the loss curves.
//!
//! One JSON object per line in `<log_dir>/scalars.jsonl`.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const SCALARS_FILE: &str = "scalars.jsonl";

/// Tag of the edge-point loss curve.
pub const TAG_EDGE_COST: &str = "cost_edge_pts";
/// Tag of the contact-point loss curve.
pub const TAG_CONTACT_COST: &str = "cost_ct_pts";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    /// Seconds since the Unix epoch.
    pub wall_time: f64,
    pub step: usize,
    pub tag: String,
    pub value: f32,
}

#[derive(Debug)]
pub struct SummaryWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl SummaryWriter {
    /// Open (append) the scalars file inside `log_dir`, creating the directory.
    pub fn create<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let dir = log_dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let path = dir.join(SCALARS_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_scalar(&mut self, tag: &str, value: f32, step: usize) -> Result<()> {
        let event = ScalarEvent {
            wall_time: Utc::now().timestamp_millis() as f64 / 1000.0,
            step,
            tag: tag.to_owned(),
            value,
        };
        serde_json::to_writer(&mut self.out, &event)?;
        self.out
            .write_all(b"\n")
            .map_err(|e| Error::io(&self.path, e))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(|e| Error::io(&self.path, e))
    }
}

/// Read back every event of a scalars file.
pub fn read_scalars<P: AsRef<Path>>(path: P) -> Result<Vec<ScalarEvent>> {
    let p = path.as_ref();
    let file = File::open(p).map_err(|e| Error::io(p, e))?;
    let mut events = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::io(p, e))?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    Ok(events)
}
