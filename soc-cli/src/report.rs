//! JSON summary of a walkthrough run.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub order: usize,
    pub blocks: usize,
    pub ranks: usize,
    pub cutoff: usize,
    pub seed: u64,

    pub non_positive_s: usize,
    pub non_positive_z: usize,
    /// det(s) per block
    pub dets_s: Vec<f64>,
    /// det(z) per block
    pub dets_z: Vec<f64>,

    /// max |sqrt(x) o sqrt(x) - x| over s and z
    pub sqrt_residual: f64,
    /// max |inv(x) o x - e| over s and z
    pub inverse_residual: f64,
    /// max |Q_sqrt(w) s - Q_inv(sqrt(w)) z|
    pub nesterov_todd_residual: f64,

    pub upper_bound: f64,
    pub max_step: f64,
    /// det(s + alpha z) per block
    pub dets_at_step: Vec<f64>,
}

impl Report {
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("writing report to {}", path.display()))
    }
}

/// Largest absolute entrywise difference.
pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}
