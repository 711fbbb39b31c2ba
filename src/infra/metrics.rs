// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Appends one CSV row per training epoch:
//
//   epoch,step,train_loss,val_loss,exact_match,f1,learning_rate
//   1,120,9.412300,8.997100,0.031000,0.102400,0.000842
//   2,240,7.880500,7.912600,0.074000,0.183100,0.001000
//
// exact_match and f1 are averaged over validation samples that
// carry a gold span, using spans decoded from the model output.
// The file is appended to across runs that share a directory.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const HEADER: &str = "epoch,step,train_loss,val_loss,exact_match,f1,learning_rate";

/// One row of metrics for a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Epoch number (starts at 1)
    pub epoch: usize,
    /// Global optimizer steps taken so far
    pub step: usize,

    pub train_loss: f64,
    pub val_loss:   f64,

    /// Fraction of decoded spans matching the gold span exactly
    pub exact_match: f64,
    /// Mean token-overlap F1 of decoded spans
    pub f1: f64,

    /// Learning rate used by the last step of the epoch
    pub learning_rate: f64,
}

impl EpochMetrics {
    /// True if this epoch beats the best F1 seen so far.
    pub fn is_improvement(&self, best_f1: f64) -> bool {
        self.f1 > best_f1
    }
}

/// Logs epoch metrics to `<dir>/metrics.csv`.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}' for appending", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{},{:.6},{:.6},{:.6},{:.6},{:.6}",
            m.epoch, m.step, m.train_loss, m.val_loss, m.exact_match, m.f1, m.learning_rate,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}, em={:.3}, f1={:.3}",
            m.epoch,
            m.train_loss,
            m.val_loss,
            m.exact_match,
            m.f1,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
