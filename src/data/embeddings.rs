// ============================================================
// Layer 4 — Pretrained Embedding Loader
// ============================================================
// Reads a word-vector table in vocabulary id order, one row per
// line, values separated by whitespace:
//
//   0.0 0.0 0.0 ...        ← id 0 (padding)
//   the 0.418 0.24968 ...  ← id 1; a leading word is allowed
//
// The table must hold exactly one row per vocabulary id, each with
// `dim` values. Anything else is an error naming the line.

use anyhow::{bail, Context, Result};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

/// A dense `[rows, dim]` table, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingTable {
    pub rows:   usize,
    pub dim:    usize,
    pub values: Vec<f32>,
}

pub fn load_embedding_table(path: &Path, rows: usize, dim: usize) -> Result<EmbeddingTable> {
    let file = File::open(path)
        .with_context(|| format!("Cannot open embedding file '{}'", path.display()))?;

    let mut values = Vec::with_capacity(rows * dim);
    let mut seen = 0usize;

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Cannot read line {} of '{}'", line_no + 1, path.display()))?;
        if line.trim().is_empty() {
            continue;
        }

        let mut fields = line.split_whitespace().peekable();
        if fields.peek().is_some_and(|f| f.parse::<f32>().is_err()) {
            fields.next();
        }
        let row = fields
            .map(str::parse::<f32>)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Non-numeric value on line {} of '{}'", line_no + 1, path.display()))?;
        if row.len() != dim {
            bail!("Line {} of '{}' has {} values, expected {}", line_no + 1, path.display(), row.len(), dim);
        }

        seen += 1;
        if seen > rows {
            bail!("'{}' has more than {} rows", path.display(), rows);
        }
        values.extend(row);
    }

    if seen != rows {
        bail!("'{}' has {} rows, expected one per vocabulary id ({})", path.display(), seen, rows);
    }
    tracing::info!("Loaded {}×{} embedding table from '{}'", rows, dim, path.display());
    Ok(EmbeddingTable { rows, dim, values })
}
