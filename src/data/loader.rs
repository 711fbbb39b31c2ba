// ============================================================
// Layer 4 — Sample Loader
// ============================================================
// Reads pre-tokenised samples, one JSON object per line:
//
//   {"id":"q1","question_word":[5,9],"question_subword":[[5],[9]], ...}
//
// Lines that fail to parse or validate are logged and skipped, as
// are lines holding ids outside the model's vocabularies when those
// are known. A missing or unreadable file is an error.
//
// Reference: Rust Book §9 (Error Handling)
//            serde_json documentation

use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::PathBuf,
};

use crate::domain::sample::{RcSample, VocabSizes};
use crate::domain::traits::SampleSource;

/// Loads `RcSample`s from a JSON-lines file.
pub struct JsonlLoader {
    path:  PathBuf,
    vocab: Option<VocabSizes>,
}

impl JsonlLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), vocab: None }
    }

    pub fn with_vocab(mut self, vocab: Option<VocabSizes>) -> Self {
        self.vocab = vocab;
        self
    }
}

impl SampleSource for JsonlLoader {
    fn load_all(&self) -> Result<Vec<RcSample>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Cannot open sample file '{}'", self.path.display()))?;

        let mut samples = Vec::new();
        let mut skipped = 0usize;

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line
                .with_context(|| format!("Cannot read line {} of '{}'", line_no + 1, self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }

            let sample = match serde_json::from_str::<RcSample>(&line) {
                Ok(sample) => sample,
                Err(e) => {
                    tracing::warn!("Skipping line {}: {}", line_no + 1, e);
                    skipped += 1;
                    continue;
                }
            };

            let checked = sample
                .validate()
                .and_then(|()| self.vocab.as_ref().map_or(Ok(()), |v| sample.check_vocab(v)));
            if let Err(e) = checked {
                tracing::warn!("Skipping line {}: {}", line_no + 1, e);
                skipped += 1;
                continue;
            }
            samples.push(sample);
        }

        tracing::info!(
            "Loaded {} samples from '{}' ({} skipped)",
            samples.len(),
            self.path.display(),
            skipped
        );
        Ok(samples)
    }
}
