// ============================================================
// Layer 3 — Domain Errors
// ============================================================
// Configuration problems are fatal and raised eagerly, before any
// tensor is created. Nothing here falls back to a default variant.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid hyper-parameters or layer options.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unit dim {unit_dim} and # head {num_heads} mis-match")]
    HeadMismatch { unit_dim: usize, num_heads: usize },

    #[error("unsupported {kind} type '{tag}'")]
    UnsupportedTag { kind: &'static str, tag: String },

    #[error("{name} must lie in [0, 1], got {value}")]
    InvalidRate { name: &'static str, value: f64 },

    #[error("convolution window {0} must be odd to keep 'same' padding")]
    EvenWindow(usize),

    #[error("maximum span length must be at least 1")]
    ZeroSpanLimit,

    #[error("trilinear scoring needs equal widths, got context {context} and question {question}")]
    TrilinearWidth { context: usize, question: usize },

    #[error("{name} must be positive")]
    ZeroDimension { name: &'static str },

    #[error("at least one of word, subword or char features must be enabled")]
    NoFeatures,

    #[error("{name} must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("{stage} expects input width {expected}, but the previous layer produces {actual}")]
    WidthMismatch { stage: &'static str, expected: usize, actual: usize },
}

impl ConfigError {
    /// Check a probability-like value.
    pub fn check_rate(name: &'static str, value: f64) -> Result<(), ConfigError> {
        if (0.0..=1.0).contains(&value) {
            Ok(())
        } else {
            Err(ConfigError::InvalidRate { name, value })
        }
    }

    /// Check a width / count that has to be non-zero.
    pub fn check_positive(name: &'static str, value: usize) -> Result<(), ConfigError> {
        if value == 0 {
            Err(ConfigError::ZeroDimension { name })
        } else {
            Ok(())
        }
    }
}

/// Restoring a checkpoint that was explicitly requested but is missing.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("latest {mode} checkpoint file doesn't exist in '{}'", dir.display())]
    NotFound { mode: String, dir: PathBuf },
}

/// Misuse of the write-once pretrained embedding slot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingError {
    #[error("word featurizer was not configured with a pretrained embedding slot")]
    NotPretrained,

    #[error("pretrained embedding has already been loaded")]
    AlreadyLoaded,

    #[error("pretrained embedding shape {actual:?} does not match [vocab, dim] = {expected:?}")]
    ShapeMismatch { expected: [usize; 2], actual: [usize; 2] },

    #[error("word embedding is pretrained and frozen but no vectors were loaded; pass --embeddings or make it trainable")]
    NotLoaded,
}

/// A sample whose token granularities or answer do not line up.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    #[error("sample '{id}': {side} has {words} words but {subtokens} {granularity} groups")]
    Misaligned {
        id: String,
        side: &'static str,
        granularity: &'static str,
        words: usize,
        subtokens: usize,
    },

    #[error("sample '{id}': answer [{start}, {end}] is outside a context of {len} words")]
    AnswerOutOfRange { id: String, start: usize, end: usize, len: usize },

    #[error("sample '{id}': empty {side}")]
    Empty { id: String, side: &'static str },

    #[error("sample '{id}': answer {boundary} at context word {position} is a padding id")]
    AnswerOnPadding { id: String, boundary: &'static str, position: usize },

    #[error("sample '{id}': {side} {granularity} id {token} is outside a vocabulary of {vocab_size}")]
    OutOfVocabulary {
        id: String,
        side: &'static str,
        granularity: &'static str,
        token: u32,
        vocab_size: usize,
    },
}
