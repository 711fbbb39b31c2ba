// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Two subcommands: `train` and `infer`.
//
// Model and training options live in the hyper-parameter JSON
// file rather than in flags, so a checkpoint directory always
// carries the exact configuration it was trained with.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::domain::options::SaveMode;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a span-prediction model on pre-tokenised samples
    Train(TrainArgs),

    /// Predict answer spans with a trained checkpoint
    Infer(InferArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Hyper-parameter JSON file; built-in defaults when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// JSON-lines file of labelled samples
    #[arg(long)]
    pub data: PathBuf,

    /// Separate validation file; otherwise `data` is split
    #[arg(long)]
    pub validation: Option<PathBuf>,

    /// Directory for checkpoints, metrics and hyper-parameters
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Pretrained word vectors, one row per vocabulary id
    #[arg(long)]
    pub embeddings: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InferArgs {
    /// Directory written by `train`
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// JSON-lines file of samples to answer
    #[arg(long)]
    pub data: PathBuf,

    /// Which checkpoint to restore: "debug" or "epoch"
    #[arg(long, default_value = "epoch", value_parser = parse_mode)]
    pub restore_mode: SaveMode,

    /// Where to write predictions
    #[arg(long, default_value = "predictions.json")]
    pub output: PathBuf,
}

fn parse_mode(tag: &str) -> Result<SaveMode, String> {
    tag.parse().map_err(|e: crate::domain::error::ConfigError| e.to_string())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_mode_parsing() {
        assert_eq!(parse_mode("debug"), Ok(SaveMode::Debug));
        assert_eq!(parse_mode("epoch"), Ok(SaveMode::Epoch));
        assert_eq!(parse_mode("best").unwrap_err(), "unsupported save/restore mode type 'best'");
    }
}
