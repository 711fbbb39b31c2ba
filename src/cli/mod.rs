// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction; parses arguments with
// clap and delegates to Layer 2 (application).
//
//   1. `train` — trains a model and writes a checkpoint directory
//   2. `infer` — restores a checkpoint and predicts answer spans
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, InferArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "rc-qanet",
    version = "0.1.0",
    about = "Train a QANet-style reading-comprehension model and predict answer spans."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case. Routing only.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::Infer(args) => run_infer(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::{load_hyperparams, TrainUseCase};

    tracing::info!("Starting training on samples in: {}", args.data.display());
    let params = load_hyperparams(args.config.as_deref())?;
    TrainUseCase::new(params, args.data, args.validation, args.checkpoint_dir.clone())
        .with_embeddings(args.embeddings)
        .execute()?;

    println!("Training complete. Checkpoints in '{}'.", args.checkpoint_dir.display());
    Ok(())
}

fn run_infer(args: InferArgs) -> Result<()> {
    use crate::application::infer_use_case::InferUseCase;

    let use_case = InferUseCase::new(&args.checkpoint_dir, args.restore_mode)?;
    let predictions = use_case.execute(&args.data, Some(&args.output))?;

    let answered = predictions.iter().filter(|p| p.span.is_some()).count();
    println!(
        "Answered {}/{} samples. Predictions written to '{}'.",
        answered,
        predictions.len(),
        args.output.display()
    );
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::options::SaveMode;

    #[test]
    fn test_infer_defaults() {
        let cli = Cli::try_parse_from(["rc-qanet", "infer", "--data", "dev.jsonl"]).unwrap();
        let Commands::Infer(args) = cli.command else { panic!("expected infer") };
        assert_eq!(args.restore_mode, SaveMode::Epoch);
        assert_eq!(args.output, std::path::PathBuf::from("predictions.json"));
    }

    #[test]
    fn test_train_requires_data() {
        assert!(Cli::try_parse_from(["rc-qanet", "train"]).is_err());
    }

    #[test]
    fn test_train_accepts_embeddings() {
        let cli = Cli::try_parse_from(["rc-qanet", "train", "--data", "t.jsonl", "--embeddings", "glove.txt"]).unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        assert_eq!(args.embeddings, Some(std::path::PathBuf::from("glove.txt")));
    }
}
