// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a training run in order:
//
//   Step 1: Validate hyper-parameters          (Layer 2)
//           and load pretrained word vectors   (Layer 4 - data)
//   Step 2: Load pre-tokenised samples         (Layer 4 - data)
//   Step 3: Split train/validation             (Layer 4 - data)
//   Step 4: Save hyper-parameters              (Layer 6 - infra)
//   Step 5: Run training loop                  (Layer 5 - ml)
//
// A separate validation file replaces the split in step 3.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;

use crate::application::hyperparams::HyperParams;
use crate::data::{
    dataset::RcDataset,
    embeddings::{load_embedding_table, EmbeddingTable},
    loader::JsonlLoader,
    splitter::split_train_val,
};
use crate::domain::{error::EmbeddingError, traits::SampleSource};
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger};
use crate::ml::trainer::{run_training, MyBackend};

/// Read a hyper-parameter file; `None` means all defaults.
pub fn load_hyperparams(path: Option<&Path>) -> Result<HyperParams> {
    let Some(path) = path else {
        tracing::info!("No hyper-parameter file given; using defaults");
        return Ok(HyperParams::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read hyper-parameters from '{}'", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Malformed hyper-parameters in '{}'", path.display()))
}

pub struct TrainUseCase {
    params:         HyperParams,
    data:           PathBuf,
    validation:     Option<PathBuf>,
    checkpoint_dir: PathBuf,
    embeddings:     Option<PathBuf>,
}

impl TrainUseCase {
    pub fn new(params: HyperParams, data: PathBuf, validation: Option<PathBuf>, checkpoint_dir: PathBuf) -> Self {
        Self { params, data, validation, checkpoint_dir, embeddings: None }
    }

    /// Word vectors for the pretrained slot, one row per vocabulary id.
    pub fn with_embeddings(mut self, path: Option<PathBuf>) -> Self {
        self.embeddings = path;
        self
    }

    fn load_embeddings(&self) -> Result<Option<EmbeddingTable>> {
        let word = &self.params.model.representation.word;
        let Some(path) = &self.embeddings else {
            if word.enable && word.pretrained && !word.trainable {
                return Err(EmbeddingError::NotLoaded.into());
            }
            return Ok(None);
        };
        if !(word.enable && word.pretrained) {
            return Err(EmbeddingError::NotPretrained.into());
        }
        load_embedding_table(path, self.params.data.word_vocab_size, word.embed_dim).map(Some)
    }

    /// Train on the default WGPU device.
    pub fn execute(&self) -> Result<()> {
        let device = burn::backend::wgpu::WgpuDevice::default();
        tracing::info!("Using WGPU device: {:?}", device);
        self.execute_on::<MyBackend>(device)
    }

    pub fn execute_on<B: AutodiffBackend>(&self, device: B::Device) -> Result<()> {
        let params = &self.params;

        // ── Step 1: Validate before touching any data ─────────────────────────
        params.validate().context("Invalid hyper-parameters")?;
        let config = params.to_training_config()?;
        let embedding = self.load_embeddings()?;

        // ── Step 2: Load samples ──────────────────────────────────────────────
        let vocab   = Some(params.vocab_sizes());
        let samples = JsonlLoader::new(&self.data).with_vocab(vocab).load_all()?;
        anyhow::ensure!(!samples.is_empty(), "No usable samples in '{}'", self.data.display());

        // ── Step 3: Train / validation split ──────────────────────────────────
        let (train_samples, val_samples) = match &self.validation {
            Some(path) => (samples, JsonlLoader::new(path).with_vocab(vocab).load_all()?),
            None => split_train_val(samples, params.data.train_fraction, params.train.random_seed),
        };
        tracing::info!("Split: {} train, {} validation", train_samples.len(), val_samples.len());

        let train_dataset = RcDataset::new(train_samples);
        let val_dataset   = RcDataset::new(val_samples);

        // ── Step 4: Save hyper-parameters for inference ───────────────────────
        let checkpoints = CheckpointManager::new(&self.checkpoint_dir, params.train.keep_epochs)?;
        checkpoints.save_hyperparams(params)?;
        let metrics = MetricsLogger::new(&self.checkpoint_dir)?;

        // ── Step 5: Run training loop (Layer 5) ───────────────────────────────
        run_training::<B>(
            config,
            params.batch_limits(),
            &train_dataset,
            &val_dataset,
            &checkpoints,
            &metrics,
            embedding,
            device,
        )?;
        Ok(())
    }
}
