// ============================================================
// Layer 2 — InferUseCase
// ============================================================
//   Step 1: Rebuild model from hyperparams.json
//           and restore its weights             (Layer 5 + 6)
//   Step 2: Load pre-tokenised samples        (Layer 4 - data)
//   Step 3: Predict spans                     (Layer 5 - ml)
//   Step 4: Write predictions.json            (this layer)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::prelude::Backend;
use serde::Serialize;

use crate::application::hyperparams::HyperParams;
use crate::data::loader::JsonlLoader;
use crate::domain::{
    options::SaveMode,
    sample::VocabSizes,
    span::Prediction,
    traits::{SampleSource, SpanPredictor},
};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::inferencer::{InferBackend, Inferencer};

/// Shape of predictions.json
#[derive(Debug, Serialize)]
struct PredictionFile<'a> {
    checkpoint:  String,
    predictions: &'a [Prediction],
}

pub struct InferUseCase {
    predictor: Box<dyn SpanPredictor>,
    mode:      SaveMode,
    vocab:     Option<VocabSizes>,
}

impl InferUseCase {
    /// Restore the latest `mode` checkpoint under `checkpoint_dir`.
    pub fn new(checkpoint_dir: &Path, mode: SaveMode) -> Result<Self> {
        let device = burn::backend::wgpu::WgpuDevice::default();
        Self::restore_on::<InferBackend>(checkpoint_dir, mode, device)
    }

    /// Rebuild the model from `hyperparams.json` and load the latest
    /// `mode` checkpoint into it.
    pub fn restore_on<B: Backend + 'static>(checkpoint_dir: &Path, mode: SaveMode, device: B::Device) -> Result<Self> {
        let checkpoints = CheckpointManager::new(checkpoint_dir, 1)?;
        let params: HyperParams = checkpoints.load_hyperparams()?;
        let config  = params.to_model_config()?;
        let decoder = params.span_decoder()?;

        let model = config.init::<B>(&device)?;
        let model = checkpoints.restore(model, mode, &device)?;
        tracing::info!("Model loaded from {} checkpoint", mode);

        let inferencer = Inferencer::new(model, decoder, params.batch_limits(), params.train.batch_size, device);
        Ok(Self::with_predictor(Box::new(inferencer), mode).with_vocab(Some(params.vocab_sizes())))
    }

    pub fn with_predictor(predictor: Box<dyn SpanPredictor>, mode: SaveMode) -> Self {
        Self { predictor, mode, vocab: None }
    }

    /// Skip input lines whose ids fall outside these vocabularies.
    pub fn with_vocab(mut self, vocab: Option<VocabSizes>) -> Self {
        self.vocab = vocab;
        self
    }

    /// Predict every sample in `data`; write the result to `output`
    /// when given. Returns the predictions in input order.
    pub fn execute(&self, data: &Path, output: Option<&PathBuf>) -> Result<Vec<Prediction>> {
        let samples = JsonlLoader::new(data).with_vocab(self.vocab).load_all()?;
        tracing::info!("Predicting {} samples", samples.len());
        let predictions = self.predictor.predict(&samples)?;

        if let Some(path) = output {
            let file = PredictionFile { checkpoint: self.mode.to_string(), predictions: &predictions };
            std::fs::write(path, serde_json::to_string_pretty(&file)?)
                .with_context(|| format!("Cannot write predictions to '{}'", path.display()))?;
            tracing::info!("Wrote {} predictions to '{}'", predictions.len(), path.display());
        }
        Ok(predictions)
    }
}
