// ============================================================
// Layer 5 — Training Loop
// ============================================================
// One optimizer step per batch:
//
//   seed backend RNG with (seed + step)      dropout / layer gates
//   loss = start_loss + end_loss             ml::model
//   grads → Adam(β1 0.8, β2 0.999, ε 1e-7)   + clipping, L2 decay
//   lr    = base × warm-up × decay            ml::schedule
//   EMA shadow ← current parameters           ml::ema (optional)
//
// After every epoch the exported model (EMA weights when enabled)
// is validated on the inner backend: loss, exact match and F1 of
// the decoded spans. Metrics go to metrics.csv, the exported model
// to the epoch checkpoint window. Debug checkpoints are written
// every `debug_every` steps.
//
// Key Burn 0.20 insight:
//   - Training runs on an AutodiffBackend
//   - model.valid() returns the model on B::InnerBackend, with
//     dropout and layer dropout switched off
//   - Validation batches are built directly on the inner backend

use anyhow::Result;
use burn::{
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::{
    batcher::{BatchLimits, RcBatcher},
    dataset::RcDataset,
    embeddings::EmbeddingTable,
};
use crate::domain::{
    options::{LossPolicy, SaveMode},
    sample::RcSample,
    span::SpanDecoder,
};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::{
    ema::Ema,
    model::{QaNet, QaNetConfig},
    schedule::LrScheduleConfig,
};

pub type MyBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model:    QaNetConfig,
    pub schedule: LrScheduleConfig,
    #[config(default = 10)]
    pub num_epochs:   usize,
    #[config(default = 16)]
    pub batch_size:   usize,
    #[config(default = 42)]
    pub seed:         u64,
    #[config(default = 0.8)]
    pub beta_1:       f32,
    #[config(default = 0.999)]
    pub beta_2:       f32,
    #[config(default = 1e-7)]
    pub epsilon:      f32,
    pub clip_norm:    Option<f32>,
    pub weight_decay: Option<f32>,
    pub ema_decay:    Option<f64>,
    #[config(default = "LossPolicy::LogitMask")]
    pub loss:         LossPolicy,
    /// Steps between debug checkpoints; 0 disables them
    #[config(default = 0)]
    pub debug_every:  usize,
    pub max_span_len: Option<usize>,
}

impl TrainingConfig {
    fn optimizer(&self) -> AdamConfig {
        AdamConfig::new()
            .with_beta_1(self.beta_1)
            .with_beta_2(self.beta_2)
            .with_epsilon(self.epsilon)
            .with_grad_clipping(self.clip_norm.map(GradientClippingConfig::Norm))
            .with_weight_decay(self.weight_decay.map(WeightDecayConfig::new))
    }
}

/// Loss and span accuracy over one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Mean batch loss; NaN when there was nothing to evaluate
    pub loss:        f64,
    pub exact_match: f64,
    pub f1:          f64,
    /// Samples with a gold span, the denominator of EM and F1
    pub labelled:    usize,
}

/// Run `model` over `samples` without gradients.
pub fn evaluate<B: Backend>(
    model:      &QaNet<B>,
    samples:    &[RcSample],
    batcher:    &RcBatcher<B>,
    batch_size: usize,
    policy:     LossPolicy,
    decoder:    &SpanDecoder,
) -> Evaluation {
    let mut loss_sum = 0.0f64;
    let mut batches  = 0usize;
    let mut em_sum   = 0.0f64;
    let mut f1_sum   = 0.0f64;
    let mut labelled = 0usize;

    for items in samples.chunks(batch_size.max(1)) {
        let batch = batcher.batch(items);
        let (loss, output) = model.forward_loss(&batch, policy);
        loss_sum += loss.into_scalar().elem::<f64>();
        batches  += 1;

        for (span, gold) in output.decode(decoder).into_iter().zip(&batch.answers) {
            let Some(gold) = gold else { continue };
            labelled += 1;
            if let Some(span) = span {
                em_sum += span.exact_match(*gold);
                f1_sum += span.f1(*gold);
            }
        }
    }

    let ratio = |sum: f64| if labelled > 0 { sum / labelled as f64 } else { 0.0 };
    Evaluation {
        loss:        if batches > 0 { loss_sum / batches as f64 } else { f64::NAN },
        exact_match: ratio(em_sum),
        f1:          ratio(f1_sum),
        labelled,
    }
}

pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfig,
    limits: BatchLimits,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainingConfig, limits: BatchLimits, device: B::Device) -> Self {
        Self { config, limits, device }
    }

    /// The model as it is evaluated and saved: inner backend, EMA
    /// weights when enabled.
    fn export(model: &QaNet<B>, ema: Option<&Ema<B::InnerBackend>>) -> QaNet<B::InnerBackend> {
        let model = model.valid();
        match ema {
            Some(ema) => ema.apply(model),
            None => model,
        }
    }

    /// Train `model` for the configured number of epochs and return it.
    pub fn fit(
        &self,
        model:       QaNet<B>,
        train:       &RcDataset,
        valid:       &RcDataset,
        checkpoints: &CheckpointManager,
        metrics:     &MetricsLogger,
    ) -> Result<QaNet<B>> {
        let cfg = &self.config;
        cfg.schedule.validate()?;
        model.check_pretrained()?;
        let decoder = SpanDecoder::new(cfg.max_span_len)?;
        let mut ema = cfg.ema_decay.map(Ema::<B::InnerBackend>::new).transpose()?;
        let mut optim = cfg.optimizer().init::<B, QaNet<B>>();

        // Labels are never clipped during training.
        let admitted: Vec<RcSample> = train
            .samples()
            .iter()
            .filter(|s| match self.limits.admit(s) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("Not training on {}", e);
                    false
                }
            })
            .cloned()
            .collect();
        if admitted.len() < train.sample_count() {
            tracing::warn!(
                "Dropped {} training samples that are malformed, out of vocabulary or answered beyond the context limit",
                train.sample_count() - admitted.len()
            );
        }
        let train = RcDataset::new(admitted);

        let train_batcher = RcBatcher::<B>::new(self.device.clone(), self.limits);
        let valid_batcher = RcBatcher::<B::InnerBackend>::new(self.device.clone(), self.limits);

        let mut model = model;
        let mut step = 0usize;
        let mut learning_rate = cfg.schedule.learning_rate(0);
        let mut best_f1 = f64::NEG_INFINITY;

        for epoch in 1..=cfg.num_epochs {
            let mut train_loss_sum = 0.0f64;
            let mut train_batches  = 0usize;

            for items in train.batches(cfg.batch_size, Some(cfg.seed + epoch as u64)) {
                B::seed(&self.device, cfg.seed + step as u64);
                let batch = train_batcher.batch(&items);
                let (loss, _) = model.forward_loss(&batch, cfg.loss);

                train_loss_sum += loss.clone().into_scalar().elem::<f64>();
                train_batches  += 1;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                learning_rate = cfg.schedule.learning_rate(step);
                model = optim.step(learning_rate, model, grads);
                step += 1;

                if let Some(ema) = ema.as_mut() {
                    ema.update(&model.valid());
                }
                if cfg.debug_every > 0 && step % cfg.debug_every == 0 {
                    checkpoints.save(&Self::export(&model, ema.as_ref()), SaveMode::Debug, step)?;
                    tracing::debug!("Step {} | loss={:.4} | lr={:.6}", step, train_loss_sum / train_batches as f64, learning_rate);
                }
            }

            let exported = Self::export(&model, ema.as_ref());
            let eval = evaluate(&exported, valid.samples(), &valid_batcher, cfg.batch_size, cfg.loss, &decoder);

            let row = EpochMetrics {
                epoch,
                step,
                train_loss: if train_batches > 0 { train_loss_sum / train_batches as f64 } else { f64::NAN },
                val_loss: eval.loss,
                exact_match: eval.exact_match,
                f1: eval.f1,
                learning_rate,
            };
            metrics.log(&row)?;
            if row.is_improvement(best_f1) {
                best_f1 = row.f1;
            }
            checkpoints.save(&exported, SaveMode::Epoch, epoch)?;

            tracing::info!(
                "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | em={:.1}% | f1={:.1}% | best_f1={:.1}%",
                epoch,
                cfg.num_epochs,
                row.train_loss,
                row.val_loss,
                row.exact_match * 100.0,
                row.f1 * 100.0,
                best_f1 * 100.0,
            );
        }

        tracing::info!("Training complete after {} steps", step);
        Ok(model)
    }
}

/// Build a fresh model from `config`, fill its pretrained word
/// table when one is given, and train it on `device`.
#[allow(clippy::too_many_arguments)]
pub fn run_training<B: AutodiffBackend>(
    config:      TrainingConfig,
    limits:      BatchLimits,
    train:       &RcDataset,
    valid:       &RcDataset,
    checkpoints: &CheckpointManager,
    metrics:     &MetricsLogger,
    embedding:   Option<EmbeddingTable>,
    device:      B::Device,
) -> Result<QaNet<B>> {
    let mut model = config.model.init::<B>(&device)?;
    if let Some(table) = embedding {
        let weights = Tensor::<B, 2>::from_data(TensorData::new(table.values, [table.rows, table.dim]), &device);
        model.load_pretrained_word_embedding(weights)?;
    }
    tracing::info!("Model ready: {} parameters", model.num_params());

    Trainer::<B>::new(config, limits, device).fit(model, train, valid, checkpoints, metrics)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{error::EmbeddingError, sample::sample_fixture};
    use crate::ml::{featurize::WordFeatConfig, model::tiny_config};
    use burn::backend::{Autodiff, NdArray};

    type AD = Autodiff<NdArray>;

    fn training_config() -> TrainingConfig {
        TrainingConfig::new(tiny_config(16), LrScheduleConfig::new(1e-3))
            .with_num_epochs(2)
            .with_batch_size(2)
            .with_clip_norm(Some(5.0))
            .with_weight_decay(Some(1e-4))
            .with_ema_decay(Some(0.9))
            .with_debug_every(1)
            .with_max_span_len(Some(3))
    }

    fn samples(n: usize) -> Vec<RcSample> {
        (0..n).map(|i| sample_fixture(&format!("s{i}"), 3, 5 + i % 2)).collect()
    }

    #[test]
    fn test_fit_writes_metrics_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path(), 1).unwrap();
        let metrics = MetricsLogger::new(dir.path()).unwrap();

        let config = training_config();
        let device = Default::default();
        let model = config.model.init::<AD>(&device).unwrap();
        let trainer = Trainer::<AD>::new(config, BatchLimits::default(), device);

        let train = RcDataset::new(samples(4));
        let valid = RcDataset::new(samples(2));
        trainer.fit(model, &train, &valid, &checkpoints, &metrics).unwrap();

        let csv = std::fs::read_to_string(metrics.csv_path()).unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert_eq!(checkpoints.saved(SaveMode::Epoch).unwrap(), vec![2]);
        assert_eq!(checkpoints.saved(SaveMode::Debug).unwrap(), vec![4]);
    }

    #[test]
    fn test_samples_beyond_context_limit_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path(), 1).unwrap();
        let metrics = MetricsLogger::new(dir.path()).unwrap();

        let mut far = sample_fixture("far", 3, 8);
        far.answer = Some([6, 7]);
        let mut train = samples(2);
        train.push(far);

        let config = training_config().with_num_epochs(1).with_debug_every(1);
        let device = Default::default();
        let model = config.model.init::<AD>(&device).unwrap();
        let limits = BatchLimits { max_context_len: Some(5), ..Default::default() };
        Trainer::<AD>::new(config, limits, device)
            .fit(model, &RcDataset::new(train), &RcDataset::new(samples(1)), &checkpoints, &metrics)
            .unwrap();

        // Two admitted samples make a single batch of two.
        assert_eq!(checkpoints.saved(SaveMode::Debug).unwrap(), vec![1]);
    }

    #[test]
    fn test_frozen_table_without_vectors_is_rejected_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointManager::new(dir.path(), 1).unwrap();
        let metrics = MetricsLogger::new(dir.path()).unwrap();

        let mut config = training_config();
        config.model = config
            .model
            .clone()
            .with_word(Some(WordFeatConfig::new(16, 6).with_pretrained(true).with_trainable(false)));
        let data = RcDataset::new(samples(2));

        let err = run_training::<AD>(config.clone(), BatchLimits::default(), &data, &data, &checkpoints, &metrics, None, Default::default())
            .unwrap_err();
        assert_eq!(err.downcast_ref::<EmbeddingError>(), Some(&EmbeddingError::NotLoaded));
        assert_eq!(checkpoints.latest(SaveMode::Debug).unwrap(), None);

        let table = EmbeddingTable { rows: 16, dim: 6, values: vec![0.5; 96] };
        run_training::<AD>(config.with_num_epochs(1), BatchLimits::default(), &data, &data, &checkpoints, &metrics, Some(table), Default::default())
            .unwrap();
        assert_eq!(checkpoints.latest(SaveMode::Epoch).unwrap(), Some(1));
    }

    #[test]
    fn test_evaluate_counts_only_labelled_samples() {
        let device = Default::default();
        let model = tiny_config(16).init::<NdArray>(&device).unwrap();
        let batcher = RcBatcher::<NdArray>::new(device, BatchLimits::default());

        let mut items = samples(3);
        items[1].answer = None;
        let eval = evaluate(&model, &items, &batcher, 2, LossPolicy::LogitMask, &SpanDecoder::unbounded());
        assert_eq!(eval.labelled, 2);
        assert!(eval.loss.is_finite());
        assert!((0.0..=1.0).contains(&eval.f1));
        assert!(eval.exact_match <= eval.f1);
    }

    #[test]
    fn test_evaluate_on_nothing_is_nan_loss() {
        let device = Default::default();
        let model = tiny_config(16).init::<NdArray>(&device).unwrap();
        let batcher = RcBatcher::<NdArray>::new(device, BatchLimits::default());
        let eval = evaluate(&model, &[], &batcher, 4, LossPolicy::LogitMask, &SpanDecoder::unbounded());
        assert!(eval.loss.is_nan());
        assert_eq!(eval.labelled, 0);
    }
}
