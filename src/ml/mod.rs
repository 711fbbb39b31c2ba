// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All tensor code lives here. Every layer is a burn Module built
// from a matching *Config, and every sequence travels as a
// (tensor, mask) pair.
//
//   masked.rs        masked logits / softmax / cross-entropy
//   activation.rs    activation tags → tensor ops
//   featurize.rs     word, subword and char featurizers
//   fusion.rs        concat / dense / conv / highway fusion
//   encoder.rs       encoder block and stacked encoder
//   understanding.rs question and context encoders
//   interaction.rs   context↔question attention
//   modeling.rs      base / start / end modeling passes
//   output.rs        start / end heads and probabilities
//   model.rs         QaNet, the assembled model
//
//   schedule.rs      learning-rate warm-up and decay
//   ema.rs           exponential moving average of parameters
//   trainer.rs       training loop with validation and checkpoints
//   inferencer.rs    checkpoint restore and span prediction
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)
//            Yu et al. (2018) QANet
//            Wang et al. (2017) R-Net

pub mod activation;
pub mod masked;

pub mod featurize;
pub mod fusion;
pub mod encoder;
pub mod understanding;
pub mod interaction;
pub mod modeling;
pub mod output;

/// The assembled span-prediction model
pub mod model;

pub mod schedule;
pub mod ema;

/// Training loop with validation and checkpointing
pub mod trainer;

/// Inference engine: restores a checkpoint and predicts spans
pub mod inferencer;
