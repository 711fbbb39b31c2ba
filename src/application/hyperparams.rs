// ============================================================
// Layer 2 — Hyper-Parameter File
// ============================================================
// The JSON file a training run is configured with, and which is
// copied next to the checkpoints so inference can rebuild the
// same model. Layer variants are plain string tags:
//
//   "model": {
//     "representation": {
//       "word":   { "enable": true, "embed_dim": 300, "pretrained": true, ... },
//       "char":   { "enable": true, "embed_dim": 64, "pooling_type": "max", ... },
//       "fusion": { "type": "highway", "num_layer": 2, "unit_dim": 128, ... }
//     },
//     "interaction": {
//       "context2question": { "score_type": "trilinear", ... }, ...
//     }
//   }
//
// Tags are parsed once, in to_training_config(); an unknown tag is
// a ConfigError naming the option and the rejected string. Every
// section has defaults, so a file only lists what it changes.

use serde::{Deserialize, Serialize};

use crate::data::batcher::BatchLimits;
use crate::domain::{
    error::ConfigError,
    options::{
        Activation, DecayKind, FusionKind, LossPolicy, PoolingKind, Q2cReduce, ScoreType, Sharing, WarmupKind,
    },
    sample::VocabSizes,
    span::SpanDecoder,
};
use crate::ml::{
    encoder::StackedEncoderConfig,
    featurize::{PooledFeatConfig, WordFeatConfig},
    fusion::FusionLayerConfig,
    interaction::InteractionConfig,
    model::QaNetConfig,
    modeling::ModelingConfig,
    output::OutputLayerConfig,
    schedule::LrScheduleConfig,
    trainer::TrainingConfig,
    understanding::UnderstandingConfig,
};

// ─── Sections ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParams {
    pub data:  DataParams,
    pub model: ModelParams,
    pub train: TrainParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataParams {
    pub word_vocab_size:    usize,
    pub subword_vocab_size: usize,
    pub char_vocab_size:    usize,
    pub max_question_len:   Option<usize>,
    pub max_context_len:    Option<usize>,
    pub max_subword_len:    Option<usize>,
    pub max_char_len:       Option<usize>,
    /// Longest span the decoder may return; `null` for no limit
    pub max_answer_len:     Option<usize>,
    /// Fraction of the input kept for training; the rest validates
    pub train_fraction:     f64,
}

impl Default for DataParams {
    fn default() -> Self {
        Self {
            word_vocab_size:    30000,
            subword_vocab_size: 8000,
            char_vocab_size:    1000,
            max_question_len:   Some(30),
            max_context_len:    Some(400),
            max_subword_len:    Some(4),
            max_char_len:       Some(16),
            max_answer_len:     Some(30),
            train_fraction:     0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureParams {
    pub enable:       bool,
    pub embed_dim:    usize,
    pub dropout:      f64,
    pub pretrained:   bool,
    pub trainable:    bool,
    /// Sub-token pooling; ignored for word features
    pub pooling_type: String,
}

impl FeatureParams {
    fn enabled(embed_dim: usize) -> Self {
        Self {
            enable:       true,
            embed_dim,
            dropout:      0.1,
            pretrained:   false,
            trainable:    true,
            pooling_type: "max".into(),
        }
    }
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self { enable: false, ..Self::enabled(64) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionParams {
    #[serde(rename = "type")]
    pub kind:              String,
    pub num_layer:         usize,
    pub unit_dim:          usize,
    pub hidden_activation: String,
    pub dropout:           f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            kind:              "highway".into(),
            num_layer:         2,
            unit_dim:          128,
            hidden_activation: "relu".into(),
            dropout:           0.1,
        }
    }
}

impl FusionParams {
    fn config(&self, input_dim: usize) -> Result<FusionLayerConfig, ConfigError> {
        Ok(FusionLayerConfig::new(self.kind.parse()?, input_dim, self.unit_dim)
            .with_num_layer(self.num_layer)
            .with_activation(self.hidden_activation.parse()?)
            .with_dropout(self.dropout))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderParams {
    pub num_layer:         usize,
    pub num_conv:          usize,
    pub num_head:          usize,
    pub unit_dim:          usize,
    pub window_size:       usize,
    pub hidden_activation: String,
    pub dropout:           f64,
    pub layer_dropout:     f64,
}

impl EncoderParams {
    fn with_shape(num_layer: usize, num_conv: usize, window_size: usize) -> Self {
        Self {
            num_layer,
            num_conv,
            num_head:          8,
            unit_dim:          128,
            window_size,
            hidden_activation: "relu".into(),
            dropout:           0.1,
            layer_dropout:     0.1,
        }
    }

    fn config(&self) -> Result<StackedEncoderConfig, ConfigError> {
        Ok(StackedEncoderConfig::new(self.num_layer, self.num_conv, self.num_head, self.unit_dim)
            .with_window_size(self.window_size)
            .with_activation(self.hidden_activation.parse()?)
            .with_dropout(self.dropout)
            .with_layer_dropout(self.layer_dropout))
    }
}

impl Default for EncoderParams {
    fn default() -> Self {
        Self::with_shape(1, 4, 7)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepresentationParams {
    pub word:    FeatureParams,
    pub subword: FeatureParams,
    pub char:    FeatureParams,
    pub fusion:  FusionParams,
}

impl Default for RepresentationParams {
    fn default() -> Self {
        Self {
            word:    FeatureParams { pretrained: true, trainable: false, ..FeatureParams::enabled(300) },
            subword: FeatureParams::default(),
            char:    FeatureParams::enabled(64),
            fusion:  FusionParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnderstandingParams {
    pub question:       EncoderParams,
    pub context:        EncoderParams,
    pub enable_sharing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionParams {
    pub enable:        bool,
    pub score_type:    String,
    /// Projection width for dot / scaled_dot scores; must be positive
    /// for those, unused by trilinear
    pub attention_dim: usize,
}

impl Default for AttentionParams {
    fn default() -> Self {
        Self { enable: true, score_type: "trilinear".into(), attention_dim: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionParams {
    pub context2question: AttentionParams,
    pub question2context: AttentionParams,
    /// How question→context collapses the question axis
    pub question2context_reduce: String,
    pub fusion:         FusionParams,
    pub combo_enable:   bool,
    pub enable_sharing: bool,
}

impl Default for InteractionParams {
    fn default() -> Self {
        Self {
            context2question:        AttentionParams::default(),
            question2context:        AttentionParams::default(),
            question2context_reduce: "max".into(),
            fusion:                  FusionParams { kind: "conv".into(), num_layer: 1, ..FusionParams::default() },
            combo_enable:            true,
            enable_sharing:          true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelingParams {
    pub answer:         EncoderParams,
    pub enable_sharing: bool,
}

impl Default for ModelingParams {
    fn default() -> Self {
        Self { answer: EncoderParams::with_shape(7, 2, 5), enable_sharing: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub representation: RepresentationParams,
    pub understanding:  UnderstandingParams,
    pub interaction:    InteractionParams,
    pub modeling:       ModelingParams,
    pub output_dropout: f64,
    /// "logit_mask" or "probability_mask"
    pub loss_type:      String,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            representation: RepresentationParams::default(),
            understanding:  UnderstandingParams::default(),
            interaction:    InteractionParams::default(),
            modeling:       ModelingParams::default(),
            output_dropout: 0.1,
            loss_type:      LossPolicy::default().as_tag().into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainParams {
    pub random_seed:      u64,
    pub batch_size:       usize,
    pub num_epoch:        usize,
    pub learning_rate:    f64,
    pub warmup_type:      String,
    pub warmup_steps:     usize,
    pub decay_type:       String,
    pub decay_start_step: usize,
    pub decay_steps:      usize,
    pub decay_rate:       f64,
    /// Gradient-norm clipping threshold; `null` disables clipping
    pub clip_norm:        Option<f32>,
    /// L2 penalty; `null` disables regularization
    pub weight_decay:     Option<f32>,
    pub ema_enable:       bool,
    pub ema_decay_rate:   f64,
    /// Save a debug checkpoint every n steps; 0 disables
    pub debug_every:      usize,
    pub keep_epochs:      usize,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            random_seed:      100,
            batch_size:       16,
            num_epoch:        30,
            learning_rate:    1e-3,
            warmup_type:      "inverse_exp".into(),
            warmup_steps:     1000,
            decay_type:       "none".into(),
            decay_start_step: 0,
            decay_steps:      1000,
            decay_rate:       0.95,
            clip_norm:        Some(5.0),
            weight_decay:     Some(3e-7),
            ema_enable:       true,
            ema_decay_rate:   0.9999,
            debug_every:      1000,
            keep_epochs:      3,
        }
    }
}

// ─── Conversion ───────────────────────────────────────────────────────────────
impl HyperParams {
    /// Parse every tag and check every width without building tensors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.to_training_config()?;
        self.span_decoder()?;
        ConfigError::check_rate("train fraction", self.data.train_fraction)?;
        ConfigError::check_positive("batch size", self.train.batch_size)?;
        Ok(())
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_question_len: self.data.max_question_len,
            max_context_len:  self.data.max_context_len,
            max_subword_len:  self.data.max_subword_len,
            max_char_len:     self.data.max_char_len,
            vocab:            Some(self.vocab_sizes()),
        }
    }

    pub fn vocab_sizes(&self) -> VocabSizes {
        VocabSizes {
            word:    self.data.word_vocab_size,
            subword: self.data.subword_vocab_size,
            char:    self.data.char_vocab_size,
        }
    }

    pub fn span_decoder(&self) -> Result<SpanDecoder, ConfigError> {
        SpanDecoder::new(self.data.max_answer_len)
    }

    pub fn to_model_config(&self) -> Result<QaNetConfig, ConfigError> {
        let rep = &self.model.representation;

        let word = rep.word.enable.then(|| {
            WordFeatConfig::new(self.data.word_vocab_size, rep.word.embed_dim)
                .with_dropout(rep.word.dropout)
                .with_pretrained(rep.word.pretrained)
                .with_trainable(rep.word.trainable)
        });
        let pooled = |feature: &FeatureParams, vocab_size: usize| -> Result<Option<PooledFeatConfig>, ConfigError> {
            if !feature.enable {
                return Ok(None);
            }
            let pooling: PoolingKind = feature.pooling_type.parse()?;
            Ok(Some(
                PooledFeatConfig::new(vocab_size, feature.embed_dim)
                    .with_pooling(pooling)
                    .with_dropout(feature.dropout)
                    .with_trainable(feature.trainable),
            ))
        };
        let subword = pooled(&rep.subword, self.data.subword_vocab_size)?;
        let char = pooled(&rep.char, self.data.char_vocab_size)?;

        let feature_dim = [&rep.word, &rep.subword, &rep.char]
            .iter()
            .filter(|f| f.enable)
            .map(|f| f.embed_dim)
            .sum();
        let representation = rep.fusion.config(feature_dim)?;

        let und = &self.model.understanding;
        let understanding = UnderstandingConfig::new(
            representation.output_dim(),
            und.question.config()?,
            und.context.config()?,
        )
        .with_sharing(Sharing::from_flag(und.enable_sharing));

        let int = &self.model.interaction;
        let fusion_kind: FusionKind = int.fusion.kind.parse()?;
        let fusion_activation: Activation = int.fusion.hidden_activation.parse()?;
        let c2q_score: ScoreType = int.context2question.score_type.parse()?;
        let q2c_score: ScoreType = int.question2context.score_type.parse()?;
        let q2c_reduce: Q2cReduce = int.question2context_reduce.parse()?;
        let interaction = InteractionConfig::new(und.context.unit_dim, und.question.unit_dim, int.fusion.unit_dim)
            .with_c2q_enable(int.context2question.enable)
            .with_c2q_score(c2q_score)
            .with_c2q_attention_dim(int.context2question.attention_dim)
            .with_q2c_enable(int.question2context.enable)
            .with_q2c_score(q2c_score)
            .with_q2c_attention_dim(int.question2context.attention_dim)
            .with_q2c_reduce(q2c_reduce)
            .with_sharing(Sharing::from_flag(int.enable_sharing))
            .with_combo(int.combo_enable)
            .with_fusion_kind(fusion_kind)
            .with_fusion_num_layer(int.fusion.num_layer)
            .with_fusion_activation(fusion_activation)
            .with_fusion_dropout(int.fusion.dropout);

        let modeling = ModelingConfig::new(interaction.output_dim(), self.model.modeling.answer.config()?)
            .with_sharing(Sharing::from_flag(self.model.modeling.enable_sharing));
        let output = OutputLayerConfig::new(modeling.output_dim()).with_dropout(self.model.output_dropout);

        let config = QaNetConfig::new(representation, understanding, interaction, modeling, output)
            .with_word(word)
            .with_subword(subword)
            .with_char(char);
        config.validate()?;
        Ok(config)
    }

    pub fn to_training_config(&self) -> Result<TrainingConfig, ConfigError> {
        let t = &self.train;
        let warmup: WarmupKind = t.warmup_type.parse()?;
        let decay: DecayKind = t.decay_type.parse()?;
        let schedule = LrScheduleConfig::new(t.learning_rate)
            .with_warmup(warmup)
            .with_warmup_steps(t.warmup_steps)
            .with_decay(decay)
            .with_decay_start_step(t.decay_start_step)
            .with_decay_steps(t.decay_steps)
            .with_decay_rate(t.decay_rate);
        schedule.validate()?;

        let loss: LossPolicy = self.model.loss_type.parse()?;
        let ema_decay = if t.ema_enable {
            ConfigError::check_rate("EMA decay", t.ema_decay_rate)?;
            Some(t.ema_decay_rate)
        } else {
            None
        };

        Ok(TrainingConfig::new(self.to_model_config()?, schedule)
            .with_num_epochs(t.num_epoch)
            .with_batch_size(t.batch_size)
            .with_seed(t.random_seed)
            .with_clip_norm(t.clip_norm)
            .with_weight_decay(t.weight_decay)
            .with_ema_decay(ema_decay)
            .with_loss(loss)
            .with_debug_every(t.debug_every)
            .with_max_span_len(self.data.max_answer_len))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_build_a_consistent_model() {
        let params = HyperParams::default();
        assert!(params.validate().is_ok());

        let model = params.to_model_config().unwrap();
        assert_eq!(model.feature_dim(), 364);
        assert!(model.subword.is_none());
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let json = r#"{ "train": { "num_epoch": 2 }, "model": { "loss_type": "probability_mask" } }"#;
        let params: HyperParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.train.num_epoch, 2);
        assert_eq!(params.train.batch_size, TrainParams::default().batch_size);

        let training = params.to_training_config().unwrap();
        assert_eq!(training.loss, LossPolicy::ProbabilityMask);
        assert_eq!(training.num_epochs, 2);
    }

    #[test]
    fn test_unknown_tags_are_rejected() {
        let mut params = HyperParams::default();
        params.model.interaction.context2question.score_type = "cosine".into();
        assert_eq!(
            params.to_model_config().unwrap_err(),
            ConfigError::UnsupportedTag { kind: "score", tag: "cosine".into() }
        );

        let mut params = HyperParams::default();
        params.model.representation.char.pooling_type = "min".into();
        assert!(matches!(params.validate(), Err(ConfigError::UnsupportedTag { kind: "pooling", .. })));
    }

    #[test]
    fn test_head_mismatch_surfaces_at_validation() {
        let mut params = HyperParams::default();
        params.model.understanding.question.num_head = 3;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_no_features_is_an_error() {
        let mut params = HyperParams::default();
        params.model.representation.word.enable = false;
        params.model.representation.char.enable = false;
        assert_eq!(params.to_model_config().unwrap_err(), ConfigError::NoFeatures);
    }

    #[test]
    fn test_dot_score_without_attention_dim_fails_validation() {
        let mut params = HyperParams::default();
        params.model.interaction.question2context.score_type = "scaled_dot".into();
        assert_eq!(params.validate(), Err(ConfigError::ZeroDimension { name: "attention dim" }));

        params.model.interaction.question2context.attention_dim = 32;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_zero_answer_limit_is_rejected() {
        let mut params = HyperParams::default();
        params.data.max_answer_len = Some(0);
        assert_eq!(params.span_decoder(), Err(ConfigError::ZeroSpanLimit));
    }
}
