// ============================================================
// Layer 5 — QaNet: the full span-prediction model
// ============================================================
//
//   question / context ids
//        │
//        ▼
//   word ⊕ subword ⊕ char features ──► representation fusion
//        │                                 (shared by both sides)
//        ▼
//   understanding   (question encoder, context encoder)
//        │
//        ▼
//   interaction     (context→question, question→context, fusion)
//        │
//        ▼
//   modeling        (base, start, end passes)
//        │
//        ▼
//   output          (P_start, P_end over context positions)
//
// Every component owns its parameters, so the burn record field
// paths ("understanding.question_encoder.blocks.0...") are the
// parameter names.

use burn::prelude::*;

use crate::data::batcher::{RcBatch, SideBatch};
use crate::domain::{
    error::{ConfigError, EmbeddingError},
    options::LossPolicy,
};
use crate::ml::{
    featurize::{CharFeat, PooledFeatConfig, SubwordFeat, WordFeat, WordFeatConfig},
    fusion::{fuse, FusionLayer, FusionLayerConfig, Stream},
    interaction::{InteractionConfig, InteractionLayer},
    masked::{masked_cross_entropy, probability_masked_cross_entropy},
    modeling::{ModelingConfig, ModelingLayer},
    output::{OutputLayer, OutputLayerConfig},
    understanding::{UnderstandingConfig, UnderstandingLayer},
};

pub use crate::ml::output::QaNetOutput;

// #[derive(Config)] supplies Clone and serde impls itself.
#[derive(Config, Debug)]
pub struct QaNetConfig {
    pub word:           Option<WordFeatConfig>,
    pub subword:        Option<PooledFeatConfig>,
    pub char:           Option<PooledFeatConfig>,
    pub representation: FusionLayerConfig,
    pub understanding:  UnderstandingConfig,
    pub interaction:    InteractionConfig,
    pub modeling:       ModelingConfig,
    pub output:         OutputLayerConfig,
}

impl QaNetConfig {
    /// Width of the concatenated feature streams.
    pub fn feature_dim(&self) -> usize {
        self.word.as_ref().map_or(0, |c| c.embed_dim)
            + self.subword.as_ref().map_or(0, |c| c.embed_dim)
            + self.char.as_ref().map_or(0, |c| c.embed_dim)
    }

    /// Check that every stage consumes the width its predecessor emits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.word.is_none() && self.subword.is_none() && self.char.is_none() {
            return Err(ConfigError::NoFeatures);
        }

        for encoder in [&self.understanding.question, &self.understanding.context, &self.modeling.encoder] {
            encoder.validate()?;
        }

        let chain = [
            ("representation fusion", self.representation.input_dim, self.feature_dim()),
            ("understanding", self.understanding.input_dim, self.representation.output_dim()),
            ("interaction (question)", self.interaction.question_dim, self.understanding.question.unit_dim),
            ("interaction (context)", self.interaction.context_dim, self.understanding.context.unit_dim),
            ("modeling", self.modeling.input_dim, self.interaction.output_dim()),
            ("output", self.output.unit_dim, self.modeling.output_dim()),
        ];
        for (stage, expected, actual) in chain {
            if expected != actual {
                return Err(ConfigError::WidthMismatch { stage, expected, actual });
            }
        }

        self.representation.validate()?;
        self.interaction.validate()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<QaNet<B>, ConfigError> {
        self.validate()?;

        let model = QaNet {
            word:           self.word.as_ref().map(|c| c.init(device)).transpose()?,
            subword:        self.subword.as_ref().map(|c| c.init(device)).transpose()?,
            char:           self.char.as_ref().map(|c| c.init(device)).transpose()?,
            representation: self.representation.init(device)?,
            understanding:  self.understanding.init(device)?,
            interaction:    self.interaction.init(device)?,
            modeling:       self.modeling.init(device)?,
            output:         self.output.init(device)?,
        };
        tracing::debug!("Initialised QaNet with {} parameters", model.num_params());
        Ok(model)
    }
}

#[derive(Module, Debug)]
pub struct QaNet<B: Backend> {
    word:           Option<WordFeat<B>>,
    subword:        Option<SubwordFeat<B>>,
    char:           Option<CharFeat<B>>,
    representation: FusionLayer<B>,
    understanding:  UnderstandingLayer<B>,
    interaction:    InteractionLayer<B>,
    modeling:       ModelingLayer<B>,
    output:         OutputLayer<B>,
}

impl<B: Backend> QaNet<B> {
    /// Enabled feature streams of one side, fused into one.
    fn featurize(&self, side: &SideBatch<B>) -> Stream<B> {
        let mut streams = Vec::with_capacity(3);
        if let Some(word) = &self.word {
            streams.push(word.forward(side.word.clone(), side.word_mask.clone()));
        }
        if let Some(subword) = &self.subword {
            streams.push(subword.forward(side.subword.clone(), side.subword_mask.clone()));
        }
        if let Some(char) = &self.char {
            streams.push(char.forward(side.char.clone(), side.char_mask.clone()));
        }
        fuse(streams, Some(&self.representation))
    }

    pub fn forward(&self, batch: &RcBatch<B>) -> QaNetOutput<B> {
        let question = self.featurize(&batch.question);
        let context  = self.featurize(&batch.context);

        let (question, context) = self.understanding.forward(question, context);
        let interaction = self.interaction.forward(question, context);
        let modeling = self.modeling.forward(interaction);
        self.output.forward(modeling)
    }

    /// loss = start_loss + end_loss, each averaged over the batch.
    pub fn forward_loss(&self, batch: &RcBatch<B>, policy: LossPolicy) -> (Tensor<B, 1>, QaNetOutput<B>) {
        let output = self.forward(batch);
        let start_loss = self.boundary_loss(
            policy,
            &output.start_logits,
            &output.start_probs,
            &output.start_mask,
            batch.answer_start.clone(),
        );
        let end_loss = self.boundary_loss(
            policy,
            &output.end_logits,
            &output.end_probs,
            &output.end_mask,
            batch.answer_end.clone(),
        );
        (start_loss + end_loss, output)
    }

    fn boundary_loss(
        &self,
        policy: LossPolicy,
        logits: &Tensor<B, 2>,
        probs:  &Tensor<B, 2>,
        mask:   &Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        match policy {
            LossPolicy::LogitMask => masked_cross_entropy(logits.clone(), mask.clone(), labels),
            LossPolicy::ProbabilityMask => probability_masked_cross_entropy(probs.clone(), mask.clone(), labels),
        }
    }

    /// Fails when a frozen pretrained word table was never filled.
    pub fn check_pretrained(&self) -> Result<(), EmbeddingError> {
        self.word.as_ref().map_or(Ok(()), |word| word.check_loaded())
    }

    #[cfg(test)]
    pub(crate) fn word_table(&self) -> Option<Tensor<B, 2>> {
        self.word.as_ref().map(|word| word.embedding.weight.val())
    }

    /// Fill the word featurizer's pretrained slot.
    pub fn load_pretrained_word_embedding(&mut self, weights: Tensor<B, 2>) -> Result<(), EmbeddingError> {
        match self.word.as_mut() {
            Some(word) => word.load_pretrained(weights),
            None => Err(EmbeddingError::NotPretrained),
        }
    }
}

/// A small but complete configuration used across the ml tests.
#[cfg(test)]
pub(crate) fn tiny_config(vocab_size: usize) -> QaNetConfig {
    use crate::domain::options::{FusionKind, PoolingKind};
    use crate::ml::encoder::StackedEncoderConfig;

    let encoder = |blocks| StackedEncoderConfig::new(blocks, 1, 2, 8).with_window_size(3);
    QaNetConfig::new(
        FusionLayerConfig::new(FusionKind::Highway, 10, 8),
        UnderstandingConfig::new(8, encoder(1), encoder(1)),
        InteractionConfig::new(8, 8, 8),
        ModelingConfig::new(8, encoder(1)),
        OutputLayerConfig::new(8),
    )
    .with_word(Some(WordFeatConfig::new(vocab_size, 6).with_pretrained(true)))
    .with_char(Some(PooledFeatConfig::new(vocab_size, 4).with_pooling(PoolingKind::Max)))
}
