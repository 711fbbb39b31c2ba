// ============================================================
// Layer 5 — Understanding Layer
// ============================================================
// Encodes question and context separately:
//
//   side ──► kernel-1 conv projection to unit_dim ──► stacked encoder
//
// With sharing enabled (and equal widths on both sides) the context
// reuses the question's projection and encoder, so both sides live
// in the same representation space. The choice is made once, in
// init(); the context slots are simply left empty.

use burn::prelude::*;

use crate::domain::{
    error::ConfigError,
    options::{FusionKind, Sharing},
};
use crate::ml::{
    encoder::{StackedEncoder, StackedEncoderConfig},
    fusion::{fuse, FusionLayer, FusionLayerConfig, Stream},
};

#[derive(Config, Debug)]
pub struct UnderstandingConfig {
    /// Width of the fused representation entering this layer
    pub input_dim: usize,
    pub question:  StackedEncoderConfig,
    pub context:   StackedEncoderConfig,
    #[config(default = "Sharing::Independent")]
    pub sharing:   Sharing,
}

impl UnderstandingConfig {
    /// Sharing only takes effect when both encoders have the same width.
    pub fn shares(&self) -> bool {
        self.sharing.is_shared() && self.question.unit_dim == self.context.unit_dim
    }

    fn projection(&self, side: &StackedEncoderConfig) -> FusionLayerConfig {
        FusionLayerConfig::new(FusionKind::Conv, self.input_dim, side.unit_dim)
            .with_activation(side.activation)
            .with_dropout(side.dropout)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<UnderstandingLayer<B>, ConfigError> {
        let question_projection = self.projection(&self.question).init(device)?;
        let question_encoder    = self.question.init(device)?;

        let (context_projection, context_encoder) = if self.shares() {
            (None, None)
        } else {
            if self.sharing.is_shared() {
                tracing::debug!(
                    "Understanding widths differ ({} vs {}); building separate context encoder",
                    self.question.unit_dim,
                    self.context.unit_dim
                );
            }
            (
                Some(self.projection(&self.context).init(device)?),
                Some(self.context.init(device)?),
            )
        };

        Ok(UnderstandingLayer { question_projection, question_encoder, context_projection, context_encoder })
    }
}

#[derive(Module, Debug)]
pub struct UnderstandingLayer<B: Backend> {
    question_projection: FusionLayer<B>,
    question_encoder:    StackedEncoder<B>,
    /// `None` when shared with the question side
    context_projection:  Option<FusionLayer<B>>,
    context_encoder:     Option<StackedEncoder<B>>,
}

impl<B: Backend> UnderstandingLayer<B> {
    pub fn is_shared(&self) -> bool {
        self.context_encoder.is_none()
    }

    fn context_side(&self) -> (&FusionLayer<B>, &StackedEncoder<B>) {
        match (&self.context_projection, &self.context_encoder) {
            (Some(projection), Some(encoder)) => (projection, encoder),
            _ => (&self.question_projection, &self.question_encoder),
        }
    }

    /// Returns (question, context) encodings with their unchanged masks.
    pub fn forward(&self, question: Stream<B>, context: Stream<B>) -> (Stream<B>, Stream<B>) {
        let (q, q_mask) = fuse(vec![question], Some(&self.question_projection));
        let question = self.question_encoder.forward(q, q_mask);

        let (projection, encoder) = self.context_side();
        let (c, c_mask) = fuse(vec![context], Some(projection));
        let context = encoder.forward(c, c_mask);

        (question, context)
    }
}
