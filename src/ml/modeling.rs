// ============================================================
// Layer 5 — Modeling Layer
// ============================================================
//   x ──► kernel-1 conv projection
//     ──► base  = E_base(x)
//     ──► start = E_start(base)
//     ──► end   = E_end(start)
//
// All three outputs are returned; the output layer pairs base with
// start and base with end. With sharing, E_start and E_end are
// E_base itself (three passes through one stack).

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
pub struct ModelingConfig {
    pub input_dim: usize,
    pub encoder:   StackedEncoderConfig,
    #[config(default = "Sharing::Independent")]
    pub sharing:   Sharing,
}

impl ModelingConfig {
    pub fn output_dim(&self) -> usize {
        self.encoder.unit_dim
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ModelingLayer<B>, ConfigError> {
        let projection = FusionLayerConfig::new(FusionKind::Conv, self.input_dim, self.encoder.unit_dim)
            .with_activation(self.encoder.activation)
            .with_dropout(self.encoder.dropout)
            .init(device)?;
        let base = self.encoder.init(device)?;

        let (start, end) = if self.sharing.is_shared() {
            (None, None)
        } else {
            (Some(self.encoder.init(device)?), Some(self.encoder.init(device)?))
        };
        Ok(ModelingLayer { projection, base, start, end })
    }
}

/// The three modeling passes, each with its (unchanged) mask.
pub struct ModelingOutput<B: Backend> {
    pub base:  Stream<B>,
    pub start: Stream<B>,
    pub end:   Stream<B>,
}

#[derive(Module, Debug)]
pub struct ModelingLayer<B: Backend> {
    projection: FusionLayer<B>,
    base:       StackedEncoder<B>,
    /// `None` when shared with `base`
    start:      Option<StackedEncoder<B>>,
    end:        Option<StackedEncoder<B>>,
}

impl<B: Backend> ModelingLayer<B> {
    pub fn is_shared(&self) -> bool {
        self.start.is_none()
    }

    fn start_encoder(&self) -> &StackedEncoder<B> {
        self.start.as_ref().unwrap_or(&self.base)
    }

    fn end_encoder(&self) -> &StackedEncoder<B> {
        self.end.as_ref().unwrap_or(&self.base)
    }

    pub fn forward(&self, input: Stream<B>) -> ModelingOutput<B> {
        let (x, mask) = fuse(vec![input], Some(&self.projection));
        let base = self.base.forward(x, mask);
        let start = self.start_encoder().forward(base.0.clone(), base.1.clone());
        let end = self.end_encoder().forward(start.0.clone(), start.1.clone());
        ModelingOutput { base, start, end }
    }
}
