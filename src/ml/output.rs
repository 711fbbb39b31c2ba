// ============================================================
// Layer 5 — Output Layer
// ============================================================
//   start logits = W_s · [base; start]      (dropout first)
//   end logits   = W_e · [base; end]
//   P_start, P_end = masked softmax over the context axis
//
// Decoding the two distributions into a span is done on the host
// by `SpanDecoder`; `QaNetOutput::decode` bridges the two.

use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
};

use crate::domain::{
    error::ConfigError,
    span::{Span, SpanDecoder},
};
use crate::ml::{
    fusion::{concat_streams, Stream},
    masked::masked_softmax,
    modeling::ModelingOutput,
};

#[derive(Config, Debug)]
pub struct OutputLayerConfig {
    /// Width of each modeling pass
    pub unit_dim: usize,
    #[config(default = 0.0)]
    pub dropout:  f64,
}

impl OutputLayerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<OutputLayer<B>, ConfigError> {
        ConfigError::check_positive("output unit dim", self.unit_dim)?;
        ConfigError::check_rate("output dropout", self.dropout)?;
        Ok(OutputLayer {
            start_head: LinearConfig::new(2 * self.unit_dim, 1).init(device),
            end_head:   LinearConfig::new(2 * self.unit_dim, 1).init(device),
            dropout:    DropoutConfig::new(self.dropout).init(),
        })
    }
}

/// Per-position start/end scores for a batch: every tensor is [b, n].
#[derive(Debug, Clone)]
pub struct QaNetOutput<B: Backend> {
    pub start_logits: Tensor<B, 2>,
    pub end_logits:   Tensor<B, 2>,
    pub start_mask:   Tensor<B, 2>,
    pub end_mask:     Tensor<B, 2>,
    pub start_probs:  Tensor<B, 2>,
    pub end_probs:    Tensor<B, 2>,
}

impl<B: Backend> QaNetOutput<B> {
    pub fn seq_len(&self) -> usize {
        self.start_probs.dims()[1]
    }

    /// Host copies of (P_start, P_end, mask), row-major [b * n].
    pub fn host_rows(&self) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
        let host = |t: &Tensor<B, 2>| t.to_data().iter::<f32>().collect::<Vec<f32>>();
        (host(&self.start_probs), host(&self.end_probs), host(&self.start_mask))
    }

    /// Best span per row; `None` for rows with no valid position.
    pub fn decode(&self, decoder: &SpanDecoder) -> Vec<Option<Span>> {
        let (p_start, p_end, mask) = self.host_rows();
        decoder.decode_rows(&p_start, &p_end, &mask, self.seq_len())
    }
}

#[derive(Module, Debug)]
pub struct OutputLayer<B: Backend> {
    start_head: Linear<B>,
    end_head:   Linear<B>,
    dropout:    Dropout,
}

impl<B: Backend> OutputLayer<B> {
    fn head(&self, head: &Linear<B>, base: Stream<B>, pass: Stream<B>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let (x, mask) = concat_streams(vec![base, pass]);
        let [batch, seq, _] = x.dims();
        let logits = head.forward(self.dropout.forward(x)).reshape([batch, seq]);
        (logits, mask.reshape([batch, seq]))
    }

    pub fn forward(&self, modeling: ModelingOutput<B>) -> QaNetOutput<B> {
        let ModelingOutput { base, start, end } = modeling;
        let (start_logits, start_mask) = self.head(&self.start_head, base.clone(), start);
        let (end_logits, end_mask) = self.head(&self.end_head, base, end);

        QaNetOutput {
            start_probs: masked_softmax(start_logits.clone(), start_mask.clone(), 1),
            end_probs:   masked_softmax(end_logits.clone(), end_mask.clone(), 1),
            start_logits,
            end_logits,
            start_mask,
            end_mask,
        }
    }
}
