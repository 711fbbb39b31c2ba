// ============================================================
// Layer 5 — Inferencer
// ============================================================
// Turns samples into predictions with a restored model:
//
//   samples ──► RcBatcher ──► QaNet::forward ──► (P_start, P_end)
//           ──► SpanDecoder ──► Prediction { span, start_probs, end_probs }
//
// Runs on a plain (non-autodiff) backend, so every stochastic
// layer is inactive. The probability rows returned with each
// prediction are cut to that sample's context length.

use anyhow::Result;
use burn::prelude::*;

use crate::data::batcher::{BatchLimits, RcBatcher};
use crate::domain::{
    sample::RcSample,
    span::{Prediction, SpanDecoder},
    traits::SpanPredictor,
};
use crate::ml::model::QaNet;

pub type InferBackend = burn::backend::Wgpu;

pub struct Inferencer<B: Backend> {
    model:      QaNet<B>,
    decoder:    SpanDecoder,
    batcher:    RcBatcher<B>,
    batch_size: usize,
}

impl<B: Backend> Inferencer<B> {
    pub fn new(model: QaNet<B>, decoder: SpanDecoder, limits: BatchLimits, batch_size: usize, device: B::Device) -> Self {
        Self {
            model,
            decoder,
            batcher: RcBatcher::new(device, limits),
            batch_size: batch_size.max(1),
        }
    }

    fn predict_chunk(&self, items: &[RcSample]) -> Vec<Prediction> {
        let batch  = self.batcher.batch(items);
        let output = self.model.forward(&batch);
        let n      = output.seq_len();

        let spans = output.decode(&self.decoder);
        let (p_start, p_end, _) = output.host_rows();

        items
            .iter()
            .zip(spans)
            .enumerate()
            .map(|(row, (sample, span))| {
                let len = sample.context_len().min(n);
                let at  = row * n;
                Prediction {
                    id:          sample.id.clone(),
                    span,
                    start_probs: p_start[at..at + len].to_vec(),
                    end_probs:   p_end[at..at + len].to_vec(),
                }
            })
            .collect()
    }
}

impl<B: Backend> SpanPredictor for Inferencer<B> {
    fn predict(&self, samples: &[RcSample]) -> Result<Vec<Prediction>> {
        let predictions: Vec<Prediction> = samples
            .chunks(self.batch_size)
            .flat_map(|chunk| self.predict_chunk(chunk))
            .collect();
        tracing::debug!("Predicted {} spans", predictions.len());
        Ok(predictions)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::sample_fixture;
    use crate::ml::model::tiny_config;
    use burn::backend::NdArray;

    type B = NdArray;

    fn inferencer(max_span_len: usize) -> Inferencer<B> {
        let device = Default::default();
        let model = tiny_config(16).init::<B>(&device).unwrap();
        let decoder = SpanDecoder::new(Some(max_span_len)).unwrap();
        Inferencer::new(model, decoder, BatchLimits::default(), 2, device)
    }

    #[test]
    fn test_one_prediction_per_sample_in_order() {
        let samples: Vec<RcSample> = (0..5).map(|i| sample_fixture(&format!("q{i}"), 2, 3 + i)).collect();
        let predictions = inferencer(2).predict(&samples).unwrap();

        assert_eq!(predictions.len(), 5);
        for (sample, prediction) in samples.iter().zip(&predictions) {
            assert_eq!(prediction.id, sample.id);
            assert_eq!(prediction.start_probs.len(), sample.context_len());
            let span = prediction.span.unwrap();
            assert!(span.end < sample.context_len());
            assert!(span.len() <= 2);
        }
    }

    #[test]
    fn test_predictions_are_deterministic() {
        let inferencer = inferencer(3);
        let samples = vec![sample_fixture("a", 3, 6)];
        assert_eq!(inferencer.predict(&samples).unwrap(), inferencer.predict(&samples).unwrap());
    }
}
