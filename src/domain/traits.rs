// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer only talks to these traits, so a new
// sample format or a different predictor can be dropped in
// without touching the use cases.

use anyhow::Result;

use crate::domain::{sample::RcSample, span::Prediction};

// ─── SampleSource ─────────────────────────────────────────────────────────────
/// Anything that can hand over pre-tokenised samples.
///
/// Implementations:
///   - JsonlLoader → one JSON object per line on disk
pub trait SampleSource {
    fn load_all(&self) -> Result<Vec<RcSample>>;
}

// ─── SpanPredictor ────────────────────────────────────────────────────────────
/// Anything that can answer a batch of samples with decoded spans.
///
/// Implementations:
///   - Inferencer → restored QANet checkpoint
pub trait SpanPredictor {
    /// One prediction per input sample, in input order.
    fn predict(&self, samples: &[RcSample]) -> Result<Vec<Prediction>>;
}
