// ============================================================
// Layer 3 — Answer Spans and Span Decoding
// ============================================================
// The model emits two distributions over context positions,
// P_start and P_end. The answer is the contiguous span
//
//     (i*, j*) = argmax_{i <= j, j - i + 1 <= K}  P_start[i] * P_end[j]
//
// over valid (unmasked) positions.
//
// A left-to-right scan solves this exactly in O(n): for each end j
// only the best start inside the window [j - K + 1, j] matters,
// and a monotonic deque keeps that maximum up to date in amortised
// O(1). Without a length limit the window is the whole prefix.
//
// Ties are broken by the first-encountered maximum, both for the
// start inside the window and for the global argmax over ends, so
// decoding is deterministic.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

/// An inclusive `[start, end]` span over context word positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end:   usize,
    /// `P_start[start] * P_end[end]`
    pub score: f32,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// 1.0 when both boundaries match the gold span exactly.
    pub fn exact_match(&self, gold: [usize; 2]) -> f64 {
        if self.start == gold[0] && self.end == gold[1] { 1.0 } else { 0.0 }
    }

    /// Token-overlap F1 between this span and the gold span.
    pub fn f1(&self, gold: [usize; 2]) -> f64 {
        let lo = self.start.max(gold[0]);
        let hi = self.end.min(gold[1]);
        if lo > hi {
            return 0.0;
        }
        let overlap   = (hi - lo + 1) as f64;
        let precision = overlap / self.len() as f64;
        let recall    = overlap / (gold[1] - gold[0] + 1) as f64;
        2.0 * precision * recall / (precision + recall)
    }
}

/// Decoded answer for one example plus the distributions behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id:          String,
    /// `None` when the example had no valid context position
    pub span:        Option<Span>,
    pub start_probs: Vec<f32>,
    pub end_probs:   Vec<f32>,
}

/// Finds the best contiguous span under an optional length limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanDecoder {
    max_span_len: Option<usize>,
}

impl SpanDecoder {
    /// `max_span_len = Some(k)` restricts spans to at most `k` tokens.
    pub fn new(max_span_len: Option<usize>) -> Result<Self, ConfigError> {
        if max_span_len == Some(0) {
            return Err(ConfigError::ZeroSpanLimit);
        }
        Ok(Self { max_span_len })
    }

    pub fn unbounded() -> Self {
        Self { max_span_len: None }
    }

    /// Decode one example. Positions with `mask <= 0` can be neither
    /// start nor end. Returns `None` if no position is valid.
    ///
    /// # Panics
    /// Panics if the three slices differ in length.
    pub fn decode(&self, p_start: &[f32], p_end: &[f32], mask: &[f32]) -> Option<Span> {
        assert_eq!(p_start.len(), p_end.len(), "start/end distributions differ in length");
        assert_eq!(p_start.len(), mask.len(), "mask length differs from distribution length");

        // Candidate starts, values non-increasing from front to back.
        let mut window: VecDeque<usize> = VecDeque::new();
        let mut best: Option<Span> = None;

        for j in 0..p_start.len() {
            if mask[j] <= 0.0 {
                continue;
            }

            // Strict comparison keeps the earlier of two equal starts.
            while window.back().is_some_and(|&b| p_start[b] < p_start[j]) {
                window.pop_back();
            }
            window.push_back(j);

            if let Some(k) = self.max_span_len {
                while window.front().is_some_and(|&f| j - f >= k) {
                    window.pop_front();
                }
            }

            let Some(&i) = window.front() else { continue };
            let score = p_start[i] * p_end[j];
            if best.map_or(true, |b| score > b.score) {
                best = Some(Span { start: i, end: j, score });
            }
        }
        best
    }

    /// Decode a row-major batch where every row has `row_len` positions.
    pub fn decode_rows(
        &self,
        p_start: &[f32],
        p_end:   &[f32],
        mask:    &[f32],
        row_len: usize,
    ) -> Vec<Option<Span>> {
        if row_len == 0 {
            return Vec::new();
        }
        p_start
            .chunks(row_len)
            .zip(p_end.chunks(row_len))
            .zip(mask.chunks(row_len))
            .map(|((s, e), m)| self.decode(s, e, m))
            .collect()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    /// Reference O(n²) search with the same tie-break order.
    fn brute_force(p_start: &[f32], p_end: &[f32], mask: &[f32], k: Option<usize>) -> Option<Span> {
        let mut best: Option<Span> = None;
        for j in 0..p_end.len() {
            let mut best_i: Option<usize> = None;
            for i in 0..=j {
                if mask[i] <= 0.0 || mask[j] <= 0.0 || k.is_some_and(|k| j - i >= k) {
                    continue;
                }
                if best_i.map_or(true, |b| p_start[i] > p_start[b]) {
                    best_i = Some(i);
                }
            }
            if let Some(i) = best_i {
                let score = p_start[i] * p_end[j];
                if best.map_or(true, |b| score > b.score) {
                    best = Some(Span { start: i, end: j, score });
                }
            }
        }
        best
    }

    #[test]
    fn test_reference_example() {
        let span = SpanDecoder::unbounded()
            .decode(&[0.1, 0.6, 0.3], &[0.2, 0.1, 0.7], &[1.0, 1.0, 1.0])
            .unwrap();
        assert_eq!((span.start, span.end), (1, 2));
        assert!((span.score - 0.42).abs() < 1e-6);
    }

    #[test]
    fn test_start_never_exceeds_end() {
        // Start peaked last, end peaked first.
        let span = SpanDecoder::unbounded()
            .decode(&[0.1, 0.1, 0.8], &[0.8, 0.1, 0.1], &[1.0, 1.0, 1.0])
            .unwrap();
        assert!(span.start <= span.end);
        assert_eq!((span.start, span.end), (0, 0));
    }

    #[test]
    fn test_window_of_one_forces_single_token_spans() {
        let decoder = SpanDecoder::new(Some(1)).unwrap();
        let span = decoder
            .decode(&[0.1, 0.6, 0.3], &[0.2, 0.1, 0.7], &[1.0, 1.0, 1.0])
            .unwrap();
        assert_eq!((span.start, span.end), (2, 2));
        assert!(span.end - span.start < 1);
    }

    #[test]
    fn test_window_limits_span_length() {
        let p_start = [0.9, 0.02, 0.02, 0.02, 0.04];
        let p_end   = [0.01, 0.01, 0.01, 0.01, 0.96];
        let mask    = [1.0; 5];
        let unbounded = SpanDecoder::unbounded().decode(&p_start, &p_end, &mask).unwrap();
        assert_eq!((unbounded.start, unbounded.end), (0, 4));

        let limited = SpanDecoder::new(Some(3)).unwrap().decode(&p_start, &p_end, &mask).unwrap();
        assert!(limited.len() <= 3);
        assert_eq!((limited.start, limited.end), (4, 4));
    }

    #[test]
    fn test_masked_positions_are_skipped() {
        let span = SpanDecoder::unbounded()
            .decode(&[0.9, 0.05, 0.05], &[0.05, 0.05, 0.9], &[0.0, 1.0, 1.0])
            .unwrap();
        assert_eq!((span.start, span.end), (1, 2));
    }

    #[test]
    fn test_all_masked_returns_none() {
        assert_eq!(SpanDecoder::unbounded().decode(&[0.5, 0.5], &[0.5, 0.5], &[0.0, 0.0]), None);
        assert_eq!(SpanDecoder::unbounded().decode(&[], &[], &[]), None);
    }

    #[test]
    fn test_ties_resolve_to_first_span() {
        let span = SpanDecoder::unbounded()
            .decode(&[0.5, 0.5], &[0.5, 0.5], &[1.0, 1.0])
            .unwrap();
        assert_eq!((span.start, span.end), (0, 0));
    }

    #[test]
    fn test_zero_window_is_a_config_error() {
        assert_eq!(SpanDecoder::new(Some(0)), Err(ConfigError::ZeroSpanLimit));
    }

    #[test]
    fn test_matches_brute_force_on_fixed_grid() {
        let p_start = [0.05, 0.30, 0.10, 0.30, 0.05, 0.20];
        let p_end   = [0.10, 0.05, 0.40, 0.05, 0.30, 0.10];
        let masks = [
            [1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
            [1.0, 0.0, 1.0, 1.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        ];
        for mask in masks {
            for k in [None, Some(1), Some(2), Some(4)] {
                let fast = SpanDecoder::new(k).unwrap().decode(&p_start, &p_end, &mask);
                assert_eq!(fast, brute_force(&p_start, &p_end, &mask, k), "mask {mask:?}, k {k:?}");
            }
        }
    }

    #[test]
    fn test_decode_rows_splits_batch() {
        let p_start = [0.1, 0.6, 0.3, 0.7, 0.2, 0.1];
        let p_end   = [0.2, 0.1, 0.7, 0.6, 0.3, 0.1];
        let mask    = [1.0, 1.0, 1.0, 1.0, 1.0, 0.0];
        let spans = SpanDecoder::unbounded().decode_rows(&p_start, &p_end, &mask, 3);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].map(|s| (s.start, s.end)), Some((1, 2)));
        assert_eq!(spans[1].map(|s| (s.start, s.end)), Some((0, 0)));
    }

    #[test]
    fn test_exact_match_and_f1() {
        let span = Span { start: 2, end: 5, score: 1.0 };
        assert_eq!(span.exact_match([2, 5]), 1.0);
        assert_eq!(span.exact_match([2, 4]), 0.0);
        // overlap 2 of 4 predicted, 2 of 2 gold
        assert!((span.f1([4, 5]) - (2.0 * 0.5 * 1.0 / 1.5)).abs() < 1e-9);
        assert_eq!(span.f1([7, 9]), 0.0);
    }
}
