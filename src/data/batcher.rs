// ============================================================
// Layer 4 — Reading-Comprehension Batcher
// ============================================================
// Converts a slice of RcSamples into device tensors.
//
// Samples arrive unpadded, so padding happens here, per batch:
// every axis is padded to the longest item in the batch (capped
// by BatchLimits) with id 0, and the masks are derived from the
// ids afterwards:
//
//   word ids      [b, seq]         word mask      [b, seq, 1]
//   subword ids   [b, seq, sub]    subword mask   [b, seq, sub]
//   char ids      [b, seq, chr]    char mask      [b, seq, chr]
//
// Masks are float 0/1 tensors so they can multiply activations
// directly. The trailing 1 on the word mask broadcasts over the
// feature axis.
//
// Reference: Burn Book §4 (Batcher)

use burn::prelude::*;

use crate::domain::{
    error::SampleError,
    sample::{RcSample, VocabSizes},
};

// ─── BatchLimits ──────────────────────────────────────────────────────────────
/// Upper bounds applied while padding. `None` pads to the batch
/// maximum; `Some(n)` additionally truncates longer sequences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_question_len: Option<usize>,
    pub max_context_len:  Option<usize>,
    pub max_subword_len:  Option<usize>,
    pub max_char_len:     Option<usize>,
    /// Ids at or past these sizes would index outside the embeddings
    pub vocab:            Option<VocabSizes>,
}

impl BatchLimits {
    /// Whether a sample can be trained on as is: well formed, inside
    /// the vocabulary, and with an answer that survives truncation.
    /// Training drops samples that fail this instead of clipping
    /// their labels.
    pub fn admit(&self, sample: &RcSample) -> Result<(), SampleError> {
        sample.validate()?;
        if let Some(vocab) = &self.vocab {
            sample.check_vocab(vocab)?;
        }
        match (sample.answer, self.max_context_len) {
            (Some([start, end]), Some(limit)) if end >= limit => Err(SampleError::AnswerOutOfRange {
                id: sample.id.clone(),
                start,
                end,
                len: limit,
            }),
            _ => Ok(()),
        }
    }
}

// ─── SideBatch ────────────────────────────────────────────────────────────────
/// Padded ids and masks for one side (question or context).
#[derive(Debug, Clone)]
pub struct SideBatch<B: Backend> {
    pub word:         Tensor<B, 2, Int>,
    pub word_mask:    Tensor<B, 3>,
    pub subword:      Tensor<B, 3, Int>,
    pub subword_mask: Tensor<B, 3>,
    pub char:         Tensor<B, 3, Int>,
    pub char_mask:    Tensor<B, 3>,
}

impl<B: Backend> SideBatch<B> {
    pub fn seq_len(&self) -> usize {
        self.word.dims()[1]
    }
}

// ─── RcBatch ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct RcBatch<B: Backend> {
    pub question: SideBatch<B>,
    pub context:  SideBatch<B>,

    /// Gold start positions — shape: [batch]. Zero for unlabelled samples.
    pub answer_start: Tensor<B, 1, Int>,
    /// Gold end positions — shape: [batch]. Zero for unlabelled samples.
    pub answer_end:   Tensor<B, 1, Int>,

    /// Sample ids, in batch order
    pub ids:     Vec<String>,
    /// Gold spans (after truncation), in batch order
    pub answers: Vec<Option<[usize; 2]>>,
}

impl<B: Backend> RcBatch<B> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

// ─── RcBatcher ────────────────────────────────────────────────────────────────
/// Holds the target device so tensors are created on the correct GPU/CPU.
#[derive(Clone, Debug)]
pub struct RcBatcher<B: Backend> {
    pub device: B::Device,
    pub limits: BatchLimits,
}

impl<B: Backend> RcBatcher<B> {
    pub fn new(device: B::Device, limits: BatchLimits) -> Self {
        Self { device, limits }
    }

    /// Stack `items` into one padded batch.
    ///
    /// # Panics
    /// Panics on an empty slice; callers never build empty batches.
    pub fn batch(&self, items: &[RcSample]) -> RcBatch<B> {
        assert!(!items.is_empty(), "cannot batch zero samples");

        let question = self.side(
            items.iter().map(|s| (&s.question_word, &s.question_subword, &s.question_char)),
            self.limits.max_question_len,
        );
        let context = self.side(
            items.iter().map(|s| (&s.context_word, &s.context_subword, &s.context_char)),
            self.limits.max_context_len,
        );

        // Labels are clipped into the (possibly truncated) context.
        let last = context.seq_len() - 1;
        let answers: Vec<Option<[usize; 2]>> = items
            .iter()
            .map(|s| s.answer.map(|[a, b]| [a.min(last), b.min(last)]))
            .collect();

        let starts: Vec<i32> = answers.iter().map(|a| a.map_or(0, |[s, _]| s as i32)).collect();
        let ends:   Vec<i32> = answers.iter().map(|a| a.map_or(0, |[_, e]| e as i32)).collect();

        RcBatch {
            question,
            context,
            answer_start: Tensor::from_data(TensorData::new(starts, [items.len()]), &self.device),
            answer_end:   Tensor::from_data(TensorData::new(ends, [items.len()]), &self.device),
            ids:          items.iter().map(|s| s.id.clone()).collect(),
            answers,
        }
    }

    fn side<'a>(
        &self,
        rows:  impl Iterator<Item = (&'a Vec<u32>, &'a Vec<Vec<u32>>, &'a Vec<Vec<u32>>)> + Clone,
        limit: Option<usize>,
    ) -> SideBatch<B> {
        let batch = rows.clone().count();
        let seq = cap(rows.clone().map(|(w, _, _)| w.len()).max().unwrap_or(0), limit);

        let words: Vec<Vec<u32>> = rows.clone().map(|(w, _, _)| w.clone()).collect();
        let (word, word_mask) = self.pad_2d(&words, batch, seq);

        let subwords: Vec<&Vec<Vec<u32>>> = rows.clone().map(|(_, s, _)| s).collect();
        let (subword, subword_mask) = self.pad_3d(&subwords, batch, seq, self.limits.max_subword_len);

        let chars: Vec<&Vec<Vec<u32>>> = rows.map(|(_, _, c)| c).collect();
        let (char, char_mask) = self.pad_3d(&chars, batch, seq, self.limits.max_char_len);

        SideBatch { word, word_mask, subword, subword_mask, char, char_mask }
    }

    fn pad_2d(&self, rows: &[Vec<u32>], batch: usize, seq: usize) -> (Tensor<B, 2, Int>, Tensor<B, 3>) {
        let mut ids  = vec![0i32; batch * seq];
        let mut mask = vec![0f32; batch * seq];
        for (b, row) in rows.iter().enumerate() {
            for (t, &id) in row.iter().take(seq).enumerate() {
                ids[b * seq + t]  = id as i32;
                mask[b * seq + t] = if id != 0 { 1.0 } else { 0.0 };
            }
        }
        (
            Tensor::from_data(TensorData::new(ids, [batch, seq]), &self.device),
            Tensor::from_data(TensorData::new(mask, [batch, seq, 1]), &self.device),
        )
    }

    fn pad_3d(
        &self,
        rows:  &[&Vec<Vec<u32>>],
        batch: usize,
        seq:   usize,
        limit: Option<usize>,
    ) -> (Tensor<B, 3, Int>, Tensor<B, 3>) {
        let longest = rows
            .iter()
            .flat_map(|groups| groups.iter().take(seq).map(Vec::len))
            .max()
            .unwrap_or(0);
        let sub = cap(longest, limit);

        let mut ids  = vec![0i32; batch * seq * sub];
        let mut mask = vec![0f32; batch * seq * sub];
        for (b, groups) in rows.iter().enumerate() {
            for (t, group) in groups.iter().take(seq).enumerate() {
                for (k, &id) in group.iter().take(sub).enumerate() {
                    let at = (b * seq + t) * sub + k;
                    ids[at]  = id as i32;
                    mask[at] = if id != 0 { 1.0 } else { 0.0 };
                }
            }
        }
        (
            Tensor::from_data(TensorData::new(ids, [batch, seq, sub]), &self.device),
            Tensor::from_data(TensorData::new(mask, [batch, seq, sub]), &self.device),
        )
    }
}

/// Apply an optional cap, never returning an empty axis.
fn cap(len: usize, limit: Option<usize>) -> usize {
    limit.map_or(len, |l| len.min(l)).max(1)
}
