// ============================================================
// Layer 5 — Featurizers
// ============================================================
// Turn token ids into per-token feature vectors.
//
//   Word:          [b, s]     → embed → dropout               → [b, s, d]
//   Subword/Char:  [b, s, k]  → embed → dropout → pool over k → [b, s, d]
//
// The word mask passes through untouched. For subword/char the
// pooled token mask is 1 wherever at least one of the k slots is
// real, so a word whose sub-tokens were all truncated away stays
// invalid.
//
// Reference: Yu et al. (2018) QANet, §2.2 Input Embedding Layer

use burn::{
    module::{Ignored, Param},
    nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig},
    prelude::*,
};

use crate::domain::{
    error::{ConfigError, EmbeddingError},
    options::PoolingKind,
};
use crate::ml::masked::{EPSILON, MASK_PENALTY};

// ─── WordFeat ─────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct WordFeatConfig {
    pub vocab_size: usize,
    pub embed_dim:  usize,
    #[config(default = 0.0)]
    pub dropout:    f64,
    /// Reserve a write-once slot for externally computed vectors
    #[config(default = false)]
    pub pretrained: bool,
    #[config(default = true)]
    pub trainable:  bool,
}

impl WordFeatConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<WordFeat<B>, ConfigError> {
        ConfigError::check_positive("word vocab size", self.vocab_size)?;
        ConfigError::check_positive("word embed dim", self.embed_dim)?;
        ConfigError::check_rate("word dropout", self.dropout)?;

        let mut embedding = EmbeddingConfig::new(self.vocab_size, self.embed_dim).init(device);
        if !self.trainable {
            embedding = embedding.no_grad();
        }
        Ok(WordFeat {
            embedding,
            dropout:    DropoutConfig::new(self.dropout).init(),
            pretrained: self.pretrained,
            trainable:  self.trainable,
            loaded:     false,
        })
    }
}

#[derive(Module, Debug)]
pub struct WordFeat<B: Backend> {
    pub(crate) embedding: Embedding<B>,
    dropout: Dropout,
    pretrained: bool,
    trainable:  bool,
    loaded:     bool,
}

impl<B: Backend> WordFeat<B> {
    /// ids: [b, s], mask: [b, s, 1] → ([b, s, d], mask)
    pub fn forward(&self, ids: Tensor<B, 2, Int>, mask: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let x = self.dropout.forward(self.embedding.forward(ids));
        (x, mask)
    }

    pub fn embed_dim(&self) -> usize {
        self.embedding.weight.dims()[1]
    }

    /// A frozen pretrained table must be filled before training.
    pub fn check_loaded(&self) -> Result<(), EmbeddingError> {
        if self.pretrained && !self.trainable && !self.loaded {
            return Err(EmbeddingError::NotLoaded);
        }
        Ok(())
    }

    /// Fill the pretrained slot. Allowed exactly once, with a
    /// `[vocab, dim]` table matching the configured shape.
    pub fn load_pretrained(&mut self, weights: Tensor<B, 2>) -> Result<(), EmbeddingError> {
        if !self.pretrained {
            return Err(EmbeddingError::NotPretrained);
        }
        if self.loaded {
            return Err(EmbeddingError::AlreadyLoaded);
        }
        let expected = self.embedding.weight.dims();
        let actual   = weights.dims();
        if expected != actual {
            return Err(EmbeddingError::ShapeMismatch { expected, actual });
        }

        let weight = Param::from_tensor(weights);
        self.embedding.weight = if self.trainable { weight } else { weight.set_require_grad(false) };
        self.loaded = true;
        tracing::debug!("Loaded pretrained word embedding {:?}", expected);
        Ok(())
    }
}

// ─── Subword / Char ───────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct PooledFeatConfig {
    pub vocab_size: usize,
    pub embed_dim:  usize,
    #[config(default = "PoolingKind::Max")]
    pub pooling:    PoolingKind,
    #[config(default = 0.0)]
    pub dropout:    f64,
    #[config(default = true)]
    pub trainable:  bool,
}

impl PooledFeatConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<PooledFeat<B>, ConfigError> {
        ConfigError::check_positive("sub-token vocab size", self.vocab_size)?;
        ConfigError::check_positive("sub-token embed dim", self.embed_dim)?;
        ConfigError::check_rate("sub-token dropout", self.dropout)?;

        let mut embedding = EmbeddingConfig::new(self.vocab_size, self.embed_dim).init(device);
        if !self.trainable {
            embedding = embedding.no_grad();
        }
        Ok(PooledFeat {
            embedding,
            dropout: DropoutConfig::new(self.dropout).init(),
            pooling: Ignored(self.pooling),
        })
    }
}

/// Sub-token featurizer: embedding lookup over an inner axis
/// followed by masked pooling back to one vector per token.
#[derive(Module, Debug)]
pub struct PooledFeat<B: Backend> {
    pub(crate) embedding: Embedding<B>,
    dropout: Dropout,
    pooling: Ignored<PoolingKind>,
}

pub type SubwordFeat<B> = PooledFeat<B>;
pub type CharFeat<B>    = PooledFeat<B>;

impl<B: Backend> PooledFeat<B> {
    /// ids, mask: [b, s, k] → ([b, s, d], [b, s, 1])
    pub fn forward(&self, ids: Tensor<B, 3, Int>, mask: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [batch, seq, sub] = ids.dims();
        let dim = self.embed_dim();

        // Embedding only accepts rank-2 ids, so fold the sub axis in.
        let x = self
            .embedding
            .forward(ids.reshape([batch, seq * sub]))
            .reshape([batch, seq, sub, dim]);
        let x = self.dropout.forward(x);

        let slot_mask  = mask.clone().reshape([batch, seq, sub, 1]);
        let token_mask = mask.max_dim(2); // [b, s, 1]

        let pooled = match *self.pooling {
            PoolingKind::Max => {
                let penalty = slot_mask.neg().add_scalar(1.0).mul_scalar(MASK_PENALTY);
                (x + penalty).max_dim(2).reshape([batch, seq, dim]) * token_mask.clone()
            }
            PoolingKind::Avg => {
                let count = slot_mask.clone().sum_dim(2).clamp_min(EPSILON);
                ((x * slot_mask).sum_dim(2) / count).reshape([batch, seq, dim])
            }
        };
        (pooled, token_mask)
    }

    pub fn embed_dim(&self) -> usize {
        self.embedding.weight.dims()[1]
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type B = NdArray;

    /// Row i of the table is filled with the value i.
    fn ramp_table(vocab: usize, dim: usize) -> Tensor<B, 2> {
        let data: Vec<f32> = (0..vocab).flat_map(|i| std::iter::repeat(i as f32).take(dim)).collect();
        Tensor::from_data(TensorData::new(data, [vocab, dim]), &Default::default())
    }

    fn pooled(pooling: PoolingKind) -> PooledFeat<B> {
        let mut feat = PooledFeatConfig::new(10, 2)
            .with_pooling(pooling)
            .init::<B>(&Default::default())
            .unwrap();
        feat.embedding.weight = Param::from_tensor(ramp_table(10, 2));
        feat
    }

    fn inputs() -> (Tensor<B, 3, Int>, Tensor<B, 3>) {
        let device = Default::default();
        // token 0: slots [3, 7, pad]; token 1: all padding
        let ids  = Tensor::<B, 3, Int>::from_ints([[[3, 7, 0], [0, 0, 0]]], &device);
        let mask = Tensor::<B, 3>::from_floats([[[1.0, 1.0, 0.0], [0.0, 0.0, 0.0]]], &device);
        (ids, mask)
    }

    #[test]
    fn test_word_feat_keeps_mask() {
        let device = Default::default();
        let feat = WordFeatConfig::new(20, 4).init::<B>(&device).unwrap();
        let ids  = Tensor::<B, 2, Int>::from_ints([[1, 2, 0]], &device);
        let mask = Tensor::<B, 3>::from_floats([[[1.0], [1.0], [0.0]]], &device);
        let (x, out_mask) = feat.forward(ids, mask.clone());
        assert_eq!(x.dims(), [1, 3, 4]);
        assert_eq!(out_mask.into_data(), mask.into_data());
    }

    #[test]
    fn test_max_pooling_ignores_padded_slots() {
        let (ids, mask) = inputs();
        let (x, token_mask) = pooled(PoolingKind::Max).forward(ids, mask);
        let x = x.into_data().to_vec::<f32>().unwrap();
        // max(3, 7) = 7; the padded slot (row 0) must not win either
        assert_eq!(&x[..2], &[7.0, 7.0]);
        // fully padded token is zeroed
        assert_eq!(&x[2..], &[0.0, 0.0]);
        assert_eq!(token_mask.into_data().to_vec::<f32>().unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_avg_pooling_divides_by_real_slots_and_stays_finite() {
        let (ids, mask) = inputs();
        let (x, _) = pooled(PoolingKind::Avg).forward(ids, mask);
        let x = x.into_data().to_vec::<f32>().unwrap();
        assert_eq!(&x[..2], &[5.0, 5.0]);
        assert!(x[2..].iter().all(|v| v.is_finite() && *v == 0.0));
    }

    #[test]
    fn test_pretrained_slot_is_write_once() {
        let device = Default::default();
        let mut feat = WordFeatConfig::new(10, 2).with_pretrained(true).init::<B>(&device).unwrap();
        feat.load_pretrained(ramp_table(10, 2)).unwrap();

        let ids = Tensor::<B, 2, Int>::from_ints([[4]], &device);
        let (x, _) = feat.forward(ids, Tensor::ones([1, 1, 1], &device));
        assert_eq!(x.into_data().to_vec::<f32>().unwrap(), vec![4.0, 4.0]);

        assert_eq!(feat.load_pretrained(ramp_table(10, 2)), Err(EmbeddingError::AlreadyLoaded));
    }

    #[test]
    fn test_pretrained_slot_misuse_is_rejected() {
        let device = Default::default();
        let mut plain = WordFeatConfig::new(10, 2).init::<B>(&device).unwrap();
        assert_eq!(plain.load_pretrained(ramp_table(10, 2)), Err(EmbeddingError::NotPretrained));

        let mut slot = WordFeatConfig::new(10, 2).with_pretrained(true).init::<B>(&device).unwrap();
        assert_eq!(
            slot.load_pretrained(ramp_table(8, 2)),
            Err(EmbeddingError::ShapeMismatch { expected: [10, 2], actual: [8, 2] })
        );
        // a failed load leaves the slot open
        assert!(slot.load_pretrained(ramp_table(10, 2)).is_ok());
    }

    #[test]
    fn test_frozen_table_receives_no_gradient() {
        type AB = Autodiff<NdArray>;
        let device = Default::default();
        let frozen = WordFeatConfig::new(5, 3).with_trainable(false).init::<AB>(&device).unwrap();
        let ids = Tensor::<AB, 2, Int>::from_ints([[1, 2]], &device);
        let (x, _) = frozen.forward(ids, Tensor::ones([1, 2, 1], &device));
        let grads = x.sum().backward();
        assert!(frozen.embedding.weight.val().grad(&grads).is_none());
    }

    #[test]
    fn test_invalid_dropout_is_rejected() {
        let err = WordFeatConfig::new(5, 3).with_dropout(1.5).init::<B>(&Default::default());
        assert!(matches!(err, Err(ConfigError::InvalidRate { .. })));
    }
}
