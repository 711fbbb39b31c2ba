// ============================================================
// Layer 5 — Interaction Layer
// ============================================================
// Bidirectional attention between context C [b, n, dc] and
// question Q [b, m, dq], built around one score matrix
// S [b, n, m].
//
//   context → question   A = softmax_q(S) · Q                  [b, n, dq]
//   question → context   r = reduce_q(S)                       [b, n, 1]
//                        B = Σ_n softmax_n(r) · C, broadcast   [b, n, dc]
//
// Question positions with mask 0 never receive weight; context
// positions with mask 0 are zeroed in every output stream.
//
// Optional extras:
//   - shared scores: question→context reuses the context→question
//     matrix instead of owning a scorer (same score type and width)
//   - combo: C ∘ A is appended when dc == dq; C ∘ B replaces B
//
// All streams are then fused to the interaction width.
//
// Reference: Seo et al. (2017) BiDAF, §2.4
//            Yu et al. (2018) QANet, §2.2 Context-Query Attention

use burn::{
    module::{Ignored, Param},
    nn::{Linear, LinearConfig},
    prelude::*,
    tensor::Distribution,
};

use crate::domain::{
    error::ConfigError,
    options::{Activation, FusionKind, Q2cReduce, ScoreType, Sharing},
};
use crate::ml::{
    fusion::{fuse, FusionLayer, FusionLayerConfig, Stream},
    masked::{masked_logits, masked_softmax, EPSILON},
};

// ─── Scorer ───────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct ScorerConfig {
    pub score_type:    ScoreType,
    pub context_dim:   usize,
    pub question_dim:  usize,
    /// Projection width for dot / scaled_dot; unused by trilinear
    pub attention_dim: usize,
}

impl ScorerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.score_type {
            ScoreType::Dot | ScoreType::ScaledDot => ConfigError::check_positive("attention dim", self.attention_dim),
            ScoreType::Trilinear if self.context_dim != self.question_dim => Err(ConfigError::TrilinearWidth {
                context:  self.context_dim,
                question: self.question_dim,
            }),
            ScoreType::Trilinear => Ok(()),
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Scorer<B>, ConfigError> {
        self.validate()?;
        let mut scorer = Scorer {
            context_proj:    None,
            question_proj:   None,
            context_weight:  None,
            question_weight: None,
            product_weight:  None,
            score_type:      Ignored(self.score_type),
            attention_dim:   self.attention_dim,
        };

        match self.score_type {
            ScoreType::Dot | ScoreType::ScaledDot => {
                let proj = |input| {
                    LinearConfig::new(input, self.attention_dim).with_bias(false).init(device)
                };
                scorer.context_proj  = Some(proj(self.context_dim));
                scorer.question_proj = Some(proj(self.question_dim));
            }
            ScoreType::Trilinear => {
                let dim = self.context_dim;
                scorer.context_weight  = Some(LinearConfig::new(dim, 1).init(device));
                scorer.question_weight = Some(LinearConfig::new(dim, 1).with_bias(false).init(device));
                let bound = (6.0 / (dim + 1) as f64).sqrt();
                scorer.product_weight = Some(Param::from_tensor(Tensor::random(
                    [dim],
                    Distribution::Uniform(-bound, bound),
                    device,
                )));
            }
        }
        Ok(scorer)
    }
}

#[derive(Module, Debug)]
pub struct Scorer<B: Backend> {
    context_proj:    Option<Linear<B>>,
    question_proj:   Option<Linear<B>>,
    context_weight:  Option<Linear<B>>,
    question_weight: Option<Linear<B>>,
    product_weight:  Option<Param<Tensor<B, 1>>>,
    score_type:      Ignored<ScoreType>,
    attention_dim:   usize,
}

impl<B: Backend> Scorer<B> {
    /// c: [b, n, dc], q: [b, m, dq] → S: [b, n, m]
    pub fn score(&self, c: Tensor<B, 3>, q: Tensor<B, 3>) -> Tensor<B, 3> {
        match (
            &self.context_proj,
            &self.question_proj,
            &self.context_weight,
            &self.question_weight,
            &self.product_weight,
        ) {
            (Some(cp), Some(qp), _, _, _) => {
                let scores = cp.forward(c).matmul(qp.forward(q).swap_dims(1, 2));
                match *self.score_type {
                    ScoreType::ScaledDot => scores.div_scalar((self.attention_dim as f32).sqrt()),
                    _ => scores,
                }
            }
            (_, _, Some(cw), Some(qw), Some(pw)) => {
                let dim = c.dims()[2];
                let from_context  = cw.forward(c.clone());                  // [b, n, 1]
                let from_question = qw.forward(q.clone()).swap_dims(1, 2);  // [b, 1, m]
                let product = (c * pw.val().reshape([1, 1, dim])).matmul(q.swap_dims(1, 2));
                product + from_context + from_question
            }
            _ => unreachable!("scorer built without parameters for {}", *self.score_type),
        }
    }
}

// ─── Attention Directions ─────────────────────────────────────────────────────
/// Returns (A [b, n, dq], weights [b, n, m]).
pub fn context_to_question<B: Backend>(
    scores: Tensor<B, 3>,
    q:      Tensor<B, 3>,
    q_mask: Tensor<B, 3>,
    c_mask: Tensor<B, 3>,
) -> (Tensor<B, 3>, Tensor<B, 3>) {
    let [batch, m, _] = q.dims();
    let weights = masked_softmax(scores, q_mask.reshape([batch, 1, m]), 2);
    (weights.clone().matmul(q) * c_mask, weights)
}

/// Returns B [b, n, dc]: one attended context vector, repeated at
/// every valid context position.
pub fn question_to_context<B: Backend>(
    scores: Tensor<B, 3>,
    c:      Tensor<B, 3>,
    q_mask: Tensor<B, 3>,
    c_mask: Tensor<B, 3>,
    reduce: Q2cReduce,
) -> Tensor<B, 3> {
    let [batch, n, _] = c.dims();
    let m = q_mask.dims()[1];
    let q_key = q_mask.reshape([batch, 1, m]);

    let reduced = match reduce {
        Q2cReduce::Max => masked_logits(scores, q_key).max_dim(2),
        Q2cReduce::Mean => {
            let count = q_key.clone().sum_dim(2).clamp_min(EPSILON);
            (scores * q_key).sum_dim(2) / count
        }
    };
    let weights = masked_softmax(reduced, c_mask.clone(), 1);   // [b, n, 1]
    let pooled  = (weights * c).sum_dim(1);                     // [b, 1, dc]
    pooled.repeat_dim(1, n) * c_mask
}

// ─── Config ───────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct InteractionConfig {
    pub context_dim:  usize,
    pub question_dim: usize,

    #[config(default = true)]
    pub c2q_enable:        bool,
    #[config(default = "ScoreType::Trilinear")]
    pub c2q_score:         ScoreType,
    #[config(default = 0)]
    pub c2q_attention_dim: usize,

    #[config(default = true)]
    pub q2c_enable:        bool,
    #[config(default = "ScoreType::Trilinear")]
    pub q2c_score:         ScoreType,
    #[config(default = 0)]
    pub q2c_attention_dim: usize,
    #[config(default = "Q2cReduce::Max")]
    pub q2c_reduce:        Q2cReduce,

    /// Share one score matrix between both directions
    #[config(default = "Sharing::Independent")]
    pub sharing: Sharing,
    #[config(default = false)]
    pub combo:   bool,

    #[config(default = "FusionKind::Conv")]
    pub fusion_kind:       FusionKind,
    pub fusion_unit_dim:   usize,
    #[config(default = 1)]
    pub fusion_num_layer:  usize,
    #[config(default = "Activation::Relu")]
    pub fusion_activation: Activation,
    #[config(default = 0.0)]
    pub fusion_dropout:    f64,
}

impl InteractionConfig {
    /// Question→context reads the context→question matrix.
    pub fn shares_scores(&self) -> bool {
        self.sharing.is_shared()
            && self.c2q_enable
            && self.q2c_enable
            && self.c2q_score == self.q2c_score
            && self.c2q_attention_dim == self.q2c_attention_dim
    }

    fn c2q_combo(&self) -> bool {
        self.combo && self.context_dim == self.question_dim
    }

    /// Width of the concatenated streams entering the final fusion.
    pub fn concat_dim(&self) -> usize {
        let mut dim = self.context_dim;
        if self.c2q_enable {
            dim += self.question_dim;
            if self.c2q_combo() {
                dim += self.question_dim;
            }
        }
        if self.q2c_enable {
            dim += self.context_dim;
        }
        dim
    }

    fn fusion(&self) -> FusionLayerConfig {
        FusionLayerConfig::new(self.fusion_kind, self.concat_dim(), self.fusion_unit_dim)
            .with_num_layer(self.fusion_num_layer)
            .with_activation(self.fusion_activation)
            .with_dropout(self.fusion_dropout)
    }

    pub fn output_dim(&self) -> usize {
        self.fusion().output_dim()
    }

    /// Scorers this configuration builds: (c2q, q2c). A shared
    /// matrix leaves q2c without its own.
    fn scorers(&self) -> (Option<ScorerConfig>, Option<ScorerConfig>) {
        let scorer = |score_type, attention_dim| {
            ScorerConfig::new(score_type, self.context_dim, self.question_dim, attention_dim)
        };
        let c2q = self.c2q_enable.then(|| scorer(self.c2q_score, self.c2q_attention_dim));
        let q2c = (self.q2c_enable && !self.shares_scores()).then(|| scorer(self.q2c_score, self.q2c_attention_dim));
        (c2q, q2c)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (c2q, q2c) = self.scorers();
        for scorer in c2q.iter().chain(q2c.iter()) {
            scorer.validate()?;
        }
        self.fusion().validate()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<InteractionLayer<B>, ConfigError> {
        self.validate()?;
        let (c2q, q2c) = self.scorers();
        let c2q_scorer = c2q.map(|s| s.init(device)).transpose()?;
        let q2c_scorer = q2c.map(|s| s.init(device)).transpose()?;

        Ok(InteractionLayer {
            c2q_scorer,
            q2c_scorer,
            fusion:     self.fusion().init(device)?,
            q2c_enable: self.q2c_enable,
            q2c_reduce: Ignored(self.q2c_reduce),
            c2q_combo:  self.c2q_combo(),
            q2c_combo:  self.combo,
        })
    }
}

// ─── Layer ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct InteractionLayer<B: Backend> {
    c2q_scorer: Option<Scorer<B>>,
    /// `None` while enabled means the matrix is shared with c2q
    q2c_scorer: Option<Scorer<B>>,
    fusion:     FusionLayer<B>,
    q2c_enable: bool,
    q2c_reduce: Ignored<Q2cReduce>,
    c2q_combo:  bool,
    q2c_combo:  bool,
}

impl<B: Backend> InteractionLayer<B> {
    pub fn shares_scores(&self) -> bool {
        self.q2c_enable && self.q2c_scorer.is_none()
    }

    /// The un-fused streams: context, then c2q (+ combo), then q2c.
    pub fn streams(&self, question: Stream<B>, context: Stream<B>) -> Vec<Stream<B>> {
        let (q, q_mask) = question;
        let (c, c_mask) = context;
        let mut streams = vec![(c.clone(), c_mask.clone())];

        let c2q_scores = self.c2q_scorer.as_ref().map(|s| s.score(c.clone(), q.clone()));

        if let Some(scores) = c2q_scores.clone() {
            let (attended, _) = context_to_question(scores, q.clone(), q_mask.clone(), c_mask.clone());
            if self.c2q_combo {
                streams.push((attended.clone(), c_mask.clone()));
                streams.push((c.clone() * attended, c_mask.clone()));
            } else {
                streams.push((attended, c_mask.clone()));
            }
        }

        if self.q2c_enable {
            let scores = match (&self.q2c_scorer, c2q_scores) {
                (Some(scorer), _) => Some(scorer.score(c.clone(), q)),
                (None, shared) => shared,
            };
            if let Some(scores) = scores {
                let attended = question_to_context(scores, c.clone(), q_mask, c_mask.clone(), *self.q2c_reduce);
                let attended = if self.q2c_combo { c * attended } else { attended };
                streams.push((attended, c_mask));
            }
        }
        streams
    }

    /// (question, context) → fused [b, n, output_dim] with the context mask.
    pub fn forward(&self, question: Stream<B>, context: Stream<B>) -> Stream<B> {
        fuse(self.streams(question, context), Some(&self.fusion))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn side(len: usize, dim: usize, mask: &[f32]) -> Stream<B> {
        let device = Default::default();
        let x = Tensor::<B, 3>::random([1, len, dim], Distribution::Normal(0.0, 1.0), &device);
        let m = Tensor::<B, 1>::from_floats(mask, &device).reshape([1, len, 1]);
        (x, m)
    }

    fn config(score: ScoreType, sharing: Sharing) -> InteractionConfig {
        InteractionConfig::new(4, 4, 6)
            .with_c2q_score(score)
            .with_q2c_score(score)
            .with_c2q_attention_dim(3)
            .with_q2c_attention_dim(3)
            .with_sharing(sharing)
    }

    #[test]
    fn test_c2q_never_attends_masked_question_positions() {
        let device = Default::default();
        let scorer = ScorerConfig::new(ScoreType::ScaledDot, 4, 4, 3).init::<B>(&device).unwrap();
        let (c, c_mask) = side(3, 4, &[1.0, 1.0, 0.0]);
        let (q, q_mask) = side(4, 4, &[1.0, 0.0, 1.0, 0.0]);

        let scores = scorer.score(c, q.clone());
        assert_eq!(scores.dims(), [1, 3, 4]);
        let (attended, weights) = context_to_question(scores, q, q_mask, c_mask);
        assert_eq!(attended.dims(), [1, 3, 4]);

        let w = weights.into_data().to_vec::<f32>().unwrap();
        for row in w.chunks(4) {
            assert_eq!(row[1], 0.0);
            assert_eq!(row[3], 0.0);
            assert!((row[0] + row[2] - 1.0).abs() < 1e-5);
        }
        // masked context position is zeroed
        let a = attended.into_data().to_vec::<f32>().unwrap();
        assert!(a[8..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_q2c_broadcasts_one_vector_over_valid_context() {
        let device = Default::default();
        let (c, c_mask) = side(3, 2, &[1.0, 1.0, 0.0]);
        let scores = Tensor::<B, 3>::random([1, 3, 2], Distribution::Default, &device);
        let q_mask = Tensor::<B, 3>::ones([1, 2, 1], &device);
        for reduce in [Q2cReduce::Max, Q2cReduce::Mean] {
            let out = question_to_context(scores.clone(), c.clone(), q_mask.clone(), c_mask.clone(), reduce)
                .into_data()
                .to_vec::<f32>()
                .unwrap();
            assert_eq!(&out[0..2], &out[2..4]);
            assert_eq!(&out[4..6], &[0.0, 0.0]);
        }
    }

    #[test]
    fn test_shared_matrix_matches_separately_computed_q2c() {
        let layer = config(ScoreType::ScaledDot, Sharing::Shared).init::<B>(&Default::default()).unwrap();
        assert!(layer.shares_scores());

        let question = side(4, 4, &[1.0, 1.0, 1.0, 0.0]);
        let context  = side(5, 4, &[1.0, 1.0, 1.0, 1.0, 0.0]);
        let streams = layer.streams(question.clone(), context.clone());
        assert_eq!(streams.len(), 3);

        let scorer = layer.c2q_scorer.as_ref().unwrap();
        let scores = scorer.score(context.0.clone(), question.0.clone());
        let expected = question_to_context(scores, context.0, question.1, context.1, Q2cReduce::Max);
        assert_eq!(streams[2].0.clone().into_data(), expected.into_data());
    }

    #[test]
    fn test_sharing_needs_matching_score_settings() {
        let cfg = config(ScoreType::Dot, Sharing::Shared).with_q2c_score(ScoreType::Trilinear);
        assert!(!cfg.shares_scores());
        let layer = cfg.init::<B>(&Default::default()).unwrap();
        assert!(!layer.shares_scores());
    }

    #[test]
    fn test_combo_adds_streams_and_output_has_fusion_width() {
        let cfg = config(ScoreType::Trilinear, Sharing::Independent).with_combo(true);
        // context + c2q + c2q combo + q2c combo
        assert_eq!(cfg.concat_dim(), 16);
        let layer = cfg.init::<B>(&Default::default()).unwrap();

        let (x, mask) = layer.forward(side(4, 4, &[1.0; 4]), side(5, 4, &[1.0, 1.0, 1.0, 0.0, 0.0]));
        assert_eq!(x.dims(), [1, 5, 6]);
        assert_eq!(mask.into_data().to_vec::<f32>().unwrap(), vec![1.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_trilinear_requires_equal_widths() {
        let err = ScorerConfig::new(ScoreType::Trilinear, 4, 6, 0).init::<B>(&Default::default());
        assert!(matches!(err, Err(ConfigError::TrilinearWidth { context: 4, question: 6 })));
    }

    #[test]
    fn test_disabled_directions_shrink_the_concat() {
        let cfg = config(ScoreType::Dot, Sharing::Independent).with_q2c_enable(false);
        assert_eq!(cfg.concat_dim(), 8);
        let layer = cfg.init::<B>(&Default::default()).unwrap();
        assert_eq!(layer.streams(side(2, 4, &[1.0; 2]), side(3, 4, &[1.0; 3])).len(), 2);
    }
}
