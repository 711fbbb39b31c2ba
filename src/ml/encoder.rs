// ============================================================
// Layer 5 — Encoder Block / Stacked Encoder
// ============================================================
// One QANet encoder block, applied to (x, mask) in fixed order:
//
//   x ──► input dropout (even-indexed blocks only)
//     ──► + sinusoidal position signal
//     ──► num_conv × [ x + gate · act(sepconv(dropout(LN(x)) · m)) · m ]
//     ──►            [ x + gate · self_attention(LN(x), key mask m) · m ]
//     ──►            [ x + gate · ffn(LN(x)) · m ]
//
// Every sublayer is pre-normalised and residual. The mask is never
// modified: convolution inputs are zeroed at padding and attention
// keys at padding receive no weight, so padding cannot leak into a
// valid position.
//
// Layer dropout (stochastic depth):
//   Sublayer k of a stack with N = (num_conv + 2) · num_blocks
//   sublayers is skipped with probability
//
//       p_k = layer_dropout · (k + skip_offset) / N
//
//   where skip_offset = (num_conv + 2) · block_index. The gate is a
//   single Bernoulli(1 - p_k) draw per call, sampled only when the
//   backend records gradients. Inference always runs every sublayer.
//
// Reference: Yu et al. (2018) QANet, §2.2 Embedding Encoder Layer
//            Huang et al. (2016) Deep Networks with Stochastic Depth
//            Vaswani et al. (2017) Attention Is All You Need

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv1d, Conv1dConfig},
        Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig, PaddingConfig1d,
    },
    prelude::*,
    tensor::Distribution,
};

use crate::domain::{error::ConfigError, options::Activation};
use crate::ml::{activation::activate, masked::masked_softmax};

const MIN_TIMESCALE: f64 = 1.0;
const MAX_TIMESCALE: f64 = 1.0e4;

// ─── Position Signal ──────────────────────────────────────────────────────────
/// Sinusoidal timing signal of shape [1, seq, dim]. The first half of
/// the channels holds sines, the second half cosines, over
/// geometrically spaced timescales from 1 to 10 000. An odd `dim`
/// leaves the last channel at zero.
pub fn position_signal<B: Backend>(seq: usize, dim: usize, device: &B::Device) -> Tensor<B, 3> {
    let num_timescales = dim / 2;
    let log_increment =
        (MAX_TIMESCALE / MIN_TIMESCALE).ln() / (num_timescales.saturating_sub(1).max(1)) as f64;

    let mut signal = vec![0f32; seq * dim];
    for pos in 0..seq {
        for i in 0..num_timescales {
            let inv_timescale = MIN_TIMESCALE * (-(i as f64) * log_increment).exp();
            let angle = pos as f64 * inv_timescale;
            signal[pos * dim + i]                  = angle.sin() as f32;
            signal[pos * dim + num_timescales + i] = angle.cos() as f32;
        }
    }
    Tensor::from_data(TensorData::new(signal, [1, seq, dim]), device)
}

// ─── Layer Dropout ────────────────────────────────────────────────────────────
/// `residual + gate · output`, gate ~ Bernoulli(1 - prob) while
/// training; `residual + output` otherwise.
pub fn layer_dropout<B: Backend>(residual: Tensor<B, 3>, output: Tensor<B, 3>, prob: f64) -> Tensor<B, 3> {
    if !B::ad_enabled() || prob <= 0.0 {
        return residual + output;
    }
    let gate = Tensor::<B, 3>::random([1, 1, 1], Distribution::Bernoulli(1.0 - prob), &output.device());
    residual + output * gate
}

// ─── Config ───────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct EncoderBlockConfig {
    pub unit_dim:      usize,
    pub num_conv:      usize,
    pub num_heads:     usize,
    /// Convolution window; must be odd
    #[config(default = 7)]
    pub window_size:   usize,
    #[config(default = "Activation::Relu")]
    pub activation:    Activation,
    #[config(default = 0.0)]
    pub dropout:       f64,
    #[config(default = 0.0)]
    pub layer_dropout: f64,
    /// Hidden width of the feed-forward sublayer, as a multiple of unit_dim
    #[config(default = 4)]
    pub ffn_expansion: usize,
    #[config(default = true)]
    pub input_dropout: bool,
    /// Sublayers that precede this block in its stack
    #[config(default = 0)]
    pub sublayer_skip: usize,
    /// Sublayers in the whole stack; 0 means this block alone
    #[config(default = 0)]
    pub num_sublayer:  usize,
}

impl EncoderBlockConfig {
    /// Eager validation; runs before any tensor is created.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::check_positive("encoder unit dim", self.unit_dim)?;
        if self.num_heads == 0 || self.unit_dim % self.num_heads != 0 {
            return Err(ConfigError::HeadMismatch { unit_dim: self.unit_dim, num_heads: self.num_heads });
        }
        if self.window_size % 2 == 0 {
            return Err(ConfigError::EvenWindow(self.window_size));
        }
        ConfigError::check_positive("feed-forward expansion", self.ffn_expansion)?;
        ConfigError::check_rate("encoder dropout", self.dropout)?;
        ConfigError::check_rate("encoder layer dropout", self.layer_dropout)?;
        Ok(())
    }

    fn total_sublayers(&self) -> usize {
        if self.num_sublayer == 0 { self.num_conv + 2 } else { self.num_sublayer }
    }

    /// Skip probability of each sublayer: convolutions, then
    /// attention, then feed-forward.
    pub fn sublayer_dropout_probs(&self) -> Vec<f64> {
        let total = self.total_sublayers() as f64;
        (0..self.num_conv + 2)
            .map(|k| self.layer_dropout * (k + self.sublayer_skip) as f64 / total)
            .collect()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<EncoderBlock<B>, ConfigError> {
        self.validate()?;
        let probs = self.sublayer_dropout_probs();
        let dim = self.unit_dim;

        let convs = (0..self.num_conv)
            .map(|i| SepConv {
                norm:      LayerNormConfig::new(dim).init(device),
                depthwise: Conv1dConfig::new(dim, dim, self.window_size)
                    .with_groups(dim)
                    .with_padding(PaddingConfig1d::Same)
                    .with_bias(false)
                    .init(device),
                pointwise: Conv1dConfig::new(dim, dim, 1).init(device),
                dropout:   DropoutConfig::new(if i % 2 == 0 { self.dropout } else { 0.0 }).init(),
                activation:    Ignored(self.activation),
                layer_dropout: probs[i],
            })
            .collect();

        let attention = MaskedSelfAttention {
            norm:    LayerNormConfig::new(dim).init(device),
            query:   LinearConfig::new(dim, dim).init(device),
            key:     LinearConfig::new(dim, dim).init(device),
            value:   LinearConfig::new(dim, dim).init(device),
            output:  LinearConfig::new(dim, dim).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            num_heads:     self.num_heads,
            layer_dropout: probs[self.num_conv],
        };

        let hidden = dim * self.ffn_expansion;
        let ffn = FeedForward {
            norm:    LayerNormConfig::new(dim).init(device),
            hidden:  LinearConfig::new(dim, hidden).init(device),
            output:  LinearConfig::new(hidden, dim).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation:    Ignored(self.activation),
            layer_dropout: probs[self.num_conv + 1],
        };

        let input_rate = if self.input_dropout { self.dropout } else { 0.0 };
        Ok(EncoderBlock {
            input_dropout: DropoutConfig::new(input_rate).init(),
            convs,
            attention,
            ffn,
        })
    }
}

#[derive(Config, Debug)]
pub struct StackedEncoderConfig {
    pub num_blocks:    usize,
    pub num_conv:      usize,
    pub num_heads:     usize,
    pub unit_dim:      usize,
    #[config(default = 7)]
    pub window_size:   usize,
    #[config(default = "Activation::Relu")]
    pub activation:    Activation,
    #[config(default = 0.0)]
    pub dropout:       f64,
    #[config(default = 0.0)]
    pub layer_dropout: f64,
    #[config(default = 4)]
    pub ffn_expansion: usize,
}

impl StackedEncoderConfig {
    /// Configuration of block `index` within this stack.
    pub fn block_config(&self, index: usize) -> EncoderBlockConfig {
        let per_block = self.num_conv + 2;
        EncoderBlockConfig::new(self.unit_dim, self.num_conv, self.num_heads)
            .with_window_size(self.window_size)
            .with_activation(self.activation)
            .with_dropout(self.dropout)
            .with_layer_dropout(self.layer_dropout)
            .with_ffn_expansion(self.ffn_expansion)
            .with_input_dropout(index % 2 == 0)
            .with_sublayer_skip(per_block * index)
            .with_num_sublayer(per_block * self.num_blocks)
    }

    /// Skip probability of every sublayer in depth order.
    pub fn sublayer_dropout_probs(&self) -> Vec<f64> {
        (0..self.num_blocks)
            .flat_map(|b| self.block_config(b).sublayer_dropout_probs())
            .collect()
    }

    /// Every block shares the checked fields, so the first stands for all.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::check_positive("encoder block count", self.num_blocks)?;
        self.block_config(0).validate()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<StackedEncoder<B>, ConfigError> {
        self.validate()?;
        let blocks = (0..self.num_blocks)
            .map(|b| self.block_config(b).init(device))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StackedEncoder { blocks })
    }
}

// ─── Sublayers ────────────────────────────────────────────────────────────────
/// Depthwise-separable 1-D convolution sublayer.
#[derive(Module, Debug)]
pub struct SepConv<B: Backend> {
    norm:      LayerNorm<B>,
    depthwise: Conv1d<B>,
    pointwise: Conv1d<B>,
    dropout:   Dropout,
    activation:    Ignored<Activation>,
    layer_dropout: f64,
}

impl<B: Backend> SepConv<B> {
    fn forward(&self, x: Tensor<B, 3>, mask: &Tensor<B, 3>) -> Tensor<B, 3> {
        let y = self.dropout.forward(self.norm.forward(x.clone())) * mask.clone();
        let y = self
            .pointwise
            .forward(self.depthwise.forward(y.swap_dims(1, 2)))
            .swap_dims(1, 2);
        let y = activate(y, *self.activation) * mask.clone();
        layer_dropout(x, y, self.layer_dropout)
    }
}

/// Multi-head scaled-dot self-attention with key masking.
#[derive(Module, Debug)]
pub struct MaskedSelfAttention<B: Backend> {
    norm:    LayerNorm<B>,
    query:   Linear<B>,
    key:     Linear<B>,
    value:   Linear<B>,
    output:  Linear<B>,
    dropout: Dropout,
    num_heads:     usize,
    layer_dropout: f64,
}

impl<B: Backend> MaskedSelfAttention<B> {
    /// Attention weights [b, heads, s, s] for already-normalised input.
    pub fn weights(&self, x: Tensor<B, 3>, mask: &Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, seq, dim] = x.dims();
        let head_dim = dim / self.num_heads;
        let q = self.split_heads(self.query.forward(x.clone()));
        let k = self.split_heads(self.key.forward(x));

        let scores = q.matmul(k.swap_dims(2, 3)).div_scalar((head_dim as f32).sqrt());
        let key_mask = mask.clone().reshape([batch, 1, 1, seq]);
        masked_softmax(scores, key_mask, 3)
    }

    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, seq, dim] = x.dims();
        x.reshape([batch, seq, self.num_heads, dim / self.num_heads]).swap_dims(1, 2)
    }

    fn forward(&self, x: Tensor<B, 3>, mask: &Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, seq, dim] = x.dims();
        let y = self.dropout.forward(self.norm.forward(x.clone()));
        let v = self.split_heads(self.value.forward(y.clone()));
        let context = self
            .weights(y, mask)
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, seq, dim]);
        let y = self.output.forward(context) * mask.clone();
        layer_dropout(x, y, self.layer_dropout)
    }
}

/// Two dense layers with a hidden activation.
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    norm:    LayerNorm<B>,
    hidden:  Linear<B>,
    output:  Linear<B>,
    dropout: Dropout,
    activation:    Ignored<Activation>,
    layer_dropout: f64,
}

impl<B: Backend> FeedForward<B> {
    fn forward(&self, x: Tensor<B, 3>, mask: &Tensor<B, 3>) -> Tensor<B, 3> {
        let y = self.dropout.forward(self.norm.forward(x.clone()));
        let y = activate(self.hidden.forward(y), *self.activation);
        let y = self.output.forward(self.dropout.forward(y)) * mask.clone();
        layer_dropout(x, y, self.layer_dropout)
    }
}

// ─── Blocks ───────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    input_dropout: Dropout,
    convs:         Vec<SepConv<B>>,
    attention:     MaskedSelfAttention<B>,
    ffn:           FeedForward<B>,
}

impl<B: Backend> EncoderBlock<B> {
    /// x: [b, s, d], mask: [b, s, 1] → (x', same mask)
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let x = self.input_dropout.forward(x);
        let [_, seq, dim] = x.dims();
        let mut x = x + position_signal::<B>(seq, dim, &mask.device());

        for conv in &self.convs {
            x = conv.forward(x, &mask);
        }
        let x = self.attention.forward(x, &mask);
        let x = self.ffn.forward(x, &mask);
        (x, mask)
    }
}

#[derive(Module, Debug)]
pub struct StackedEncoder<B: Backend> {
    blocks: Vec<EncoderBlock<B>>,
}

impl<B: Backend> StackedEncoder<B> {
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        self.blocks
            .iter()
            .fold((x, mask), |(x, mask), block| block.forward(x, mask))
    }
}
