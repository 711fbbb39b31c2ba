// ============================================================
// Layer 5 — Fusion
// ============================================================
// Combines aligned (tensor, mask) streams into one stream.
//
//   concat   [x1; x2; ...] along the feature axis, no parameters
//   dense    concat → num_layer × (dropout → linear → act)
//   conv     concat → num_layer × (dropout → kernel-1 conv → act)
//   highway  concat → projection → num_layer × highway
//
// The fused mask is the product of the input masks: a position is
// valid only if every stream is valid there. A single stream going
// through concat (or through no fusion layer at all) comes back
// exactly as it went in.

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv1d, Conv1dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation,
};

use crate::domain::{
    error::ConfigError,
    options::{Activation, FusionKind},
};
use crate::ml::activation::activate;

/// A (features, mask) pair: [b, s, d] and [b, s, 1].
pub type Stream<B> = (Tensor<B, 3>, Tensor<B, 3>);

/// Concatenate streams along the feature axis and multiply their
/// masks. The streams must share batch and sequence length.
///
/// # Panics
/// Panics if `streams` is empty.
pub fn concat_streams<B: Backend>(streams: Vec<Stream<B>>) -> Stream<B> {
    let mut streams = streams.into_iter();
    let Some((first, mut mask)) = streams.next() else {
        panic!("fusion needs at least one stream");
    };
    let rest: Vec<Stream<B>> = streams.collect();
    if rest.is_empty() {
        return (first, mask);
    }

    let [batch, seq, _] = first.dims();
    let mut tensors = vec![first];
    for (x, m) in rest {
        let [b, s, _] = x.dims();
        assert!(b == batch && s == seq, "fusion inputs differ in batch or sequence length");
        tensors.push(x);
        mask = mask * m;
    }
    (Tensor::cat(tensors, 2), mask)
}

/// Concatenate, then apply `layer` if there is one.
pub fn fuse<B: Backend>(streams: Vec<Stream<B>>, layer: Option<&FusionLayer<B>>) -> Stream<B> {
    let (x, mask) = concat_streams(streams);
    match layer {
        Some(layer) => (layer.forward(x), mask),
        None => (x, mask),
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct FusionLayerConfig {
    pub kind:       FusionKind,
    /// Width of the concatenated input
    pub input_dim:  usize,
    /// Target width; ignored by concat
    pub unit_dim:   usize,
    #[config(default = 1)]
    pub num_layer:  usize,
    #[config(default = "Activation::Relu")]
    pub activation: Activation,
    #[config(default = 0.0)]
    pub dropout:    f64,
}

impl FusionLayerConfig {
    pub fn output_dim(&self) -> usize {
        match self.kind {
            FusionKind::Concat => self.input_dim,
            _ => self.unit_dim,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::check_positive("fusion input dim", self.input_dim)?;
        ConfigError::check_rate("fusion dropout", self.dropout)?;
        if self.kind != FusionKind::Concat {
            ConfigError::check_positive("fusion unit dim", self.unit_dim)?;
            ConfigError::check_positive("fusion layer count", self.num_layer)?;
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<FusionLayer<B>, ConfigError> {
        self.validate()?;

        // Input width of layer i: the concat width first, then unit_dim.
        let width = |i: usize| if i == 0 { self.input_dim } else { self.unit_dim };

        let mut layer = FusionLayer {
            dense:      Vec::new(),
            conv:       Vec::new(),
            projection: None,
            highway:    Vec::new(),
            dropout:    DropoutConfig::new(self.dropout).init(),
            kind:       Ignored(self.kind),
            activation: Ignored(self.activation),
        };

        match self.kind {
            FusionKind::Concat => {}
            FusionKind::Dense => {
                layer.dense = (0..self.num_layer)
                    .map(|i| LinearConfig::new(width(i), self.unit_dim).init(device))
                    .collect();
            }
            FusionKind::Conv => {
                layer.conv = (0..self.num_layer)
                    .map(|i| Conv1dConfig::new(width(i), self.unit_dim, 1).init(device))
                    .collect();
            }
            FusionKind::Highway => {
                layer.projection = Some(LinearConfig::new(self.input_dim, self.unit_dim).init(device));
                layer.highway = (0..self.num_layer)
                    .map(|_| HighwayUnit {
                        transform: LinearConfig::new(self.unit_dim, self.unit_dim).init(device),
                        gate:      LinearConfig::new(self.unit_dim, self.unit_dim).init(device),
                    })
                    .collect();
            }
        }
        Ok(layer)
    }
}

// ─── Layer ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct HighwayUnit<B: Backend> {
    transform: Linear<B>,
    gate:      Linear<B>,
}

#[derive(Module, Debug)]
pub struct FusionLayer<B: Backend> {
    dense:      Vec<Linear<B>>,
    conv:       Vec<Conv1d<B>>,
    projection: Option<Linear<B>>,
    highway:    Vec<HighwayUnit<B>>,
    dropout:    Dropout,
    kind:       Ignored<FusionKind>,
    activation: Ignored<Activation>,
}

impl<B: Backend> FusionLayer<B> {
    /// [b, s, input_dim] → [b, s, output_dim]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        match *self.kind {
            FusionKind::Concat => x,
            FusionKind::Dense => self.dense.iter().fold(x, |x, linear| {
                activate(linear.forward(self.dropout.forward(x)), *self.activation)
            }),
            FusionKind::Conv => {
                // Conv1d wants [b, channels, s].
                let x = self.conv.iter().fold(x.swap_dims(1, 2), |x, conv| {
                    activate(conv.forward(self.dropout.forward(x)), *self.activation)
                });
                x.swap_dims(1, 2)
            }
            FusionKind::Highway => {
                let x = match &self.projection {
                    Some(projection) => projection.forward(x),
                    None => x,
                };
                self.highway.iter().fold(x, |x, unit| {
                    let h = activate(unit.transform.forward(self.dropout.forward(x.clone())), *self.activation);
                    let g = activation::sigmoid(unit.gate.forward(x.clone()));
                    g.clone() * h + (g.neg().add_scalar(1.0)) * x
                })
            }
        }
    }
}
