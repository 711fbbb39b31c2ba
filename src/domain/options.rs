// ============================================================
// Layer 3 — Option Tags
// ============================================================
// Hyper-parameter files name layer variants with short strings
// ("max", "conv", "scaled_dot", ...). Each family of strings maps
// onto one closed enum here. Parsing happens once, while the
// hyper-parameters are validated; an unknown tag is a ConfigError,
// never a silent default.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

/// Declares a tag enum together with its `FromStr` / `Display`
/// impls so the accepted strings live next to the variants.
macro_rules! tag_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $tag:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every tag accepted for this option, in declaration order.
            pub const TAGS: &'static [&'static str] = &[$($tag),+];

            pub fn as_tag(&self) -> &'static str {
                match self {
                    $( Self::$variant => $tag ),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ConfigError;

            fn from_str(tag: &str) -> Result<Self, Self::Err> {
                match tag {
                    $( $tag => Ok(Self::$variant), )+
                    other => Err(ConfigError::UnsupportedTag {
                        kind: $kind,
                        tag:  other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_tag())
            }
        }
    };
}

tag_enum! {
    /// Hidden activation used by fusion, convolution and feed-forward layers.
    Activation, "activation" {
        Relu    => "relu",
        Gelu    => "gelu",
        Tanh    => "tanh",
        Sigmoid => "sigmoid",
        /// Identity.
        Linear  => "linear",
    }
}

tag_enum! {
    /// Reduction over the sub-token axis of subword / char features.
    PoolingKind, "pooling" {
        Max => "max",
        Avg => "avg",
    }
}

tag_enum! {
    /// How several aligned feature streams become one.
    FusionKind, "fusion" {
        /// Feature-axis concatenation, no parameters.
        Concat  => "concat",
        /// Concatenation followed by stacked linear projections.
        Dense   => "dense",
        /// Concatenation followed by stacked kernel-1 convolutions.
        Conv    => "conv",
        /// Projection followed by stacked highway layers.
        Highway => "highway",
    }
}

tag_enum! {
    /// Pairwise context/question similarity.
    ScoreType, "score" {
        Dot       => "dot",
        ScaledDot => "scaled_dot",
        Trilinear => "trilinear",
    }
}

tag_enum! {
    /// Reduction of the score matrix over the question axis for
    /// question-to-context attention.
    Q2cReduce, "question2context reduce" {
        Max  => "max",
        Mean => "mean",
    }
}

tag_enum! {
    /// Whether a sibling sub-layer reuses an already-built module.
    Sharing, "sharing" {
        Shared      => "shared",
        Independent => "independent",
    }
}

tag_enum! {
    /// Cross-entropy flavour applied to start/end predictions.
    LossPolicy, "loss" {
        /// Penalise masked logits before the softmax (canonical).
        LogitMask       => "logit_mask",
        /// Multiply post-softmax probabilities by the mask.
        ProbabilityMask => "probability_mask",
    }
}

tag_enum! {
    /// Checkpoint retention policy.
    SaveMode, "save/restore mode" {
        /// A single, always-overwritten checkpoint.
        Debug => "debug",
        /// A rolling window keyed by epoch.
        Epoch => "epoch",
    }
}

tag_enum! {
    /// Learning-rate warm-up curve.
    WarmupKind, "warmup" {
        None       => "none",
        Linear     => "linear",
        InverseExp => "inverse_exp",
    }
}

tag_enum! {
    /// Learning-rate decay curve applied after `decay_start_step`.
    DecayKind, "decay" {
        None        => "none",
        Exponential => "exponential",
        InverseTime => "inverse_time",
        Cosine      => "cosine",
    }
}

impl Sharing {
    pub fn from_flag(enabled: bool) -> Self {
        if enabled { Sharing::Shared } else { Sharing::Independent }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Sharing::Shared)
    }
}

impl Default for LossPolicy {
    fn default() -> Self {
        LossPolicy::LogitMask
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tags_parse() {
        assert_eq!("max".parse::<PoolingKind>(), Ok(PoolingKind::Max));
        assert_eq!("scaled_dot".parse::<ScoreType>(), Ok(ScoreType::ScaledDot));
        assert_eq!("epoch".parse::<SaveMode>(), Ok(SaveMode::Epoch));
        assert_eq!("inverse_exp".parse::<WarmupKind>(), Ok(WarmupKind::InverseExp));
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = "median".parse::<PoolingKind>().unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnsupportedTag { kind: "pooling", tag: "median".to_string() }
        );
        assert!("latest".parse::<SaveMode>().is_err());
        assert!("Conv".parse::<FusionKind>().is_err());
    }

    #[test]
    fn test_display_round_trips_every_tag() {
        for tag in FusionKind::TAGS {
            let kind: FusionKind = tag.parse().unwrap();
            assert_eq!(kind.to_string(), *tag);
        }
    }
}
