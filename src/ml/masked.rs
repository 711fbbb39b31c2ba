// ============================================================
// Layer 5 — Masked Tensor Primitives
// ============================================================
// Every sequence tensor travels with a 0/1 float mask. The mask
// either has the same shape as the tensor or a 1 on any axis it
// broadcasts over (e.g. [batch, seq, 1] against [batch, seq, dim]).
//
// Masked softmax
//   1. push invalid logits towards -inf:   l + (1 - m) * MASK_PENALTY
//   2. softmax along the scored axis
//   3. zero invalid positions and renormalise by the mask-weighted sum
//
// The penalty is applied *before* exponentiating; multiplying the
// probabilities afterwards alone would bias the normaliser.
//
// Degenerate rows (no valid position) come out all-zero: the
// denominator is clamped to the smallest positive f32, so 0 / tiny
// stays 0 and never turns into NaN.

use burn::{prelude::*, tensor::activation};

/// Additive penalty for masked logits. Large enough that exp()
/// underflows to exactly 0 in f32, small enough to stay finite.
pub const MASK_PENALTY: f32 = -1e9;

/// Guard against log(0) and division by zero.
pub const EPSILON: f32 = 1e-12;

/// Panics unless every mask axis equals the tensor axis or is 1.
pub fn assert_mask_shape<B: Backend, const D: usize>(tensor: &Tensor<B, D>, mask: &Tensor<B, D>) {
    let t = tensor.dims();
    let m = mask.dims();
    for axis in 0..D {
        assert!(
            m[axis] == t[axis] || m[axis] == 1,
            "mask shape {m:?} does not broadcast to tensor shape {t:?}"
        );
    }
}

/// `logits + (1 - mask) * MASK_PENALTY`
pub fn masked_logits<B: Backend, const D: usize>(logits: Tensor<B, D>, mask: Tensor<B, D>) -> Tensor<B, D> {
    assert_mask_shape(&logits, &mask);
    let penalty = mask.neg().add_scalar(1.0).mul_scalar(MASK_PENALTY);
    logits + penalty
}

/// Softmax over `dim` that assigns exactly zero to invalid positions.
/// Valid positions sum to 1; rows with no valid position are all-zero.
pub fn masked_softmax<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    mask:   Tensor<B, D>,
    dim:    usize,
) -> Tensor<B, D> {
    let probs = activation::softmax(masked_logits(logits, mask.clone()), dim) * mask;
    let total = probs.clone().sum_dim(dim).clamp_min(f32::MIN_POSITIVE);
    probs / total
}

/// Mean over the batch of `-log softmax(masked_logits)[label]`.
///
/// logits, mask: [batch, len] — labels: [batch]
///
/// A label pointing at a masked position is a caller error; the
/// batcher never produces one for samples it admitted.
pub fn masked_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    mask:   Tensor<B, 2>,
    labels: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    let log_probs = activation::log_softmax(masked_logits(logits, mask), 1);
    log_probs
        .gather(1, labels.unsqueeze_dim::<2>(1))
        .neg()
        .mean()
}

/// Probability-masking policy: `-log(p * mask + EPSILON) * mask` at
/// the label, summed and divided by the batch size.
///
/// Numerically different from [`masked_cross_entropy`] near the mask
/// boundary; only used when explicitly selected.
pub fn probability_masked_cross_entropy<B: Backend>(
    probs:  Tensor<B, 2>,
    mask:   Tensor<B, 2>,
    labels: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    assert_mask_shape(&probs, &mask);
    let nll = (probs * mask.clone()).add_scalar(EPSILON).log().neg() * mask;
    nll.gather(1, labels.unsqueeze_dim::<2>(1)).mean()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn tensor2(rows: &[&[f32]]) -> Tensor<B, 2> {
        let cols = rows[0].len();
        let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_data(TensorData::new(flat, [rows.len(), cols]), &Default::default())
    }

    fn values(t: Tensor<B, 2>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_valid_positions_sum_to_one_and_invalid_are_zero() {
        let logits = tensor2(&[&[2.0, -1.0, 0.5, 3.0], &[0.0, 0.0, 0.0, 0.0]]);
        let mask   = tensor2(&[&[1.0, 0.0, 1.0, 0.0], &[1.0, 1.0, 1.0, 0.0]]);
        let p = values(masked_softmax(logits, mask, 1));

        assert!((p[0] + p[2] - 1.0).abs() < 1e-6);
        assert_eq!(p[1], 0.0);
        assert_eq!(p[3], 0.0);
        assert!((p[4] - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(p[7], 0.0);
    }

    #[test]
    fn test_single_valid_position_gets_exactly_one() {
        let p = values(masked_softmax(
            tensor2(&[&[5.0, 9.0, -2.0]]),
            tensor2(&[&[0.0, 0.0, 1.0]]),
            1,
        ));
        assert_eq!(p, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_all_masked_row_is_all_zero_not_nan() {
        let p = values(masked_softmax(
            tensor2(&[&[1.0, 2.0, 3.0]]),
            tensor2(&[&[0.0, 0.0, 0.0]]),
            1,
        ));
        assert!(p.iter().all(|v| *v == 0.0), "got {p:?}");
    }

    #[test]
    fn test_mask_broadcasts_over_leading_axis() {
        let device = Default::default();
        let logits = Tensor::<B, 3>::from_floats([[[1.0, 2.0], [3.0, 4.0]]], &device);
        let mask   = Tensor::<B, 3>::from_floats([[[1.0, 0.0]]], &device);
        let p = masked_softmax(logits, mask, 2).into_data().to_vec::<f32>().unwrap();
        assert_eq!(p, vec![1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "does not broadcast")]
    fn test_mismatched_mask_panics() {
        let _ = masked_logits(tensor2(&[&[1.0, 2.0, 3.0]]), tensor2(&[&[1.0, 1.0]]));
    }

    #[test]
    fn test_cross_entropy_ignores_masked_logits() {
        // The huge masked logit must not steal probability mass.
        let masked = masked_cross_entropy(
            tensor2(&[&[0.0, 0.0, 50.0]]),
            tensor2(&[&[1.0, 1.0, 0.0]]),
            Tensor::from_ints([0], &Default::default()),
        );
        let loss = masked.into_scalar();
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-5, "loss {loss}");
    }

    #[test]
    fn test_cross_entropy_is_batch_mean() {
        let loss = masked_cross_entropy(
            tensor2(&[&[0.0, 0.0], &[0.0, 0.0]]),
            tensor2(&[&[1.0, 1.0], &[1.0, 0.0]]),
            Tensor::from_ints([1, 0], &Default::default()),
        )
        .into_scalar();
        // ln 2 for the first row, 0 for the second
        assert!((loss - std::f32::consts::LN_2 / 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_probability_policy_differs_but_stays_finite() {
        let probs  = tensor2(&[&[0.5, 0.5, 0.0]]);
        let mask   = tensor2(&[&[1.0, 1.0, 0.0]]);
        let labels = Tensor::<B, 1, Int>::from_ints([1], &Default::default());
        let loss = probability_masked_cross_entropy(probs.clone(), mask.clone(), labels).into_scalar();
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-5);

        // A masked label contributes zero rather than infinity.
        let masked_label = Tensor::<B, 1, Int>::from_ints([2], &Default::default());
        let loss = probability_masked_cross_entropy(probs, mask, masked_label).into_scalar();
        assert!(loss.is_finite());
        assert_eq!(loss, 0.0);
    }
}
