// ============================================================
// Layer 4 — Sample Dataset
// ============================================================
// Holds validated samples in memory and hands them out as
// mini-batches, shuffled per epoch for training or in file order
// for validation and inference.

use burn::data::dataset::Dataset;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::domain::sample::RcSample;

/// In-memory collection of validated samples.
pub struct RcDataset {
    samples: Vec<RcSample>,
}

impl RcDataset {
    pub fn new(samples: Vec<RcSample>) -> Self { Self { samples } }

    pub fn sample_count(&self) -> usize { self.samples.len() }

    pub fn samples(&self) -> &[RcSample] { &self.samples }

    /// Split into mini-batches of at most `batch_size` samples.
    /// `shuffle_seed = Some(seed)` permutes the order reproducibly
    /// first; `None` keeps file order (validation, inference).
    pub fn batches(&self, batch_size: usize, shuffle_seed: Option<u64>) -> Vec<Vec<RcSample>> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        if let Some(seed) = shuffle_seed {
            order.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        order
            .chunks(batch_size.max(1))
            .map(|chunk| chunk.iter().map(|&i| self.samples[i].clone()).collect())
            .collect()
    }
}

impl Dataset<RcSample> for RcDataset {
    fn get(&self, index: usize) -> Option<RcSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::sample_fixture;

    fn dataset(n: usize) -> RcDataset {
        RcDataset::new((0..n).map(|i| sample_fixture(&format!("s{i}"), 2, 3)).collect())
    }

    #[test]
    fn test_dataset_trait_access() {
        let ds = dataset(3);
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.get(1).map(|s| s.id), Some("s1".to_string()));
        assert!(ds.get(3).is_none());
    }

    #[test]
    fn test_batches_cover_every_sample_once() {
        let ds = dataset(7);
        let batches = ds.batches(3, Some(11));
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 1]);

        let mut ids: Vec<String> = batches.into_iter().flatten().map(|s| s.id).collect();
        ids.sort();
        let mut expected: Vec<String> = (0..7).map(|i| format!("s{i}")).collect();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_shuffle_is_reproducible_and_unshuffled_keeps_order() {
        let ds = dataset(10);
        let ids = |b: Vec<Vec<RcSample>>| b.into_iter().flatten().map(|s| s.id).collect::<Vec<_>>();
        assert_eq!(ids(ds.batches(4, Some(5))), ids(ds.batches(4, Some(5))));
        assert_eq!(ids(ds.batches(4, None))[0], "s0");
    }
}
