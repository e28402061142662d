use super::{Dataset, ResampleDataset, SizedDataset};
use crate::sample::Sample;
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

/// A [`ResampleDataset`] whose index list is a seeded random permutation of
/// `[0, source.len())`.
///
/// # Seed Handling
/// - Same seed over the same source -> identical permutation, on every run
///   and every worker process.
/// - To get a fresh order each epoch, call [`reshuffle`](Self::reshuffle)
///   with a seed derived from the epoch (e.g. `base_seed + epoch`).
///
/// Construction cost is O(source.len()).
#[derive(Debug, Clone)]
pub struct ShuffleDataset<D> {
    inner: ResampleDataset<D>,
    seed: u64,
}

impl<D: Dataset> ShuffleDataset<D> {
    pub fn new(source: D, seed: u64) -> Self {
        let indices = Self::permutation(source.len(), seed);
        Self {
            inner: ResampleDataset::new(source, indices),
            seed,
        }
    }

    /// Regenerates the permutation from a new seed.
    pub fn reshuffle(&mut self, seed: u64) {
        let indices = Self::permutation(self.inner.source().len(), seed);
        self.inner.resample(indices);
        self.seed = seed;
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn indices(&self) -> &[usize] {
        self.inner.indices()
    }

    fn permutation(len: usize, seed: u64) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(&mut StdRng::seed_from_u64(seed));
        indices
    }
}

impl<D: Dataset> Dataset for ShuffleDataset<D> {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        self.inner.get(index)
    }
}

impl<D: SizedDataset> SizedDataset for ShuffleDataset<D> {
    fn input_size(&self, index: usize) -> Result<f64> {
        self.inner.input_size(index)
    }
}
