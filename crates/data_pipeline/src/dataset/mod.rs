//! src/dataset/mod.rs
//!
//! The `Dataset` contract and the wrappers that compose it.
//!
//! Every component of the pipeline is a `Dataset`: raw sources, index
//! remappings and batchers all expose the same `len`/`get` pair, so they
//! chain in any order:
//!
//! ```text
//!   ListFileDataset ×K ──► ConcatDataset ──► ResampleDataset (order)
//!                                                  │
//!                                                  ▼
//!   PrefetchDataset ◄── ShuffleDataset ◄── BatchDataset ◄── ResampleDataset (partition)
//! ```
//!
//! Wrappers hold only index metadata and shared handles (`Arc`) to their
//! sources, and resolve every lookup lazily at `get` time.

mod batch;
mod concat;
mod resample;
mod shuffle;

pub use batch::{BatchDataset, BatchPolicy, BatchSizes};
pub use concat::ConcatDataset;
pub use resample::ResampleDataset;
pub use shuffle::ShuffleDataset;

use crate::error::check_index;
use crate::sample::Sample;
use anyhow::Result;
use std::sync::Arc;

/// A `Dataset` provides random access to an ordered sequence of [`Sample`]s
/// addressed by a dense index range `[0, len)`.
///
/// `get` fails with [`DataError::IndexOutOfRange`](crate::error::DataError)
/// for any index outside that range. `len` is stable for the lifetime of the
/// object.
///
/// All implementations must be `Send + Sync` to allow for safe
/// sharing across threads (prefetch workers call `get` concurrently).
pub trait Dataset: Send + Sync {
    /// Returns total number of samples.
    fn len(&self) -> usize;

    /// Random-access lookup by index.
    fn get(&self, index: usize) -> Result<Sample>;

    /// Checks if the dataset is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over all samples in index order.
    fn iter(&self) -> DatasetIter<'_>
    where
        Self: Sized,
    {
        DatasetIter::new(self)
    }
}

/// A dataset whose samples carry a per-sample cost (e.g. duration) that can
/// be read without loading the sample itself.
///
/// Used to order samples and to pack cost-budgeted batches.
pub trait SizedDataset: Dataset {
    fn input_size(&self, index: usize) -> Result<f64>;
}

/// Shared handles forward the contract, so `Arc<dyn Dataset>` composes like
/// any concrete dataset.
impl<D: Dataset + ?Sized> Dataset for Arc<D> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        (**self).get(index)
    }
}

impl<D: SizedDataset + ?Sized> SizedDataset for Arc<D> {
    fn input_size(&self, index: usize) -> Result<f64> {
        (**self).input_size(index)
    }
}

impl<D: Dataset + ?Sized> Dataset for Box<D> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        (**self).get(index)
    }
}

/// Sequential iterator over a dataset, yielding `get(0) .. get(len - 1)`.
pub struct DatasetIter<'a> {
    dataset: &'a dyn Dataset,
    next: usize,
    len: usize,
}

impl<'a> DatasetIter<'a> {
    pub fn new(dataset: &'a dyn Dataset) -> Self {
        Self {
            dataset,
            next: 0,
            len: dataset.len(),
        }
    }
}

impl Iterator for DatasetIter<'_> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.len {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.dataset.get(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DatasetIter<'_> {}

/// Source holding every sample in memory behind an `Arc<[Sample]>`.
///
/// Cloning the dataset only bumps the reference count, and `get` returns a
/// shallow clone of the stored sample, so wrappers can each own a copy.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    samples: Arc<[Sample]>,
    sizes: Option<Arc<[f64]>>,
}

impl InMemoryDataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples: samples.into(),
            sizes: None,
        }
    }

    /// Attaches a per-sample cost, making the dataset a [`SizedDataset`].
    ///
    /// Without explicit sizes, `input_size` reports the leading extent of
    /// field 0.
    pub fn with_sizes(mut self, sizes: Vec<f64>) -> Result<Self> {
        anyhow::ensure!(
            sizes.len() == self.samples.len(),
            "Got {} sizes for {} samples",
            sizes.len(),
            self.samples.len()
        );
        self.sizes = Some(sizes.into());
        Ok(self)
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        check_index(index, self.samples.len())?;
        Ok(self.samples[index].clone())
    }
}

impl SizedDataset for InMemoryDataset {
    fn input_size(&self, index: usize) -> Result<f64> {
        check_index(index, self.samples.len())?;
        if let Some(sizes) = &self.sizes {
            return Ok(sizes[index]);
        }
        let first = self.samples[index].get(0)?;
        Ok(first.size().first().copied().unwrap_or(1) as f64)
    }
}
