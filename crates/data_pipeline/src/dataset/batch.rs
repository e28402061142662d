use super::Dataset;
use crate::collator::{Collator, ConcatCollator};
use crate::error::{check_index, DataError};
use crate::sample::Sample;
use anyhow::Result;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// How a trailing partial batch is treated when batching with a uniform size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    /// Keep the final, shorter batch (`ceil(len / n)` batches)
    #[default]
    IncludeLast,
    /// Drop the final, shorter batch (`floor(len / n)` batches)
    SkipLast,
    /// Refuse to build unless `len` is a multiple of the batch size
    DivisibleOnly,
}

/// The batch descriptor: one size for every batch, or an explicit sequence
/// of per-batch sizes (as produced by cost-budgeted partitioning).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSizes {
    Uniform(usize),
    Explicit(Vec<usize>),
}

#[derive(Debug, Clone)]
enum Layout {
    Uniform { size: usize, num_batches: usize },
    // offsets[b]..offsets[b + 1] is batch b; offsets.len() == num_batches + 1
    Offsets(Vec<usize>),
}

/// Groups consecutive source indices into batches and merges each field with
/// its own [`Collator`].
///
/// `get(b)` fetches the samples of batch `b`, checks that they all have the
/// same number of fields, and produces a [`Sample`] whose field `f` is
/// `collators[f].collate(..)` over the samples' field `f`. Fields without a
/// configured collator use [`ConcatCollator`].
///
/// # Example
/// ```ignore
/// let collators: Vec<Arc<dyn Collator>> = vec![
///     Arc::new(PadCollator::new(0.0, 0)),   // input, padded along time
///     Arc::new(PadCollator::new(-1.0, 0)),  // target tokens
/// ];
/// let batches = BatchDataset::new(source, 8, BatchPolicy::IncludeLast, collators)?;
/// ```
#[derive(Clone)]
pub struct BatchDataset<D> {
    source: D,
    layout: Layout,
    collators: Vec<Arc<dyn Collator>>,
}

impl<D: Dataset> BatchDataset<D> {
    /// Batches of a uniform size under the given trailing-batch policy.
    pub fn new(
        source: D,
        batch_size: usize,
        policy: BatchPolicy,
        collators: Vec<Arc<dyn Collator>>,
    ) -> Result<Self> {
        Self::from_sizes(source, BatchSizes::Uniform(batch_size), policy, collators)
    }

    /// Batches with explicit sizes. The sizes must each be positive and sum
    /// to `source.len()`.
    pub fn with_batch_sizes(
        source: D,
        batch_sizes: Vec<usize>,
        collators: Vec<Arc<dyn Collator>>,
    ) -> Result<Self> {
        Self::from_sizes(
            source,
            BatchSizes::Explicit(batch_sizes),
            BatchPolicy::IncludeLast,
            collators,
        )
    }

    /// General constructor. `policy` only applies to [`BatchSizes::Uniform`].
    pub fn from_sizes(
        source: D,
        sizes: BatchSizes,
        policy: BatchPolicy,
        collators: Vec<Arc<dyn Collator>>,
    ) -> Result<Self> {
        let len = source.len();
        let layout = match sizes {
            BatchSizes::Uniform(0) => {
                return Err(DataError::invalid_config("batch size must be >= 1").into());
            }
            BatchSizes::Uniform(size) => {
                let num_batches = match policy {
                    BatchPolicy::IncludeLast => len.div_ceil(size),
                    BatchPolicy::SkipLast => len / size,
                    BatchPolicy::DivisibleOnly => {
                        if len % size != 0 {
                            return Err(DataError::invalid_config(format!(
                                "dataset size {len} is not divisible by batch size {size}"
                            ))
                            .into());
                        }
                        len / size
                    }
                };
                Layout::Uniform { size, num_batches }
            }
            BatchSizes::Explicit(batch_sizes) => {
                if let Some(pos) = batch_sizes.iter().position(|&s| s == 0) {
                    return Err(DataError::invalid_config(format!(
                        "batch {pos} has size 0; explicit batch sizes must be >= 1"
                    ))
                    .into());
                }
                let mut offsets = Vec::with_capacity(batch_sizes.len() + 1);
                offsets.push(0);
                for size in &batch_sizes {
                    let end = offsets[offsets.len() - 1] + size;
                    offsets.push(end);
                }
                let total = offsets[offsets.len() - 1];
                if total != len {
                    return Err(DataError::invalid_config(format!(
                        "explicit batch sizes sum to {total}, but the dataset has {len} samples"
                    ))
                    .into());
                }
                Layout::Offsets(offsets)
            }
        };

        let batched = Self {
            source,
            layout,
            collators,
        };
        debug!(
            samples = len,
            batches = batched.len(),
            "built batch dataset"
        );
        Ok(batched)
    }

    /// The source index range covered by batch `batch`.
    pub fn batch_range(&self, batch: usize) -> Result<Range<usize>> {
        check_index(batch, self.len())?;
        Ok(match &self.layout {
            Layout::Uniform { size, .. } => {
                let start = batch * size;
                start..(start + size).min(self.source.len())
            }
            Layout::Offsets(offsets) => offsets[batch]..offsets[batch + 1],
        })
    }

    /// Sizes of every batch, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        (0..self.len())
            .filter_map(|b| self.batch_range(b).ok())
            .map(|r| r.len())
            .collect()
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    fn collator_for(&self, field: usize) -> &dyn Collator {
        match self.collators.get(field) {
            Some(collator) => collator.as_ref(),
            None => &ConcatCollator,
        }
    }
}

impl<D: Dataset> Dataset for BatchDataset<D> {
    fn len(&self) -> usize {
        match &self.layout {
            Layout::Uniform { num_batches, .. } => *num_batches,
            Layout::Offsets(offsets) => offsets.len() - 1,
        }
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let range = self.batch_range(index)?;
        let samples = range
            .map(|i| self.source.get(i))
            .collect::<Result<Vec<_>>>()?;

        let arity = samples.first().map(Sample::arity).unwrap_or(0);
        for (position, sample) in samples.iter().enumerate() {
            if sample.arity() != arity {
                return Err(DataError::ArityMismatch {
                    expected: arity,
                    actual: sample.arity(),
                    position,
                }
                .into());
            }
        }

        // Transpose samples into per-field columns
        let mut columns: Vec<Vec<_>> = (0..arity)
            .map(|_| Vec::with_capacity(samples.len()))
            .collect();
        for sample in samples {
            for (field, tensor) in sample.into_fields().into_iter().enumerate() {
                columns[field].push(tensor);
            }
        }

        let fields = columns
            .iter()
            .enumerate()
            .map(|(field, column)| {
                self.collator_for(field)
                    .collate(column)
                    .map_err(|e| e.context(DataError::Collation { field, batch: index }))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Sample::new(fields))
    }
}
