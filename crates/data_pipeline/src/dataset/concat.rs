use super::{Dataset, SizedDataset};
use crate::error::{check_index, DataError};
use crate::sample::Sample;
use anyhow::Result;

/// Presents several datasets as one contiguous index space.
///
/// Index `i` belongs to the first child whose cumulative end exceeds `i`;
/// the offset of that child is subtracted before forwarding. Empty children
/// are allowed and never selected.
///
/// # Example
/// ```ignore
/// // sizes [3, 0, 2] -> indices 0..3 from the first, 3..5 from the third
/// let ds = ConcatDataset::new(vec![a, empty, b]);
/// assert_eq!(ds.len(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct ConcatDataset<D> {
    datasets: Vec<D>,
    // ends[k] = total size of datasets[0..=k]
    ends: Vec<usize>,
}

impl<D: Dataset> ConcatDataset<D> {
    pub fn new(datasets: Vec<D>) -> Self {
        let ends = datasets
            .iter()
            .scan(0usize, |total, ds| {
                *total += ds.len();
                Some(*total)
            })
            .collect();
        Self { datasets, ends }
    }

    pub fn datasets(&self) -> &[D] {
        &self.datasets
    }

    /// Maps a global index to `(child, local index)`.
    fn locate(&self, index: usize) -> Result<(usize, usize)> {
        if self.datasets.is_empty() {
            return Err(DataError::EmptyConcat { index }.into());
        }
        check_index(index, self.len())?;

        let child = self.ends.partition_point(|&end| end <= index);
        let offset = if child == 0 { 0 } else { self.ends[child - 1] };
        Ok((child, index - offset))
    }
}

impl<D: Dataset> Dataset for ConcatDataset<D> {
    fn len(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let (child, local) = self.locate(index)?;
        self.datasets[child].get(local)
    }
}

impl<D: SizedDataset> SizedDataset for ConcatDataset<D> {
    fn input_size(&self, index: usize) -> Result<f64> {
        let (child, local) = self.locate(index)?;
        self.datasets[child].input_size(local)
    }
}
