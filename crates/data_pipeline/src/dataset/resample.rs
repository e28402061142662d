use super::{Dataset, SizedDataset};
use crate::error::check_index;
use crate::sample::Sample;
use anyhow::Result;

/// Remaps indices onto a source dataset through an explicit index list.
///
/// `get(i)` returns `source.get(indices[i])`. The list need not be a
/// permutation: it may repeat or omit source indices, which is what makes
/// this wrapper serve both for reordering (sorting, shuffling) and for
/// subset selection (partitioning).
///
/// Entries are not validated against the source at construction. A stale
/// entry surfaces as the source's own range error on first access.
#[derive(Debug, Clone)]
pub struct ResampleDataset<D> {
    source: D,
    indices: Vec<usize>,
}

impl<D: Dataset> ResampleDataset<D> {
    pub fn new(source: D, indices: Vec<usize>) -> Self {
        Self { source, indices }
    }

    /// Builds the index list from a mapping `i -> source index` over `0..len`.
    pub fn from_fn(source: D, resample_fn: impl Fn(usize) -> usize, len: usize) -> Self {
        let indices = (0..len).map(resample_fn).collect();
        Self { source, indices }
    }

    /// Identity mapping over the whole source.
    pub fn identity(source: D) -> Self {
        let indices = (0..source.len()).collect();
        Self { source, indices }
    }

    /// Replaces the index list.
    pub fn resample(&mut self, indices: Vec<usize>) {
        self.indices = indices;
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    #[inline]
    fn source_index(&self, index: usize) -> Result<usize> {
        check_index(index, self.indices.len())?;
        Ok(self.indices[index])
    }
}

impl<D: Dataset> Dataset for ResampleDataset<D> {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let source_index = self.source_index(index)?;
        self.source.get(source_index)
    }
}

impl<D: SizedDataset> SizedDataset for ResampleDataset<D> {
    fn input_size(&self, index: usize) -> Result<f64> {
        let source_index = self.source_index(index)?;
        self.source.input_size(source_index)
    }
}

#[cfg(test)]
mod resample_tests {
    use super::*;
    use crate::dataset::InMemoryDataset;
    use crate::error::DataError;
    use tch::Tensor;

    fn make_dataset(n: i64) -> InMemoryDataset {
        InMemoryDataset::new(
            (0..n)
                .map(|v| Sample::from_single(Tensor::from_slice(&[v * 10])))
                .collect(),
        )
    }

    fn values(ds: &impl Dataset) -> Result<Vec<i64>> {
        ds.iter()
            .map(|s| -> Result<i64> { Ok(s?.get(0)?.int64_value(&[0])) })
            .collect()
    }

    #[test]
    fn test_identity_matches_source() -> Result<()> {
        let source = make_dataset(6);
        let resampled = ResampleDataset::identity(source.clone());
        assert_eq!(resampled.len(), source.len());
        for i in 0..source.len() {
            assert!(resampled.get(i)?.get(0)?.equal(source.get(i)?.get(0)?));
        }
        Ok(())
    }

    #[test]
    fn test_subset_and_repeats() -> Result<()> {
        let ds = ResampleDataset::new(make_dataset(5), vec![4, 0, 0, 2]);
        assert_eq!(ds.len(), 4);
        assert_eq!(values(&ds)?, vec![40, 0, 0, 20]);
        Ok(())
    }

    #[test]
    fn test_from_fn_and_resample() -> Result<()> {
        let mut ds = ResampleDataset::from_fn(make_dataset(4), |i| 3 - i, 4);
        assert_eq!(values(&ds)?, vec![30, 20, 10, 0]);

        ds.resample(vec![1]);
        assert_eq!(ds.len(), 1);
        assert_eq!(values(&ds)?, vec![10]);
        Ok(())
    }

    #[test]
    fn test_range_errors() {
        let ds = ResampleDataset::new(make_dataset(3), vec![0, 7]);
        let err = ds.get(2).unwrap_err();
        assert_eq!(
            err.downcast_ref::<DataError>(),
            Some(&DataError::IndexOutOfRange { index: 2, len: 2 })
        );

        // stale entry is reported by the source, lazily
        let err = ds.get(1).unwrap_err();
        assert_eq!(
            err.downcast_ref::<DataError>(),
            Some(&DataError::IndexOutOfRange { index: 7, len: 3 })
        );
        assert!(ds.get(0).is_ok());
    }
}
