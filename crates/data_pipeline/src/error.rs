//! Error kinds raised by the pipeline itself.
//!
//! Every fallible call returns `anyhow::Result`, so errors coming from a raw
//! source travel through the wrappers untouched. The variants below are the
//! ones the composition layer raises on its own; callers can tell them apart
//! with `err.downcast_ref::<DataError>()`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    // ========== Range errors ==========
    /// `get` was called with an index outside `[0, len)`
    #[error("Index {index} out of range for dataset of size {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// `get` was called on a concatenation of zero datasets
    #[error("Cannot get index {index} from a ConcatDataset with no datasets")]
    EmptyConcat { index: usize },

    // ========== Configuration errors ==========
    #[error("Unsupported batching strategy '{0}'")]
    UnknownBatchingStrategy(String),

    #[error("Unsupported storage backend '{0}'")]
    UnsupportedStorageBackend(String),

    #[error("Invalid pad values: {reason}")]
    InvalidPadValues { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // ========== Imbalance errors ==========
    /// A rank would receive no samples while `allow_empty` is false
    #[error("Rank {rank} of {world_size} would receive an empty partition: {reason}")]
    EmptyPartition {
        rank: usize,
        world_size: usize,
        reason: String,
    },

    // ========== Batching errors ==========
    #[error("Sample #{position} in batch has {actual} fields, expected {expected}")]
    ArityMismatch {
        expected: usize,
        actual: usize,
        position: usize,
    },

    /// Attached as context to the collator's own error
    #[error("Failed to collate field {field} of batch {batch}")]
    Collation { field: usize, batch: usize },

    // ========== Prefetch errors ==========
    #[error("Prefetch worker dropped index {index} before producing a result")]
    WorkerDisconnected { index: usize },

    #[error("Source panicked while prefetching index {index}: {message}")]
    WorkerPanicked { index: usize, message: String },
}

impl DataError {
    /// Returns true for errors raised while validating construction parameters
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            DataError::UnknownBatchingStrategy(_)
                | DataError::UnsupportedStorageBackend(_)
                | DataError::InvalidPadValues { .. }
                | DataError::InvalidConfig { .. }
        )
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        DataError::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Fails with [`DataError::IndexOutOfRange`] unless `index < len`.
#[inline]
pub(crate) fn check_index(index: usize, len: usize) -> anyhow::Result<()> {
    if index >= len {
        return Err(DataError::IndexOutOfRange { index, len }.into());
    }
    Ok(())
}
