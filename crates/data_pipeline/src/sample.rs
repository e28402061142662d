use crate::error::DataError;
use anyhow::Result;
use tch::Tensor;

/// The `Sample` struct represents a single data example in the pipeline.
///
/// A sample is an ordered, fixed-arity list of tensors. Field positions carry
/// the meaning (e.g. `0` = input features, `1` = target tokens), and every
/// dataset composed together must agree on that layout.
///
/// The same type is used for batches: a [`BatchDataset`](crate::dataset::BatchDataset)
/// returns a `Sample` whose fields are the collated tensors, with the batch
/// on the leading axis.
///
/// # Examples:
/// - Speech sample: `[input [T, F], target [L], word [L], sample_id [K], ...]`
/// - Batched: `[input [N, T_max, F], target [N, L_max], ...]`
#[derive(Debug, Default)]
pub struct Sample {
    pub fields: Vec<Tensor>,
}

/// Creates a shallow clone of the `Sample` (tensor storage is shared).
impl Clone for Sample {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.iter().map(Tensor::shallow_clone).collect(),
        }
    }
}

/// Safety:
/// `tch::Tensor` is marked `Send` and `Sync` in its source, and `Vec<Tensor>`
/// composes only those. Mutation of a `Sample` requires `&mut self`, so shared
/// references only ever read.
unsafe impl Send for Sample {}
unsafe impl Sync for Sample {}

impl Sample {
    /// Creates a new `Sample` from its ordered fields.
    pub fn new(fields: Vec<Tensor>) -> Self {
        Self { fields }
    }

    /// Creates a `Sample` with a single field.
    ///
    /// Chain with [`with_field`](Self::with_field) to append more fields.
    pub fn from_single(tensor: Tensor) -> Self {
        Self {
            fields: vec![tensor],
        }
    }

    /// Appends a field at the next position.
    pub fn with_field(mut self, tensor: Tensor) -> Self {
        self.fields.push(tensor);
        self
    }

    /// Returns the tensor at field position `field`.
    pub fn get(&self, field: usize) -> Result<&Tensor> {
        self.fields.get(field).ok_or_else(|| {
            DataError::IndexOutOfRange {
                index: field,
                len: self.fields.len(),
            }
            .into()
        })
    }

    /// Number of fields.
    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// Consumes the sample and returns its fields.
    pub fn into_fields(self) -> Vec<Tensor> {
        self.fields
    }
}

impl From<Vec<Tensor>> for Sample {
    fn from(fields: Vec<Tensor>) -> Self {
        Self::new(fields)
    }
}
