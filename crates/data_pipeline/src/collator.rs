use anyhow::{bail, ensure, Result};
use tch::Tensor;

/// A `Collator` merges one field's tensors, taken from every sample of a
/// batch, into a single batched tensor.
///
/// Padding policy lives entirely in the collator: [`BatchDataset`](crate::dataset::BatchDataset)
/// only gathers the per-field tensors and calls `collate` once per field.
///
/// Any `Fn(&[Tensor]) -> Result<Tensor>` closure is a collator.
pub trait Collator: Send + Sync {
    fn collate(&self, tensors: &[Tensor]) -> Result<Tensor>;
}

impl<F> Collator for F
where
    F: Fn(&[Tensor]) -> Result<Tensor> + Send + Sync,
{
    fn collate(&self, tensors: &[Tensor]) -> Result<Tensor> {
        self(tensors)
    }
}

/// Stacks tensors of possibly different extent along `dim` into one tensor
/// of shape `[N, ...]`, filling the gap with `pad_value`.
///
/// Every other dimension must agree across the inputs. Samples shorter than
/// the batch maximum along `dim` are padded on the right; nothing is ever
/// truncated. When all inputs already share the same extent the result is a
/// plain stack and contains no pad values.
pub fn pad_and_stack(tensors: &[Tensor], pad_value: f64, dim: usize) -> Result<Tensor> {
    if tensors.is_empty() {
        bail!("Cannot collate empty tensor list");
    }

    let reference_shape = tensors[0].size();
    ensure!(
        dim < reference_shape.len(),
        "Invalid padding dimension {} for tensor with {} dims",
        dim,
        reference_shape.len()
    );

    // Validate that every dimension except `dim` matches the first tensor
    for (i, tensor) in tensors.iter().enumerate().skip(1) {
        let shape = tensor.size();
        let compatible = shape.len() == reference_shape.len()
            && shape
                .iter()
                .zip(&reference_shape)
                .enumerate()
                .all(|(d, (a, b))| d == dim || a == b);
        if !compatible {
            bail!(
                "Shape mismatch in sample {} outside padding dimension {}: expected {:?}, got {:?}",
                i,
                dim,
                reference_shape,
                shape
            );
        }
    }

    let max_len = tensors
        .iter()
        .map(|t| t.size()[dim])
        .max()
        .unwrap_or(0);

    if tensors.iter().all(|t| t.size()[dim] == max_len) {
        return Ok(Tensor::stack(tensors, 0));
    }

    let mut batch_shape = Vec::with_capacity(reference_shape.len() + 1);
    batch_shape.push(tensors.len() as i64);
    batch_shape.extend(reference_shape.iter().copied());
    batch_shape[dim + 1] = max_len;

    let batch = Tensor::full(
        &batch_shape,
        pad_value,
        (tensors[0].kind(), tensors[0].device()),
    );

    // Copy each sample into the leading part of its slot along `dim`
    for (i, tensor) in tensors.iter().enumerate() {
        let len = tensor.size()[dim];
        if len == 0 {
            continue;
        }
        let mut dest = batch.select(0, i as i64).narrow(dim as i64, 0, len);
        dest.copy_(tensor);
    }
    Ok(batch)
}

/// Pads every sample along one dimension to the batch maximum, then stacks
/// them on a new leading axis.
///
/// # Example
/// ```ignore
/// // targets padded with -1 along their length axis
/// let collator = PadCollator::new(-1.0, 0);
/// let batched = collator.collate(&targets)?; // [N, L_max]
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PadCollator {
    pad_value: f64,
    dim: usize,
}

impl PadCollator {
    /// `dim` is the padded dimension of the per-sample tensor (before the
    /// batch axis is added).
    pub fn new(pad_value: f64, dim: usize) -> Self {
        Self { pad_value, dim }
    }

    pub fn pad_value(&self) -> f64 {
        self.pad_value
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl Collator for PadCollator {
    fn collate(&self, tensors: &[Tensor]) -> Result<Tensor> {
        pad_and_stack(tensors, self.pad_value, self.dim)
    }
}

/// A `Collator` that simply stacks tensors with identical shapes
/// along a new batch dimension (dim 0). If any sample has a different
/// shape, an error is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackCollator;

impl Collator for StackCollator {
    fn collate(&self, tensors: &[Tensor]) -> Result<Tensor> {
        if tensors.is_empty() {
            bail!("Cannot collate empty tensor list");
        }

        // Validate that tensor shapes are compatible for stacking
        let reference_shape = tensors[0].size();
        for (i, tensor) in tensors.iter().enumerate() {
            if tensor.size() != reference_shape {
                bail!(
                    "Shape mismatch in sample {}: expected {:?}, got {:?}",
                    i,
                    reference_shape,
                    tensor.size()
                );
            }
        }
        Ok(Tensor::stack(tensors, 0))
    }
}

/// Joins tensors along their existing leading axis without padding.
///
/// Leading extents may differ; trailing dimensions must agree. This is the
/// default for fields that carry no pad value (durations, lengths,
/// terminator-delimited ids).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatCollator;

impl Collator for ConcatCollator {
    fn collate(&self, tensors: &[Tensor]) -> Result<Tensor> {
        if tensors.is_empty() {
            bail!("Cannot collate empty tensor list");
        }

        let reference_shape = tensors[0].size();
        ensure!(
            !reference_shape.is_empty(),
            "Cannot concatenate 0-dimensional tensors along the leading axis"
        );
        for (i, tensor) in tensors.iter().enumerate().skip(1) {
            let shape = tensor.size();
            if shape.len() != reference_shape.len() || shape[1..] != reference_shape[1..] {
                bail!(
                    "Trailing shape mismatch in sample {}: expected [_, {:?}], got {:?}",
                    i,
                    &reference_shape[1..],
                    shape
                );
            }
        }
        Ok(Tensor::cat(tensors, 0))
    }
}

#[cfg(test)]
mod collator_tests {
    use super::*;
    use anyhow::Result;
    use tch::{Device, Kind, Tensor};

    #[test]
    fn test_pad_collator_dynamic_1d() -> Result<()> {
        let tensors = vec![Tensor::from_slice(&[1i64, 2, 3]), Tensor::from_slice(&[4i64, 5])];
        let batch = PadCollator::new(0.0, 0).collate(&tensors)?;
        assert_eq!(batch.size(), &[2, 3]);

        let expected = Tensor::from_slice(&[1i64, 2, 3, 4, 5, 0]).reshape(&[2, 3]);
        assert!(batch.equal(&expected));
        Ok(())
    }

    #[test]
    fn test_pad_collator_custom_value_on_inner_dim() -> Result<()> {
        // [frames, features] padded along frames
        let a = Tensor::ones(&[2, 3], (Kind::Float, Device::Cpu));
        let b = Tensor::ones(&[4, 3], (Kind::Float, Device::Cpu));
        let batch = PadCollator::new(-1.0, 0).collate(&[a, b])?;
        assert_eq!(batch.size(), &[2, 4, 3]);
        assert_eq!(batch.double_value(&[0, 1, 2]), 1.0);
        assert_eq!(batch.double_value(&[0, 2, 0]), -1.0);
        assert_eq!(batch.double_value(&[0, 3, 2]), -1.0);
        assert_eq!(batch.double_value(&[1, 3, 2]), 1.0);

        // padding along the feature axis instead
        let c = Tensor::ones(&[2, 1], (Kind::Float, Device::Cpu));
        let d = Tensor::ones(&[2, 3], (Kind::Float, Device::Cpu));
        let batch = PadCollator::new(-1.0, 1).collate(&[c, d])?;
        assert_eq!(batch.size(), &[2, 2, 3]);
        assert_eq!(batch.double_value(&[0, 0, 2]), -1.0);
        Ok(())
    }

    #[test]
    fn test_pad_collator_uniform_inputs_contain_no_padding() -> Result<()> {
        let tensors = vec![
            Tensor::from_slice(&[1i64, 2, 3]),
            Tensor::from_slice(&[4i64, 5, 6]),
        ];
        let batch = PadCollator::new(-7.0, 0).collate(&tensors)?;
        assert_eq!(batch.size(), &[2, 3]);
        let values: Vec<i64> = batch.flatten(0, -1).try_into()?;
        assert!(!values.contains(&-7));
        Ok(())
    }

    #[test]
    fn test_pad_collator_never_truncates() -> Result<()> {
        let tensors = vec![Tensor::from_slice(&[1i64]), Tensor::from_slice(&[2i64, 3, 4, 5])];
        let batch = PadCollator::new(0.0, 0).collate(&tensors)?;
        assert_eq!(batch.size(), &[2, 4]);
        assert_eq!(batch.int64_value(&[1, 3]), 5);
        Ok(())
    }

    #[test]
    fn test_pad_collator_rejects_mismatch_outside_pad_dim() {
        let a = Tensor::zeros(&[2, 3], (Kind::Float, Device::Cpu));
        let b = Tensor::zeros(&[2, 4], (Kind::Float, Device::Cpu));
        assert!(PadCollator::new(0.0, 0).collate(&[a, b]).is_err());
    }

    #[test]
    fn test_pad_collator_invalid_dim() {
        let tensors = vec![Tensor::from_slice(&[1i64, 2])];
        assert!(PadCollator::new(0.0, 1).collate(&tensors).is_err());
    }

    #[test]
    fn test_stack_collator() -> Result<()> {
        let tensors = vec![Tensor::from_slice(&[1i64, 2]), Tensor::from_slice(&[3i64, 4])];
        let batch = StackCollator.collate(&tensors)?;
        assert_eq!(batch.size(), &[2, 2]);

        let ragged = vec![Tensor::from_slice(&[1i64]), Tensor::from_slice(&[2i64, 3])];
        assert!(StackCollator.collate(&ragged).is_err());
        assert!(StackCollator.collate(&[]).is_err());
        Ok(())
    }

    #[test]
    fn test_concat_collator_joins_leading_axis() -> Result<()> {
        let tensors = vec![
            Tensor::from_slice(&[1u8, 0]),
            Tensor::from_slice(&[2u8, 3, 0]),
        ];
        let batch = ConcatCollator.collate(&tensors)?;
        assert_eq!(batch.size(), &[5]);
        assert_eq!(batch.int64_value(&[2]), 2);

        let scalars = vec![Tensor::from(1.5f64), Tensor::from(2.5f64)];
        assert!(ConcatCollator.collate(&scalars).is_err());
        Ok(())
    }

    #[test]
    fn test_closure_collator() -> Result<()> {
        let sum = |tensors: &[Tensor]| -> Result<Tensor> {
            Ok(Tensor::stack(tensors, 0).sum(Kind::Int64))
        };
        let out = sum.collate(&[Tensor::from_slice(&[1i64]), Tensor::from_slice(&[2i64])])?;
        assert_eq!(out.int64_value(&[]), 3);
        Ok(())
    }
}
