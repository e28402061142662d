//! Splitting the global sample index space across distributed ranks.
//!
//! Both functions are pure: every rank computes its own share from the same
//! inputs and all ranks agree without communicating.
//!
//! # Static (`partition_by_round_robin`)
//! ```text
//!   T=10, W=3, B=2
//!   global batch 0:  [0 1 | 2 3 | 4 5]     rank r owns local batch r
//!   trailing chunk:  [6 7 | 8 | 9]         split as evenly as possible
//!   rank 0 -> [0,1,6,7]   rank 1 -> [2,3,8]   rank 2 -> [4,5,9]
//! ```
//!
//! # Dynamic (`dynamic_partition_by_round_robin`)
//! Samples are packed greedily, in the order given, into batches whose summed
//! cost stays within a budget. Batch `k` goes to rank `k % W`. The result
//! carries the explicit batch sizes a [`BatchDataset`](crate::dataset::BatchDataset)
//! needs to rebuild the same batches from the rank's indices.

use crate::error::DataError;
use anyhow::Result;
use std::ops::Range;
use tracing::debug;

/// One rank's share of a cost-budgeted partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicPartition {
    /// Global sample indices owned by the rank, batch after batch
    pub indices: Vec<usize>,
    /// Size of each of the rank's batches; sums to `indices.len()`
    pub batch_sizes: Vec<usize>,
}

impl DynamicPartition {
    pub fn num_batches(&self) -> usize {
        self.batch_sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

fn validate_world(rank: usize, world_size: usize) -> Result<()> {
    if world_size == 0 {
        return Err(DataError::invalid_config("world_size must be >= 1").into());
    }
    if rank >= world_size {
        return Err(DataError::invalid_config(format!(
            "world_rank {rank} must be < world_size {world_size}"
        ))
        .into());
    }
    Ok(())
}

/// Returns the global sample indices owned by `rank` when batches of
/// `batch_size` contiguous samples are dealt round-robin across
/// `world_size` ranks.
///
/// The final, partial round of `R < world_size * batch_size` samples is
/// split so that every rank receives `R / world_size` samples, plus one more
/// for the first `R % world_size` ranks. Across all ranks every index in
/// `0..num_samples` appears exactly once.
///
/// Fails with [`DataError::EmptyPartition`] when `num_samples < world_size`
/// and `allow_empty` is false. With `allow_empty`, ranks past the end get an
/// empty list.
pub fn partition_by_round_robin(
    num_samples: usize,
    rank: usize,
    world_size: usize,
    batch_size: usize,
    allow_empty: bool,
) -> Result<Vec<usize>> {
    validate_world(rank, world_size)?;
    if batch_size == 0 {
        return Err(DataError::invalid_config("batch_size must be >= 1").into());
    }
    if num_samples < world_size && !allow_empty {
        return Err(DataError::EmptyPartition {
            rank,
            world_size,
            reason: format!("only {num_samples} samples for {world_size} ranks"),
        }
        .into());
    }

    let global_batch = world_size * batch_size;
    let full_rounds = num_samples / global_batch;
    let mut indices = Vec::with_capacity(num_samples / world_size + batch_size);

    for round in 0..full_rounds {
        let start = round * global_batch + rank * batch_size;
        indices.extend(start..start + batch_size);
    }

    let tail_start = full_rounds * global_batch;
    let tail = num_samples - tail_start;
    let base = tail / world_size;
    let extra = tail % world_size;
    let local = base + usize::from(rank < extra);
    let offset = tail_start + rank * base + rank.min(extra);
    indices.extend(offset..offset + local);

    debug!(
        rank,
        world_size,
        batch_size,
        num_samples,
        assigned = indices.len(),
        "static round-robin partition"
    );
    Ok(indices)
}

/// Packs `costs`, in order, into contiguous batches whose summed cost is at
/// most `max_cost_per_batch`.
///
/// A batch is closed as soon as the next cost would push it over the budget.
/// A sample whose cost alone exceeds the budget forms a batch on its own.
/// Ranges are returned in order and tile `0..costs.len()` exactly.
pub fn pack_by_cost(costs: &[f64], max_cost_per_batch: f64) -> Result<Vec<Range<usize>>> {
    if !(max_cost_per_batch.is_finite() && max_cost_per_batch > 0.0) {
        return Err(DataError::invalid_config(format!(
            "max cost per batch must be positive and finite, got {max_cost_per_batch}"
        ))
        .into());
    }
    if let Some(pos) = costs.iter().position(|c| !(c.is_finite() && *c >= 0.0)) {
        return Err(DataError::invalid_config(format!(
            "sample {pos} has invalid cost {}",
            costs[pos]
        ))
        .into());
    }

    let mut batches = Vec::new();
    let mut start = 0;
    let mut total = 0.0;
    for (i, &cost) in costs.iter().enumerate() {
        if i > start && total + cost > max_cost_per_batch {
            batches.push(start..i);
            start = i;
            total = 0.0;
        }
        total += cost;
    }
    if start < costs.len() {
        batches.push(start..costs.len());
    }
    Ok(batches)
}

/// Packs `costs` with [`pack_by_cost`] and deals the batches round-robin,
/// returning the share of `rank`.
///
/// The input order is used as is. Sorting by descending cost beforehand
/// gives tighter packing, but it is the caller's choice; the packing never
/// reorders samples.
///
/// Fails with [`DataError::EmptyPartition`] when there are fewer batches
/// than ranks and `allow_empty` is false.
pub fn dynamic_partition_by_round_robin(
    costs: &[f64],
    rank: usize,
    world_size: usize,
    max_cost_per_batch: f64,
    allow_empty: bool,
) -> Result<DynamicPartition> {
    validate_world(rank, world_size)?;
    let batches = pack_by_cost(costs, max_cost_per_batch)?;
    if batches.len() < world_size && !allow_empty {
        return Err(DataError::EmptyPartition {
            rank,
            world_size,
            reason: format!(
                "{} samples pack into only {} batches under budget {max_cost_per_batch}",
                costs.len(),
                batches.len()
            ),
        }
        .into());
    }

    let mut partition = DynamicPartition::default();
    for batch in batches.iter().skip(rank).step_by(world_size) {
        partition.batch_sizes.push(batch.len());
        partition.indices.extend(batch.clone());
    }

    debug!(
        rank,
        world_size,
        max_cost_per_batch,
        total_batches = batches.len(),
        rank_batches = partition.num_batches(),
        assigned = partition.indices.len(),
        "dynamic round-robin partition"
    );
    Ok(partition)
}
