//! src/pipeline.rs
//!
//! Assembles raw per-file sources into the per-rank batched dataset a
//! training loop consumes.
//!
//! ```text
//!   list files ─► ListFileDataset ×K ─► ConcatDataset ─► ResampleDataset (order)
//!                                                            │
//!              static:  partition_by_round_robin ────────────┤
//!              dynamic: dynamic_partition_by_round_robin ────┤
//!                                                            ▼
//!                          BatchDataset ◄── ResampleDataset (this rank's share)
//!                               │
//!            load_prefetch_dataset: ShuffleDataset ─► PrefetchDataset
//! ```
//!
//! Every rank runs the same assembly on the same inputs and arrives at a
//! disjoint share of the batches without communicating.

use crate::collator::{Collator, ConcatCollator, PadCollator};
use crate::config::{PipelineConfig, StorageBackend};
use crate::dataset::{
    BatchDataset, BatchPolicy, ConcatDataset, Dataset, ResampleDataset, ShuffleDataset,
    SizedDataset,
};
use crate::error::DataError;
use crate::partition::{dynamic_partition_by_round_robin, partition_by_round_robin};
use crate::prefetch::PrefetchDataset;
use crate::readers::ListFileDataset;
use crate::transform::FieldTransforms;
use anyhow::{ensure, Context, Result};
use rand::distr::{Bernoulli, Distribution};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds this rank's batched dataset from list files.
///
/// Each entry of `paths` is joined onto `root_dir` and read as a
/// [`ListFileDataset`]; the rest of the assembly is
/// [`create_dataset_from_sources`].
pub fn create_dataset<P: AsRef<Path>>(
    paths: &[P],
    root_dir: impl AsRef<Path>,
    transforms: FieldTransforms,
    config: &PipelineConfig,
) -> Result<Arc<dyn Dataset>> {
    config.validate()?;
    if config.storage_backend == StorageBackend::Remote {
        return Err(DataError::UnsupportedStorageBackend(config.storage_backend.to_string()).into());
    }

    let root_dir = root_dir.as_ref();
    let sources = paths
        .iter()
        .map(|path| -> Result<Arc<dyn SizedDataset>> {
            let list_path = root_dir.join(path);
            let source = ListFileDataset::new(list_path, transforms.clone())?;
            Ok(Arc::new(source) as Arc<dyn SizedDataset>)
        })
        .collect::<Result<Vec<_>>>()?;
    create_dataset_from_sources(sources, config)
}

/// Orders, partitions and batches any sources that report a per-sample size.
///
/// - Ordering: `none`/`dynamic` sort by descending size (stable);
///   `rand`/`randdynamic` shuffle with a seed equal to the sample count, so
///   every rank draws the same permutation.
/// - Partitioning: static strategies deal `batch_size` batches round-robin;
///   dynamic strategies pack batches under `max_duration_per_batch`.
/// - Collation: fields 0..3 padded with the configured pad values, all
///   other fields concatenated.
pub fn create_dataset_from_sources(
    sources: Vec<Arc<dyn SizedDataset>>,
    config: &PipelineConfig,
) -> Result<Arc<dyn Dataset>> {
    config.validate()?;

    let concat = ConcatDataset::new(sources);
    let sizes = (0..concat.len())
        .map(|i| {
            concat
                .input_size(i)
                .with_context(|| format!("Failed to read input size of sample {}", i))
        })
        .collect::<Result<Vec<_>>>()?;

    let (order, sorted_sizes) = order_samples(&sizes, config.batching_strategy.is_randomized());
    let sorted = ResampleDataset::new(concat, order);
    let collators = field_collators(config);
    let strategy = config.batching_strategy;

    let batched = if strategy.is_dynamic() {
        let partition = dynamic_partition_by_round_robin(
            &sorted_sizes,
            config.world_rank,
            config.world_size,
            config.max_duration_per_batch,
            config.allow_empty,
        )?;
        let rank_ds = ResampleDataset::new(sorted, partition.indices);
        BatchDataset::with_batch_sizes(rank_ds, partition.batch_sizes, collators)?
    } else {
        let indices = partition_by_round_robin(
            sorted.len(),
            config.world_rank,
            config.world_size,
            config.batch_size,
            config.allow_empty,
        )?;
        let rank_ds = ResampleDataset::new(sorted, indices);
        BatchDataset::new(rank_ds, config.batch_size, BatchPolicy::IncludeLast, collators)?
    };

    info!(
        %strategy,
        samples = sizes.len(),
        rank = config.world_rank,
        world_size = config.world_size,
        rank_samples = batched.source().len(),
        batches = batched.len(),
        "created dataset"
    );
    Ok(Arc::new(batched))
}

/// Returns the sample order and the sizes permuted alongside it.
fn order_samples(sizes: &[f64], randomized: bool) -> (Vec<usize>, Vec<f64>) {
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    if randomized {
        let mut rng = StdRng::seed_from_u64(sizes.len() as u64);
        order.shuffle(&mut rng);
    } else {
        order.sort_by(|&a, &b| sizes[b].total_cmp(&sizes[a]));
    }
    let sorted_sizes = order.iter().map(|&i| sizes[i]).collect();
    debug!(samples = sizes.len(), randomized, "ordered samples");
    (order, sorted_sizes)
}

fn field_collators(config: &PipelineConfig) -> Vec<Arc<dyn Collator>> {
    let pads = &config.pad_values;
    vec![
        Arc::new(PadCollator::new(pads.input, config.input_pad_dim)),
        Arc::new(PadCollator::new(pads.target, 0)),
        Arc::new(PadCollator::new(pads.word, 0)),
        Arc::new(ConcatCollator),
        Arc::new(ConcatCollator),
        Arc::new(ConcatCollator),
        Arc::new(ConcatCollator),
    ]
}

/// Wraps an assembled dataset for consumption: shuffle first (when
/// `shuffle` is set), then prefetch with `prefetch_threads` workers and an
/// equal look-ahead depth (when `prefetch_threads > 0`).
pub fn load_prefetch_dataset(
    dataset: Arc<dyn Dataset>,
    prefetch_threads: usize,
    shuffle: bool,
    shuffle_seed: u64,
) -> Result<Arc<dyn Dataset>> {
    let mut dataset = dataset;
    if shuffle {
        dataset = Arc::new(ShuffleDataset::new(dataset, shuffle_seed));
    }
    if prefetch_threads > 0 {
        dataset = Arc::new(PrefetchDataset::new(dataset, prefetch_threads, prefetch_threads)?);
    }
    debug!(prefetch_threads, shuffle, shuffle_seed, "wrapped dataset for loading");
    Ok(dataset)
}

/// [`create_dataset`] followed by [`load_prefetch_dataset`] with the
/// shuffle and prefetch settings of `config`.
pub fn create_pipeline<P: AsRef<Path>>(
    paths: &[P],
    root_dir: impl AsRef<Path>,
    transforms: FieldTransforms,
    config: &PipelineConfig,
) -> Result<Arc<dyn Dataset>> {
    let dataset = create_dataset(paths, root_dir, transforms, config)?;
    load_prefetch_dataset(
        dataset,
        config.prefetch_threads,
        config.shuffle,
        config.shuffle_seed,
    )
}

/// Selects a random subset of `0..ds_size` for evaluation on training data;
/// each index is kept independently with probability `pct_train_eval / 100`.
pub fn train_eval_ids(ds_size: usize, pct_train_eval: f64, seed: u64) -> Result<HashSet<usize>> {
    ensure!(
        (0.0..=100.0).contains(&pct_train_eval),
        "pct_train_eval must be in [0, 100], got {}",
        pct_train_eval
    );
    let keep = Bernoulli::new(pct_train_eval / 100.0)?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok((0..ds_size).filter(|_| keep.sample(&mut rng)).collect())
}

/// Parses a comma-separated list of validation sets, each `tag:path` or a
/// bare `path` (tagged with itself). Whitespace is trimmed and empty entries
/// are skipped.
pub fn parse_valid_sets(valid: &str) -> Vec<(String, String)> {
    valid
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.split_once(':') {
            Some((tag, path)) => (tag.trim().to_string(), path.trim().to_string()),
            None => (s.to_string(), s.to_string()),
        })
        .collect()
}
