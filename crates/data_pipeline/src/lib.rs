//! Composable, index-addressable dataset pipeline for distributed training.
//!
//! Raw sources are wrapped by lazy index remappings ([`ConcatDataset`],
//! [`ResampleDataset`], [`ShuffleDataset`]), grouped into padded batches
//! ([`BatchDataset`]), read ahead in the background ([`PrefetchDataset`])
//! and split across ranks ([`partition`]). [`create_dataset`] wires the
//! whole chain from list files and a [`PipelineConfig`].

pub mod collator;
pub mod config;
pub mod dataset;
pub mod error;
pub mod partition;
pub mod pipeline;
pub mod prefetch;
pub mod readers;
pub mod sample;
pub mod transform;

pub use collator::{pad_and_stack, Collator, ConcatCollator, PadCollator, StackCollator};
pub use config::{BatchingStrategy, PadValues, PipelineConfig, StorageBackend};
pub use dataset::{
    BatchDataset, BatchPolicy, BatchSizes, ConcatDataset, Dataset, DatasetIter, InMemoryDataset,
    ResampleDataset, ShuffleDataset, SizedDataset,
};
pub use error::DataError;
pub use partition::{
    dynamic_partition_by_round_robin, pack_by_cost, partition_by_round_robin, DynamicPartition,
};
pub use pipeline::{
    create_dataset, create_dataset_from_sources, create_pipeline, load_prefetch_dataset,
    parse_valid_sets, train_eval_ids,
};
pub use prefetch::PrefetchDataset;
pub use readers::{read_sample_ids, InputLoader, ListFileDataset, NpyLoader};
pub use sample::Sample;
pub use transform::{FieldTransforms, TensorTransform, Transform};
