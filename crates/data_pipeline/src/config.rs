//! src/config.rs
//!
//! Configuration for pipeline assembly
//!
//! The `PipelineConfig` struct stores every parameter that decides how
//! [`create_dataset`](crate::pipeline::create_dataset) orders, partitions and
//! batches the raw sources, plus the post-construction shuffle/prefetch
//! wrapping.
//!
//! Example:
//! ```ignore
//! let config = PipelineConfig::builder()
//!     .batching_strategy(BatchingStrategy::RandDynamic)
//!     .max_duration_per_batch(120.0)
//!     .world_rank(rank)
//!     .world_size(8)
//!     .prefetch_threads(4)
//!     .build();
//! config.validate()?;
//! ```
//!
//! The same structure can be read from JSON with
//! [`PipelineConfig::from_json_str`]; missing keys take their defaults.

use crate::error::DataError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where raw samples live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StorageBackend {
    /// List files and inputs on a local filesystem
    #[default]
    Local,
    /// Remote blob storage; not available in this build
    Remote,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Local => "local",
            StorageBackend::Remote => "remote",
        }
    }
}

impl FromStr for StorageBackend {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(StorageBackend::Local),
            "remote" => Ok(StorageBackend::Remote),
            other => Err(DataError::UnsupportedStorageBackend(other.to_string())),
        }
    }
}

/// How samples are ordered and grouped into per-rank batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BatchingStrategy {
    /// Sorted by descending size, uniform batches dealt round-robin
    #[default]
    None,
    /// Seeded shuffle, uniform batches dealt round-robin
    Rand,
    /// Sorted by descending size, duration-budgeted batches
    Dynamic,
    /// Seeded shuffle, duration-budgeted batches
    RandDynamic,
}

impl BatchingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchingStrategy::None => "none",
            BatchingStrategy::Rand => "rand",
            BatchingStrategy::Dynamic => "dynamic",
            BatchingStrategy::RandDynamic => "randdynamic",
        }
    }

    /// Batches are packed by cost rather than by count
    pub fn is_dynamic(&self) -> bool {
        matches!(self, BatchingStrategy::Dynamic | BatchingStrategy::RandDynamic)
    }

    /// Samples are shuffled rather than sorted before partitioning
    pub fn is_randomized(&self) -> bool {
        matches!(self, BatchingStrategy::Rand | BatchingStrategy::RandDynamic)
    }
}

impl FromStr for BatchingStrategy {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(BatchingStrategy::None),
            "rand" => Ok(BatchingStrategy::Rand),
            "dynamic" => Ok(BatchingStrategy::Dynamic),
            "randdynamic" => Ok(BatchingStrategy::RandDynamic),
            other => Err(DataError::UnknownBatchingStrategy(other.to_string())),
        }
    }
}

macro_rules! string_tag_conversions {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<String> for $ty {
            type Error = DataError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.as_str().to_string()
            }
        }
    )*};
}

string_tag_conversions!(StorageBackend, BatchingStrategy);

/// Fill values for the input, target and word fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PadValues {
    pub input: f64,
    pub target: f64,
    pub word: f64,
}

impl Default for PadValues {
    fn default() -> Self {
        Self {
            input: 0.0,
            target: -1.0,
            word: -1.0,
        }
    }
}

impl PadValues {
    pub fn new(input: f64, target: f64, word: f64) -> Self {
        Self {
            input,
            target,
            word,
        }
    }

    /// All values must be finite; target and word pads fill integer token
    /// tensors and must be whole numbers.
    pub fn validate(&self) -> Result<(), DataError> {
        for (name, value) in [("input", self.input), ("target", self.target), ("word", self.word)] {
            if !value.is_finite() {
                return Err(DataError::InvalidPadValues {
                    reason: format!("{name} pad value must be finite, got {value}"),
                });
            }
        }
        for (name, value) in [("target", self.target), ("word", self.word)] {
            if value.fract() != 0.0 {
                return Err(DataError::InvalidPadValues {
                    reason: format!("{name} pad value must be an integer, got {value}"),
                });
            }
        }
        Ok(())
    }
}

/// Configuration for dataset assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage_backend: StorageBackend,
    pub batching_strategy: BatchingStrategy,
    /// Samples per batch for the static strategies (must be > 0)
    pub batch_size: usize,
    pub pad_values: PadValues,
    /// Axis of the input field padded to the batch maximum
    pub input_pad_dim: usize,
    pub world_rank: usize,
    pub world_size: usize,
    /// Let a rank end up with no samples instead of failing
    pub allow_empty: bool,
    /// Cost budget per batch for the dynamic strategies (0 = unset)
    pub max_duration_per_batch: f64,
    /// Background prefetch workers (0 = no prefetching)
    pub prefetch_threads: usize,
    pub shuffle: bool,
    pub shuffle_seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::Local,
            batching_strategy: BatchingStrategy::None,
            batch_size: 1,
            pad_values: PadValues::default(),
            input_pad_dim: 0,
            world_rank: 0,
            world_size: 1,
            allow_empty: false,
            max_duration_per_batch: 0.0,
            prefetch_threads: 0,
            shuffle: false,
            shuffle_seed: 0,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Reads a configuration from JSON and validates it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).context("Pipeline config is not valid JSON")?;

        // Report bad tags with their own error kind
        if let Some(tag) = value.get("batching_strategy").and_then(|v| v.as_str()) {
            tag.parse::<BatchingStrategy>()?;
        }
        if let Some(tag) = value.get("storage_backend").and_then(|v| v.as_str()) {
            tag.parse::<StorageBackend>()?;
        }

        let config: Self =
            serde_json::from_value(value).context("Failed to deserialize pipeline config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize pipeline config")
    }

    /// Fails fast on any parameter combination the assembly cannot honor.
    pub fn validate(&self) -> Result<(), DataError> {
        if self.batch_size == 0 {
            return Err(DataError::invalid_config("batch_size must be >= 1"));
        }
        if self.world_size == 0 {
            return Err(DataError::invalid_config("world_size must be >= 1"));
        }
        if self.world_rank >= self.world_size {
            return Err(DataError::invalid_config(format!(
                "world_rank {} must be < world_size {}",
                self.world_rank, self.world_size
            )));
        }
        self.pad_values.validate()?;

        let budget = self.max_duration_per_batch;
        if !(budget.is_finite() && budget >= 0.0) {
            return Err(DataError::invalid_config(format!(
                "max_duration_per_batch must be finite and non-negative, got {budget}"
            )));
        }
        if self.batching_strategy.is_dynamic() && budget == 0.0 {
            return Err(DataError::invalid_config(format!(
                "batching strategy '{}' requires max_duration_per_batch > 0",
                self.batching_strategy
            )));
        }
        Ok(())
    }
}

/// Builder for PipelineConfig with method chaining
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn storage_backend(mut self, backend: StorageBackend) -> Self {
        self.config.storage_backend = backend;
        self
    }

    pub fn batching_strategy(mut self, strategy: BatchingStrategy) -> Self {
        self.config.batching_strategy = strategy;
        self
    }

    /// Set the batch size (must be > 0)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn pad_values(mut self, input: f64, target: f64, word: f64) -> Self {
        self.config.pad_values = PadValues::new(input, target, word);
        self
    }

    pub fn input_pad_dim(mut self, dim: usize) -> Self {
        self.config.input_pad_dim = dim;
        self
    }

    pub fn world_rank(mut self, rank: usize) -> Self {
        self.config.world_rank = rank;
        self
    }

    pub fn world_size(mut self, size: usize) -> Self {
        self.config.world_size = size;
        self
    }

    pub fn allow_empty(mut self, allow: bool) -> Self {
        self.config.allow_empty = allow;
        self
    }

    /// Set the per-batch cost budget used by the dynamic strategies
    pub fn max_duration_per_batch(mut self, budget: f64) -> Self {
        self.config.max_duration_per_batch = budget;
        self
    }

    /// Set the number of prefetch workers; also used as look-ahead depth
    pub fn prefetch_threads(mut self, threads: usize) -> Self {
        self.config.prefetch_threads = threads;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    pub fn shuffle_seed(mut self, seed: u64) -> Self {
        self.config.shuffle_seed = seed;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}
