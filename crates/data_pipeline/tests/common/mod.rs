#![allow(dead_code)]

use data_pipeline::{Dataset, InMemoryDataset, Sample, SizedDataset};

use anyhow::{bail, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tch::{Device, Kind, Tensor};

/// One utterance of a test corpus: feature frames and transcript.
pub struct Utterance {
    pub frames: i64,
    pub transcript: &'static str,
}

/// Writes `[frames, 3]` features (filled with the utterance number) as npy
/// files and a list file `name` referencing them. Durations equal `frames`.
pub fn write_corpus(dir: &Path, name: &str, first_id: usize, utts: &[Utterance]) -> Result<PathBuf> {
    let list_path = dir.join(name);
    let mut list = File::create(&list_path)?;
    for (i, utt) in utts.iter().enumerate() {
        let id = first_id + i;
        let features = Tensor::full(&[utt.frames, 3], id as f64, (Kind::Float, Device::Cpu));
        let file_name = format!("utt{:03}.npy", id);
        features.write_npy(dir.join(&file_name))?;
        writeln!(list, "utt{:03} {} {} {}", id, file_name, utt.frames, utt.transcript)?;
    }
    Ok(list_path)
}

/// In-memory sized source: sample i has field 0 = ones of length `sizes[i]`
/// and field 1 = `[first_id + i]`.
pub fn sized_source(sizes: &[i64], first_id: i64) -> Arc<dyn SizedDataset> {
    let samples = sizes
        .iter()
        .enumerate()
        .map(|(i, &n)| {
            Sample::from_single(Tensor::ones(&[n], (Kind::Float, Device::Cpu)))
                .with_field(Tensor::from_slice(&[first_id + i as i64]))
        })
        .collect();
    Arc::new(InMemoryDataset::new(samples))
}

/// Collects field `field` of every batch as a flat `i64` list.
pub fn batch_values(ds: &dyn Dataset, field: usize) -> Result<Vec<Vec<i64>>> {
    (0..ds.len())
        .map(|b| -> Result<Vec<i64>> { Ok(Vec::<i64>::try_from(ds.get(b)?.get(field)?)?) })
        .collect()
}

/// Source with a fixed per-call latency that counts calls per index and
/// fails on one chosen index.
pub struct SlowDataset {
    pub len: usize,
    pub delay: Duration,
    pub fail_at: Option<usize>,
    pub calls: Vec<AtomicUsize>,
}

impl SlowDataset {
    pub fn new(len: usize, delay_ms: u64) -> Self {
        Self {
            len,
            delay: Duration::from_millis(delay_ms),
            fail_at: None,
            calls: (0..len).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    pub fn calls_for(&self, index: usize) -> usize {
        self.calls[index].load(Ordering::SeqCst)
    }
}

/// Error raised by [`SlowDataset`]; tests downcast to it
#[derive(Debug, PartialEq)]
pub struct SourceFailure(pub usize);

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source failed at index {}", self.0)
    }
}

impl std::error::Error for SourceFailure {}

impl Dataset for SlowDataset {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<Sample> {
        if index >= self.len {
            bail!("index {} out of range", index);
        }
        self.calls[index].fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        if self.fail_at == Some(index) {
            return Err(SourceFailure(index).into());
        }
        Ok(Sample::from_single(Tensor::from_slice(&[index as i64])))
    }
}
