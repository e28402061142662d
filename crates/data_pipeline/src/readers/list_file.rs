use crate::dataset::{Dataset, SizedDataset};
use crate::error::check_index;
use crate::sample::Sample;
use crate::transform::FieldTransforms;
use anyhow::{bail, ensure, Context, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tch::{Kind, Tensor};
use tracing::debug;

/// Field positions of a [`ListFileDataset`] sample.
pub mod fields {
    pub const INPUT: usize = 0;
    pub const TARGET: usize = 1;
    pub const WORD: usize = 2;
    pub const SAMPLE_ID: usize = 3;
    pub const PATH: usize = 4;
    pub const DURATION: usize = 5;
    pub const TARGET_LENGTH: usize = 6;
    pub const COUNT: usize = 7;
}

/// Loads the raw input tensor of one sample from disk.
///
/// Any `Fn(&Path) -> Result<Tensor>` closure is a loader.
pub trait InputLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Tensor>;
}

impl<F> InputLoader for F
where
    F: Fn(&Path) -> Result<Tensor> + Send + Sync,
{
    fn load(&self, path: &Path) -> Result<Tensor> {
        self(path)
    }
}

/// Reads `.npy` arrays (e.g. precomputed `[T, F]` features).
#[derive(Debug, Clone, Copy, Default)]
pub struct NpyLoader;

impl InputLoader for NpyLoader {
    fn load(&self, path: &Path) -> Result<Tensor> {
        Tensor::read_npy(path).with_context(|| format!("Failed to read npy file: {}", path.display()))
    }
}

#[derive(Debug, Clone)]
struct ListEntry {
    sample_id: String,
    input_path: PathBuf,
    duration: f64,
    transcript: String,
}

/// Reads a list file with one sample per line:
///
/// ```text
/// <sample_id> <input_path> <duration> [transcript words ...]
/// ```
///
/// Blank lines are skipped. Relative input paths are resolved against the
/// directory holding the list file. Only the list itself is read at
/// construction; inputs are loaded on `get`.
///
/// Every sample has seven fields, see [`fields`]:
/// input, target, word, sample id, input path, duration, target length.
/// Target and word both start as the transcript's bytes (`Int64`) and go
/// through their own transform. Sample id and path are NUL-terminated
/// `Uint8` strings, so a concatenated batch can be split back with
/// [`read_sample_ids`].
pub struct ListFileDataset {
    list_path: PathBuf,
    entries: Arc<[ListEntry]>,
    transforms: FieldTransforms,
    loader: Arc<dyn InputLoader>,
}

impl fmt::Debug for ListFileDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListFileDataset")
            .field("list_path", &self.list_path)
            .field("len", &self.entries.len())
            .field("transforms", &self.transforms)
            .finish()
    }
}

impl ListFileDataset {
    /// Parses `list_path`, loading inputs with [`NpyLoader`].
    pub fn new(list_path: impl Into<PathBuf>, transforms: FieldTransforms) -> Result<Self> {
        Self::with_loader(list_path, transforms, NpyLoader)
    }

    pub fn with_loader(
        list_path: impl Into<PathBuf>,
        transforms: FieldTransforms,
        loader: impl InputLoader + 'static,
    ) -> Result<Self> {
        let list_path = list_path.into();
        let entries = Self::parse(&list_path)?;
        debug!(
            list = %list_path.display(),
            samples = entries.len(),
            "loaded list file"
        );
        Ok(Self {
            list_path,
            entries: entries.into(),
            transforms,
            loader: Arc::new(loader),
        })
    }

    fn parse(list_path: &Path) -> Result<Vec<ListEntry>> {
        let file = File::open(list_path)
            .with_context(|| format!("Failed to open list file: {}", list_path.display()))?;
        let base_dir = list_path.parent().unwrap_or_else(|| Path::new(""));

        let mut entries = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| {
                format!("Error reading {} line {}", list_path.display(), line_num + 1)
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = Self::parse_line(&line, base_dir).with_context(|| {
                format!("Malformed entry at {} line {}", list_path.display(), line_num + 1)
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn parse_line(line: &str, base_dir: &Path) -> Result<ListEntry> {
        let mut parts = line.split_whitespace();
        let (Some(sample_id), Some(path), Some(duration)) = (parts.next(), parts.next(), parts.next())
        else {
            bail!("expected '<sample_id> <input_path> <duration> [transcript]', got '{}'", line);
        };

        let duration: f64 = duration
            .parse()
            .with_context(|| format!("invalid duration '{}'", duration))?;
        ensure!(
            duration.is_finite() && duration >= 0.0,
            "duration must be finite and non-negative, got {}",
            duration
        );

        let path = Path::new(path);
        let input_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        };

        Ok(ListEntry {
            sample_id: sample_id.to_string(),
            input_path,
            duration,
            transcript: parts.collect::<Vec<_>>().join(" "),
        })
    }

    pub fn list_path(&self) -> &Path {
        &self.list_path
    }

    pub fn sample_id(&self, index: usize) -> Result<&str> {
        check_index(index, self.entries.len())?;
        Ok(&self.entries[index].sample_id)
    }

    pub fn input_path(&self, index: usize) -> Result<&Path> {
        check_index(index, self.entries.len())?;
        Ok(&self.entries[index].input_path)
    }
}

fn transcript_tensor(transcript: &str) -> Tensor {
    let bytes: Vec<i64> = transcript.bytes().map(i64::from).collect();
    Tensor::from_slice(&bytes)
}

fn nul_terminated(text: &str) -> Tensor {
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(0u8);
    Tensor::from_slice(&bytes)
}

impl Dataset for ListFileDataset {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        check_index(index, self.entries.len())?;
        let entry = &self.entries[index];

        let input = self
            .loader
            .load(&entry.input_path)
            .and_then(|raw| self.transforms.apply_input(raw))
            .with_context(|| format!("Failed to load input of sample '{}'", entry.sample_id))?;
        let target = self
            .transforms
            .apply_target(transcript_tensor(&entry.transcript))
            .with_context(|| format!("Failed to build target of sample '{}'", entry.sample_id))?;
        let word = self
            .transforms
            .apply_word(transcript_tensor(&entry.transcript))
            .with_context(|| format!("Failed to build words of sample '{}'", entry.sample_id))?;
        let target_length = target.size().first().copied().unwrap_or(0);

        Ok(Sample::new(vec![
            input,
            target,
            word,
            nul_terminated(&entry.sample_id),
            nul_terminated(&entry.input_path.to_string_lossy()),
            Tensor::from_slice(&[entry.duration as f32]),
            Tensor::from_slice(&[target_length]),
        ]))
    }
}

impl SizedDataset for ListFileDataset {
    fn input_size(&self, index: usize) -> Result<f64> {
        check_index(index, self.entries.len())?;
        Ok(self.entries[index].duration)
    }
}

/// Splits a tensor of NUL-terminated strings (a sample-id or path field,
/// possibly concatenated over a batch) back into strings.
pub fn read_sample_ids(tensor: &Tensor) -> Result<Vec<String>> {
    let bytes = Vec::<u8>::try_from(&tensor.flatten(0, -1).to_kind(Kind::Uint8))
        .context("Sample id tensor is not readable as bytes")?;
    let Some((&last, _)) = bytes.split_last() else {
        return Ok(Vec::new());
    };
    ensure!(last == 0, "Sample id tensor is not NUL-terminated");

    bytes[..bytes.len() - 1]
        .split(|&b| b == 0)
        .map(|id| String::from_utf8(id.to_vec()).context("Sample id is not valid UTF-8"))
        .collect()
}
