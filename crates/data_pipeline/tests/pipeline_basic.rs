//! End-to-end assembly tests: list files on disk through `create_dataset`.
//!
//! Tests cover:
//! - Field layout and padding of assembled batches
//! - Sample ids surviving collation
//! - Static and dynamic strategies over several list files
//! - Configuration errors failing before any data is read

mod common;
use common::{write_corpus, Utterance};
use data_pipeline::{
    create_dataset, create_pipeline, read_sample_ids, readers::fields, BatchingStrategy,
    DataError, Dataset, FieldTransforms, PipelineConfig, StorageBackend,
};

use anyhow::Result;
use tch::Tensor;
use tempfile::TempDir;

fn corpus(dir: &TempDir) -> Result<Vec<String>> {
    write_corpus(
        dir.path(),
        "a.lst",
        0,
        &[
            Utterance { frames: 4, transcript: "ab" },
            Utterance { frames: 2, transcript: "abcd" },
            Utterance { frames: 7, transcript: "a" },
        ],
    )?;
    write_corpus(
        dir.path(),
        "b.lst",
        3,
        &[
            Utterance { frames: 5, transcript: "abc" },
            Utterance { frames: 1, transcript: "" },
        ],
    )?;
    Ok(vec!["a.lst".to_string(), "b.lst".to_string()])
}

#[test]
fn test_static_batches_are_sorted_and_padded() -> Result<()> {
    let dir = TempDir::new()?;
    let paths = corpus(&dir)?;
    let config = PipelineConfig::builder().batch_size(2).build();
    let ds = create_dataset(&paths, dir.path(), FieldTransforms::new(), &config)?;

    // frames 4,2,7,5,1 -> descending order utt002, utt003, utt000, utt001, utt004
    assert_eq!(ds.len(), 3);
    let first = ds.get(0)?;
    assert_eq!(first.arity(), fields::COUNT);
    assert_eq!(read_sample_ids(first.get(fields::SAMPLE_ID)?)?, vec!["utt002", "utt003"]);

    // input [N, T_max, F], padded with the input pad value
    let input = first.get(fields::INPUT)?;
    assert_eq!(input.size(), &[2, 7, 3]);
    assert_eq!(input.double_value(&[1, 4, 0]), 3.0);
    assert_eq!(input.double_value(&[1, 5, 0]), 0.0);

    // target "a" vs "abc": padded with -1
    let target = first.get(fields::TARGET)?;
    assert_eq!(target.size(), &[2, 3]);
    assert_eq!(target.int64_value(&[0, 1]), -1);
    assert_eq!(target.int64_value(&[1, 2]), i64::from(b'c'));

    let lengths: Vec<i64> = first.get(fields::TARGET_LENGTH)?.try_into()?;
    assert_eq!(lengths, vec![1, 3]);
    let durations: Vec<f32> = first.get(fields::DURATION)?.try_into()?;
    assert_eq!(durations, vec![7.0, 5.0]);

    let last = ds.get(2)?;
    assert_eq!(read_sample_ids(last.get(fields::SAMPLE_ID)?)?, vec!["utt004"]);
    let paths = read_sample_ids(last.get(fields::PATH)?)?;
    assert!(paths[0].ends_with("utt004.npy"));
    Ok(())
}

#[test]
fn test_custom_pad_values_and_transforms() -> Result<()> {
    let dir = TempDir::new()?;
    let paths = corpus(&dir)?;
    let config = PipelineConfig::builder()
        .batch_size(5)
        .pad_values(-9.0, 0.0, -2.0)
        .build();
    let transforms =
        FieldTransforms::new().with_word(|t: Tensor| -> Result<Tensor> { Ok(t.narrow(0, 0, t.size()[0].min(1))) });
    let ds = create_dataset(&paths, dir.path(), transforms, &config)?;

    assert_eq!(ds.len(), 1);
    let batch = ds.get(0)?;
    // shortest input (1 frame) padded with -9
    assert_eq!(batch.get(fields::INPUT)?.double_value(&[4, 1, 0]), -9.0);
    // empty transcript padded entirely with the target pad
    assert_eq!(batch.get(fields::TARGET)?.int64_value(&[4, 0]), 0);
    // words truncated to one token by the transform, empty one padded with -2
    let words = batch.get(fields::WORD)?;
    assert_eq!(words.size(), &[5, 1]);
    assert_eq!(words.int64_value(&[4, 0]), -2);
    Ok(())
}

#[test]
fn test_dynamic_strategy_over_list_files() -> Result<()> {
    let dir = TempDir::new()?;
    let paths = corpus(&dir)?;
    let config = PipelineConfig::builder()
        .batching_strategy(BatchingStrategy::Dynamic)
        .max_duration_per_batch(8.0)
        .build();
    let ds = create_dataset(&paths, dir.path(), FieldTransforms::new(), &config)?;

    // durations sorted 7,5,4,2,1 -> [7] [5] [4,2,1]
    let ids: Vec<Vec<String>> = (0..ds.len())
        .map(|b| -> Result<Vec<String>> { read_sample_ids(ds.get(b)?.get(fields::SAMPLE_ID)?) })
        .collect::<Result<_>>()?;
    assert_eq!(
        ids,
        vec![
            vec!["utt002".to_string()],
            vec!["utt003".to_string()],
            vec!["utt000".to_string(), "utt001".to_string(), "utt004".to_string()],
        ]
    );
    for b in 0..ds.len() {
        let durations: Vec<f32> = ds.get(b)?.get(fields::DURATION)?.try_into()?;
        assert!(durations.iter().sum::<f32>() <= 8.0);
    }
    Ok(())
}

#[test]
fn test_pipeline_with_prefetch_matches_plain() -> Result<()> {
    let dir = TempDir::new()?;
    let paths = corpus(&dir)?;
    let plain_config = PipelineConfig::builder().batch_size(2).build();
    let prefetch_config = PipelineConfig::builder().batch_size(2).prefetch_threads(3).build();

    let plain = create_pipeline(&paths, dir.path(), FieldTransforms::new(), &plain_config)?;
    let prefetched = create_pipeline(&paths, dir.path(), FieldTransforms::new(), &prefetch_config)?;
    assert_eq!(plain.len(), prefetched.len());
    for b in 0..plain.len() {
        let (x, y) = (plain.get(b)?, prefetched.get(b)?);
        for field in 0..fields::COUNT {
            assert!(x.get(field)?.equal(y.get(field)?), "batch {} field {}", b, field);
        }
    }
    Ok(())
}

#[test]
fn test_configuration_errors() -> Result<()> {
    let dir = TempDir::new()?;
    let paths = corpus(&dir)?;

    let json = r#"{"batching_strategy": "bucketed"}"#;
    let err = PipelineConfig::from_json_str(json).unwrap_err();
    assert_eq!(
        err.downcast_ref::<DataError>(),
        Some(&DataError::UnknownBatchingStrategy("bucketed".to_string()))
    );

    let remote = PipelineConfig::builder()
        .storage_backend(StorageBackend::Remote)
        .build();
    let err = create_dataset(&paths, dir.path(), FieldTransforms::new(), &remote)
        .err()
        .unwrap();
    assert!(err.downcast_ref::<DataError>().unwrap().is_config());

    let missing = create_dataset(&["nope.lst"], dir.path(), FieldTransforms::new(), &PipelineConfig::default());
    assert!(missing.is_err());
    Ok(())
}
