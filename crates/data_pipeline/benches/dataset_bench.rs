use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use data_pipeline::{
    pad_and_stack, BatchDataset, BatchPolicy, Collator, Dataset, InMemoryDataset, PadCollator,
    PrefetchDataset, ResampleDataset, Sample, ShuffleDataset,
};
use std::sync::Arc;
use tch::{Device, Kind, Tensor};

/// Benchmarks for the dataset wrappers.
///
/// This measures:
/// 1. Remapping overhead: a raw source vs. `ResampleDataset` and `ShuffleDataset` over it
/// 2. Batching: gathering and padding variable-length samples
/// 3. Prefetching: a source with per-sample work, read directly vs. through workers
///
/// To run these, use:
/// ```bash
/// cargo bench
/// ```

/// Remapping benchmarks sweep across dataset sizes from 1K to 100K samples.
const SIZES: [usize; 3] = [1_000, 10_000, 100_000];

/// Sample i: field 0 = `[1 + i % 50, 8]` features, field 1 = `[i]`.
fn make_dataset(size: usize) -> InMemoryDataset {
    let samples = (0..size)
        .map(|i| {
            Sample::from_single(Tensor::ones(
                &[1 + (i % 50) as i64, 8],
                (Kind::Float, Device::Cpu),
            ))
            .with_field(Tensor::from_slice(&[i as i64]))
        })
        .collect();
    InMemoryDataset::new(samples)
}

/// Measure the cost of one level of index remapping
fn bench_remapping(c: &mut Criterion) {
    let mut group = c.benchmark_group("Remapping Overhead");

    for &size in &SIZES {
        let ds = make_dataset(size);
        let reversed = ResampleDataset::new(ds.clone(), (0..size).rev().collect());
        let shuffled = ShuffleDataset::new(ds.clone(), 42);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("source", size), &ds, |b, ds| {
            b.iter(|| black_box(ds.iter().count()))
        });

        group.bench_with_input(BenchmarkId::new("resample", size), &reversed, |b, ds| {
            b.iter(|| black_box(ds.iter().count()))
        });

        group.bench_with_input(BenchmarkId::new("shuffle", size), &shuffled, |b, ds| {
            b.iter(|| black_box(ds.iter().count()))
        });
    }
    group.finish();
}

/// Measure padding and stacking of whole batches
fn bench_batching(c: &mut Criterion) {
    let mut group = c.benchmark_group("Batching");
    let ds = make_dataset(10_000);

    for &batch_size in &[8usize, 32, 128] {
        let collators: Vec<Arc<dyn Collator>> = vec![Arc::new(PadCollator::new(0.0, 0))];
        let batched = BatchDataset::new(ds.clone(), batch_size, BatchPolicy::IncludeLast, collators)
            .expect("valid batch size");
        group.throughput(Throughput::Elements(ds.len() as u64));

        group.bench_with_input(BenchmarkId::new("pad_collate", batch_size), &batched, |b, ds| {
            b.iter(|| black_box(ds.iter().count()))
        });
    }

    let tensors: Vec<Tensor> = (0..64)
        .map(|i| Tensor::ones(&[1 + i % 50, 8], (Kind::Float, Device::Cpu)))
        .collect();
    group.bench_function("pad_and_stack/64", |b| {
        b.iter(|| black_box(pad_and_stack(&tensors, 0.0, 0).expect("compatible shapes")))
    });
    group.finish();
}

/// Source whose `get` does a fixed amount of tensor work per sample
struct HeavyDataset {
    inner: InMemoryDataset,
}

impl Dataset for HeavyDataset {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get(&self, index: usize) -> anyhow::Result<Sample> {
        let sample = self.inner.get(index)?;
        let features = sample.get(0)?;
        let transformed = features.matmul(&Tensor::ones(&[8, 256], (Kind::Float, Device::Cpu)));
        Ok(Sample::from_single(transformed.sum(Kind::Float)))
    }
}

/// Measure prefetching against direct reads of a compute-bound source
fn bench_prefetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("Prefetch");
    let size = 2_000;
    let source = Arc::new(HeavyDataset {
        inner: make_dataset(size),
    });
    group.throughput(Throughput::Elements(size as u64));

    group.bench_function("direct", |b| {
        b.iter(|| black_box(source.iter().count()))
    });

    for &threads in &[1usize, 2, 4] {
        group.bench_with_input(BenchmarkId::new("workers", threads), &threads, |b, &threads| {
            b.iter(|| {
                let prefetch = PrefetchDataset::new(source.clone(), threads, threads * 2)
                    .expect("pool starts");
                black_box(prefetch.iter().count())
            })
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .warm_up_time(std::time::Duration::from_secs(2))
        .measurement_time(std::time::Duration::from_secs(5))
        .sample_size(50);
    targets = bench_remapping, bench_batching, bench_prefetch
);
criterion_main!(benches);
