//! Benchmarks for the streaming install path

use std::io;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use flate2::Compression;
use flate2::write::GzEncoder;
use streamota::prelude::*;
use streamota::{GzipStage, StreamingHasher};

fn archive(file_count: usize, file_size: usize) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let data: Vec<u8> = (0..file_size).map(|i| (i * 7 % 256) as u8).collect();
    for n in 0..file_count {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, format!("lib/module_{n}.py"), data.as_slice())?;
    }
    builder.into_inner()?.finish()
}

fn bench_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashing");

    for size in [1_000, 100_000, 1_000_000].iter() {
        let data: Vec<u8> = (0..*size).map(|i| (i % 256) as u8).collect();

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("sha256_512b_chunks", size), &data, |b, data| {
            b.iter(|| {
                let mut hasher = StreamingHasher::new();
                for chunk in data.chunks(512) {
                    hasher.update(chunk);
                }
                hasher.finalize()
            });
        });
    }

    group.finish();
}

fn bench_decompress(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompress");
    let compressed = archive(16, 64 * 1024).expect("Failed to build archive");

    for chunk_size in [512, 4096, 32 * 1024].iter() {
        group.bench_with_input(
            BenchmarkId::new("gzip_stage", chunk_size),
            &compressed,
            |b, data| {
                b.iter(|| {
                    let mut stage = GzipStage::with_chunk_size(data.as_slice(), *chunk_size);
                    let mut total = 0usize;
                    while let Some(chunk) = stage.next_chunk().expect("Decompression failed") {
                        total += chunk.len();
                    }
                    total
                });
            },
        );
    }

    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");
    let compressed = archive(32, 32 * 1024).expect("Failed to build archive");
    let root = tempfile::TempDir::new().expect("Failed to create temp dir");

    for chunk_size in [512, 4096].iter() {
        let extractor = Extractor::new(
            root.path(),
            ExclusionSet::new(["lib/module_0.py"]),
            ExtractOptions {
                chunk_size: *chunk_size,
                ..ExtractOptions::default()
            },
        );

        group.throughput(Throughput::Bytes(compressed.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("extract_gzip", chunk_size),
            &compressed,
            |b, data| {
                b.iter(|| extractor.extract_gzip(data.as_slice()).expect("Extraction failed"));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_hashing, bench_decompress, bench_extract);
criterion_main!(benches);
