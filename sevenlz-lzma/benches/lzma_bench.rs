//! Performance benchmarks for sevenlz-lzma.
//!
//! Covers compression and decompression throughput across levels and
//! data patterns, plus the LZMA2 framing overhead.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sevenlz_lzma::{Level, Lzma2Config, LzmaOptions, compress, decode_lzma2, decompress_bytes, encode_lzma2};
use std::hint::black_box;

/// Generate test data patterns for benchmarking.
mod test_data {
    /// Uniform data, the best case for the match finder.
    pub fn uniform(size: usize) -> Vec<u8> {
        vec![0xAA; size]
    }

    /// Reproducible random data, the worst case.
    pub fn random(size: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(size);
        let mut seed: u64 = 0x1234_5678_9ABC_DEF0;
        for _ in 0..size {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            data.push((seed >> 32) as u8);
        }
        data
    }

    /// Text-like data, the realistic middle ground.
    pub fn text_like(size: usize) -> Vec<u8> {
        let phrase = b"the compression ratio of a dictionary coder depends on the match finder. ";
        let mut data = Vec::with_capacity(size);
        while data.len() < size {
            let take = phrase.len().min(size - data.len());
            data.extend_from_slice(&phrase[..take]);
        }
        data
    }
}

fn bench_compress_levels(c: &mut Criterion) {
    let data = test_data::text_like(256 * 1024);
    let mut group = c.benchmark_group("compress_levels");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for level in [0u8, 3, 6, 9] {
        group.bench_with_input(BenchmarkId::from_parameter(level), &level, |b, &level| {
            b.iter(|| compress(black_box(&data), Level::new(level)).unwrap());
        });
    }
    group.finish();
}

fn bench_compress_patterns(c: &mut Criterion) {
    let patterns: [(&str, Vec<u8>); 3] = [
        ("uniform", test_data::uniform(256 * 1024)),
        ("random", test_data::random(256 * 1024)),
        ("text", test_data::text_like(256 * 1024)),
    ];

    let mut group = c.benchmark_group("compress_patterns");
    for (name, data) in &patterns {
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), data, |b, data| {
            b.iter(|| compress(black_box(data), Level::DEFAULT).unwrap());
        });
    }
    group.finish();
}

fn bench_decompress(c: &mut Criterion) {
    let data = test_data::text_like(1 << 20);
    let packed = compress(&data, Level::DEFAULT).unwrap();

    let mut group = c.benchmark_group("decompress");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("text_1mib", |b| {
        b.iter(|| decompress_bytes(black_box(&packed)).unwrap());
    });
    group.finish();
}

fn bench_lzma2(c: &mut Criterion) {
    let data = test_data::text_like(1 << 20);
    let config = Lzma2Config::new(LzmaOptions::from_level(Level::new(4)));
    let packed = encode_lzma2(&data, &config).unwrap();

    let mut group = c.benchmark_group("lzma2");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("encode", |b| {
        b.iter(|| encode_lzma2(black_box(&data), &config).unwrap());
    });
    group.bench_function("decode", |b| {
        b.iter(|| decode_lzma2(black_box(&packed), config.options.dict_size).unwrap());
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_compress_levels,
    bench_compress_patterns,
    bench_decompress,
    bench_lzma2
);
criterion_main!(benches);
