//! Pack decoding benchmarks for twig.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tempfile::TempDir;
use twig_git::{apply_delta, encode_delta, DeltaInstruction, PackBuilder, PackDecoder};
use twig_storage::{GitObject, ObjectStore};

fn blob(i: usize, size: usize) -> GitObject {
    let mut data: Vec<u8> = (0..size).map(|j| ((i + j) % 256) as u8).collect();
    data.extend_from_slice(format!("object {i}").as_bytes());
    GitObject::blob(data)
}

/// A pack of `count` full blobs.
fn base_pack(count: usize, size: usize) -> Vec<u8> {
    let mut builder = PackBuilder::new();
    for i in 0..count {
        builder.add(blob(i, size));
    }
    builder.build().unwrap()
}

/// A pack holding one base blob followed by a chain of `depth` deltas.
fn chain_pack(depth: usize, size: usize) -> Vec<u8> {
    let mut builder = PackBuilder::new();
    let base = blob(0, size);
    let mut len = base.data.len();
    let mut previous = builder.add(base);
    for i in 0..depth {
        let literal = format!("line {i}\n").into_bytes();
        let delta = encode_delta(
            len,
            len + literal.len(),
            &[
                DeltaInstruction::Copy { offset: 0, length: len },
                DeltaInstruction::Insert(literal.clone()),
            ],
        )
        .unwrap();
        len += literal.len();
        previous = builder.add_ofs_delta(previous, delta).unwrap();
    }
    builder.build().unwrap()
}

fn bench_decode_bases(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack_decode_bases");

    for count in [10usize, 100, 1_000].iter() {
        let pack = base_pack(*count, 1_024);
        group.throughput(Throughput::Bytes(pack.len() as u64));
        group.bench_with_input(BenchmarkId::new("objects", count), &pack, |b, pack| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let store = ObjectStore::new(dir.path().join("objects"));
                black_box(PackDecoder::new(pack).decode(&store).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_decode_delta_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack_decode_delta_chain");

    for depth in [10usize, 100, 500].iter() {
        let pack = chain_pack(*depth, 4_096);
        group.bench_with_input(BenchmarkId::new("depth", depth), &pack, |b, pack| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let store = ObjectStore::new(dir.path().join("objects"));
                black_box(PackDecoder::new(pack).decode(&store).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_parse_entries(c: &mut Criterion) {
    let pack = base_pack(1_000, 1_024);
    c.bench_function("pack_parse_entries_1000", |b| {
        b.iter(|| black_box(PackDecoder::new(&pack).entries().unwrap()))
    });
}

fn bench_apply_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_delta");

    for size in [1_024usize, 102_400, 1_048_576].iter() {
        let base: Vec<u8> = (0..*size).map(|i| (i % 251) as u8).collect();
        let half = size / 2;
        let delta = encode_delta(
            *size,
            *size,
            &[
                DeltaInstruction::Copy { offset: half, length: size - half },
                DeltaInstruction::Copy { offset: 0, length: half },
            ],
        )
        .unwrap();
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("swap_halves", size), &base, |b, base| {
            b.iter(|| black_box(apply_delta(base, &delta).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_decode_bases,
    bench_decode_delta_chain,
    bench_parse_entries,
    bench_apply_delta,
);

criterion_main!(benches);
