use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use kura_core::{Fingerprinter, SimilarityIndex};

const DIMENSION: usize = 384;

/// Cheap deterministic pseudo-embedding.
fn vector(seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
    (0..DIMENSION)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 2000) as f32 / 1000.0 - 1.0
        })
        .collect()
}

fn bench_index_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_query_top5");
    for size in [100_i64, 1_000, 10_000] {
        let index = SimilarityIndex::open_in_memory().unwrap();
        for id in 1..=size {
            index.upsert(id, &vector(id as u64), "asset").unwrap();
        }
        let query = vector(7);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| index.query(black_box(&query), 5).unwrap());
        });
    }
    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let fingerprinter = Fingerprinter::new().unwrap();
    c.bench_function("fingerprint_description", |b| {
        b.iter(|| fingerprinter.fingerprint(black_box("  A weathered, bronze STATUE of a lion!  ")));
    });
}

criterion_group!(benches, bench_index_query, bench_fingerprint);
criterion_main!(benches);
