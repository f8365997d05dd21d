//! Proof-of-work benchmarks

use compute_chain::pow::{digest, ProofOfWorkEngine};
use compute_chain::{BlockTemplate, Nonce, Tip, Transaction};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tokio_util::sync::CancellationToken;

fn template(difficulty: u32) -> BlockTemplate {
    let transactions = (0..3)
        .map(|n| Transaction::new(format!("100.64.0.{}", n), format!("A: {}\nB: {}\n", n, n * 4)))
        .collect();
    BlockTemplate::new(&Tip::genesis(), transactions, 1_700_000_000, "bench", difficulty)
}

fn bench_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest");
    group.throughput(Throughput::Elements(1));

    let t = template(0);
    group.bench_function("block_digest", |b| {
        let mut nonce = Nonce::new(0);
        b.iter(|| {
            nonce.increment();
            black_box(digest(black_box(&t), nonce))
        })
    });

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    let engine = ProofOfWorkEngine::new();
    let cancel = CancellationToken::new();

    for difficulty in [1u32, 2, 3] {
        let t = template(difficulty);
        group.bench_with_input(BenchmarkId::new("mine", difficulty), &t, |b, t| {
            b.iter(|| engine.mine_blocking(black_box(t), &cancel))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_digest, bench_search);
criterion_main!(benches);
