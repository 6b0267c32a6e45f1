use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use gcheap::{Allocator, Root};

fn churn(allocator: &Allocator, count: usize) {
    for n in 0..count {
        let root = allocator.manage(n).unwrap();
        criterion::black_box(*root);
    }
    allocator.gc();
}

fn retained(allocator: &Allocator, count: usize) -> Vec<Root<[u64; 4]>> {
    (0..count)
        .map(|n| allocator.manage([n as u64; 4]).unwrap())
        .collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    for count in [100, 10_000] {
        c.bench_with_input(
            BenchmarkId::new("churn", count),
            &count,
            |b, &count| {
                let allocator = Allocator::new();
                b.iter(|| { churn(&allocator, count); });
            }
        );

        c.bench_with_input(
            BenchmarkId::new("mark_live", count),
            &count,
            |b, &count| {
                let allocator = Allocator::new();
                let _roots = retained(&allocator, count);
                b.iter(|| { allocator.gc(); });
            }
        );
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
