//! Graph Construction and Canonicalization Benchmarks
//!
//! Node creation and rewriting dominate compilation time, so the edge
//! protocol and the canonicalizer worklist are the hot paths worth
//! tracking.
//!
//! # Benchmark Categories
//!
//! 1. **Construction**: straight-line expression chains through the
//!    value-numbering factories
//! 2. **Usage queries**: replace-at-usages over wide fan-out
//! 3. **Canonicalization**: fixed-point driving of foldable expression
//!    trees

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput, black_box};
use opal_ir::{
    ArithOp, Canonicalizer, CmpOp, DefaultCanonicalizerTool, Graph, Stamp,
};

// =============================================================================
// Benchmark Helpers
// =============================================================================

/// Build a chain of `n` dependent additions over two parameters.
fn build_chain(n: usize) -> Graph {
    let mut g = Graph::new();
    let entry = g.append_begin(g.start);
    let a = g.parameter(0, Stamp::INT);
    let b = g.parameter(1, Stamp::INT);
    let mut acc = g.int_add(a, b);
    for _ in 0..n {
        acc = g.int_op(ArithOp::Add, acc, b);
    }
    g.append_return(entry, Some(acc));
    g
}

/// Build `n` foldable comparison trees over constants.
fn build_foldable(n: usize) -> Graph {
    let mut g = Graph::new();
    let entry = g.append_begin(g.start);
    let mut last = g.const_bool(true);
    for i in 0..n {
        let x = g.const_int(i as i64);
        let y = g.const_int((i + 1) as i64);
        let sum = g.int_add(x, y);
        let cmp = g.int_cmp(CmpOp::Lt, x, sum);
        last = g.not(cmp);
    }
    g.append_return(entry, Some(last));
    g
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");
    for size in [64usize, 512, 4096] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bencher, &n| {
            bencher.iter(|| black_box(build_chain(n)));
        });
    }
    group.finish();
}

fn bench_replace_at_usages(c: &mut Criterion) {
    c.bench_function("replace_at_usages/1024_users", |bencher| {
        bencher.iter_with_setup(
            || {
                let mut g = Graph::new();
                let entry = g.append_begin(g.start);
                let old = g.parameter(0, Stamp::INT);
                let new = g.parameter(1, Stamp::INT);
                let mut acc = old;
                for _ in 0..1024 {
                    acc = g.int_op(ArithOp::Add, acc, old);
                }
                g.append_return(entry, Some(acc));
                (g, old, new)
            },
            |(mut g, old, new)| {
                g.replace_at_usages(old, new, None);
                black_box(g);
            },
        );
    });
}

fn bench_canonicalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonicalize");
    for size in [64usize, 512] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bencher, &n| {
            bencher.iter_with_setup(
                || build_foldable(n),
                |mut g| {
                    let applied = Canonicalizer::new().run(&mut g, &DefaultCanonicalizerTool);
                    black_box((g, applied));
                },
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_construction,
    bench_replace_at_usages,
    bench_canonicalize
);
criterion_main!(benches);
