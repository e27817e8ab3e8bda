//! Benchmarks for change calculation and list mutation.
//!
//! Run with: cargo bench -p fbind-collections

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use fbind_collections::{ChangesCalculator, DiffCalculator, ObservableList, PositionalCalculator};
use std::hint::black_box;

/// `old` plus a shifted copy with every tenth item replaced and a short tail.
fn fixture(n: usize) -> (Vec<u32>, Vec<u32>) {
    let old: Vec<u32> = (0..n as u32).collect();
    let new: Vec<u32> = old
        .iter()
        .skip(n / 20)
        .map(|&v| if v % 10 == 0 { v + 1_000_000 } else { v })
        .chain((0..n as u32 / 20).map(|v| v + 2_000_000))
        .collect();
    (old, new)
}

/// Reversed blocks of 8, which keeps every item but scrambles the order.
fn shuffled(n: usize) -> (Vec<u32>, Vec<u32>) {
    let old: Vec<u32> = (0..n as u32).collect();
    let new: Vec<u32> = old.chunks(8).flat_map(|c| c.iter().rev().copied()).collect();
    (old, new)
}

// ============================================================================
// Positional calculator
// ============================================================================

fn bench_positional(c: &mut Criterion) {
    let mut group = c.benchmark_group("calculator/positional");

    for n in [100, 1_000, 5_000] {
        let (old, new) = fixture(n);

        group.bench_with_input(BenchmarkId::new("granular", n), &(), |b, _| {
            let calc = PositionalCalculator::new();
            b.iter(|| black_box(calc.calculate(black_box(old.as_slice()), black_box(new.as_slice()))))
        });

        group.bench_with_input(BenchmarkId::new("shrinking", n), &(), |b, _| {
            let calc = PositionalCalculator::shrinking();
            b.iter(|| black_box(calc.calculate(black_box(old.as_slice()), black_box(new.as_slice()))))
        });
    }

    group.finish();
}

// ============================================================================
// Identity diff
// ============================================================================

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("calculator/diff");

    for n in [100, 1_000, 5_000] {
        let (old, new) = fixture(n);
        let plain = DiffCalculator::new(|a: &u32, b: &u32| a == b);
        group.bench_with_input(BenchmarkId::new("edits", n), &(), |b, _| {
            b.iter(|| black_box(plain.calculate(black_box(old.as_slice()), black_box(new.as_slice()))))
        });

        let (old, new) = shuffled(n);
        let moving = DiffCalculator::new(|a: &u32, b: &u32| a == b).detect_moves(true);
        group.bench_with_input(BenchmarkId::new("moves", n), &(), |b, _| {
            b.iter(|| black_box(moving.calculate(black_box(old.as_slice()), black_box(new.as_slice()))))
        });
    }

    group.finish();
}

// ============================================================================
// List mutation
// ============================================================================

fn bench_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("list/mutation");

    for subscribed in [false, true] {
        let label = if subscribed { "subscribed" } else { "silent" };
        group.bench_function(BenchmarkId::new("add_remove", label), |b| {
            let list = ObservableList::from_items((0..1_000u32).collect());
            let _sub = subscribed.then(|| {
                list.observe_changes(|batch| {
                    black_box(batch.sequence_number);
                })
            });
            b.iter(|| {
                list.add(black_box(7)).ok();
                list.remove(list.size() - 1).ok();
            })
        });
    }

    for n in [100, 1_000] {
        let (old, new) = fixture(n);
        group.bench_with_input(BenchmarkId::new("set", n), &(), |b, _| {
            let list = ObservableList::from_items(old.clone());
            b.iter(|| {
                list.set(new.clone()).ok();
                list.set(old.clone()).ok();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_positional, bench_diff, bench_list);

criterion_main!(benches);
