//! Basic benchmarks for the `holdfast` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use holdfast::{
    ContextArray, DynArray, ErasedAllocator, FixedArray, HybridArray, Shared, Unique,
    push_context_allocator,
};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = usize;
const TEST_VALUE: TestItem = 1024;

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("holdfast_handles");

    let allocs_op = allocs.operation("unique_new");
    group.bench_function("unique_new", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(Unique::new(black_box(TEST_VALUE))));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("shared_clone");
    group.bench_function("shared_clone", |b| {
        b.iter_custom(|iters| {
            let shared = Shared::new(TEST_VALUE);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(shared.clone()));
            }

            start.elapsed()
        });
    });

    group.finish();

    let mut group = c.benchmark_group("holdfast_arrays");

    let allocs_op = allocs.operation("heap_push_1k");
    group.bench_function("heap_push_1k", |b| {
        b.iter_custom(|iters| {
            let mut arrays = iter::repeat_with(DynArray::<TestItem>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for array in &mut arrays {
                for _ in 0..1000 {
                    array.push(black_box(TEST_VALUE));
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("context_push_1k");
    group.bench_function("context_push_1k", |b| {
        b.iter_custom(|iters| {
            let _guard = push_context_allocator(ErasedAllocator::system());

            let mut arrays = iter::repeat_with(ContextArray::<TestItem>::default)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for array in &mut arrays {
                for _ in 0..1000 {
                    array.push(black_box(TEST_VALUE));
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("fixed_push_64");
    group.bench_function("fixed_push_64", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let mut array = FixedArray::<TestItem, 64>::default();

                for _ in 0..64 {
                    array.push(black_box(TEST_VALUE));
                }

                drop(black_box(array));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("hybrid_push_inline_16");
    group.bench_function("hybrid_push_inline_16", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let mut array = HybridArray::<TestItem, 16>::new();

                for _ in 0..16 {
                    array.push(black_box(TEST_VALUE));
                }

                drop(black_box(array));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("hybrid_push_overflow_17");
    group.bench_function("hybrid_push_overflow_17", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let mut array = HybridArray::<TestItem, 16>::new();

                for _ in 0..17 {
                    array.push(black_box(TEST_VALUE));
                }

                drop(black_box(array));
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
