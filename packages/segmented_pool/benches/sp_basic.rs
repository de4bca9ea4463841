//! Basic benchmarks for the `segmented_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use segmented_pool::{Poolable, RecycledFlag, SegmentedPool, SyncSegmentedPool};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

#[derive(Default)]
struct TestItem {
    value: usize,
    recycled: RecycledFlag,
}

impl Poolable for TestItem {
    fn is_recycled(&self) -> bool {
        self.recycled.get()
    }

    fn set_recycled(&mut self, recycled: bool) {
        self.recycled.set(recycled);
    }
}

const TEST_VALUE: usize = 1024;

fn test_item() -> TestItem {
    TestItem {
        value: TEST_VALUE,
        recycled: RecycledFlag::new(),
    }
}

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("sp_basic");

    let allocs_op = allocs.operation("build_empty");
    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(SegmentedPool::<TestItem>::new()));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_first");
    group.bench_function("allocate_first", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(SegmentedPool::<TestItem>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate(black_box(test_item())));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_deallocate_warm");
    group.bench_function("allocate_deallocate_warm", |b| {
        let mut pool = SegmentedPool::<TestItem>::new();

        // Warm up so the segment already exists.
        let warmup = pool.allocate(test_item());
        pool.deallocate(warmup);

        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let handle = pool.allocate(black_box(test_item()));
                pool.deallocate(black_box(handle));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("read_item");
    group.bench_function("read_item", |b| {
        let mut pool = SegmentedPool::<TestItem>::new();
        let handle = pool.allocate(test_item());

        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                _ = black_box(pool.get(black_box(handle)).map(|item| item.value));
            }

            start.elapsed()
        });

        pool.deallocate(handle);
    });

    let allocs_op = allocs.operation("churn_1000");
    group.bench_function("churn_1000", |b| {
        let mut pool = SegmentedPool::<TestItem>::new();
        let mut handles = Vec::with_capacity(1000);

        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..1000 {
                    handles.push(pool.allocate(test_item()));
                }

                #[expect(clippy::iter_with_drain, reason = "to reuse the buffer")]
                for handle in handles.drain(..) {
                    pool.deallocate(handle);
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("sync_allocate_deallocate_warm");
    group.bench_function("sync_allocate_deallocate_warm", |b| {
        let pool = SyncSegmentedPool::<TestItem>::new();

        let warmup = pool.allocate(test_item());
        pool.deallocate(warmup);

        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let handle = pool.allocate(black_box(test_item()));
                pool.deallocate(black_box(handle));
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
