//! Verifies that the pool only asks the global allocator for memory when it adds a segment.

use alloc_tracker::{Allocator, Session};
use segmented_pool::{Poolable, RecycledFlag, SegmentedPool, SyncSegmentedPool};

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

#[derive(Default)]
struct Sample {
    value: u64,
    recycled: RecycledFlag,
}

impl From<u64> for Sample {
    fn from(value: u64) -> Self {
        Self {
            value,
            recycled: RecycledFlag::new(),
        }
    }
}

impl Poolable for Sample {
    fn reset(&mut self) {
        self.value = 0;
    }

    fn is_recycled(&self) -> bool {
        self.recycled.get()
    }

    fn set_recycled(&mut self, recycled: bool) {
        self.recycled.set(recycled);
    }
}

const CYCLES: u64 = 10_000;

fn bytes_allocated(session: &Session, name: &str) -> u64 {
    session
        .to_report()
        .operations()
        .find(|(operation, _)| *operation == name)
        .map(|(_, operation)| operation.total_bytes_allocated())
        .unwrap()
}

#[test]
#[cfg_attr(miri, ignore)] // Miri replaces the global allocator.
fn warm_allocate_deallocate_does_not_touch_heap() {
    let session = Session::new();
    let mut pool = SegmentedPool::<Sample>::new();

    let warmup = pool.allocate_from(0);
    pool.deallocate(warmup);

    {
        let op = session.operation("warm_cycles");
        let _span = op.measure_thread().iterations(CYCLES);

        for value in 0..CYCLES {
            let handle = pool.allocate_from(value);
            assert_eq!(pool.get(handle).unwrap().value, value);
            pool.deallocate(handle);
        }
    }

    assert_eq!(bytes_allocated(&session, "warm_cycles"), 0);
    assert_eq!(pool.segment_count(), 1);
}

#[test]
#[cfg_attr(miri, ignore)] // Miri replaces the global allocator.
fn refilling_existing_segments_does_not_touch_heap() {
    let session = Session::new();
    let mut pool = SegmentedPool::<Sample>::new();

    let count = usize::try_from(CYCLES).unwrap();
    let mut handles = Vec::with_capacity(count);

    // Grow the pool to its working size, then empty it again.
    handles.extend((0..CYCLES).map(|value| pool.allocate_from(value)));
    let segments = pool.segment_count();
    assert!(segments > 1);

    #[expect(clippy::iter_with_drain, reason = "to reuse the buffer")]
    for handle in handles.drain(..) {
        pool.deallocate(handle);
    }

    {
        let op = session.operation("refill");
        let _span = op.measure_thread().iterations(CYCLES);

        handles.extend((0..CYCLES).map(|value| pool.allocate_from(value)));

        #[expect(clippy::iter_with_drain, reason = "to reuse the buffer")]
        for handle in handles.drain(..) {
            pool.deallocate(handle);
        }
    }

    assert_eq!(bytes_allocated(&session, "refill"), 0);
    assert_eq!(pool.segment_count(), segments);
}

#[test]
#[cfg_attr(miri, ignore)] // Miri replaces the global allocator.
fn guarded_pool_does_not_touch_heap_when_warm() {
    let session = Session::new();
    let pool = SyncSegmentedPool::<Sample>::new();

    let warmup = pool.allocate_from(0);
    pool.deallocate(warmup);

    {
        let op = session.operation("guarded_cycles");
        let _span = op.measure_thread().iterations(CYCLES);

        for value in 0..CYCLES {
            let handle = pool.allocate_from(value);
            pool.deallocate(handle);
        }
    }

    assert_eq!(bytes_allocated(&session, "guarded_cycles"), 0);
}

#[test]
#[cfg_attr(miri, ignore)] // Miri replaces the global allocator.
fn adding_a_segment_touches_heap() {
    let session = Session::new();
    let mut pool = SegmentedPool::<Sample>::new();

    let handle = {
        let op = session.operation("first_allocation");
        let _span = op.measure_thread().iterations(1);

        pool.allocate_from(1)
    };

    assert!(bytes_allocated(&session, "first_allocation") > 0);

    pool.deallocate(handle);
}
