//! Tests of the lock-guarded pool under contention from many threads.
//!
//! These are ignored under Miri because of their running time.

use std::collections::BTreeMap;
use std::ptr;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use segmented_pool::{Handle, Poolable, RecycledFlag, SyncSegmentedPool};

const THREADS: usize = 8;
const CYCLES: usize = 200;
const ITEMS_PER_CYCLE: usize = 32;

#[derive(Debug)]
struct Envelope {
    sender: usize,
    sequence: usize,
    payload: Vec<u8>,
    recycled: RecycledFlag,
}

impl Envelope {
    fn new(sender: usize, sequence: usize) -> Self {
        Self {
            sender,
            sequence,
            payload: vec![u8::try_from(sender).unwrap(); 16],
            recycled: RecycledFlag::new(),
        }
    }
}

impl Poolable for Envelope {
    fn reset(&mut self) {
        self.payload.clear();
    }

    fn is_recycled(&self) -> bool {
        self.recycled.get()
    }

    fn set_recycled(&mut self, recycled: bool) {
        self.recycled.set(recycled);
    }
}

/// Address ranges of all items that are currently live, keyed by start address.
#[derive(Default)]
struct LiveRanges {
    ranges: Mutex<BTreeMap<usize, usize>>,
}

impl LiveRanges {
    fn insert(&self, start: usize, len: usize) {
        let end = start + len;
        let mut ranges = self.ranges.lock();

        if let Some((_, &previous_end)) = ranges.range(..=start).next_back() {
            assert!(
                previous_end <= start,
                "item at {start:#x} overlaps a live item ending at {previous_end:#x}"
            );
        }

        if let Some((&next_start, _)) = ranges.range(start..).next() {
            assert!(
                next_start >= end,
                "item at {start:#x} overlaps a live item starting at {next_start:#x}"
            );
        }

        ranges.insert(start, end);
    }

    fn remove(&self, start: usize) {
        let removed = self.ranges.lock().remove(&start);
        assert!(removed.is_some(), "item at {start:#x} was not registered");
    }

    fn is_empty(&self) -> bool {
        self.ranges.lock().is_empty()
    }
}

fn address_of(pool: &SyncSegmentedPool<Envelope>, handle: Handle<Envelope>) -> usize {
    pool.with(handle, |item| ptr::from_ref(item).addr())
        .expect("handle refers to a live item")
}

#[cfg_attr(miri, ignore)]
#[test]
fn concurrent_allocations_never_overlap() {
    let pool = Arc::new(SyncSegmentedPool::<Envelope>::new());
    let live = Arc::new(LiveRanges::default());
    let slot_size = pool.lock().slot_size();

    let workers: Vec<_> = (0..THREADS)
        .map(|sender| {
            let pool = Arc::clone(&pool);
            let live = Arc::clone(&live);

            thread::spawn(move || {
                for cycle in 0..CYCLES {
                    let handles: Vec<_> = (0..ITEMS_PER_CYCLE)
                        .map(|index| {
                            let sequence = cycle * ITEMS_PER_CYCLE + index;
                            let handle = pool.allocate(Envelope::new(sender, sequence));

                            live.insert(address_of(&pool, handle), slot_size);
                            (handle, sequence)
                        })
                        .collect();

                    for (handle, sequence) in handles {
                        let intact = pool
                            .with(handle, |item| {
                                item.sender == sender
                                    && item.sequence == sequence
                                    && item.payload.len() == 16
                                    && !item.is_recycled()
                            })
                            .expect("handle refers to a live item");
                        assert!(intact, "item {sequence} of sender {sender} was tampered with");

                        // Unregister before the slot can be handed to another thread.
                        live.remove(address_of(&pool, handle));
                        pool.deallocate(handle);
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(pool.live(), 0);
    assert!(live.is_empty());

    // Every segment is still around for reuse.
    assert!(pool.segment_count() >= 1);
    assert!(pool.total_capacity() >= ITEMS_PER_CYCLE);
}

#[cfg_attr(miri, ignore)]
#[test]
fn items_survive_churn_on_other_threads() {
    let pool = Arc::new(SyncSegmentedPool::<Envelope>::new());

    let anchors: Vec<_> = (0..100)
        .map(|sequence| pool.allocate(Envelope::new(0, sequence)))
        .collect();
    let anchor_addresses: Vec<_> = anchors
        .iter()
        .map(|&handle| address_of(&pool, handle))
        .collect();

    let workers: Vec<_> = (1..=THREADS)
        .map(|sender| {
            let pool = Arc::clone(&pool);

            thread::spawn(move || {
                for sequence in 0..CYCLES * ITEMS_PER_CYCLE {
                    let handle = pool.allocate(Envelope::new(sender, sequence));
                    pool.deallocate(handle);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    for ((sequence, &handle), &address) in anchors.iter().enumerate().zip(&anchor_addresses) {
        assert_eq!(address_of(&pool, handle), address);
        assert_eq!(pool.with(handle, |item| item.sequence), Some(sequence));

        pool.deallocate(handle);
    }

    assert!(pool.is_empty());
}
