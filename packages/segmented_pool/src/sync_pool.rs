use std::any::type_name;
use std::fmt;
use std::mem::MaybeUninit;

use parking_lot::{Mutex, MutexGuard};

use crate::{Handle, Poolable, Result, SegmentedPool, SegmentedPoolBuilder};

/// A [`SegmentedPool`] guarded by a lock, so it can be shared between threads.
///
/// Every operation takes `&self` and holds the lock for its duration. Values passed to
/// [`allocate()`][1] are constructed by the caller before the lock is taken.
///
/// Items cannot be borrowed out of the pool past the lock, so access to them goes through
/// [`with()`][2] and [`with_mut()`][3], which run a closure while holding the lock. To perform
/// several operations under a single lock acquisition, use [`lock()`][4].
///
/// # Thread safety
///
/// The pool is `Send` and `Sync` whenever `T: Send`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use segmented_pool::{Poolable, RecycledFlag, SyncSegmentedPool};
///
/// #[derive(Default)]
/// struct Job {
///     id: u64,
///     recycled: RecycledFlag,
/// }
///
/// impl Poolable for Job {
///     fn is_recycled(&self) -> bool {
///         self.recycled.get()
///     }
///
///     fn set_recycled(&mut self, recycled: bool) {
///         self.recycled.set(recycled);
///     }
/// }
///
/// let pool = Arc::new(SyncSegmentedPool::<Job>::new());
///
/// let workers: Vec<_> = (0..4)
///     .map(|worker| {
///         let pool = Arc::clone(&pool);
///
///         thread::spawn(move || {
///             let handle = pool.allocate(Job {
///                 id: worker,
///                 recycled: RecycledFlag::new(),
///             });
///
///             assert_eq!(pool.with(handle, |job| job.id), Some(worker));
///             pool.deallocate(handle);
///         })
///     })
///     .collect();
///
/// for worker in workers {
///     worker.join().unwrap();
/// }
///
/// assert_eq!(pool.live(), 0);
/// ```
///
/// [1]: Self::allocate
/// [2]: Self::with
/// [3]: Self::with_mut
/// [4]: Self::lock
pub struct SyncSegmentedPool<T> {
    inner: Mutex<SegmentedPool<T>>,
}

impl<T> SyncSegmentedPool<T> {
    /// Creates a new pool with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::from(SegmentedPool::new())
    }

    /// Starts building a new pool. Finish with
    /// [`build_sync()`][SegmentedPoolBuilder::build_sync].
    pub fn builder() -> SegmentedPoolBuilder<T> {
        SegmentedPoolBuilder::new()
    }

    /// The number of live items in the pool.
    #[must_use]
    pub fn live(&self) -> usize {
        self.inner.lock().live()
    }

    /// Whether the pool has no live items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// The number of segments the pool has allocated.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.inner.lock().segment_count()
    }

    /// How many items the pool can hold without adding another segment.
    #[must_use]
    pub fn total_capacity(&self) -> usize {
        self.inner.lock().total_capacity()
    }

    /// Whether the handle refers to a live item in the pool.
    #[must_use]
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.inner.lock().contains(handle)
    }

    /// Calls `f` with a shared reference to the item while holding the lock.
    ///
    /// Returns `None` without calling `f` if the handle is stale.
    pub fn with<R>(&self, handle: Handle<T>, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner.lock().get(handle).map(f)
    }

    /// Calls `f` with an exclusive reference to the item while holding the lock.
    ///
    /// Returns `None` without calling `f` if the handle is stale.
    pub fn with_mut<R>(&self, handle: Handle<T>, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.inner.lock().get_mut(handle).map(f)
    }

    /// Drops every live item and releases all segments.
    ///
    /// # Panics
    ///
    /// See [`SegmentedPool::clear()`].
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Acquires the lock and returns the guarded pool.
    ///
    /// Other threads block on any pool operation until the guard is dropped. Calling another
    /// method of this pool from the same thread while holding the guard deadlocks.
    ///
    /// # Example
    ///
    /// ```
    /// # use segmented_pool::{Poolable, RecycledFlag, SyncSegmentedPool};
    /// # #[derive(Default)]
    /// # struct Job { recycled: RecycledFlag }
    /// # impl Poolable for Job {
    /// #     fn is_recycled(&self) -> bool { self.recycled.get() }
    /// #     fn set_recycled(&mut self, recycled: bool) { self.recycled.set(recycled) }
    /// # }
    /// let pool = SyncSegmentedPool::<Job>::new();
    ///
    /// let mut guard = pool.lock();
    /// let handles: Vec<_> = (0..10).map(|_| guard.allocate_default()).collect();
    /// assert_eq!(guard.live(), 10);
    ///
    /// for handle in handles {
    ///     guard.deallocate(handle);
    /// }
    /// ```
    pub fn lock(&self) -> MutexGuard<'_, SegmentedPool<T>> {
        self.inner.lock()
    }

    /// Consumes the guard and returns the unsynchronized pool.
    #[must_use]
    pub fn into_inner(self) -> SegmentedPool<T> {
        self.inner.into_inner()
    }
}

impl<T: Poolable> SyncSegmentedPool<T> {
    /// Moves the value into the pool and returns a handle to it.
    ///
    /// # Panics
    ///
    /// See [`SegmentedPool::allocate()`].
    pub fn allocate(&self, value: T) -> Handle<T> {
        self.inner.lock().allocate(value)
    }

    /// Creates the item from the arguments via `From` and moves it into the pool.
    ///
    /// The item is created before the lock is taken.
    ///
    /// # Panics
    ///
    /// See [`SegmentedPool::allocate()`].
    pub fn allocate_from<A>(&self, args: A) -> Handle<T>
    where
        T: From<A>,
    {
        self.allocate(T::from(args))
    }

    /// Allocates a default-constructed item.
    ///
    /// The item is created before the lock is taken.
    ///
    /// # Panics
    ///
    /// See [`SegmentedPool::allocate()`].
    pub fn allocate_default(&self) -> Handle<T>
    where
        T: Default,
    {
        self.allocate(T::default())
    }

    /// Initializes an item directly in its slot while holding the lock.
    ///
    /// # Panics
    ///
    /// See [`SegmentedPool::allocate()`].
    ///
    /// # Safety
    ///
    /// The closure must fully initialize the item before it returns.
    pub unsafe fn allocate_with<F>(&self, f: F) -> Handle<T>
    where
        F: FnOnce(&mut MaybeUninit<T>),
    {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { self.inner.lock().allocate_with(f) }
    }

    /// Moves the value into the pool, returning an error if the pool needs to grow and cannot.
    pub fn try_allocate(&self, value: T) -> Result<Handle<T>> {
        self.inner.lock().try_allocate(value)
    }

    /// Resets the item, marks it as recycled, drops it and makes its slot available for reuse.
    ///
    /// Passing `None` does nothing and does not take the lock.
    ///
    /// # Panics
    ///
    /// See [`SegmentedPool::deallocate()`].
    pub fn deallocate(&self, handle: impl Into<Option<Handle<T>>>) {
        if let Some(handle) = handle.into() {
            self.inner.lock().deallocate(handle);
        }
    }
}

impl<T> From<SegmentedPool<T>> for SyncSegmentedPool<T> {
    fn from(pool: SegmentedPool<T>) -> Self {
        Self {
            inner: Mutex::new(pool),
        }
    }
}

impl<T> Default for SyncSegmentedPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SyncSegmentedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("SyncSegmentedPool");
        debug.field("item_type", &format_args!("{}", type_name::<T>()));

        // Formatting must not block, the caller may be holding the lock already.
        match self.inner.try_lock() {
            Some(pool) => debug.field("inner", &*pool),
            None => debug.field("inner", &format_args!("<locked>")),
        };

        debug.finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::num::NonZero;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::thread;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::pal::MockPlatform;
    use crate::{DropPolicy, RecycledFlag};

    // Items are only ever touched under the lock, so `T: Send` suffices for sharing.
    assert_impl_all!(SyncSegmentedPool<u32>: Send, Sync);
    assert_impl_all!(SyncSegmentedPool<Cell<u32>>: Send, Sync);
    assert_not_impl_any!(SyncSegmentedPool<Rc<u32>>: Send, Sync);

    #[derive(Debug, Default)]
    struct Counter {
        count: u64,
        recycled: RecycledFlag,
    }

    impl From<u64> for Counter {
        fn from(count: u64) -> Self {
            Self {
                count,
                recycled: RecycledFlag::new(),
            }
        }
    }

    impl Poolable for Counter {
        fn reset(&mut self) {
            self.count = 0;
        }

        fn is_recycled(&self) -> bool {
            self.recycled.get()
        }

        fn set_recycled(&mut self, recycled: bool) {
            self.recycled.set(recycled);
        }
    }

    fn new_pool() -> SyncSegmentedPool<Counter> {
        let mut platform = MockPlatform::new();
        platform
            .expect_page_size()
            .return_const(NonZero::new(4096_usize).unwrap());

        SyncSegmentedPool::builder().platform(platform).build_sync()
    }

    #[test]
    fn smoke_test() {
        let pool = new_pool();

        let a = pool.allocate_from(1_u64);
        let b = pool.allocate(Counter::from(2));
        let c = pool.allocate_default();

        assert_eq!(pool.live(), 3);
        assert!(!pool.is_empty());
        assert_eq!(pool.segment_count(), 1);
        assert_eq!(pool.total_capacity(), 256);

        assert_eq!(pool.with(a, |item| item.count), Some(1));
        assert_eq!(
            pool.with_mut(b, |item| {
                item.count += 10;
                item.count
            }),
            Some(12)
        );
        assert_eq!(pool.with(c, |item| item.count), Some(0));

        pool.deallocate(a);
        pool.deallocate(b);
        pool.deallocate(c);
        pool.deallocate(None);

        assert!(pool.is_empty());
        assert!(!pool.contains(a));
        assert_eq!(pool.with(a, |item| item.count), None);
    }

    #[test]
    fn allocate_with_initializes_in_place() {
        let pool = new_pool();

        // SAFETY: We fully initialize the item.
        let handle = unsafe {
            pool.allocate_with(|uninit| {
                uninit.write(Counter::from(77));
            })
        };

        assert_eq!(pool.with(handle, |item| item.count), Some(77));
        assert!(pool.try_allocate(Counter::default()).is_ok());
    }

    #[test]
    fn lock_allows_batches() {
        let pool = new_pool();

        let handles: Vec<_> = {
            let mut guard = pool.lock();
            (0..10_u64).map(|i| guard.allocate_from(i)).collect()
        };

        assert_eq!(pool.live(), 10);

        {
            let mut guard = pool.lock();
            for handle in handles {
                guard.deallocate(handle);
            }
        }

        assert!(pool.is_empty());
    }

    #[test]
    fn clear_releases_everything() {
        let pool = new_pool();

        for i in 0..1_000_u64 {
            _ = pool.allocate_from(i);
        }

        pool.clear();

        assert_eq!(pool.live(), 0);
        assert_eq!(pool.segment_count(), 0);
    }

    #[test]
    fn concurrent_churn_conserves_items() {
        const THREADS: usize = 8;
        const ITERATIONS: u64 = 1_000;

        let pool = Arc::new(new_pool());

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let pool = Arc::clone(&pool);

                thread::spawn(move || {
                    let mut mine = Vec::new();

                    for i in 0..ITERATIONS {
                        mine.push(pool.allocate_from(i));

                        if i % 3 == 0 {
                            let handle = mine.swap_remove(0);
                            pool.deallocate(handle);
                        }
                    }

                    for (expected, handle) in mine.iter().enumerate() {
                        assert!(pool.contains(*handle), "item {expected} went missing");
                    }

                    for handle in mine {
                        pool.deallocate(handle);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(pool.live(), 0);
        pool.lock().integrity_check();
    }

    #[test]
    fn into_inner_keeps_items() {
        let pool = new_pool();
        let handle = pool.allocate_from(5_u64);

        let mut inner = pool.into_inner();

        assert_eq!(inner.get(handle).map(|item| item.count), Some(5));
        inner.deallocate(handle);
    }

    #[test]
    #[should_panic]
    fn clear_with_forbidding_policy_panics() {
        let mut platform = MockPlatform::new();
        platform
            .expect_page_size()
            .return_const(NonZero::new(4096_usize).unwrap());

        let pool = SyncSegmentedPool::<Counter>::builder()
            .platform(platform)
            .drop_policy(DropPolicy::MustNotDropItems)
            .build_sync();

        _ = pool.allocate_default();
        pool.clear();
    }

    #[test]
    fn debug_does_not_block_while_locked() {
        let pool = new_pool();

        let guard = pool.lock();
        let text = format!("{pool:?}");
        drop(guard);

        assert!(text.contains("<locked>"));
        assert!(format!("{pool:?}").contains("live"));
    }
}
