use std::any::type_name;
use std::fmt;
use std::mem::MaybeUninit;
use std::num::NonZero;
use std::ptr::NonNull;
use std::thread;

use tracing::{debug, trace};

use crate::{
    DropPolicy, GrowthPolicy, Handle, Poolable, Result, Segment, SegmentInfo, SegmentedPoolBuilder,
    VacancyTracker,
};

/// An object pool for items of one type that stores them in page-sized segments.
///
/// Each segment is one contiguous memory block subdivided into equally sized slots. Allocating an
/// item writes it into a free slot and returns a [`Handle`] that identifies it, deallocating it
/// puts the slot back for reuse. The heap is only touched when the pool runs out of slots and
/// adds a new segment.
///
/// # Slot reuse
///
/// When you allocate an item, the pool picks the slot as follows:
///
/// 1. A vacated slot in the lowest-index segment that has one, most recently vacated first.
/// 2. Otherwise, the next never-used slot in the most recently added segment.
/// 3. Otherwise, a new segment is added (see below) and its first slot is used.
///
/// This keeps live items clustered toward the first segments.
///
/// # Segment sizing
///
/// Every segment spans a whole number of memory pages and holds a whole number of slots, so no
/// memory is lost at the tail of a segment. The smallest such size is the base segment size.
/// The first segment is base-sized and every later segment is larger than the previous one by
/// the configured growth factor, or by at least one base segment size. Segments are never
/// released individually, only by [`clear()`][1] or by dropping the pool.
///
/// # Item lifecycle
///
/// Items implement [`Poolable`]. The pool marks an item as not recycled right after writing it,
/// and on deallocation calls [`Poolable::reset()`], marks the item as recycled and then drops it
/// in place.
///
/// # Stable addresses
///
/// Items never move while they are in the pool. A pointer obtained via [`ptr()`][2] remains valid
/// until the item is deallocated or the pool is cleared or dropped. [`locate()`][3] maps such a
/// pointer back to the item's handle.
///
/// # Thread safety
///
/// The pool requires `&mut self` for every mutation. To share one pool between threads, use
/// [`SyncSegmentedPool`][4], which guards a pool with a lock.
///
/// # Example
///
/// ```
/// use segmented_pool::{Poolable, RecycledFlag, SegmentedPool};
///
/// struct Message {
///     id: u64,
///     body: String,
///     recycled: RecycledFlag,
/// }
///
/// impl From<(u64, &str)> for Message {
///     fn from((id, body): (u64, &str)) -> Self {
///         Self {
///             id,
///             body: body.to_string(),
///             recycled: RecycledFlag::new(),
///         }
///     }
/// }
///
/// impl Poolable for Message {
///     fn reset(&mut self) {
///         self.body.clear();
///     }
///
///     fn is_recycled(&self) -> bool {
///         self.recycled.get()
///     }
///
///     fn set_recycled(&mut self, recycled: bool) {
///         self.recycled.set(recycled);
///     }
/// }
///
/// let mut pool = SegmentedPool::<Message>::new();
///
/// let hello = pool.allocate_from((1, "hello"));
/// let world = pool.allocate_from((2, "world"));
/// assert_eq!(pool.live(), 2);
/// assert_eq!(pool.get(hello).unwrap().body, "hello");
///
/// pool.deallocate(hello);
/// assert_eq!(pool.live(), 1);
/// assert!(pool.get(hello).is_none());
///
/// // The vacated slot is reused for the next item.
/// let again = pool.allocate_from((3, "again"));
/// assert_eq!(again.slot_index(), hello.slot_index());
/// # pool.deallocate(world);
/// # pool.deallocate(again);
/// ```
///
/// [1]: Self::clear
/// [2]: Self::ptr
/// [3]: Self::locate
/// [4]: crate::SyncSegmentedPool
pub struct SegmentedPool<T> {
    /// Segments in the order they were added. Handles refer to segments by index in this vector.
    segments: Vec<Segment<T>>,

    vacancies: VacancyTracker,

    growth: GrowthPolicy,

    /// Number of live items across all segments.
    live: usize,

    /// Stamp for the next allocation. Never reset, so handles issued before a `clear()` stay stale.
    next_generation: NonZero<u64>,

    drop_policy: DropPolicy,
}

impl<T> SegmentedPool<T> {
    #[must_use]
    pub(crate) fn new_inner(growth: GrowthPolicy, drop_policy: DropPolicy) -> Self {
        Self {
            segments: Vec::new(),
            vacancies: VacancyTracker::new(),
            growth,
            live: 0,
            next_generation: NonZero::<u64>::MIN,
            drop_policy,
        }
    }

    /// Creates a new pool with the default configuration.
    ///
    /// The pool starts empty and allocates its first segment when the first item is allocated.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new pool.
    ///
    /// Use this when you want to customize the pool configuration beyond the defaults.
    pub fn builder() -> SegmentedPoolBuilder<T> {
        SegmentedPoolBuilder::new()
    }

    /// The number of live items in the pool.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live
    }

    /// Whether the pool has no live items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// The number of segments the pool has allocated.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// How many items the pool can hold without adding another segment.
    #[must_use]
    pub fn total_capacity(&self) -> usize {
        self.segments.iter().map(Segment::capacity).sum()
    }

    /// The distance in bytes between consecutive items in a segment.
    ///
    /// This is the item size rounded up to the item alignment, and at least the size of a pointer.
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.growth.slot_size().get()
    }

    /// The memory page size the pool sizes its segments by.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.growth.page_size().get()
    }

    /// The number of pages in the first segment, which is also the step by which segment sizes
    /// grow at minimum.
    #[must_use]
    pub fn base_segment_pages(&self) -> usize {
        self.growth.base_pages().get()
    }

    /// The effective growth factor, after clamping values that would not grow.
    #[must_use]
    pub fn growth_factor(&self) -> f64 {
        self.growth.growth_factor()
    }

    /// How the pool treats items that are still live when it is cleared or dropped.
    #[must_use]
    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    /// Describes the segments of the pool, in the order they were added.
    ///
    /// # Example
    ///
    /// ```
    /// use segmented_pool::SegmentedPool;
    ///
    /// let pool = SegmentedPool::<u64>::new();
    ///
    /// assert_eq!(pool.segments().count(), 0);
    /// ```
    pub fn segments(&self) -> impl Iterator<Item = SegmentInfo> + '_ {
        self.segments.iter().map(|segment| SegmentInfo {
            pages: segment.layout().pages().get(),
            bytes: segment.layout().memory().size(),
            capacity: segment.capacity(),
            high_water_mark: segment.high_water_mark(),
            vacant: segment.vacant_count(),
            live: segment.len(),
        })
    }

    /// Whether the handle refers to a live item in the pool.
    #[must_use]
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.ptr(handle).is_some()
    }

    /// Gets a shared reference to the item, or `None` if the handle is stale.
    #[must_use]
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.segments
            .get(handle.segment_index())?
            .get(handle.slot_index(), handle.generation())
    }

    /// Gets an exclusive reference to the item, or `None` if the handle is stale.
    #[must_use]
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.segments
            .get_mut(handle.segment_index())?
            .get_mut(handle.slot_index(), handle.generation())
    }

    /// Gets a pointer to the item, or `None` if the handle is stale.
    ///
    /// The pointer remains valid until the item is deallocated or the pool is cleared or dropped.
    /// The pool does not create references to items unless asked to via [`get()`][1] or
    /// [`get_mut()`][2], so you may access the item through the pointer as long as you do not
    /// simultaneously ask the pool for a conflicting reference.
    ///
    /// [1]: Self::get
    /// [2]: Self::get_mut
    #[must_use]
    pub fn ptr(&self, handle: Handle<T>) -> Option<NonNull<T>> {
        self.segments
            .get(handle.segment_index())?
            .ptr(handle.slot_index(), handle.generation())
    }

    /// Finds the handle of the live item stored at the given address.
    ///
    /// Returns `None` if the address is not the start of a live item in this pool.
    ///
    /// # Example
    ///
    /// ```
    /// # use segmented_pool::{Poolable, RecycledFlag, SegmentedPool};
    /// # #[derive(Default)]
    /// # struct Entity { hp: u32, recycled: RecycledFlag }
    /// # impl Poolable for Entity {
    /// #     fn is_recycled(&self) -> bool { self.recycled.get() }
    /// #     fn set_recycled(&mut self, recycled: bool) { self.recycled.set(recycled) }
    /// # }
    /// let mut pool = SegmentedPool::<Entity>::new();
    ///
    /// let handle = pool.allocate_default();
    /// let ptr = pool.ptr(handle).unwrap();
    ///
    /// assert_eq!(pool.locate(ptr.as_ptr()), Some(handle));
    /// # pool.deallocate(handle);
    /// ```
    #[must_use]
    pub fn locate(&self, ptr: *const T) -> Option<Handle<T>> {
        let address = ptr.cast::<u8>();

        let (segment_index, segment) = self
            .segments
            .iter()
            .enumerate()
            .find(|(_, segment)| segment.contains(address))?;

        let slot_index = segment.slot_index_of(address)?;
        let generation = segment.generation_at(slot_index)?;

        Some(Handle::new(segment_index, slot_index, generation))
    }

    /// Drops every live item and releases all segments.
    ///
    /// The next allocation starts over with a base-sized segment. Handles issued before the call
    /// are stale afterwards, even if a new item ends up in the same slot.
    ///
    /// # Panics
    ///
    /// Panics if the pool has live items and its drop policy is
    /// [`MustNotDropItems`][DropPolicy::MustNotDropItems]. The items are dropped and the memory
    /// released before the panic.
    pub fn clear(&mut self) {
        let segment_count = self.segments.len();
        let dropped = self.release_segments();

        self.growth.reset();

        debug!(
            item_type = type_name::<T>(),
            segment_count, dropped, "cleared pool"
        );

        self.enforce_drop_policy(dropped);
    }

    /// Drops all segments and their items, returning how many items were live.
    fn release_segments(&mut self) -> usize {
        let live = self.live;

        self.live = 0;
        self.vacancies.clear();
        self.segments.clear();

        live
    }

    fn enforce_drop_policy(&self, dropped: usize) {
        if self.drop_policy != DropPolicy::MustNotDropItems || thread::panicking() {
            return;
        }

        assert!(
            dropped == 0,
            "dropped {dropped} live items of {} from a pool whose drop policy says they must not be dropped",
            type_name::<T>()
        );
    }

    /// Checks that the bookkeeping of the pool agrees with the state of its segments.
    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        let live: usize = self.segments.iter().map(Segment::len).sum();
        assert_eq!(live, self.live);

        let first_vacancy = self.segments.iter().position(Segment::has_vacant);
        assert_eq!(first_vacancy, self.vacancies.next_vacancy());

        // Only the last segment may have never-used slots.
        if let Some((_, older)) = self.segments.split_last() {
            assert!(older.iter().all(|segment| !segment.has_unclaimed()));
        }
    }
}

impl<T: Poolable> SegmentedPool<T> {
    /// Moves the value into the pool and returns a handle to it.
    ///
    /// # Panics
    ///
    /// If the pool needs to grow and the memory for the new segment cannot be allocated, this
    /// reports the failure through [`std::alloc::handle_alloc_error()`], like the standard
    /// collections do. Use [`try_allocate()`][Self::try_allocate] to handle the failure instead.
    pub fn allocate(&mut self, value: T) -> Handle<T> {
        self.try_allocate(value).unwrap_or_else(|error| error.into_fatal())
    }

    /// Creates the item from the arguments via `From` and moves it into the pool.
    ///
    /// # Panics
    ///
    /// See [`allocate()`][Self::allocate].
    pub fn allocate_from<A>(&mut self, args: A) -> Handle<T>
    where
        T: From<A>,
    {
        self.allocate(T::from(args))
    }

    /// Allocates a default-constructed item.
    ///
    /// # Panics
    ///
    /// See [`allocate()`][Self::allocate].
    pub fn allocate_default(&mut self) -> Handle<T>
    where
        T: Default,
    {
        self.allocate(T::default())
    }

    /// Initializes an item directly in its slot, without moving it there from the stack.
    ///
    /// If the closure panics, the slot is returned to the pool and the pool is left unchanged.
    ///
    /// # Panics
    ///
    /// See [`allocate()`][Self::allocate].
    ///
    /// # Safety
    ///
    /// The closure must fully initialize the item before it returns.
    ///
    /// # Example
    ///
    /// ```
    /// # use segmented_pool::{Poolable, RecycledFlag, SegmentedPool};
    /// # struct Entity { hp: u32, recycled: RecycledFlag }
    /// # impl Poolable for Entity {
    /// #     fn is_recycled(&self) -> bool { self.recycled.get() }
    /// #     fn set_recycled(&mut self, recycled: bool) { self.recycled.set(recycled) }
    /// # }
    /// let mut pool = SegmentedPool::<Entity>::new();
    ///
    /// // SAFETY: We fully initialize the item.
    /// let handle = unsafe {
    ///     pool.allocate_with(|uninit| {
    ///         uninit.write(Entity {
    ///             hp: 100,
    ///             recycled: RecycledFlag::new(),
    ///         });
    ///     })
    /// };
    ///
    /// assert_eq!(pool.get(handle).unwrap().hp, 100);
    /// # pool.deallocate(handle);
    /// ```
    pub unsafe fn allocate_with<F>(&mut self, f: F) -> Handle<T>
    where
        F: FnOnce(&mut MaybeUninit<T>),
    {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { self.try_allocate_with(f) }.unwrap_or_else(|error| error.into_fatal())
    }

    /// Moves the value into the pool, returning an error if the pool needs to grow and cannot.
    ///
    /// The value is dropped if the allocation fails.
    pub fn try_allocate(&mut self, value: T) -> Result<Handle<T>> {
        // SAFETY: We fully initialize the item by writing the value.
        unsafe {
            self.try_allocate_with(|uninit| {
                uninit.write(value);
            })
        }
    }

    /// Initializes an item directly in its slot, returning an error if the pool needs to grow
    /// and cannot.
    ///
    /// If the closure panics, the slot is returned to the pool and the pool is left unchanged.
    /// The closure is not called if the allocation fails.
    ///
    /// # Safety
    ///
    /// The closure must fully initialize the item before it returns.
    pub unsafe fn try_allocate_with<F>(&mut self, f: F) -> Result<Handle<T>>
    where
        F: FnOnce(&mut MaybeUninit<T>),
    {
        let segment_index = self.segment_index_for_insert()?;
        let generation = self.next_generation;

        let segment = self
            .segments
            .get_mut(segment_index)
            .expect("we just picked this segment, so it must exist");

        // SAFETY: Forwarding safety requirements to the caller.
        let insertion = unsafe { segment.insert_with(generation, f) };

        if insertion.reused && !segment.has_vacant() {
            self.vacancies.set_has_vacancy(segment_index, false);
        }

        self.next_generation = generation
            .checked_add(1)
            .expect("a u64 generation stamp cannot run out within the lifetime of a process");

        self.live = self
            .live
            .checked_add(1)
            .expect("live items are bounded by memory, so the count cannot overflow");

        trace!(
            item_type = type_name::<T>(),
            segment_index,
            slot_index = insertion.index,
            reused = insertion.reused,
            "allocated item"
        );

        segment
            .get_mut(insertion.index, generation)
            .expect("we just inserted this item")
            .set_recycled(false);

        Ok(Handle::new(segment_index, insertion.index, generation))
    }

    /// Resets the item, marks it as recycled, drops it and makes its slot available for reuse.
    ///
    /// Passing `None` does nothing.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not refer to a live item in this pool, e.g. because the item was
    /// already deallocated.
    ///
    /// If the item's destructor panics, the slot is still vacated and the panic is propagated.
    pub fn deallocate(&mut self, handle: impl Into<Option<Handle<T>>>) {
        let Some(handle) = handle.into() else {
            return;
        };

        let segment_count = self.segments.len();

        let Some(segment) = self.segments.get_mut(handle.segment_index()) else {
            panic!(
                "deallocate({handle:?}) refers to a segment that does not exist in a pool of {segment_count} segments"
            )
        };

        let Some(item) = segment.get_mut(handle.slot_index(), handle.generation()) else {
            panic!(
                "deallocate({handle:?}) does not refer to a live item, it may have already been deallocated"
            )
        };

        item.reset();
        item.set_recycled(true);

        if !segment.has_vacant() {
            self.vacancies.set_has_vacancy(handle.segment_index(), true);
        }

        self.live = self
            .live
            .checked_sub(1)
            .expect("we found a live item, so the live count cannot be zero");

        trace!(
            item_type = type_name::<T>(),
            segment_index = handle.segment_index(),
            slot_index = handle.slot_index(),
            "deallocated item"
        );

        segment.remove(handle.slot_index(), handle.generation());
    }

    /// Picks the segment for the next insertion, growing the pool if every segment is full.
    fn segment_index_for_insert(&mut self) -> Result<usize> {
        if let Some(index) = self.vacancies.next_vacancy() {
            return Ok(index);
        }

        if self.segments.last().is_some_and(Segment::has_unclaimed) {
            return Ok(self
                .segments
                .len()
                .checked_sub(1)
                .expect("there is a last segment, so the length is at least 1"));
        }

        self.grow()
    }

    fn grow(&mut self) -> Result<usize> {
        let layout = self.growth.next_layout()?;
        let segment = Segment::new(layout, self.growth.slot_size())?;

        self.growth.advance(&layout);

        let segment_index = self.segments.len();
        self.segments.push(segment);
        self.vacancies.push_segment();

        debug!(
            item_type = type_name::<T>(),
            segment_index,
            pages = layout.pages().get(),
            capacity = layout.capacity().get(),
            "added pool segment"
        );

        Ok(segment_index)
    }
}

impl<T> Default for SegmentedPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SegmentedPool<T> {
    fn drop(&mut self) {
        let dropped = self.release_segments();

        self.enforce_drop_policy(dropped);
    }
}

impl<T> fmt::Debug for SegmentedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentedPool")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("live", &self.live)
            .field("segments", &self.segments)
            .field("vacancies", &self.vacancies)
            .field("growth", &self.growth)
            .field("next_generation", &self.next_generation)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::pal::MockPlatform;
    use crate::{Error, RecycledFlag};

    const PAGE: usize = 4096;

    assert_impl_all!(SegmentedPool<u32>: Send, Sync);
    assert_impl_all!(SegmentedPool<Cell<u32>>: Send);
    assert_not_impl_any!(SegmentedPool<Cell<u32>>: Sync);
    assert_not_impl_any!(SegmentedPool<Rc<u32>>: Send, Sync);

    fn page_sized_platform() -> MockPlatform {
        let mut platform = MockPlatform::new();
        platform
            .expect_page_size()
            .return_const(NonZero::new(PAGE).unwrap());
        platform
    }

    fn new_pool<T>() -> SegmentedPool<T> {
        SegmentedPool::builder().platform(page_sized_platform()).build()
    }

    /// 24 bytes with alignment 8, so 512 of them fill exactly three pages.
    #[repr(C)]
    #[derive(Debug, Default)]
    struct Pair {
        a: i64,
        b: i64,
        recycled: RecycledFlag,
    }

    impl From<(i64, i64)> for Pair {
        fn from((a, b): (i64, i64)) -> Self {
            Self {
                a,
                b,
                recycled: RecycledFlag::new(),
            }
        }
    }

    impl Poolable for Pair {
        fn is_recycled(&self) -> bool {
            self.recycled.get()
        }

        fn set_recycled(&mut self, recycled: bool) {
            self.recycled.set(recycled);
        }
    }

    /// Pointer-sized, so a one-page segment holds 512 of them.
    #[derive(Debug, Default)]
    struct Word {
        value: u32,
        recycled: RecycledFlag,
    }

    impl From<u32> for Word {
        fn from(value: u32) -> Self {
            Self {
                value,
                recycled: RecycledFlag::new(),
            }
        }
    }

    impl Poolable for Word {
        fn is_recycled(&self) -> bool {
            self.recycled.get()
        }

        fn set_recycled(&mut self, recycled: bool) {
            self.recycled.set(recycled);
        }
    }

    type EventLog = Rc<RefCell<Vec<&'static str>>>;

    /// Records every lifecycle hook the pool calls.
    struct Tracked {
        events: EventLog,
        recycled: RecycledFlag,
    }

    impl Tracked {
        fn new(events: &EventLog) -> Self {
            // Starts out "recycled" to prove that the pool clears the flag.
            let mut recycled = RecycledFlag::new();
            recycled.set(true);

            Self {
                events: Rc::clone(events),
                recycled,
            }
        }
    }

    impl Poolable for Tracked {
        fn reset(&mut self) {
            self.events.borrow_mut().push("reset");
        }

        fn is_recycled(&self) -> bool {
            self.recycled.get()
        }

        fn set_recycled(&mut self, recycled: bool) {
            self.events
                .borrow_mut()
                .push(if recycled { "recycled" } else { "in use" });
            self.recycled.set(recycled);
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.events.borrow_mut().push(if self.recycled.get() {
                "drop recycled"
            } else {
                "drop in use"
            });
        }
    }

    fn address<T>(pool: &SegmentedPool<T>, handle: Handle<T>) -> usize {
        pool.ptr(handle).unwrap().as_ptr().addr()
    }

    #[test]
    fn smoke_test() {
        let mut pool = new_pool::<Pair>();

        assert!(pool.is_empty());
        assert_eq!(pool.segment_count(), 0);
        assert_eq!(pool.total_capacity(), 0);

        let a = pool.allocate_from((1, 2));
        let b = pool.allocate(Pair::from((3, 4)));
        let c = pool.allocate_default();

        assert_eq!(pool.live(), 3);
        assert_eq!(pool.segment_count(), 1);
        assert_eq!(pool.total_capacity(), 512);

        assert_eq!(pool.get(a).unwrap().a, 1);
        assert_eq!(pool.get(b).unwrap().b, 4);
        assert_eq!(pool.get(c).unwrap().a, 0);

        pool.get_mut(a).unwrap().a = 10;
        assert_eq!(pool.get(a).unwrap().a, 10);

        pool.deallocate(a);
        pool.deallocate(b);
        pool.deallocate(c);

        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn pair_scenario_reuses_most_recently_vacated_first() {
        let mut pool = new_pool::<Pair>();

        assert_eq!(pool.slot_size(), 24);
        assert_eq!(pool.base_segment_pages(), 3);

        let first = pool.allocate_from((10, 20));
        let second = pool.allocate_default();
        let third = pool.allocate_from((50, 60));

        let base = address(&pool, first);
        assert_eq!(base % PAGE, 0);
        assert_eq!(address(&pool, second), base + 24);
        assert_eq!(address(&pool, third), base + 48);

        pool.deallocate(first);
        pool.deallocate(second);

        let fourth = pool.allocate_default();
        let fifth = pool.allocate_default();

        assert_eq!(address(&pool, fourth), base + 24);
        assert_eq!(address(&pool, fifth), base);

        pool.deallocate(fourth);
        pool.deallocate(fifth);
        pool.deallocate(third);

        assert_eq!(pool.live(), 0);
        assert_eq!(pool.segment_count(), 1);
        pool.integrity_check();
    }

    #[test]
    fn none_is_noop() {
        let mut pool = new_pool::<Pair>();
        let handle = pool.allocate_default();

        pool.deallocate(None);

        assert_eq!(pool.live(), 1);
        pool.deallocate(Some(handle));
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn lifecycle_hooks_run_in_order() {
        let events = EventLog::default();
        let mut pool = new_pool::<Tracked>();

        let handle = pool.allocate(Tracked::new(&events));
        assert!(!pool.get(handle).unwrap().is_recycled());
        assert_eq!(*events.borrow(), ["in use"]);

        pool.deallocate(handle);
        assert_eq!(
            *events.borrow(),
            ["in use", "reset", "recycled", "drop recycled"]
        );
    }

    #[test]
    fn clear_drops_live_items_without_recycling() {
        let events = EventLog::default();
        let mut pool = new_pool::<Tracked>();

        _ = pool.allocate(Tracked::new(&events));
        pool.clear();

        assert_eq!(*events.borrow(), ["in use", "drop in use"]);
    }

    #[test]
    fn drop_drops_live_items() {
        let events = EventLog::default();

        {
            let mut pool = new_pool::<Tracked>();
            _ = pool.allocate(Tracked::new(&events));
            _ = pool.allocate(Tracked::new(&events));
        }

        assert_eq!(
            *events.borrow(),
            ["in use", "in use", "drop in use", "drop in use"]
        );
    }

    #[test]
    fn stale_handle_does_not_resolve() {
        let mut pool = new_pool::<Pair>();

        let old = pool.allocate_from((1, 1));
        pool.deallocate(old);
        let new = pool.allocate_from((2, 2));

        // Same slot, different item.
        assert_eq!(old.segment_index(), new.segment_index());
        assert_eq!(old.slot_index(), new.slot_index());
        assert_ne!(old, new);

        assert!(!pool.contains(old));
        assert!(pool.get(old).is_none());
        assert!(pool.get_mut(old).is_none());
        assert!(pool.ptr(old).is_none());
        assert_eq!(pool.get(new).unwrap().a, 2);
    }

    #[test]
    #[should_panic]
    fn double_deallocate_panics() {
        let mut pool = new_pool::<Pair>();

        let handle = pool.allocate_default();
        pool.deallocate(handle);
        pool.deallocate(handle);
    }

    #[test]
    #[should_panic]
    fn deallocate_unknown_segment_panics() {
        let mut pool = new_pool::<Pair>();

        pool.deallocate(Handle::new(5, 0, NonZero::new(1).unwrap()));
    }

    #[test]
    fn handles_from_before_clear_are_stale() {
        let mut pool = new_pool::<Pair>();

        let before = pool.allocate_default();
        pool.clear();
        let after = pool.allocate_default();

        assert_eq!(before.slot_index(), after.slot_index());
        assert!(!pool.contains(before));
        assert!(pool.contains(after));
    }

    #[test]
    fn fills_segment_before_growing() {
        let mut pool = new_pool::<Word>();
        let capacity = PAGE / 8;

        let handles: Vec<_> = (0..capacity as u32).map(|i| pool.allocate_from(i)).collect();

        assert_eq!(pool.segment_count(), 1);
        assert!(handles.iter().all(|h| h.segment_index() == 0));

        let overflow = pool.allocate_default();
        assert_eq!(overflow.segment_index(), 1);
        assert_eq!(pool.segment_count(), 2);
        assert_eq!(pool.total_capacity(), capacity * 3);
        pool.integrity_check();
    }

    #[test]
    fn reuses_lowest_segment_vacancy_before_newer_ones() {
        let mut pool = new_pool::<Word>();
        let capacity = PAGE / 8;

        // Fill the first segment and a bit of the second.
        let handles: Vec<_> = (0..capacity as u32 + 2).map(|i| pool.allocate_from(i)).collect();

        let in_second = *handles.last().unwrap();
        let in_first = *handles.get(100).unwrap();

        pool.deallocate(in_second);
        pool.deallocate(in_first);

        let reused = pool.allocate_from(7_u32);
        assert_eq!(reused.segment_index(), 0);
        assert_eq!(reused.slot_index(), 100);

        let reused = pool.allocate_from(8_u32);
        assert_eq!(reused.segment_index(), 1);
        assert_eq!(reused.slot_index(), in_second.slot_index());

        // No vacancies left, so we continue in the second segment's unused slots.
        let fresh = pool.allocate_from(9_u32);
        assert_eq!(fresh.segment_index(), 1);
        assert_eq!(fresh.slot_index(), 2);
        pool.integrity_check();
    }

    #[test]
    fn conservation_holds_through_churn() {
        let mut pool = new_pool::<Word>();
        let mut handles = Vec::new();

        for round in 0..5_u32 {
            for i in 0..1_000 {
                handles.push(pool.allocate_from(round * 1_000 + i));
            }

            // Deallocate every other item.
            let mut index = 0;
            handles.retain(|&handle| {
                index += 1;
                if index % 2 == 0 {
                    pool.deallocate(handle);
                    false
                } else {
                    true
                }
            });

            assert_eq!(pool.live(), handles.len());

            let slots: usize = pool.segments().map(|s| s.high_water_mark()).sum();
            let vacant: usize = pool.segments().map(|s| s.vacant()).sum();
            assert_eq!(pool.live(), slots - vacant);
            let unused: usize = pool
                .segments()
                .map(|s| s.capacity() - s.high_water_mark())
                .sum();
            assert_eq!(pool.live() + vacant + unused, pool.total_capacity());

            pool.integrity_check();
        }

        for handle in handles {
            pool.deallocate(handle);
        }

        assert!(pool.is_empty());
    }

    #[test]
    fn segments_grow_per_policy() {
        let mut pool = SegmentedPool::<Pair>::builder()
            .platform(page_sized_platform())
            .growth_factor(2.0)
            .build();

        // Capacities 512, 1024, 2048 need 3584 items to reach the third segment.
        for _ in 0..3_584 {
            _ = pool.allocate_default();
        }

        let pages: Vec<_> = pool.segments().map(|s| s.pages()).collect();
        assert_eq!(pages, [3, 6, 12]);

        for info in pool.segments() {
            assert_eq!(info.bytes(), info.pages() * PAGE);
            assert_eq!(info.bytes(), info.capacity() * 24);
            assert_eq!(info.live(), info.capacity());
        }

        pool.clear();
    }

    #[test]
    fn clear_resets_growth() {
        let mut pool = new_pool::<Word>();

        for i in 0..(PAGE / 8 + 1) as u32 {
            _ = pool.allocate_from(i);
        }
        assert_eq!(pool.segment_count(), 2);

        pool.clear();

        assert!(pool.is_empty());
        assert_eq!(pool.segment_count(), 0);
        assert_eq!(pool.total_capacity(), 0);

        _ = pool.allocate_from(1_u32);
        assert_eq!(pool.segments().next().unwrap().pages(), 1);
        pool.integrity_check();
    }

    #[test]
    fn locate_finds_live_items() {
        let mut pool = new_pool::<Pair>();

        let a = pool.allocate_default();
        let b = pool.allocate_default();

        let b_ptr = pool.ptr(b).unwrap().as_ptr();
        assert_eq!(pool.locate(pool.ptr(a).unwrap().as_ptr()), Some(a));
        assert_eq!(pool.locate(b_ptr), Some(b));

        // Not the start of a slot.
        assert_eq!(pool.locate(b_ptr.cast::<u8>().wrapping_add(1).cast::<Pair>()), None);

        // Never used slot.
        assert_eq!(pool.locate(b_ptr.wrapping_add(1)), None);

        // Vacated slot.
        pool.deallocate(b);
        assert_eq!(pool.locate(b_ptr), None);

        // Foreign memory.
        let outside = Pair::default();
        assert_eq!(pool.locate(&raw const outside), None);
    }

    #[test]
    fn ptr_is_stable_across_growth() {
        let mut pool = new_pool::<Word>();

        let first = pool.allocate_from(42_u32);
        let ptr = pool.ptr(first).unwrap();

        for i in 0..10_000_u32 {
            _ = pool.allocate_from(i);
        }

        assert!(pool.segment_count() > 1);
        assert_eq!(pool.ptr(first), Some(ptr));
        assert_eq!(unsafe { ptr.as_ref() }.value, 42);
    }

    #[test]
    fn panicking_initializer_leaves_pool_unchanged() {
        let mut pool = new_pool::<Pair>();
        let existing = pool.allocate_default();

        let result = catch_unwind(AssertUnwindSafe(|| unsafe {
            pool.allocate_with(|_| panic!("initializer failed"))
        }));

        assert!(result.is_err());
        assert_eq!(pool.live(), 1);
        pool.integrity_check();

        let next = pool.allocate_default();
        assert_eq!(next.slot_index(), existing.slot_index() + 1);
    }

    #[test]
    fn allocate_with_initializes_in_place() {
        let mut pool = new_pool::<Pair>();

        let handle = unsafe {
            pool.try_allocate_with(|uninit| {
                uninit.write(Pair::from((5, 6)));
            })
        }
        .unwrap();

        let item = pool.get(handle).unwrap();
        assert_eq!((item.a, item.b), (5, 6));
        assert!(!item.is_recycled());
    }

    #[test]
    fn try_allocate_reports_unsatisfiable_growth() {
        let mut pool = SegmentedPool::<Word>::builder()
            .platform(page_sized_platform())
            .growth_factor(1.0e30)
            .build();

        for i in 0..(PAGE / 8) as u32 {
            pool.try_allocate(Word::from(i)).unwrap();
        }

        let result = pool.try_allocate(Word::default());

        assert!(matches!(result, Err(Error::SegmentTooLarge { .. })));
        assert_eq!(pool.segment_count(), 1);
        assert_eq!(pool.live(), PAGE / 8);
        pool.integrity_check();
    }

    /// 56 bytes: six words plus a flag padded to the word alignment.
    #[derive(Default)]
    #[allow(dead_code, reason = "the words only give the item its size")]
    struct Wide {
        words: [u64; 6],
        recycled: RecycledFlag,
    }

    impl Poolable for Wide {
        fn is_recycled(&self) -> bool {
            self.recycled.get()
        }

        fn set_recycled(&mut self, recycled: bool) {
            self.recycled.set(recycled);
        }
    }

    fn pool_with_huge_minimum() -> SegmentedPool<Wide> {
        SegmentedPool::builder()
            .platform(page_sized_platform())
            .min_segment_pages(usize::MAX)
            .build()
    }

    #[test]
    fn huge_minimum_segment_size_is_reported_on_allocation() {
        let mut pool = pool_with_huge_minimum();

        assert_eq!(pool.slot_size(), 56);
        assert_eq!(pool.base_segment_pages() % 7, 0);

        let result = pool.try_allocate(Wide::default());

        assert!(matches!(result, Err(Error::SegmentTooLarge { .. })));
        assert_eq!(pool.segment_count(), 0);
        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    #[should_panic]
    fn huge_minimum_segment_size_is_fatal_for_allocate() {
        let mut pool = pool_with_huge_minimum();

        _ = pool.allocate(Wide {
            words: [1; 6],
            recycled: RecycledFlag::new(),
        });
    }

    #[test]
    fn tiny_items_take_pointer_sized_slots() {
        #[derive(Default)]
        struct Marker {
            recycled: RecycledFlag,
        }

        impl Poolable for Marker {
            fn is_recycled(&self) -> bool {
                self.recycled.get()
            }

            fn set_recycled(&mut self, recycled: bool) {
                self.recycled.set(recycled);
            }
        }

        let mut pool = new_pool::<Marker>();

        let a = pool.allocate_default();
        let b = pool.allocate_default();

        assert_eq!(pool.slot_size(), size_of::<usize>());
        assert_ne!(pool.ptr(a), pool.ptr(b));
    }

    #[test]
    #[should_panic]
    fn drop_with_live_items_and_forbidding_policy_panics() {
        let mut pool = SegmentedPool::<Pair>::builder()
            .platform(page_sized_platform())
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        _ = pool.allocate_default();
    }

    #[test]
    fn clear_with_live_items_and_forbidding_policy_panics_after_cleanup() {
        let events = EventLog::default();

        let mut pool = SegmentedPool::<Tracked>::builder()
            .platform(page_sized_platform())
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        _ = pool.allocate(Tracked::new(&events));

        let result = catch_unwind(AssertUnwindSafe(|| pool.clear()));

        assert!(result.is_err());
        assert_eq!(*events.borrow(), ["in use", "drop in use"]);
        assert_eq!(pool.segment_count(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn forbidding_policy_allows_empty_drop() {
        let mut pool = SegmentedPool::<Pair>::builder()
            .platform(page_sized_platform())
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        let handle = pool.allocate_default();
        pool.deallocate(handle);
        pool.clear();

        drop(pool);
    }

    #[test]
    fn debug_names_item_type() {
        let pool = new_pool::<Pair>();

        assert!(format!("{pool:?}").contains("Pair"));
    }
}
