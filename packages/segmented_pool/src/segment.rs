use std::alloc::{alloc, dealloc};
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::num::NonZero;
use std::ptr::{self, NonNull};

use num_integer::Integer;
use scopeguard::ScopeGuard;

use crate::{Error, Result, SegmentLayout};

/// Link value that terminates the free list stored in vacant slots.
const END_OF_FREE_LIST: usize = usize::MAX;

/// One page-aligned block of memory subdivided into equally sized slots for items of type `T`.
///
/// Slots are handed out in two ways:
///
/// * Vacant slots (ones that held an item that has since been removed) are reused first, most
///   recently vacated first. They form an intrusive free list: each vacant slot stores the index
///   of the next vacant slot in its own first pointer-sized bytes, so tracking them needs no
///   extra memory.
/// * Otherwise, the slot at the high-water mark is claimed. Slots at or above the high-water mark
///   have never held an item and contain uninitialized memory.
///
/// The segment never creates references to its items unless asked for one via
/// [`get()`][Self::get] or [`get_mut()`][Self::get_mut], and items never move until removed.
pub(crate) struct Segment<T> {
    first_slot_ptr: NonNull<u8>,

    layout: SegmentLayout,

    /// Stride between consecutive slots.
    slot_size: NonZero<usize>,

    /// Generation stamp of the item in each slot below the high-water mark, `None` for a vacant
    /// slot. The length of this vector is the high-water mark. Capacity for every slot is reserved
    /// up front, so claiming a slot never reallocates.
    generations: Vec<Option<NonZero<u64>>>,

    /// Head of the intrusive free list, `None` if no slot below the high-water mark is vacant.
    next_vacant_index: Option<usize>,

    vacant_count: usize,

    _items: PhantomData<T>,
}

/// Outcome of [`Segment::insert_with()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SlotInsertion {
    /// Index of the slot the item was written into.
    pub(crate) index: usize,

    /// Whether the slot came from the free list (`true`) or from above the high-water mark.
    pub(crate) reused: bool,
}

/// A slot taken out of circulation while its item is being initialized.
#[derive(Clone, Copy, Debug)]
enum Claim {
    Vacant { index: usize },
    Fresh { index: usize },
}

impl Claim {
    fn index(self) -> usize {
        match self {
            Self::Vacant { index } | Self::Fresh { index } => index,
        }
    }
}

impl<T> Segment<T> {
    /// Allocates the memory block for a new segment.
    ///
    /// The layout must describe a block that is exactly `capacity * slot_size` bytes, aligned at
    /// least to the alignment of `T`.
    pub(crate) fn new(layout: SegmentLayout, slot_size: NonZero<usize>) -> Result<Self> {
        debug_assert_eq!(
            layout.capacity().get().checked_mul(slot_size.get()),
            Some(layout.memory().size()),
            "segment layout must contain a whole number of slots of {}",
            type_name::<T>()
        );
        debug_assert!(layout.memory().align() >= align_of::<T>());
        debug_assert!(slot_size.get() >= size_of::<usize>());

        // SAFETY: The layout is not zero-sized because it holds at least one non-empty slot.
        let ptr = unsafe { alloc(layout.memory()) };

        let first_slot_ptr = NonNull::new(ptr).ok_or(Error::OutOfMemory {
            layout: layout.memory(),
        })?;

        Ok(Self {
            first_slot_ptr,
            layout,
            slot_size,
            generations: Vec::with_capacity(layout.capacity().get()),
            next_vacant_index: None,
            vacant_count: 0,
            _items: PhantomData,
        })
    }

    #[must_use]
    pub(crate) fn layout(&self) -> &SegmentLayout {
        &self.layout
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.layout.capacity().get()
    }

    /// Number of slots that have ever held an item.
    #[must_use]
    pub(crate) fn high_water_mark(&self) -> usize {
        self.generations.len()
    }

    #[must_use]
    pub(crate) fn vacant_count(&self) -> usize {
        self.vacant_count
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.high_water_mark()
            .checked_sub(self.vacant_count)
            .expect("every vacant slot is below the high-water mark")
    }

    /// Whether any slot below the high-water mark is vacant.
    #[must_use]
    pub(crate) fn has_vacant(&self) -> bool {
        self.next_vacant_index.is_some()
    }

    /// Whether any slot has never held an item.
    #[must_use]
    pub(crate) fn has_unclaimed(&self) -> bool {
        self.high_water_mark() < self.capacity()
    }

    /// Whether the address lies within the memory block of this segment.
    #[must_use]
    pub(crate) fn contains(&self, ptr: *const u8) -> bool {
        // Addresses below the start wrap around to huge offsets and fail the comparison.
        let offset = ptr.addr().wrapping_sub(self.first_slot_ptr.as_ptr().addr());

        offset < self.layout.memory().size()
    }

    /// Index of the slot that starts at the given address, if the address is the start of a slot
    /// in this segment.
    #[must_use]
    pub(crate) fn slot_index_of(&self, ptr: *const u8) -> Option<usize> {
        if !self.contains(ptr) {
            return None;
        }

        // Cannot wrap because `contains()` verified that we are at or after the start.
        let offset = ptr.addr().wrapping_sub(self.first_slot_ptr.as_ptr().addr());

        let (index, remainder) = Integer::div_rem(&offset, &self.slot_size.get());

        (remainder == 0).then_some(index)
    }

    /// Generation stamp of the item in the slot, or `None` if the slot holds no item.
    #[must_use]
    pub(crate) fn generation_at(&self, index: usize) -> Option<NonZero<u64>> {
        self.generations.get(index).copied().flatten()
    }

    fn holds(&self, index: usize, generation: NonZero<u64>) -> bool {
        self.generation_at(index) == Some(generation)
    }

    fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < self.capacity(),
            "slot {index} index out of bounds in segment of {}",
            type_name::<T>()
        );

        // Cannot overflow because the whole segment fits in memory.
        let offset = index.wrapping_mul(self.slot_size.get());

        // SAFETY: Guarded by the bounds check above, so the offset stays within our allocation.
        unsafe { self.first_slot_ptr.add(offset) }
    }

    #[allow(
        clippy::cast_ptr_alignment,
        reason = "the block is aligned for T and the slot stride is a multiple of T's alignment"
    )]
    fn item_ptr(&self, index: usize) -> NonNull<T> {
        self.slot_ptr(index).cast::<T>()
    }

    /// Pointer to the item in the slot, if the slot holds the item with this generation.
    #[must_use]
    pub(crate) fn ptr(&self, index: usize, generation: NonZero<u64>) -> Option<NonNull<T>> {
        self.holds(index, generation).then(|| self.item_ptr(index))
    }

    #[must_use]
    pub(crate) fn get(&self, index: usize, generation: NonZero<u64>) -> Option<&T> {
        // SAFETY: The generation matches, so the slot holds an initialized item. We hand out a
        // shared reference tied to a shared borrow of the segment, so no exclusive reference to
        // the item can be created through the segment while it lives.
        self.ptr(index, generation).map(|ptr| unsafe { ptr.as_ref() })
    }

    #[must_use]
    pub(crate) fn get_mut(&mut self, index: usize, generation: NonZero<u64>) -> Option<&mut T> {
        // SAFETY: The generation matches, so the slot holds an initialized item. The exclusive
        // borrow of the segment guarantees this is the only reference to the item.
        self.ptr(index, generation).map(|mut ptr| unsafe { ptr.as_mut() })
    }

    /// Initializes an item in the next available slot and stamps it with `generation`.
    ///
    /// If `f` panics, the slot is returned to where it was taken from and the segment is left
    /// as it was before the call.
    ///
    /// # Panics
    ///
    /// Panics if the segment has neither a vacant nor an unclaimed slot.
    ///
    /// # Safety
    ///
    /// The closure must fully initialize the item before returning.
    pub(crate) unsafe fn insert_with(
        &mut self,
        generation: NonZero<u64>,
        f: impl FnOnce(&mut MaybeUninit<T>),
    ) -> SlotInsertion {
        let claim = self.claim();
        let index = claim.index();

        let mut uninit_ptr = self.item_ptr(index).cast::<MaybeUninit<T>>();

        let rollback = scopeguard::guard(&mut *self, |segment| segment.release(claim));

        // SAFETY: The slot lies within our allocation, is aligned for T and was just taken out
        // of circulation, so nothing else refers to it. The free list link it may have held was
        // already consumed by claim().
        f(unsafe { uninit_ptr.as_mut() });

        let segment = ScopeGuard::into_inner(rollback);

        *segment
            .generations
            .get_mut(index)
            .expect("claimed slots are always below the high-water mark") = Some(generation);

        SlotInsertion {
            index,
            reused: matches!(claim, Claim::Vacant { .. }),
        }
    }

    /// Drops the item in the slot and puts the slot on the free list.
    ///
    /// The slot becomes vacant even if the item's destructor panics.
    ///
    /// # Panics
    ///
    /// Panics if the slot does not hold the item with this generation.
    pub(crate) fn remove(&mut self, index: usize, generation: NonZero<u64>) {
        assert!(
            self.holds(index, generation),
            "remove({index}) slot does not hold generation {generation} in segment of {}",
            type_name::<T>()
        );

        *self
            .generations
            .get_mut(index)
            .expect("holds() verified the index is below the high-water mark") = None;

        let item_ptr = self.item_ptr(index);

        let _vacate = scopeguard::guard(&mut *self, |segment| segment.push_vacant(index));

        // SAFETY: The slot held an initialized item until a moment ago and we just marked it as
        // vacant, so this is the only place that will ever drop this item.
        unsafe {
            ptr::drop_in_place(item_ptr.as_ptr());
        }
    }

    fn claim(&mut self) -> Claim {
        if let Some(index) = self.next_vacant_index {
            let next = self.read_link(index);
            self.next_vacant_index = (next != END_OF_FREE_LIST).then_some(next);

            self.vacant_count = self
                .vacant_count
                .checked_sub(1)
                .expect("the free list head is a vacant slot, so the count is non-zero");

            return Claim::Vacant { index };
        }

        let index = self.high_water_mark();

        assert!(
            index < self.capacity(),
            "cannot insert into a full segment of {}",
            type_name::<T>()
        );

        self.generations.push(None);

        Claim::Fresh { index }
    }

    /// Puts a claimed slot back after a failed initialization.
    fn release(&mut self, claim: Claim) {
        match claim {
            Claim::Vacant { index } => self.push_vacant(index),
            Claim::Fresh { index } => {
                let released = self.generations.pop();

                debug_assert_eq!(released, Some(None));
                debug_assert_eq!(self.generations.len(), index);
            }
        }
    }

    fn push_vacant(&mut self, index: usize) {
        let next = self.next_vacant_index.unwrap_or(END_OF_FREE_LIST);

        // SAFETY: The slot is within our allocation (slot_ptr checks bounds) and holds no item,
        // so we may use its memory. Slots are at least pointer-sized but may be less aligned
        // than usize, hence the unaligned write.
        unsafe {
            self.slot_ptr(index).cast::<usize>().write_unaligned(next);
        }

        self.next_vacant_index = Some(index);
        self.vacant_count = self
            .vacant_count
            .checked_add(1)
            .expect("vacant count is bounded by capacity");
    }

    fn read_link(&self, index: usize) -> usize {
        // SAFETY: Only called for the free list head, whose link was written by push_vacant().
        unsafe { self.slot_ptr(index).cast::<usize>().read_unaligned() }
    }
}

impl<T> Drop for Segment<T> {
    fn drop(&mut self) {
        for (index, generation) in self.generations.iter().enumerate() {
            if generation.is_some() {
                // SAFETY: A generation stamp means the slot holds an initialized item, and the
                // segment is going away so nothing can access the item afterwards.
                unsafe {
                    ptr::drop_in_place(self.item_ptr(index).as_ptr());
                }
            }
        }

        // SAFETY: The layout is the same one we allocated with.
        unsafe {
            dealloc(self.first_slot_ptr.as_ptr(), self.layout.memory());
        }
    }
}

impl<T> fmt::Debug for Segment<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("first_slot_ptr", &self.first_slot_ptr)
            .field("pages", &self.layout.pages())
            .field("capacity", &self.capacity())
            .field("high_water_mark", &self.high_water_mark())
            .field("vacant_count", &self.vacant_count)
            .finish()
    }
}

// SAFETY: The segment owns its items and its raw memory block exclusively. Nothing about it is
// tied to a thread, so it can move between threads whenever the items themselves can.
unsafe impl<T: Send> Send for Segment<T> {}

// SAFETY: A shared reference only allows reading items via `&T`, so sharing is fine whenever
// `&T` may be shared between threads.
unsafe impl<T: Sync> Sync for Segment<T> {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::cast_possible_truncation,
    reason = "keep tests concise and easy to read"
)]
mod tests {
    use std::cell::Cell;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use super::*;
    use crate::GrowthPolicy;

    const PAGE: usize = 4096;

    fn generation(value: u64) -> NonZero<u64> {
        NonZero::new(value).unwrap()
    }

    fn new_segment<T>() -> Segment<T> {
        let policy = GrowthPolicy::for_item::<T>(NonZero::new(PAGE).unwrap(), 0, 1.0);
        Segment::new(policy.next_layout().unwrap(), policy.slot_size()).unwrap()
    }

    fn insert<T>(segment: &mut Segment<T>, stamp: u64, value: T) -> SlotInsertion {
        unsafe {
            segment.insert_with(generation(stamp), |uninit| {
                uninit.write(value);
            })
        }
    }

    fn fresh(index: usize) -> SlotInsertion {
        SlotInsertion {
            index,
            reused: false,
        }
    }

    fn reused(index: usize) -> SlotInsertion {
        SlotInsertion {
            index,
            reused: true,
        }
    }

    struct Droppable(Rc<Cell<u32>>);

    impl Drop for Droppable {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn address<T>(segment: &Segment<T>, index: usize, stamp: u64) -> usize {
        segment.ptr(index, generation(stamp)).unwrap().as_ptr().addr()
    }

    #[test]
    fn smoke_test() {
        let mut segment = new_segment::<u64>();

        assert_eq!(segment.capacity(), PAGE / 8);
        assert_eq!(segment.high_water_mark(), 0);
        assert_eq!(segment.len(), 0);

        let a = insert(&mut segment, 1, 42);
        let b = insert(&mut segment, 2, 43);

        assert_eq!(a, fresh(0));
        assert_eq!(b, fresh(1));
        assert_eq!(segment.get(0, generation(1)), Some(&42));
        assert_eq!(segment.get(1, generation(2)), Some(&43));
        assert_eq!(segment.len(), 2);
        assert_eq!(segment.high_water_mark(), 2);
    }

    #[test]
    fn fresh_slots_are_contiguous() {
        let mut segment = new_segment::<u64>();

        for stamp in 1..=3 {
            _ = insert(&mut segment, stamp, 0);
        }

        let base = address(&segment, 0, 1);
        assert_eq!(base % PAGE, 0);
        assert_eq!(address(&segment, 1, 2), base + 8);
        assert_eq!(address(&segment, 2, 3), base + 16);
    }

    #[test]
    fn vacant_slots_are_reused_most_recent_first() {
        let mut segment = new_segment::<u64>();

        for stamp in 1..=4 {
            _ = insert(&mut segment, stamp, 0);
        }

        segment.remove(1, generation(2));
        segment.remove(2, generation(3));

        assert!(segment.has_vacant());
        assert_eq!(segment.vacant_count(), 2);
        assert_eq!(segment.len(), 2);

        assert_eq!(insert(&mut segment, 5, 0), reused(2));
        assert_eq!(insert(&mut segment, 6, 0), reused(1));
        assert_eq!(insert(&mut segment, 7, 0), fresh(4));

        assert!(!segment.has_vacant());
        assert_eq!(segment.high_water_mark(), 5);
    }

    #[test]
    fn unaligned_small_slots_hold_links() {
        // Slot size 10 with alignment 1 puts links at odd addresses.
        let mut segment = new_segment::<[u8; 10]>();

        for stamp in 1..=5 {
            _ = insert(&mut segment, stamp, [stamp as u8; 10]);
        }

        segment.remove(1, generation(2));
        segment.remove(3, generation(4));

        assert_eq!(insert(&mut segment, 6, [6; 10]).index, 3);
        assert_eq!(insert(&mut segment, 7, [7; 10]).index, 1);

        assert_eq!(segment.get(0, generation(1)), Some(&[1; 10]));
        assert_eq!(segment.get(1, generation(7)), Some(&[7; 10]));
        assert_eq!(segment.get(4, generation(5)), Some(&[5; 10]));
    }

    #[test]
    fn stale_generation_does_not_resolve() {
        let mut segment = new_segment::<u64>();

        _ = insert(&mut segment, 1, 10);
        segment.remove(0, generation(1));
        _ = insert(&mut segment, 2, 20);

        assert_eq!(segment.get(0, generation(1)), None);
        assert_eq!(segment.get(0, generation(2)), Some(&20));
        assert_eq!(segment.generation_at(0), Some(generation(2)));
        assert_eq!(segment.generation_at(1), None);
    }

    #[test]
    #[should_panic]
    fn remove_with_stale_generation_panics() {
        let mut segment = new_segment::<u64>();

        _ = insert(&mut segment, 1, 10);
        segment.remove(0, generation(1));
        segment.remove(0, generation(1));
    }

    #[test]
    #[should_panic]
    fn insert_into_full_segment_panics() {
        let mut segment = new_segment::<u64>();

        for stamp in 1..=(segment.capacity() as u64 + 1) {
            _ = insert(&mut segment, stamp, 0);
        }
    }

    #[test]
    fn address_lookup() {
        let mut segment = new_segment::<u64>();
        _ = insert(&mut segment, 1, 0);
        _ = insert(&mut segment, 2, 0);

        let base = segment.ptr(0, generation(1)).unwrap().as_ptr().cast::<u8>();

        assert!(segment.contains(base));
        assert_eq!(segment.slot_index_of(base), Some(0));
        assert_eq!(segment.slot_index_of(base.wrapping_add(8)), Some(1));
        assert_eq!(segment.slot_index_of(base.wrapping_add(9)), None);

        let last_byte = base.wrapping_add(PAGE - 1);
        assert!(segment.contains(last_byte));

        let past_end = base.wrapping_add(PAGE);
        assert!(!segment.contains(past_end));
        assert_eq!(segment.slot_index_of(past_end), None);

        let before_start = base.wrapping_sub(1);
        assert!(!segment.contains(before_start));
    }

    #[test]
    fn panicking_initializer_returns_fresh_slot() {
        let mut segment = new_segment::<u64>();

        let result = catch_unwind(AssertUnwindSafe(|| unsafe {
            segment.insert_with(generation(1), |_| panic!("initializer failed"))
        }));

        assert!(result.is_err());
        assert_eq!(segment.high_water_mark(), 0);
        assert_eq!(insert(&mut segment, 2, 5).index, 0);
    }

    #[test]
    fn panicking_initializer_returns_vacant_slot() {
        let mut segment = new_segment::<u64>();

        _ = insert(&mut segment, 1, 1);
        _ = insert(&mut segment, 2, 2);
        segment.remove(0, generation(1));

        let result = catch_unwind(AssertUnwindSafe(|| unsafe {
            segment.insert_with(generation(3), |uninit| {
                // Scribble over the slot before failing, the free list must survive this.
                uninit.write(u64::MAX);
                panic!("initializer failed");
            })
        }));

        assert!(result.is_err());
        assert!(segment.has_vacant());
        assert_eq!(segment.vacant_count(), 1);
        assert_eq!(insert(&mut segment, 4, 4), reused(0));
        assert!(!segment.has_vacant());
    }

    #[test]
    fn remove_drops_item() {
        let dropped = Rc::new(Cell::new(0));

        let mut segment = new_segment::<Droppable>();
        _ = insert(&mut segment, 1, Droppable(Rc::clone(&dropped)));

        segment.remove(0, generation(1));

        assert_eq!(dropped.get(), 1);
    }

    #[test]
    fn panicking_destructor_still_vacates_slot() {
        struct Exploding;

        impl Drop for Exploding {
            fn drop(&mut self) {
                panic!("destructor failed");
            }
        }

        let mut segment = new_segment::<Exploding>();
        _ = insert(&mut segment, 1, Exploding);

        let result = catch_unwind(AssertUnwindSafe(|| segment.remove(0, generation(1))));

        assert!(result.is_err());
        assert_eq!(segment.vacant_count(), 1);
        assert_eq!(segment.len(), 0);
    }

    #[test]
    fn drop_drops_live_items_only() {
        let dropped = Rc::new(Cell::new(0));

        let mut segment = new_segment::<Droppable>();

        for stamp in 1..=3 {
            _ = insert(&mut segment, stamp, Droppable(Rc::clone(&dropped)));
        }

        segment.remove(1, generation(2));
        assert_eq!(dropped.get(), 1);

        drop(segment);
        assert_eq!(dropped.get(), 3);
    }

    #[test]
    fn get_mut_modifies_in_place() {
        let mut segment = new_segment::<u64>();
        _ = insert(&mut segment, 1, 10);

        *segment.get_mut(0, generation(1)).unwrap() += 5;

        assert_eq!(segment.get(0, generation(1)), Some(&15));
        assert!(segment.get_mut(0, generation(9)).is_none());
    }
}
