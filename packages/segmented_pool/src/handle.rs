use std::any::type_name;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::num::NonZero;

/// A handle that identifies one item in a [`SegmentedPool`][1].
///
/// Handles are returned by the `allocate*` methods and are used to access or deallocate the item.
/// They are small `Copy` values made of the item's segment index, its slot index and a
/// generation stamp.
///
/// # Stale handles
///
/// Every allocation receives a generation stamp that is unique for the lifetime of the pool, even
/// across [`clear()`][2]. After the item is deallocated, the slot may be handed out again, but the
/// new occupant has a different stamp. A stale handle therefore never resolves to the new
/// occupant: lookups return `None` and deallocation panics.
///
/// Handles are not tied to a specific pool instance. Using a handle with a pool other than the one
/// that issued it is a caller error that is not detected.
///
/// # Example
///
/// ```
/// use segmented_pool::{Poolable, RecycledFlag, SegmentedPool};
///
/// #[derive(Default)]
/// struct Entity {
///     hp: u32,
///     recycled: RecycledFlag,
/// }
///
/// impl Poolable for Entity {
///     fn is_recycled(&self) -> bool {
///         self.recycled.get()
///     }
///
///     fn set_recycled(&mut self, recycled: bool) {
///         self.recycled.set(recycled);
///     }
/// }
///
/// let mut pool = SegmentedPool::<Entity>::new();
///
/// let handle = pool.allocate_default();
/// assert!(pool.contains(handle));
///
/// pool.deallocate(handle);
/// assert!(!pool.contains(handle));
/// assert!(pool.get(handle).is_none());
/// ```
///
/// [1]: crate::SegmentedPool
/// [2]: crate::SegmentedPool::clear
pub struct Handle<T> {
    segment_index: usize,
    slot_index: usize,
    generation: NonZero<u64>,

    // Handles carry no `T`, so they are `Send`, `Sync` and `Copy` regardless of `T`.
    _item: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[must_use]
    pub(crate) fn new(segment_index: usize, slot_index: usize, generation: NonZero<u64>) -> Self {
        Self {
            segment_index,
            slot_index,
            generation,
            _item: PhantomData,
        }
    }

    /// Index of the segment that holds the item, in the order segments were added to the pool.
    #[must_use]
    pub fn segment_index(&self) -> usize {
        self.segment_index
    }

    /// Index of the item's slot within its segment.
    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    /// The generation stamp assigned when the item was allocated.
    #[must_use]
    pub fn generation(&self) -> NonZero<u64> {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.segment_index == other.segment_index
            && self.slot_index == other.slot_index
            && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segment_index.hash(state);
        self.slot_index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("segment_index", &self.segment_index)
            .field("slot_index", &self.slot_index)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;

    use static_assertions::assert_impl_all;

    use super::*;

    // The item type is neither `Send` nor `Sync` but the handle still is.
    assert_impl_all!(Handle<Cell<u8>>: Send, Sync, Copy);
    assert_impl_all!(Handle<*const u8>: Send, Sync, Copy);

    #[test]
    fn equality_includes_generation() {
        let a = Handle::<u32>::new(0, 3, NonZero::new(1).unwrap());
        let b = Handle::<u32>::new(0, 3, NonZero::new(1).unwrap());
        let c = Handle::<u32>::new(0, 3, NonZero::new(2).unwrap());

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn accessors_return_parts() {
        let handle = Handle::<u32>::new(2, 7, NonZero::new(99).unwrap());

        assert_eq!(handle.segment_index(), 2);
        assert_eq!(handle.slot_index(), 7);
        assert_eq!(handle.generation().get(), 99);
    }

    #[test]
    fn debug_names_item_type() {
        let handle = Handle::<u32>::new(0, 0, NonZero::new(1).unwrap());

        assert!(format!("{handle:?}").contains("u32"));
    }
}
