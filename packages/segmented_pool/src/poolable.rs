/// Lifecycle hooks that an item type implements to be stored in a [`SegmentedPool`][1].
///
/// The pool calls these at well-defined points:
///
/// * After an item is written into its slot, the pool calls `set_recycled(false)`.
/// * When an item is deallocated, the pool calls [`reset()`][Self::reset], then
///   `set_recycled(true)`, and only then drops the item in place.
///
/// The recycled flag is the only state the pool manages on the item. The easiest way to store it
/// is to embed a [`RecycledFlag`] field.
///
/// # Examples
///
/// ```
/// use segmented_pool::{Poolable, RecycledFlag};
///
/// struct Particle {
///     position: (f32, f32),
///     trail: Vec<(f32, f32)>,
///     recycled: RecycledFlag,
/// }
///
/// impl Poolable for Particle {
///     fn reset(&mut self) {
///         self.trail.clear();
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
/// ```
///
/// [1]: crate::SegmentedPool
pub trait Poolable {
    /// Clears transient state before the item is reclaimed by the pool.
    ///
    /// The default implementation does nothing.
    fn reset(&mut self) {}

    /// Whether the pool has reclaimed this item.
    fn is_recycled(&self) -> bool;

    /// Called by the pool to mark the item as live (`false`) or reclaimed (`true`).
    fn set_recycled(&mut self, recycled: bool);
}

/// Storage for the recycled flag of a [`Poolable`] item.
///
/// A freshly created flag reads as not recycled.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct RecycledFlag(bool);

impl RecycledFlag {
    /// Creates a flag in the "in use" state.
    #[must_use]
    pub const fn new() -> Self {
        Self(false)
    }

    /// Whether the flag is in the recycled state.
    #[must_use]
    pub const fn get(self) -> bool {
        self.0
    }

    /// Sets the flag.
    pub const fn set(&mut self, recycled: bool) {
        self.0 = recycled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_flag_is_in_use() {
        assert!(!RecycledFlag::new().get());
        assert!(!RecycledFlag::default().get());
    }

    #[test]
    fn set_flips_state() {
        let mut flag = RecycledFlag::new();

        flag.set(true);
        assert!(flag.get());

        flag.set(false);
        assert!(!flag.get());
    }

    #[test]
    fn default_reset_is_noop() {
        #[derive(Debug, Eq, PartialEq)]
        struct Counter {
            value: u32,
            recycled: RecycledFlag,
        }

        impl Poolable for Counter {
            fn is_recycled(&self) -> bool {
                self.recycled.get()
            }

            fn set_recycled(&mut self, recycled: bool) {
                self.recycled.set(recycled);
            }
        }

        let mut counter = Counter {
            value: 5,
            recycled: RecycledFlag::new(),
        };

        counter.reset();

        assert_eq!(counter.value, 5);
        assert!(!counter.is_recycled());
    }
}
