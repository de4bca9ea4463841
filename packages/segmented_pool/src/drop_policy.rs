/// Determines what happens to items that are still live when the pool releases its memory.
///
/// This applies both to [`clear()`][1] and to dropping the pool. By default, any remaining items
/// are dropped in place before their segment memory is released.
///
/// # Examples
///
/// ```
/// use segmented_pool::{DropPolicy, Poolable, RecycledFlag, SegmentedPool};
///
/// #[derive(Default)]
/// struct Message {
///     recycled: RecycledFlag,
/// }
///
/// impl Poolable for Message {
///     fn is_recycled(&self) -> bool {
///         self.recycled.get()
///     }
///
///     fn set_recycled(&mut self, recycled: bool) {
///         self.recycled.set(recycled);
///     }
/// }
///
/// let pool = SegmentedPool::<Message>::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
/// ```
///
/// [1]: crate::SegmentedPool::clear
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// Live items are dropped when the pool releases its segments. This is the default.
    #[default]
    MayDropItems,

    /// The pool panics if it still contains live items when it releases its segments.
    ///
    /// Useful when handles to pooled items are kept in external data structures and leaving any
    /// of them behind at shutdown indicates a bookkeeping defect in the caller.
    MustNotDropItems,
}
