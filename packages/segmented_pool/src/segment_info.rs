/// A snapshot of the dimensions and occupancy of one pool segment.
///
/// Returned by [`SegmentedPool::segments()`][1], mostly for diagnostics and tuning of the
/// pool configuration.
///
/// [1]: crate::SegmentedPool::segments
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SegmentInfo {
    pub(crate) pages: usize,
    pub(crate) bytes: usize,
    pub(crate) capacity: usize,
    pub(crate) high_water_mark: usize,
    pub(crate) vacant: usize,
    pub(crate) live: usize,
}

impl SegmentInfo {
    /// How many memory pages the segment spans.
    #[must_use]
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Size of the segment's memory block in bytes.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// How many items the segment can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many slots have ever held an item since the segment was added.
    #[must_use]
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// How many slots below the high-water mark are waiting to be reused.
    #[must_use]
    pub fn vacant(&self) -> usize {
        self.vacant
    }

    /// How many items currently live in the segment.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live
    }
}
