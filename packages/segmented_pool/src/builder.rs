use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use crate::pal::{Platform, PlatformFacade};
use crate::{DropPolicy, GrowthPolicy, SegmentedPool, SyncSegmentedPool};

/// Builder for creating an instance of [`SegmentedPool`] or [`SyncSegmentedPool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`SegmentedPool::new()`][1] is sufficient for most use cases.
///
/// # Examples
///
/// ```
/// use segmented_pool::{DropPolicy, SegmentedPool};
///
/// let pool = SegmentedPool::<u64>::builder()
///     .min_segment_pages(16)
///     .growth_factor(2.0)
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
///
/// assert!(pool.base_segment_pages() >= 16);
/// ```
///
/// [1]: SegmentedPool::new
#[must_use]
pub struct SegmentedPoolBuilder<T> {
    min_segment_pages: usize,
    growth_factor: f64,
    drop_policy: DropPolicy,
    platform: PlatformFacade,

    _item: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for SegmentedPoolBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentedPoolBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("min_segment_pages", &self.min_segment_pages)
            .field("growth_factor", &self.growth_factor)
            .field("drop_policy", &self.drop_policy)
            .field("platform", &self.platform)
            .finish()
    }
}

impl<T> SegmentedPoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            min_segment_pages: 0,
            growth_factor: 1.0,
            drop_policy: DropPolicy::default(),
            platform: PlatformFacade::real(),
            _item: PhantomData,
        }
    }

    /// Sets the minimum size of a segment, in memory pages.
    ///
    /// The pool always sizes segments so that they hold a whole number of slots. If the minimum
    /// is not already such a size, it is rounded up to the next one. Zero (the default) means the
    /// smallest such size.
    ///
    /// A minimum too large for the address space is accepted here. The pool then fails to add
    /// its first segment, reported by [`SegmentedPool::try_allocate()`] as
    /// [`Error::SegmentTooLarge`][crate::Error::SegmentTooLarge].
    pub fn min_segment_pages(mut self, pages: usize) -> Self {
        self.min_segment_pages = pages;
        self
    }

    /// Sets the factor by which each new segment is larger than the previous one.
    ///
    /// Regardless of the factor, each new segment is at least one base segment size larger than
    /// the previous one. Values that are not greater than 1.0 (including NaN) are treated as 1.0,
    /// which is also the default.
    pub fn growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = factor;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how to treat items that are
    /// still live when the pool is cleared or dropped.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    #[cfg(test)]
    pub(crate) fn platform(mut self, platform: impl Into<PlatformFacade>) -> Self {
        self.platform = platform.into();
        self
    }

    fn growth_policy(&self) -> GrowthPolicy {
        GrowthPolicy::for_item::<T>(
            self.platform.page_size(),
            self.min_segment_pages,
            self.growth_factor,
        )
    }

    /// Builds an unsynchronized pool with the specified configuration.
    ///
    /// No memory is allocated until the first item is inserted.
    #[must_use]
    pub fn build(self) -> SegmentedPool<T> {
        SegmentedPool::new_inner(self.growth_policy(), self.drop_policy)
    }

    /// Builds a pool that can be shared between threads, with the specified configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use segmented_pool::SegmentedPool;
    ///
    /// let pool = SegmentedPool::<u64>::builder().growth_factor(1.5).build_sync();
    ///
    /// assert_eq!(pool.live(), 0);
    /// ```
    #[must_use]
    pub fn build_sync(self) -> SyncSegmentedPool<T> {
        SyncSegmentedPool::from(self.build())
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZero;

    use super::*;
    use crate::pal::MockPlatform;

    fn platform_with_page_size(page_size: usize) -> MockPlatform {
        let mut platform = MockPlatform::new();
        platform
            .expect_page_size()
            .return_const(NonZero::new(page_size).unwrap());
        platform
    }

    #[test]
    fn defaults() {
        let pool = SegmentedPoolBuilder::<u64>::new()
            .platform(platform_with_page_size(4096))
            .build();

        assert_eq!(pool.page_size(), 4096);
        assert_eq!(pool.base_segment_pages(), 1);
        assert!((pool.growth_factor() - 1.0).abs() < f64::EPSILON);
        assert_eq!(pool.drop_policy(), DropPolicy::MayDropItems);
    }

    #[test]
    fn settings_are_applied() {
        let pool = SegmentedPoolBuilder::<u64>::new()
            .platform(platform_with_page_size(16_384))
            .min_segment_pages(3)
            .growth_factor(2.0)
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        assert_eq!(pool.page_size(), 16_384);
        assert_eq!(pool.base_segment_pages(), 3);
        assert!((pool.growth_factor() - 2.0).abs() < f64::EPSILON);
        assert_eq!(pool.drop_policy(), DropPolicy::MustNotDropItems);
    }

    #[test]
    fn shrinking_growth_factor_is_clamped() {
        let pool = SegmentedPoolBuilder::<u64>::new()
            .platform(platform_with_page_size(4096))
            .growth_factor(0.25)
            .build();

        assert!((pool.growth_factor() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn build_sync_applies_settings() {
        let pool = SegmentedPoolBuilder::<u64>::new()
            .platform(platform_with_page_size(4096))
            .min_segment_pages(2)
            .build_sync();

        assert_eq!(pool.lock().base_segment_pages(), 2);
    }

    #[test]
    fn debug_names_item_type() {
        let builder = SegmentedPoolBuilder::<u64>::new();

        assert!(format!("{builder:?}").contains("u64"));
    }
}
