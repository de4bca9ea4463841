use std::alloc::Layout;
use std::num::NonZero;

use num_integer::Integer;

use crate::{Error, Result};

/// Size of one slot for items of type `T`.
///
/// A slot is at least pointer-sized because vacant slots store the free list link in their own
/// memory. The size is rounded up to the alignment of `T` so that consecutive slots stay aligned.
#[must_use]
pub(crate) fn slot_size_of<T>() -> NonZero<usize> {
    let size = size_of::<T>().max(size_of::<*const ()>());

    NonZero::new(size.next_multiple_of(align_of::<T>()))
        .expect("a slot is at least pointer-sized, so it cannot be zero-sized")
}

/// The smallest number of pages whose byte size is a whole multiple of the slot size,
/// scaled up to the smallest multiple of itself that reaches `min_pages`.
#[must_use]
pub(crate) fn base_segment_pages(
    page_size: NonZero<usize>,
    slot_size: NonZero<usize>,
    min_pages: usize,
) -> NonZero<usize> {
    // lcm(page, slot) / page == slot / gcd(page, slot), and the right side cannot overflow.
    let divisor = Integer::gcd(&page_size.get(), &slot_size.get());
    let pages = Integer::div_floor(&slot_size.get(), &divisor);

    let multiplier = Integer::div_ceil(&min_pages, &pages).max(1);

    // A minimum beyond the address space saturates to the largest multiple of `pages`. Such a
    // segment can never be laid out, so allocating from the pool reports it as too large.
    let scaled = pages
        .checked_mul(multiplier)
        .unwrap_or_else(|| Integer::prev_multiple_of(&usize::MAX, &pages));

    NonZero::new(scaled).expect("a positive multiple of a nonzero page count is never zero")
}

/// Returns the growth factor to use, treating anything that does not actually grow as 1.0.
#[must_use]
pub(crate) fn effective_growth_factor(requested: f64) -> f64 {
    if requested.is_finite() && requested > 1.0 {
        requested
    } else {
        1.0
    }
}

/// Dimensions of one segment: how many pages it spans, how many slots it holds and the memory
/// layout of its storage block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SegmentLayout {
    pages: NonZero<usize>,
    capacity: NonZero<usize>,
    memory: Layout,
}

impl SegmentLayout {
    #[must_use]
    pub(crate) fn pages(&self) -> NonZero<usize> {
        self.pages
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> NonZero<usize> {
        self.capacity
    }

    #[must_use]
    pub(crate) fn memory(&self) -> Layout {
        self.memory
    }
}

/// Decides how large each new segment of a pool is.
///
/// The first segment spans the base page count. Every later segment spans
/// `max(previous * growth_factor, previous + base)` pages, rounded up to a multiple of the base
/// page count. Because the base page count is a whole multiple of the slot size in bytes, every
/// segment is both page-sized and slot-sized with no tail left over.
#[derive(Clone, Debug)]
pub(crate) struct GrowthPolicy {
    page_size: NonZero<usize>,
    slot_size: NonZero<usize>,
    item_align: usize,
    base_pages: NonZero<usize>,
    growth_factor: f64,

    /// Pages in the most recently added segment, `None` while the pool has no segments.
    current_pages: Option<NonZero<usize>>,
}

impl GrowthPolicy {
    #[must_use]
    pub(crate) fn for_item<T>(
        page_size: NonZero<usize>,
        min_segment_pages: usize,
        growth_factor: f64,
    ) -> Self {
        let slot_size = slot_size_of::<T>();

        Self {
            page_size,
            slot_size,
            item_align: align_of::<T>(),
            base_pages: base_segment_pages(page_size, slot_size, min_segment_pages),
            growth_factor: effective_growth_factor(growth_factor),
            current_pages: None,
        }
    }

    #[must_use]
    pub(crate) fn page_size(&self) -> NonZero<usize> {
        self.page_size
    }

    #[must_use]
    pub(crate) fn slot_size(&self) -> NonZero<usize> {
        self.slot_size
    }

    #[must_use]
    pub(crate) fn base_pages(&self) -> NonZero<usize> {
        self.base_pages
    }

    #[must_use]
    pub(crate) fn growth_factor(&self) -> f64 {
        self.growth_factor
    }

    /// Calculates the layout of the next segment without committing to it.
    ///
    /// Call [`advance()`][Self::advance] once the segment has actually been added.
    pub(crate) fn next_layout(&self) -> Result<SegmentLayout> {
        let pages = self.next_pages()?;
        self.layout_for(pages)
    }

    /// Records that a segment with the given layout was added to the pool.
    pub(crate) fn advance(&mut self, layout: &SegmentLayout) {
        self.current_pages = Some(layout.pages());
    }

    /// Forgets all growth history, so the next segment is a base-sized one again.
    pub(crate) fn reset(&mut self) {
        self.current_pages = None;
    }

    fn next_pages(&self) -> Result<NonZero<usize>> {
        let base = self.base_pages.get();

        let Some(previous) = self.current_pages else {
            return Ok(self.base_pages);
        };

        // The float to integer cast saturates, which is what we want: an absurd product ends up
        // as usize::MAX and fails the rounding below.
        #[expect(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "segment page counts are far below the range where f64 loses integer precision"
        )]
        let scaled = (previous.get() as f64 * self.growth_factor) as usize;

        let too_large = || Error::SegmentTooLarge { pages: usize::MAX };

        let stepped = previous.get().checked_add(base).ok_or_else(too_large)?;
        let target = scaled.max(stepped);

        let rounded = target
            .checked_next_multiple_of(base)
            .ok_or(Error::SegmentTooLarge { pages: target })?;

        Ok(NonZero::new(rounded).expect("rounded up from at least previous + base, never zero"))
    }

    fn layout_for(&self, pages: NonZero<usize>) -> Result<SegmentLayout> {
        let too_large = || Error::SegmentTooLarge { pages: pages.get() };

        let bytes = pages
            .get()
            .checked_mul(self.page_size.get())
            .ok_or_else(too_large)?;

        let (capacity, remainder) = Integer::div_rem(&bytes, &self.slot_size.get());
        debug_assert_eq!(
            remainder, 0,
            "segment page count is a multiple of the base page count, so slots fit exactly"
        );

        // Page-aligning the block requires a power-of-two page size, which every real
        // platform has. If one ever reports something else, we settle for item alignment.
        let align = if self.page_size.is_power_of_two() {
            self.page_size.get().max(self.item_align)
        } else {
            self.item_align
        };

        let Ok(memory) = Layout::from_size_align(bytes, align) else {
            return Err(too_large());
        };

        Ok(SegmentLayout {
            pages,
            capacity: NonZero::new(capacity).expect("a segment spans at least one whole slot"),
            memory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(value: usize) -> NonZero<usize> {
        NonZero::new(value).unwrap()
    }

    const PAGE: usize = 4096;

    #[repr(C, align(8))]
    #[allow(dead_code, reason = "only used for its layout")]
    struct TwentyFour([u64; 3]);

    #[test]
    fn slot_size_is_at_least_pointer_sized() {
        assert_eq!(slot_size_of::<u8>().get(), size_of::<usize>());
        assert_eq!(slot_size_of::<u16>().get(), size_of::<usize>());
    }

    #[test]
    fn slot_size_respects_alignment() {
        #[repr(C, align(64))]
        #[allow(dead_code, reason = "only used for its layout")]
        struct Aligned(u8);

        assert_eq!(slot_size_of::<Aligned>().get(), 64);
        assert_eq!(slot_size_of::<[u8; 10]>().get(), 10);
        assert_eq!(slot_size_of::<TwentyFour>().get(), 24);
    }

    #[test]
    fn base_pages_is_lcm_over_page() {
        // lcm(4096, 24) = 12288 = 3 pages.
        assert_eq!(base_segment_pages(nz(PAGE), nz(24), 0).get(), 3);

        // Slot sizes that divide the page need just one page.
        assert_eq!(base_segment_pages(nz(PAGE), nz(8), 0).get(), 1);
        assert_eq!(base_segment_pages(nz(PAGE), nz(64), 0).get(), 1);

        // Odd slot sizes need as many pages as the slot is large.
        assert_eq!(base_segment_pages(nz(PAGE), nz(10), 0).get(), 5);
    }

    #[test]
    fn base_pages_scales_to_minimum() {
        assert_eq!(base_segment_pages(nz(PAGE), nz(24), 1).get(), 3);
        assert_eq!(base_segment_pages(nz(PAGE), nz(24), 3).get(), 3);
        assert_eq!(base_segment_pages(nz(PAGE), nz(24), 4).get(), 6);
        assert_eq!(base_segment_pages(nz(PAGE), nz(24), 10).get(), 12);
        assert_eq!(base_segment_pages(nz(PAGE), nz(8), 16).get(), 16);
    }

    #[test]
    fn base_pages_saturates_on_huge_minimum() {
        // 56 / gcd(4096, 56) = 7 pages per base step.
        let pages = base_segment_pages(nz(PAGE), nz(56), usize::MAX).get();

        assert!(Integer::is_multiple_of(&pages, &7));
        assert!(pages.checked_add(7).is_none());
    }

    #[test]
    fn huge_minimum_is_error_on_first_layout() {
        #[repr(C)]
        #[allow(dead_code, reason = "only used for its layout")]
        struct FiftySix([u64; 6], bool);

        let policy = GrowthPolicy::for_item::<FiftySix>(nz(PAGE), usize::MAX, 1.0);

        assert_eq!(slot_size_of::<FiftySix>().get(), 56);
        assert!(matches!(
            policy.next_layout(),
            Err(Error::SegmentTooLarge { .. })
        ));
    }

    #[test]
    fn growth_factor_is_clamped() {
        assert!((effective_growth_factor(0.5) - 1.0).abs() < f64::EPSILON);
        assert!((effective_growth_factor(1.0) - 1.0).abs() < f64::EPSILON);
        assert!((effective_growth_factor(f64::NAN) - 1.0).abs() < f64::EPSILON);
        assert!((effective_growth_factor(f64::INFINITY) - 1.0).abs() < f64::EPSILON);
        assert!((effective_growth_factor(2.5) - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn first_segment_is_base_sized() {
        let policy = GrowthPolicy::for_item::<TwentyFour>(nz(PAGE), 0, 1.0);

        let layout = policy.next_layout().unwrap();

        assert_eq!(layout.pages().get(), 3);
        assert_eq!(layout.capacity().get(), 512);
        assert_eq!(layout.memory().size(), 3 * PAGE);
        assert_eq!(layout.memory().align(), PAGE);
    }

    fn page_sequence(policy: &mut GrowthPolicy, count: usize) -> Vec<usize> {
        (0..count)
            .map(|_| {
                let layout = policy.next_layout().unwrap();
                policy.advance(&layout);
                layout.pages().get()
            })
            .collect()
    }

    #[test]
    fn unit_factor_steps_by_base() {
        let mut policy = GrowthPolicy::for_item::<TwentyFour>(nz(PAGE), 0, 1.0);

        assert_eq!(page_sequence(&mut policy, 4), vec![3, 6, 9, 12]);
    }

    #[test]
    fn doubling_factor_doubles() {
        let mut policy = GrowthPolicy::for_item::<TwentyFour>(nz(PAGE), 0, 2.0);

        assert_eq!(page_sequence(&mut policy, 4), vec![3, 6, 12, 24]);
    }

    #[test]
    fn fractional_factor_rounds_up_to_base_multiple() {
        let mut policy = GrowthPolicy::for_item::<TwentyFour>(nz(PAGE), 0, 1.5);

        // 3 -> max(4, 6) = 6 -> max(9, 9) = 9 -> max(13, 12) = 13 rounds to 15.
        assert_eq!(page_sequence(&mut policy, 4), vec![3, 6, 9, 15]);
    }

    #[test]
    fn every_layout_is_page_and_slot_exact() {
        for factor in [1.0, 1.3, 2.0, 3.7] {
            let mut policy = GrowthPolicy::for_item::<TwentyFour>(nz(PAGE), 0, factor);
            let mut previous_pages = 0;

            for _ in 0..10 {
                let layout = policy.next_layout().unwrap();
                policy.advance(&layout);

                let bytes = layout.memory().size();
                assert_eq!(bytes % PAGE, 0);
                assert_eq!(bytes, layout.capacity().get() * 24);
                assert_eq!(layout.pages().get() % policy.base_pages().get(), 0);
                assert!(layout.pages().get() >= previous_pages);

                previous_pages = layout.pages().get();
            }
        }
    }

    #[test]
    fn reset_returns_to_base() {
        let mut policy = GrowthPolicy::for_item::<TwentyFour>(nz(PAGE), 0, 2.0);
        _ = page_sequence(&mut policy, 3);

        policy.reset();

        assert_eq!(policy.next_layout().unwrap().pages().get(), 3);
    }

    #[test]
    fn oversized_segment_is_error() {
        let mut policy = GrowthPolicy::for_item::<TwentyFour>(nz(PAGE), 0, 1.0e30);
        _ = page_sequence(&mut policy, 1);

        // The scaled page count saturates and no longer fits in the address space.
        assert!(matches!(
            policy.next_layout(),
            Err(Error::SegmentTooLarge { .. })
        ));
    }
}
