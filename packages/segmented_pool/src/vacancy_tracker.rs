use bitvec::vec::BitVec;

/// Tracks which segments of a pool have slots on their free list.
///
/// Vacated slots are reused before any never-used slot is claimed, and we prefer the
/// lowest-index segment that has one. This keeps live items clustered in the oldest segments.
///
/// # What affects vacancy
///
/// * Removing an item from a segment that had no vacant slots gives it a vacancy.
/// * Reusing the last vacant slot of a segment takes its vacancy away.
/// * New segments start without vacancies. Their never-used slots are not tracked here, as the
///   pool claims those separately from the most recently added segment.
///
/// # How we track vacancies
///
/// Pools have few segments compared to slots, so one bit per segment is cheap. We also cache
/// the lowest index with a set bit, so the common "where do I insert" query is a field read.
#[derive(Debug, Default)]
pub(crate) struct VacancyTracker {
    // Segment index to "has a vacant slot".
    has_vacancy: BitVec,

    // Index of the lowest-index segment with a vacant slot, if any.
    next_vacancy: Option<usize>,
}

impl VacancyTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Index of the lowest-index segment with a vacant slot, or `None` if there is none.
    pub(crate) fn next_vacancy(&self) -> Option<usize> {
        self.next_vacancy
    }

    /// Informs the tracker that a segment was appended to the pool.
    pub(crate) fn push_segment(&mut self) {
        self.has_vacancy.push(false);
    }

    /// Forgets all segments.
    pub(crate) fn clear(&mut self) {
        self.has_vacancy.clear();
        self.next_vacancy = None;
    }

    /// Updates the vacancy status of a segment.
    ///
    /// In debug builds, panics if the status does not change. Callers are expected to report
    /// only transitions.
    pub(crate) fn set_has_vacancy(&mut self, segment_index: usize, has_vacancy: bool) {
        let previously_had_vacancy = self.has_vacancy.replace(segment_index, has_vacancy);

        debug_assert_ne!(
            has_vacancy, previously_had_vacancy,
            "segment {segment_index} vacancy status reported without a change"
        );

        if has_vacancy {
            if self
                .next_vacancy
                .is_none_or(|current| segment_index < current)
            {
                self.next_vacancy = Some(segment_index);
            }

            return;
        }

        if self.next_vacancy != Some(segment_index) {
            return;
        }

        // The lowest vacancy just went away. Anything below it had no vacancy either, so we
        // only need to look after it.
        //
        // Will not wrap because wrapping implies more segments than virtual memory can hold.
        let search_start = segment_index.wrapping_add(1);

        self.next_vacancy = self.has_vacancy.get(search_start..).and_then(|remaining| {
            remaining
                .first_one()
                .map(|offset| search_start.wrapping_add(offset))
        });
    }
}
