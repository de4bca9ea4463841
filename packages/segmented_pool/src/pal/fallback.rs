use std::num::NonZero;

use crate::pal::{FALLBACK_PAGE_SIZE, Platform};

/// Singleton instance of `BuildTargetPlatform`, used by public API types
/// to hook up to the correct PAL implementation.
pub(crate) static BUILD_TARGET_PLATFORM: BuildTargetPlatform = BuildTargetPlatform;

/// A build target we have no page size query for. We assume the most common page size.
#[derive(Debug)]
pub(crate) struct BuildTargetPlatform;

impl Platform for BuildTargetPlatform {
    fn page_size(&self) -> NonZero<usize> {
        FALLBACK_PAGE_SIZE
    }
}
