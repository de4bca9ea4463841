use std::num::NonZero;

use crate::pal::{FALLBACK_PAGE_SIZE, Platform};

/// Singleton instance of `BuildTargetPlatform`, used by public API types
/// to hook up to the correct PAL implementation.
pub(crate) static BUILD_TARGET_PLATFORM: BuildTargetPlatform = BuildTargetPlatform;

/// The operating system that the build is targeting.
#[derive(Debug)]
pub(crate) struct BuildTargetPlatform;

impl Platform for BuildTargetPlatform {
    fn page_size(&self) -> NonZero<usize> {
        // SAFETY: No safety requirements.
        let result = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

        // -1 means the value is indeterminate, which no real system reports for the page size.
        usize::try_from(result)
            .ok()
            .and_then(NonZero::new)
            .unwrap_or(FALLBACK_PAGE_SIZE)
    }
}
