use std::num::NonZero;

use windows::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

use crate::pal::{FALLBACK_PAGE_SIZE, Platform};

/// Singleton instance of `BuildTargetPlatform`, used by public API types
/// to hook up to the correct PAL implementation.
pub(crate) static BUILD_TARGET_PLATFORM: BuildTargetPlatform = BuildTargetPlatform;

/// The operating system that the build is targeting.
#[derive(Debug)]
pub(crate) struct BuildTargetPlatform;

impl Platform for BuildTargetPlatform {
    fn page_size(&self) -> NonZero<usize> {
        let mut info = SYSTEM_INFO::default();

        // SAFETY: We pass a valid pointer to a correctly sized structure, no other requirements.
        unsafe {
            GetSystemInfo(&raw mut info);
        }

        usize::try_from(info.dwPageSize)
            .ok()
            .and_then(NonZero::new)
            .unwrap_or(FALLBACK_PAGE_SIZE)
    }
}
