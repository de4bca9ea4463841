use std::fmt::{self, Debug};
use std::num::NonZero;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::MockPlatform;
use crate::pal::{BUILD_TARGET_PLATFORM, BuildTargetPlatform, Platform};

/// Either the real platform or, in tests, a mock of it.
#[derive(Clone)]
pub(crate) enum PlatformFacade {
    Real(&'static BuildTargetPlatform),

    #[cfg(test)]
    Mock(Arc<MockPlatform>),
}

impl PlatformFacade {
    pub(crate) const fn real() -> Self {
        Self::Real(&BUILD_TARGET_PLATFORM)
    }
}

impl Platform for PlatformFacade {
    fn page_size(&self) -> NonZero<usize> {
        match self {
            Self::Real(p) => p.page_size(),
            #[cfg(test)]
            Self::Mock(p) => p.page_size(),
        }
    }
}

impl Default for PlatformFacade {
    fn default() -> Self {
        Self::real()
    }
}

#[cfg(test)]
impl From<MockPlatform> for PlatformFacade {
    fn from(p: MockPlatform) -> Self {
        Self::Mock(Arc::new(p))
    }
}

impl Debug for PlatformFacade {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(p) => p.fmt(f),
            #[cfg(test)]
            Self::Mock(p) => p.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_page_size_is_power_of_two() {
        let page_size = PlatformFacade::real().page_size();

        assert!(page_size.is_power_of_two());
    }

    #[test]
    fn mock_page_size_is_passed_through() {
        let mut mock = MockPlatform::new();
        mock.expect_page_size()
            .once()
            .return_const(NonZero::new(16_384_usize).unwrap());

        let facade = PlatformFacade::from(mock);

        assert_eq!(facade.page_size().get(), 16_384);
    }
}
