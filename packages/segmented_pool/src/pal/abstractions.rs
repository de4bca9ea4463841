use std::fmt::Debug;
use std::num::NonZero;

/// Page size to assume when the operating system does not tell us.
pub(crate) const FALLBACK_PAGE_SIZE: NonZero<usize> =
    NonZero::new(4096).expect("literal is non-zero");

#[cfg_attr(test, mockall::automock)]
pub(crate) trait Platform: Debug + Send + Sync + 'static {
    /// Size of a virtual memory page, in bytes.
    fn page_size(&self) -> NonZero<usize>;
}
