use std::alloc::{Layout, handle_alloc_error};

use thiserror::Error;

/// Errors that can occur when a pool needs to grow by adding a new segment.
///
/// Only the fallible `try_allocate*` methods return these. The regular `allocate*` methods treat
/// the same conditions as fatal, the way the standard collections treat allocation failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The memory allocator could not provide the memory block for a new segment.
    #[error(
        "failed to reserve {} bytes (alignment {}) for a new pool segment",
        .layout.size(),
        .layout.align()
    )]
    OutOfMemory {
        /// Layout of the memory block that could not be allocated.
        layout: Layout,
    },

    /// The next segment would be larger than the address space can describe.
    #[error("the next pool segment of {pages} pages does not fit in the address space")]
    SegmentTooLarge {
        /// Size of the segment that was requested, in memory pages.
        pages: usize,
    },
}

impl Error {
    /// Escalates the error the same way an infallible allocation path would.
    pub(crate) fn into_fatal(self) -> ! {
        match self {
            Self::OutOfMemory { layout } => handle_alloc_error(layout),
            Self::SegmentTooLarge { .. } => panic!("{self}"),
        }
    }
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn out_of_memory_message_names_size() {
        let error = Error::OutOfMemory {
            layout: Layout::from_size_align(12_288, 4096).unwrap(),
        };

        let message = error.to_string();
        assert!(message.contains("12288 bytes"));
        assert!(message.contains("alignment 4096"));
    }

    #[test]
    #[should_panic]
    fn segment_too_large_is_fatal() {
        Error::SegmentTooLarge { pages: usize::MAX }.into_fatal();
    }
}
