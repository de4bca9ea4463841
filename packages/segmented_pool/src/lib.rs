//! A fixed-type object pool that packs its items into page-sized segments.
//!
//! This crate provides [`SegmentedPool`], a dynamically growing pool for items of one type. It is
//! meant for workloads that churn many short-lived objects of the same size, such as messages or
//! entities: after warm-up, allocating and deallocating items never touches the heap.
//!
//! # Key Features
//!
//! - **Page-aligned segments**: Storage comes in blocks that span whole memory pages and hold a
//!   whole number of items, so there is no per-item overhead and no wasted tail
//! - **Slot reuse**: Vacated slots are reused before new ones are claimed, most recent first,
//!   preferring the oldest segments so live items stay clustered
//! - **Configurable growth**: Each new segment is larger than the previous one by a growth factor
//! - **Generation-tagged handles**: A [`Handle`] that outlives its item never resolves to whatever
//!   reuses the slot
//! - **Stable addresses**: Items never move, and a pointer can be mapped back to its handle
//! - **Lifecycle hooks**: Items implement [`Poolable`] to be reset and flagged when reclaimed
//! - **Thread-safe variant**: [`SyncSegmentedPool`] guards a pool with a lock
//!
//! # Example
//!
//! ```rust
//! use segmented_pool::{Poolable, RecycledFlag, SegmentedPool};
//!
//! #[derive(Default)]
//! struct Particle {
//!     position: (f32, f32),
//!     velocity: (f32, f32),
//!     recycled: RecycledFlag,
//! }
//!
//! impl Poolable for Particle {
//!     fn reset(&mut self) {
//!         self.velocity = (0.0, 0.0);
//!     }
//!
//!     fn is_recycled(&self) -> bool {
//!         self.recycled.get()
//!     }
//!
//!     fn set_recycled(&mut self, recycled: bool) {
//!         self.recycled.set(recycled);
//!     }
//! }
//!
//! let mut pool = SegmentedPool::<Particle>::builder()
//!     .growth_factor(2.0)
//!     .build();
//!
//! let spark = pool.allocate_default();
//! pool.get_mut(spark).unwrap().velocity = (1.0, 0.5);
//!
//! assert_eq!(pool.live(), 1);
//! assert_eq!(pool.segment_count(), 1);
//!
//! pool.deallocate(spark);
//!
//! assert!(pool.is_empty());
//! assert!(pool.get(spark).is_none());
//! ```
//!
//! # Handling allocation failure
//!
//! Like the standard collections, the `allocate*` methods treat a failure to allocate a new
//! segment as fatal. The `try_allocate*` methods return an [`Error`] instead.

mod builder;
mod drop_policy;
mod error;
mod handle;
mod pal;
mod pool;
mod poolable;
mod segment;
mod segment_info;
mod segment_layout;
mod sync_pool;
mod vacancy_tracker;

pub use builder::*;
pub use drop_policy::*;
pub use error::Error;
pub(crate) use error::Result;
pub use handle::*;
pub use pool::*;
pub use poolable::*;
pub(crate) use segment::*;
pub use segment_info::*;
pub(crate) use segment_layout::*;
pub use sync_pool::*;
pub(crate) use vacancy_tracker::*;
