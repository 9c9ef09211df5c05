//! In-process caching of rendered pages.
//!
//! The whole cache is dropped whenever the published store changes on disk:
//! a prepend shifts every link across page boundaries, so no single page can
//! be kept.

pub(crate) mod lock;
mod page;

pub use page::{CacheStatus, PageCache};
pub(crate) use page::{METRIC_EVICT, METRIC_HIT, METRIC_INVALIDATE, METRIC_MISS};
