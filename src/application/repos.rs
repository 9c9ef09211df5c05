//! Read access shared by bare stores and the aggregator that fronts them.

use crate::infra::flatfile::{FlatStore, LinkIter, StoreError};

/// The read-side capabilities pagination relies on.
pub trait LinkSource {
    fn is_empty(&self) -> Result<bool, StoreError>;

    /// Whether the backing data changed since it was last read. Reporting a
    /// change consumes it.
    fn is_stale(&mut self) -> Result<bool, StoreError>;

    fn iterate(&mut self) -> Result<LinkIter, StoreError>;

    fn record_count(&mut self) -> Result<usize, StoreError>;
}

impl LinkSource for FlatStore {
    fn is_empty(&self) -> Result<bool, StoreError> {
        FlatStore::is_empty(self)
    }

    fn is_stale(&mut self) -> Result<bool, StoreError> {
        self.out_of_date()
    }

    fn iterate(&mut self) -> Result<LinkIter, StoreError> {
        FlatStore::iterate(self)
    }

    fn record_count(&mut self) -> Result<usize, StoreError> {
        FlatStore::record_count(self)
    }
}
