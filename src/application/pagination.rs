//! Fixed-size pages over the published link stream.

use std::num::NonZeroUsize;

use crate::{
    application::repos::LinkSource, cache::PageCache, domain::link::Link,
    infra::flatfile::StoreError,
};

#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    per_page: NonZeroUsize,
}

impl Paginator {
    pub fn new(per_page: NonZeroUsize) -> Self {
        Self { per_page }
    }

    pub fn per_page(&self) -> usize {
        self.per_page.get()
    }

    /// Links of page `number` (1-based), or `None` when the page does not
    /// exist. Page 1 always exists, possibly empty.
    ///
    /// The source is scanned once from the front. Pages before `number` are
    /// materialized into the cache on the way unless already there; the scan
    /// stops as soon as a batch comes back short, since no later page exists.
    pub fn page<S>(
        &self,
        number: u32,
        source: &mut S,
        cache: &PageCache,
    ) -> Result<Option<Vec<Link>>, StoreError>
    where
        S: LinkSource + ?Sized,
    {
        if number == 0 {
            return Ok(None);
        }
        if let Some(links) = cache.links(number) {
            return Ok(Some(links));
        }

        let per_page = self.per_page.get();
        let mut stream = source.iterate()?;
        for current in 1..number {
            let batch: Vec<Link> = stream.by_ref().take(per_page).collect();
            let short = batch.len() < per_page;
            if !cache.contains_links(current) {
                cache.store_links(current, batch);
            }
            if short {
                return Ok(None);
            }
        }

        let batch: Vec<Link> = stream.take(per_page).collect();
        if batch.is_empty() && number > 1 {
            return Ok(None);
        }
        cache.store_links(number, batch.clone());
        Ok(Some(batch))
    }
}
