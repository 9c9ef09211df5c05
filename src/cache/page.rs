//! Page cache keyed by 1-based page number.
//!
//! Each entry holds the raw link batch of a page, its rendered markup, or
//! both. Eviction is least-frequently-used: once population exceeds capacity,
//! the entry with the fewest hits goes, the numerically largest page first on
//! ties. The entry being written is never the one evicted. A capacity of zero
//! disables caching entirely.
//!
//! Only rendered lookups count as hits; the link batches are working state of
//! the paginator. Every [`PageCache::clear`] starts a new generation, and a
//! render computed before the clear is refused by
//! [`PageCache::store_rendered_for`].

use std::{
    cmp::Reverse,
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use metrics::counter;
use serde::Serialize;
use tracing::debug;

use crate::domain::link::Link;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::page";

pub(crate) const METRIC_HIT: &str = "linkroll_page_cache_hit_total";
pub(crate) const METRIC_MISS: &str = "linkroll_page_cache_miss_total";
pub(crate) const METRIC_EVICT: &str = "linkroll_page_cache_evict_total";
pub(crate) const METRIC_INVALIDATE: &str = "linkroll_page_cache_invalidate_total";

#[derive(Debug, Default)]
struct CacheEntry {
    links: Option<Vec<Link>>,
    rendered: Option<Arc<str>>,
    hits: u64,
}

/// Diagnostic view of the cache: capacity and per-page hit counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub capacity: usize,
    pub entries: BTreeMap<u32, u64>,
}

pub struct PageCache {
    capacity: usize,
    entries: Mutex<BTreeMap<u32, CacheEntry>>,
    generation: AtomicU64,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(BTreeMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rendered markup of `page`, counting a hit when present.
    pub fn rendered(&self, page: u32) -> Option<Arc<str>> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "rendered");
        let found = entries.get_mut(&page).and_then(|entry| {
            let html = entry.rendered.clone()?;
            entry.hits += 1;
            Some(html)
        });
        record_lookup(found.is_some());
        found
    }

    /// Link batch of `page`. Not counted as a hit.
    pub fn links(&self, page: u32) -> Option<Vec<Link>> {
        mutex_lock(&self.entries, SOURCE, "links")
            .get(&page)
            .and_then(|entry| entry.links.clone())
    }

    /// Whether the link batch of `page` is cached. Not counted as a hit.
    pub fn contains_links(&self, page: u32) -> bool {
        mutex_lock(&self.entries, SOURCE, "contains_links")
            .get(&page)
            .is_some_and(|entry| entry.links.is_some())
    }

    pub fn store_links(&self, page: u32, links: Vec<Link>) {
        self.store(page, "store_links", None, |entry| entry.links = Some(links));
    }

    pub fn store_rendered(&self, page: u32, html: Arc<str>) {
        self.store(page, "store_rendered", None, |entry| {
            entry.rendered = Some(html)
        });
    }

    /// Current generation; bumped by every [`PageCache::clear`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store markup rendered from data read during `generation`. Refused, and
    /// `false` returned, when the cache was cleared since.
    pub fn store_rendered_for(&self, page: u32, html: Arc<str>, generation: u64) -> bool {
        self.store(page, "store_rendered", Some(generation), |entry| {
            entry.rendered = Some(html)
        })
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = mutex_lock(&self.entries, SOURCE, "clear");
        let removed = entries.len();
        entries.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
        counter!(METRIC_INVALIDATE).increment(1);
        debug!(
            target = "linkroll::cache",
            op = "clear",
            removed,
            "Page cache invalidated"
        );
        removed
    }

    /// Page number → hit count.
    pub fn counts(&self) -> BTreeMap<u32, u64> {
        mutex_lock(&self.entries, SOURCE, "counts")
            .iter()
            .map(|(page, entry)| (*page, entry.hits))
            .collect()
    }

    pub fn status(&self) -> CacheStatus {
        CacheStatus {
            capacity: self.capacity,
            entries: self.counts(),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(
        &self,
        page: u32,
        op: &'static str,
        generation: Option<u64>,
        fill: impl FnOnce(&mut CacheEntry),
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let mut entries = mutex_lock(&self.entries, SOURCE, op);
        if let Some(expected) = generation {
            let current = self.generation.load(Ordering::Acquire);
            if current != expected {
                debug!(
                    target = "linkroll::cache",
                    op,
                    page,
                    expected,
                    current,
                    "Dropping markup rendered before the last invalidation"
                );
                return false;
            }
        }
        fill(entries.entry(page).or_default());

        while entries.len() > self.capacity {
            let victim = entries
                .iter()
                .filter(|(key, _)| **key != page)
                .min_by_key(|(key, entry)| (entry.hits, Reverse(**key)))
                .map(|(key, _)| *key);
            let Some(victim) = victim else {
                break;
            };
            entries.remove(&victim);
            counter!(METRIC_EVICT).increment(1);
            debug!(
                target = "linkroll::cache",
                op,
                evicted = victim,
                "Evicted least frequently used page"
            );
        }
        true
    }
}

fn record_lookup(hit: bool) {
    if hit {
        counter!(METRIC_HIT).increment(1);
    } else {
        counter!(METRIC_MISS).increment(1);
    }
}
