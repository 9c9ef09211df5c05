//! Publishing: the published store, the optional staging store, and the
//! autopublish schedule moving entries from one to the other.

use std::{num::NonZeroUsize, path::PathBuf};

use metrics::counter;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    application::repos::LinkSource,
    config::Settings,
    domain::{
        link::{Link, now_unix},
        schedule::PublishInterval,
    },
    infra::flatfile::{FlatStore, InsertPosition, InsertStrategy, LinkIter, StoreError},
};

pub(crate) const METRIC_MOVED: &str = "linkroll_autopublish_moved_total";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no staging store is configured")]
    NoSource,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Staging store plus the schedule draining it.
#[derive(Debug)]
pub struct Staging {
    store: FlatStore,
    /// Raw `autopublish.every` value; parsed on each decision so a bad unit is
    /// reported where it matters.
    every: String,
    batch_size: NonZeroUsize,
}

impl Staging {
    pub fn new(store: FlatStore, every: impl Into<String>, batch_size: NonZeroUsize) -> Self {
        Self {
            store,
            every: every.into(),
            batch_size,
        }
    }

    pub fn store(&self) -> &FlatStore {
        &self.store
    }
}

/// Owns the published ("target") store and, when autopublish is active, the
/// staging ("source") store. Reads go to the target only.
#[derive(Debug)]
pub struct StoreAggregator {
    target: FlatStore,
    staging: Option<Staging>,
}

impl StoreAggregator {
    pub fn new(target: FlatStore, staging: Option<Staging>) -> Self {
        Self { target, staging }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, StoreError> {
        let strategy = InsertStrategy::from_memory_wise(settings.database.memory_wise);
        let target = FlatStore::open(settings.database.filepath.clone(), strategy)?;

        let autopublish = &settings.autopublish;
        let staging = if autopublish.active {
            let store = FlatStore::open(autopublish.filepath.clone(), strategy)?;
            Some(Staging::new(
                store,
                autopublish.every.clone(),
                autopublish.link_per_publication,
            ))
        } else {
            None
        };

        Ok(Self::new(target, staging))
    }

    pub fn target_path(&self) -> PathBuf {
        self.target.path().to_path_buf()
    }

    pub fn has_staging(&self) -> bool {
        self.staging.is_some()
    }

    /// Entries moved per scheduled publication.
    pub fn batch_size(&self) -> usize {
        self.staging
            .as_ref()
            .map_or(1, |staging| staging.batch_size.get())
    }

    /// Stamp `links` with the current time and put them in front of the
    /// published ones.
    pub fn publish(&mut self, mut links: Vec<Link>) -> Result<(), StoreError> {
        let now = now_unix();
        for link in &mut links {
            link.publish_at(now);
        }
        self.target.insert(&links, InsertPosition::Front)
    }

    /// Append `links` unchanged to the staging store.
    pub fn publish_later(&mut self, links: &[Link]) -> Result<(), PublishError> {
        let staging = self.staging.as_mut().ok_or(PublishError::NoSource)?;
        staging.store.insert(links, InsertPosition::Back)?;
        Ok(())
    }

    /// Move the `count` oldest staged entries to the front of the published
    /// store, newest first, then drop them from staging. Returns how many
    /// entries moved.
    pub fn move_entries(&mut self, count: usize) -> Result<usize, PublishError> {
        let staging = self.staging.as_mut().ok_or(PublishError::NoSource)?;

        let mut moved = staging.store.head(count)?;
        if moved.is_empty() {
            return Ok(0);
        }
        moved.reverse();

        let now = now_unix();
        for link in &mut moved {
            link.publish_at(now);
        }
        self.target.insert(&moved, InsertPosition::Front)?;
        if let Err(err) = staging.store.drop_front(moved.len()) {
            error!(
                target = "linkroll::publishing",
                op = "move_entries",
                result = "staging_not_trimmed",
                moved = moved.len(),
                staging = %staging.store.path().display(),
                error = %err,
                "Links published but still staged; remove them from the front of staging"
            );
            return Err(err.into());
        }

        counter!(METRIC_MOVED).increment(moved.len() as u64);
        info!(
            target = "linkroll::publishing",
            op = "move_entries",
            requested = count,
            moved = moved.len(),
            "Moved staged links to the published store"
        );
        Ok(moved.len())
    }

    /// Whether a scheduled move is due at `now` (unix seconds).
    ///
    /// Never due without staging; always due while nothing is published;
    /// otherwise due once the configured interval has elapsed since the most
    /// recent publication. An unknown interval unit is logged and never due.
    pub fn is_move_due_at(&mut self, now: i64) -> Result<bool, StoreError> {
        let Some(staging) = self.staging.as_ref() else {
            return Ok(false);
        };
        let interval = match staging.every.parse::<PublishInterval>() {
            Ok(interval) => interval,
            Err(err) => {
                warn!(
                    target = "linkroll::publishing",
                    op = "is_move_due",
                    every = %staging.every,
                    error = %err,
                    "Invalid autopublish interval; skipping scheduled move"
                );
                return Ok(false);
            }
        };

        match self.most_recent_link()? {
            None => Ok(true),
            Some(link) => Ok(interval.is_elapsed(link.age_at(now))),
        }
    }

    /// Run the scheduled move when due. Returns whether one ran.
    pub fn move_if_due(&mut self) -> Result<bool, PublishError> {
        self.move_if_due_at(now_unix())
    }

    pub fn move_if_due_at(&mut self, now: i64) -> Result<bool, PublishError> {
        if !self.is_move_due_at(now)? {
            return Ok(false);
        }
        let batch = self.batch_size();
        self.move_entries(batch)?;
        Ok(true)
    }

    /// Most recently published link, if any.
    pub fn most_recent_link(&mut self) -> Result<Option<Link>, StoreError> {
        Ok(self.target.iterate()?.next())
    }

    /// Publish the example links when both stores are empty. Returns whether
    /// anything was written.
    pub fn seed_defaults_if_empty(&mut self) -> Result<bool, StoreError> {
        if !self.target.is_empty()? {
            return Ok(false);
        }
        if let Some(staging) = self.staging.as_ref() {
            if !staging.store.is_empty()? {
                return Ok(false);
            }
        }

        self.publish(default_links())?;
        info!(
            target = "linkroll::publishing",
            op = "seed_defaults",
            path = %self.target.path().display(),
            "Seeded empty store with example links"
        );
        Ok(true)
    }

    /// Every published link, front to back.
    pub fn links(&mut self) -> Result<LinkIter, StoreError> {
        self.target.iterate()
    }
}

impl LinkSource for StoreAggregator {
    fn is_empty(&self) -> Result<bool, StoreError> {
        self.target.is_empty()
    }

    fn is_stale(&mut self) -> Result<bool, StoreError> {
        self.target.out_of_date()
    }

    fn iterate(&mut self) -> Result<LinkIter, StoreError> {
        self.target.iterate()
    }

    fn record_count(&mut self) -> Result<usize, StoreError> {
        self.target.record_count()
    }
}

fn default_links() -> Vec<Link> {
    vec![
        Link::new(
            "first link",
            "is also the first in database",
            "https://example.org/linkroll",
            0,
        ),
        Link::new(
            "second link",
            "is also the last in database",
            "https://example.org/linkroll",
            0,
        ),
    ]
}
