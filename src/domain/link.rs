//! The link record served by the site.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("entry has no title line")]
    MissingTitle,
    #[error("entry has no url line")]
    MissingUrl,
}

/// A single published (or staged) link.
///
/// Links carry no identity: two links with the same fields are the same link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub title: String,
    pub description: String,
    pub url: String,
    /// Publication time as unix seconds. Staged links keep whatever value they
    /// were written with until [`Link::publish`] stamps them.
    pub publication_date: i64,
}

impl Link {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        publication_date: i64,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            url: url.into(),
            publication_date,
        }
    }

    /// Stamp the link with the current time. Called once, when the link moves
    /// into the published store.
    pub fn publish(&mut self) {
        self.publish_at(now_unix());
    }

    /// Parse a hand-written entry: title on the first line, url on the
    /// second, description on the remaining lines (joined with spaces).
    pub fn from_entry(text: &str, timestamp: i64) -> Result<Self, EntryError> {
        let mut lines = text.lines();
        let title = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or(EntryError::MissingTitle)?;
        let url = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or(EntryError::MissingUrl)?;
        let description = lines
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Self::new(title, description, url, timestamp))
    }

    pub fn publish_at(&mut self, timestamp: i64) {
        self.publication_date = timestamp;
    }

    /// Seconds elapsed between publication and `now`, never negative.
    pub fn age_at(&self, now: i64) -> u64 {
        u64::try_from(now.saturating_sub(self.publication_date)).unwrap_or(0)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Link(title={:?}, description={:?}, url={:?}, publication_date={})",
            self.title, self.description, self.url, self.publication_date
        )
    }
}

/// Current wall-clock time as unix seconds.
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
