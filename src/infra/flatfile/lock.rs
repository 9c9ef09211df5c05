//! Process-wide write locks keyed by store path.
//!
//! The rename-based rewrites are not safe against a second writer on the same
//! file, so every mutation of a given path runs under that path's mutex.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use once_cell::sync::Lazy;

use crate::cache::lock::mutex_lock;

const SOURCE: &str = "infra::flatfile::lock";

static PATH_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Shared handle to the mutex guarding `path`.
#[derive(Debug, Clone)]
pub struct PathLock {
    inner: Arc<Mutex<()>>,
}

impl PathLock {
    pub fn for_path(path: &Path) -> Self {
        let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mut registry = mutex_lock(&PATH_LOCKS, SOURCE, "registry");
        let inner = registry
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self { inner }
    }

    pub fn acquire(&self, op: &'static str) -> MutexGuard<'_, ()> {
        mutex_lock(&self.inner, SOURCE, op)
    }
}
