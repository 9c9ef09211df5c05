//! Flat-file link store.
//!
//! A store is one newline-delimited file of [`Link`] records (see [`codec`]).
//! The front of the file holds the newest entries of the published store, so
//! publishing means inserting at the front; staging appends at the back.
//!
//! Front insertion rewrites the file in one of two ways, chosen at construction:
//!
//! - [`InsertStrategy::MemoryWise`] renames the live file to `<path>.bak`,
//!   streams the new records into a fresh live file, copies the backup after
//!   them, then deletes the backup. Memory stays bounded. If the process dies or
//!   an I/O error hits between the rename and the delete, the backup is left in
//!   place and the error names it; an operator restores it by renaming it back.
//!   No automatic rollback is attempted. While a backup exists the store
//!   refuses every write and will not recreate a missing live file, so the
//!   backup cannot be overwritten before it is recovered.
//! - [`InsertStrategy::TimeWise`] reads the whole file, writes new records plus
//!   old content into a sibling temporary file and renames it over the live one.
//!
//! Every mutation holds the [`PathLock`] for the store's path.
//!
//! Moving entries between two stores is two writes: insert into the target,
//! then [`FlatStore::drop_front`] on the source. They are not atomic together.
//! If the second fails the moved records remain in the source and are
//! published again by the next move unless an operator trims them.

pub mod codec;
pub mod lock;

use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, BufWriter, ErrorKind, Read, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use metrics::counter;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::domain::link::Link;

pub use codec::RecordError;
pub use lock::PathLock;

pub(crate) const METRIC_MALFORMED_RECORD: &str = "linkroll_store_malformed_record_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "rewrite of `{}` failed; previous content kept at `{}`: {source}",
        .path.display(),
        .backup.display()
    )]
    Rewrite {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "`{}` holds the content of `{}` from a failed rewrite; restore or remove it first",
        .backup.display(),
        .path.display()
    )]
    BackupPresent { path: PathBuf, backup: PathBuf },
    #[error("link cannot be stored: {0}")]
    Record(#[from] RecordError),
}

impl StoreError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// How front insertion rewrites the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertStrategy {
    /// Whole file in memory, single pass, atomic rename of a temp file.
    #[default]
    TimeWise,
    /// Backup rename plus streaming copy, bounded memory.
    MemoryWise,
}

impl InsertStrategy {
    pub fn from_memory_wise(memory_wise: bool) -> Self {
        if memory_wise {
            Self::MemoryWise
        } else {
            Self::TimeWise
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: SystemTime,
    len: u64,
}

impl Fingerprint {
    fn of(metadata: &fs::Metadata) -> Self {
        Self {
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            len: metadata.len(),
        }
    }
}

/// One on-disk ordered sequence of links.
#[derive(Debug)]
pub struct FlatStore {
    path: PathBuf,
    strategy: InsertStrategy,
    lock: PathLock,
    last_access: Option<Fingerprint>,
    record_count: Option<usize>,
}

impl FlatStore {
    /// Open the store at `path`, creating an empty file (and parent
    /// directories) when absent.
    pub fn open(path: impl Into<PathBuf>, strategy: InsertStrategy) -> Result<Self, StoreError> {
        let path = path.into();
        let lock = PathLock::for_path(&path);
        let mut store = Self {
            path,
            strategy,
            lock,
            last_access: None,
            record_count: None,
        };
        store.last_access = Some(store.fingerprint()?);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn strategy(&self) -> InsertStrategy {
        self.strategy
    }

    /// Whether the backing file existed. An absent file is created empty.
    pub fn exists(&self) -> bool {
        if self.path.is_file() {
            return true;
        }
        if let Err(err) = self.ensure_file() {
            warn!(
                target = "linkroll::store",
                op = "exists",
                path = %self.path.display(),
                error = %err,
                "Failed to create missing store file"
            );
        }
        false
    }

    /// True when the file holds nothing but whitespace.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        let mut reader = BufReader::new(self.open_for_read()?);
        loop {
            let chunk = reader.fill_buf().map_err(StoreError::io(&self.path))?;
            if chunk.is_empty() {
                return Ok(true);
            }
            if chunk.iter().any(|byte| !byte.is_ascii_whitespace()) {
                return Ok(false);
            }
            let consumed = chunk.len();
            reader.consume(consumed);
        }
    }

    /// Lazily iterate the records front to back. Each call restarts from the
    /// beginning of the file. Reading does not move the staleness reference;
    /// only [`FlatStore::out_of_date`] does.
    pub fn iterate(&self) -> Result<LinkIter, StoreError> {
        let file = self.open_for_read()?;
        Ok(LinkIter::new(file, self.path.clone()))
    }

    /// The first `count` valid records.
    pub fn head(&self, count: usize) -> Result<Vec<Link>, StoreError> {
        Ok(self.iterate()?.take(count).collect())
    }

    /// Number of newline-terminated records, cached until the store is found
    /// out of date or rewritten.
    pub fn record_count(&mut self) -> Result<usize, StoreError> {
        if let Some(count) = self.record_count {
            return Ok(count);
        }

        let mut reader = BufReader::new(self.open_for_read()?);
        let mut count = 0usize;
        loop {
            let chunk = reader.fill_buf().map_err(StoreError::io(&self.path))?;
            if chunk.is_empty() {
                break;
            }
            count += chunk.iter().filter(|byte| **byte == b'\n').count();
            let consumed = chunk.len();
            reader.consume(consumed);
        }

        self.record_count = Some(count);
        Ok(count)
    }

    /// True when the file changed since it was last read or last reported out
    /// of date. Reporting resets the cached record count and the reference
    /// point, so a second call without a new modification returns false.
    pub fn out_of_date(&mut self) -> Result<bool, StoreError> {
        let current = self.fingerprint()?;
        let stale = self.last_access != Some(current);
        if stale {
            debug!(
                target = "linkroll::store",
                op = "out_of_date",
                path = %self.path.display(),
                len = current.len,
                "Store changed on disk"
            );
            self.record_count = None;
            self.last_access = Some(current);
        }
        Ok(stale)
    }

    /// Insert `links` as one block, keeping their order.
    pub fn insert(&mut self, links: &[Link], position: InsertPosition) -> Result<(), StoreError> {
        if links.is_empty() {
            return Ok(());
        }
        let encoded = codec::encode_all(links)?;

        let _guard = self.lock.acquire("insert");
        self.refuse_if_backup("insert")?;
        self.ensure_file()?;
        match position {
            InsertPosition::Back => self.append_locked(encoded.as_bytes())?,
            InsertPosition::Front => match self.strategy {
                InsertStrategy::TimeWise => self.prepend_in_memory_locked(encoded.as_bytes())?,
                InsertStrategy::MemoryWise => self.prepend_with_backup_locked(encoded.as_bytes())?,
            },
        }
        self.record_count = None;
        Ok(())
    }

    /// Remove the first `count` valid records, keeping the remainder verbatim.
    /// Malformed lines met before `count` records are discarded with them.
    /// Returns how many records were removed.
    pub fn drop_front(&mut self, count: usize) -> Result<usize, StoreError> {
        if count == 0 {
            return Ok(0);
        }

        let _guard = self.lock.acquire("drop_front");
        self.refuse_if_backup("drop_front")?;
        let input = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(StoreError::io(&self.path)(err)),
        };

        let mut reader = BufReader::new(input);
        let mut temp = self.sibling_tempfile()?;
        let mut dropped = 0usize;
        {
            let mut writer = BufWriter::new(&mut temp);
            let mut line = Vec::new();
            loop {
                line.clear();
                let read = reader
                    .read_until(b'\n', &mut line)
                    .map_err(StoreError::io(&self.path))?;
                if read == 0 {
                    break;
                }
                if dropped >= count {
                    writer.write_all(&line).map_err(StoreError::io(&self.path))?;
                    continue;
                }
                match parse_line(&line) {
                    ParsedLine::Blank => {}
                    ParsedLine::Record(_) => dropped += 1,
                    ParsedLine::Malformed(reason) => {
                        warn!(
                            target = "linkroll::store",
                            op = "drop_front",
                            path = %self.path.display(),
                            reason = %reason,
                            "Discarding malformed record while dropping entries"
                        );
                    }
                }
            }
            writer.flush().map_err(StoreError::io(&self.path))?;
        }

        temp.persist(&self.path)
            .map_err(|err| StoreError::io(&self.path)(err.error))?;
        self.record_count = None;
        Ok(dropped)
    }

    fn append_locked(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(StoreError::io(&self.path))?;
        file.write_all(bytes).map_err(StoreError::io(&self.path))?;
        file.flush().map_err(StoreError::io(&self.path))
    }

    fn prepend_in_memory_locked(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let existing = match fs::read(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(StoreError::io(&self.path)(err)),
        };

        let mut temp = self.sibling_tempfile()?;
        temp.write_all(bytes).map_err(StoreError::io(&self.path))?;
        temp.write_all(&existing).map_err(StoreError::io(&self.path))?;
        temp.flush().map_err(StoreError::io(&self.path))?;
        temp.persist(&self.path)
            .map_err(|err| StoreError::io(&self.path)(err.error))?;
        Ok(())
    }

    fn prepend_with_backup_locked(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let backup = self.backup_path();
        fs::rename(&self.path, &backup).map_err(StoreError::io(&self.path))?;

        let copied = (|| -> io::Result<()> {
            let mut writer = BufWriter::new(File::create(&self.path)?);
            writer.write_all(bytes)?;
            #[cfg(test)]
            if tests::FAIL_BACKUP_COPY.with(std::cell::Cell::get) {
                writer.flush()?;
                return Err(io::Error::other("backup copy interrupted"));
            }
            let mut previous = File::open(&backup)?;
            io::copy(&mut previous, &mut writer)?;
            writer.flush()
        })();

        if let Err(source) = copied {
            error!(
                target = "linkroll::store",
                op = "insert_front",
                result = "rewrite_failed",
                path = %self.path.display(),
                backup = %backup.display(),
                error = %source,
                "Front insert failed after backup rename; backup left for manual recovery"
            );
            return Err(StoreError::Rewrite {
                path: self.path.clone(),
                backup,
                source,
            });
        }

        if let Err(err) = fs::remove_file(&backup) {
            warn!(
                target = "linkroll::store",
                op = "insert_front",
                backup = %backup.display(),
                error = %err,
                "Failed to remove store backup after a successful rewrite"
            );
        }
        Ok(())
    }

    fn open_for_read(&self) -> Result<File, StoreError> {
        match File::open(&self.path) {
            Ok(file) => Ok(file),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // A rewrite may be between rename and recreate; wait it out.
                let _guard = self.lock.acquire("open_retry");
                match File::open(&self.path) {
                    Ok(file) => Ok(file),
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        self.ensure_file()?;
                        File::open(&self.path).map_err(StoreError::io(&self.path))
                    }
                    Err(err) => Err(StoreError::io(&self.path)(err)),
                }
            }
            Err(err) => Err(StoreError::io(&self.path)(err)),
        }
    }

    /// Create the live file when absent, unless a backup awaits recovery.
    fn ensure_file(&self) -> Result<(), StoreError> {
        if !self.path.exists() {
            self.refuse_if_backup("create")?;
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map(drop)
            .map_err(StoreError::io(&self.path))
    }

    fn fingerprint(&self) -> Result<Fingerprint, StoreError> {
        match fs::metadata(&self.path) {
            Ok(metadata) => Ok(Fingerprint::of(&metadata)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.ensure_file()?;
                let metadata = fs::metadata(&self.path).map_err(StoreError::io(&self.path))?;
                Ok(Fingerprint::of(&metadata))
            }
            Err(err) => Err(StoreError::io(&self.path)(err)),
        }
    }

    fn refuse_if_backup(&self, op: &'static str) -> Result<(), StoreError> {
        let backup = self.backup_path();
        if !backup.exists() {
            return Ok(());
        }
        error!(
            target = "linkroll::store",
            op,
            result = "backup_present",
            path = %self.path.display(),
            backup = %backup.display(),
            "Refusing to touch a store whose rewrite backup awaits recovery"
        );
        Err(StoreError::BackupPresent {
            path: self.path.clone(),
            backup,
        })
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".bak");
        PathBuf::from(name)
    }

    fn sibling_tempfile(&self) -> Result<NamedTempFile, StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tempfile::Builder::new()
            .prefix(".linkroll-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(StoreError::io(dir))
    }
}

enum ParsedLine {
    Blank,
    Record(Link),
    Malformed(String),
}

fn parse_line(raw: &[u8]) -> ParsedLine {
    let Ok(text) = std::str::from_utf8(raw) else {
        return ParsedLine::Malformed("record is not valid UTF-8".to_string());
    };
    let text = text.trim_end_matches(['\n', '\r']);
    if text.trim().is_empty() {
        return ParsedLine::Blank;
    }
    match codec::decode(text) {
        Ok(link) => ParsedLine::Record(link),
        Err(err) => ParsedLine::Malformed(err.to_string()),
    }
}

/// Lazy iterator over the records of one store file.
///
/// Malformed records are skipped with a warning. A read error ends the
/// iteration early.
pub struct LinkIter {
    reader: BufReader<File>,
    path: PathBuf,
    line_number: usize,
    buffer: Vec<u8>,
}

impl LinkIter {
    fn new(file: File, path: PathBuf) -> Self {
        Self {
            reader: BufReader::new(file),
            path,
            line_number: 0,
            buffer: Vec::new(),
        }
    }
}

impl Iterator for LinkIter {
    type Item = Link;

    fn next(&mut self) -> Option<Link> {
        loop {
            self.buffer.clear();
            match self.reader.read_until(b'\n', &mut self.buffer) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        target = "linkroll::store",
                        op = "iterate",
                        path = %self.path.display(),
                        line = self.line_number + 1,
                        error = %err,
                        "Read error; stopping iteration"
                    );
                    return None;
                }
            }
            self.line_number += 1;

            match parse_line(&self.buffer) {
                ParsedLine::Blank => continue,
                ParsedLine::Record(link) => return Some(link),
                ParsedLine::Malformed(reason) => {
                    counter!(METRIC_MALFORMED_RECORD).increment(1);
                    warn!(
                        target = "linkroll::store",
                        op = "iterate",
                        path = %self.path.display(),
                        line = self.line_number,
                        reason = %reason,
                        "Skipping malformed record"
                    );
                }
            }
        }
    }
}

/// Read the raw bytes of a store, for diagnostics and tests.
pub fn read_raw(path: &Path) -> Result<String, StoreError> {
    let mut content = String::new();
    File::open(path)
        .and_then(|mut file| file.read_to_string(&mut content))
        .map_err(StoreError::io(path))?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, thread, time::Duration};

    use super::codec::FIELD_DELIMITER;
    use super::*;

    thread_local! {
        pub(super) static FAIL_BACKUP_COPY: Cell<bool> = const { Cell::new(false) };
    }

    fn link(n: u32) -> Link {
        Link::new(
            format!("title {n}"),
            format!("description {n}"),
            format!("https://example.org/{n}"),
            i64::from(n),
        )
    }

    fn open(dir: &tempfile::TempDir, name: &str, strategy: InsertStrategy) -> FlatStore {
        FlatStore::open(dir.path().join(name), strategy).expect("store opens")
    }

    fn collect(store: &mut FlatStore) -> Vec<Link> {
        store.iterate().expect("iterate").collect()
    }

    #[test]
    fn open_creates_missing_file_and_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/deeper/links.dsv");
        let store = FlatStore::open(&path, InsertStrategy::TimeWise).expect("store opens");
        assert!(path.is_file());
        assert!(store.is_empty().expect("empty check"));
    }

    #[test]
    fn exists_recreates_deleted_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open(&dir, "links.dsv", InsertStrategy::TimeWise);
        fs::remove_file(store.path()).expect("remove");

        assert!(!store.exists());
        assert!(store.path().is_file());
        assert!(store.exists());
    }

    #[test]
    fn whitespace_only_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open(&dir, "links.dsv", InsertStrategy::TimeWise);
        fs::write(store.path(), "\n  \n\t").expect("write");
        assert!(store.is_empty().expect("empty check"));

        fs::write(store.path(), "\nx").expect("write");
        assert!(!store.is_empty().expect("empty check"));
    }

    #[test]
    fn written_links_read_back_field_for_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "links.dsv", InsertStrategy::TimeWise);
        let links: Vec<Link> = (1..=5).map(link).collect();

        store.insert(&links, InsertPosition::Back).expect("append");

        assert_eq!(collect(&mut store), links);
        assert_eq!(store.record_count().expect("count"), 5);
    }

    #[test]
    fn front_insert_places_block_before_existing_links() {
        for strategy in [InsertStrategy::TimeWise, InsertStrategy::MemoryWise] {
            let dir = tempfile::tempdir().expect("tempdir");
            let mut store = open(&dir, "links.dsv", strategy);
            store
                .insert(&[link(1), link(2)], InsertPosition::Front)
                .expect("first insert");
            store
                .insert(&[link(3), link(4)], InsertPosition::Front)
                .expect("second insert");

            assert_eq!(
                collect(&mut store),
                vec![link(3), link(4), link(1), link(2)],
                "strategy {strategy:?}"
            );
        }
    }

    #[test]
    fn memory_wise_insert_removes_its_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "links.dsv", InsertStrategy::MemoryWise);
        store.insert(&[link(1)], InsertPosition::Back).expect("append");
        store.insert(&[link(2)], InsertPosition::Front).expect("prepend");

        assert!(!store.backup_path().exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .collect();
        assert_eq!(leftovers, vec![OsString::from("links.dsv")]);
    }

    #[test]
    fn back_insert_appends_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "links.dsv", InsertStrategy::TimeWise);
        store.insert(&[link(1)], InsertPosition::Back).expect("append");
        store
            .insert(&[link(2), link(3)], InsertPosition::Back)
            .expect("append");
        assert_eq!(collect(&mut store), vec![link(1), link(2), link(3)]);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "links.dsv", InsertStrategy::TimeWise);
        let good = codec::encode(&link(1)).expect("encode");
        let content = format!(
            "{good}only{FIELD_DELIMITER}three{FIELD_DELIMITER}fields\n\n{}",
            codec::encode(&link(2)).expect("encode")
        );
        fs::write(store.path(), content).expect("write");

        assert_eq!(collect(&mut store), vec![link(1), link(2)]);
    }

    #[test]
    fn iteration_restarts_from_the_front() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "links.dsv", InsertStrategy::TimeWise);
        store
            .insert(&[link(1), link(2)], InsertPosition::Back)
            .expect("append");

        let first: Vec<Link> = store.iterate().expect("iterate").take(1).collect();
        let again: Vec<Link> = store.iterate().expect("iterate").collect();
        assert_eq!(first, vec![link(1)]);
        assert_eq!(again, vec![link(1), link(2)]);
    }

    #[test]
    fn out_of_date_reports_a_change_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "links.dsv", InsertStrategy::TimeWise);
        assert!(!store.out_of_date().expect("fresh store"));

        let mut external = OpenOptions::new()
            .append(true)
            .open(store.path())
            .expect("open for append");
        external
            .write_all(codec::encode(&link(9)).expect("encode").as_bytes())
            .expect("external write");
        drop(external);

        assert!(store.out_of_date().expect("changed"));
        assert!(!store.out_of_date().expect("already reported"));
    }

    #[test]
    fn own_inserts_are_reported_as_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "links.dsv", InsertStrategy::TimeWise);
        let _ = collect(&mut store);

        store.insert(&[link(1)], InsertPosition::Front).expect("insert");
        assert!(store.out_of_date().expect("changed"));
        assert_eq!(store.record_count().expect("count"), 1);
    }

    #[test]
    fn record_count_is_cached_until_reset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "links.dsv", InsertStrategy::TimeWise);
        store
            .insert(&[link(1), link(2)], InsertPosition::Back)
            .expect("append");
        assert_eq!(store.record_count().expect("count"), 2);

        let mut external = OpenOptions::new()
            .append(true)
            .open(store.path())
            .expect("open for append");
        external
            .write_all(codec::encode(&link(3)).expect("encode").as_bytes())
            .expect("external write");
        drop(external);

        assert_eq!(store.record_count().expect("cached"), 2);
        assert!(store.out_of_date().expect("changed"));
        assert_eq!(store.record_count().expect("recounted"), 3);
    }

    #[test]
    fn drop_front_keeps_the_remainder_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "staging.dsv", InsertStrategy::TimeWise);
        let links: Vec<Link> = (1..=5).map(link).collect();
        store.insert(&links, InsertPosition::Back).expect("append");

        assert_eq!(store.drop_front(2).expect("drop"), 2);
        assert_eq!(collect(&mut store), vec![link(3), link(4), link(5)]);

        assert_eq!(store.drop_front(10).expect("drop rest"), 3);
        assert!(store.is_empty().expect("empty"));
    }

    #[test]
    fn refused_links_leave_the_file_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "links.dsv", InsertStrategy::MemoryWise);
        store.insert(&[link(1)], InsertPosition::Back).expect("append");
        let before = read_raw(store.path()).expect("raw");

        let bad = Link::new("multi\nline", "d", "u", 0);
        let err = store
            .insert(&[link(2), bad], InsertPosition::Front)
            .expect_err("refused");
        assert!(matches!(err, StoreError::Record(_)));
        assert_eq!(read_raw(store.path()).expect("raw"), before);
    }

    #[test]
    fn reader_recreates_a_vanished_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "links.dsv", InsertStrategy::TimeWise);
        fs::remove_file(store.path()).expect("remove");

        assert!(collect(&mut store).is_empty());
        assert!(store.path().is_file());
    }

    #[test]
    fn failed_backup_copy_leaves_the_previous_content_for_recovery() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "links.dsv", InsertStrategy::MemoryWise);
        store
            .insert(&[link(1), link(2), link(3)], InsertPosition::Back)
            .expect("append");
        let before = read_raw(store.path()).expect("raw");

        FAIL_BACKUP_COPY.with(|fail| fail.set(true));
        let err = store
            .insert(&[link(9)], InsertPosition::Front)
            .expect_err("copy fails");
        FAIL_BACKUP_COPY.with(|fail| fail.set(false));

        let StoreError::Rewrite { backup, .. } = err else {
            panic!("expected a rewrite failure, got {err:?}");
        };
        assert_eq!(backup, store.backup_path());
        assert_eq!(read_raw(&backup).expect("backup"), before);
        assert_eq!(collect(&mut store), vec![link(9)]);

        // Nothing else may write until the backup is dealt with.
        assert!(matches!(
            store.insert(&[link(8)], InsertPosition::Front),
            Err(StoreError::BackupPresent { .. })
        ));
        assert!(matches!(
            store.insert(&[link(8)], InsertPosition::Back),
            Err(StoreError::BackupPresent { .. })
        ));
        assert!(matches!(
            store.drop_front(1),
            Err(StoreError::BackupPresent { .. })
        ));
        assert_eq!(read_raw(&backup).expect("backup"), before);

        fs::rename(&backup, store.path()).expect("operator restores the backup");
        store
            .insert(&[link(9)], InsertPosition::Front)
            .expect("insert after recovery");
        assert_eq!(
            collect(&mut store),
            vec![link(9), link(1), link(2), link(3)]
        );
        assert!(!backup.exists());
    }

    #[test]
    fn missing_live_file_is_not_recreated_over_a_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "links.dsv", InsertStrategy::MemoryWise);
        let backup = store.backup_path();
        let kept = codec::encode(&link(7)).expect("encode");
        fs::write(&backup, &kept).expect("write backup");
        fs::remove_file(store.path()).expect("remove live file");

        assert!(matches!(
            store.is_empty(),
            Err(StoreError::BackupPresent { .. })
        ));
        assert!(!store.exists());
        assert!(!store.path().exists());

        assert!(matches!(
            store.insert(&[link(1)], InsertPosition::Front),
            Err(StoreError::BackupPresent { .. })
        ));
        assert!(!store.path().exists());
        assert_eq!(read_raw(&backup).expect("backup"), kept);
    }

    #[test]
    fn reader_waits_out_a_rewrite_in_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(&dir, "links.dsv", InsertStrategy::TimeWise);
        store.insert(&[link(1)], InsertPosition::Back).expect("append");
        let replacement = codec::encode(&link(2)).expect("encode");

        let store = &store;
        thread::scope(|scope| {
            let guard = store.lock.acquire("rewrite");
            fs::remove_file(store.path()).expect("remove");

            let reader = scope.spawn(move || store.head(10));
            thread::sleep(Duration::from_millis(50));
            fs::write(store.path(), &replacement).expect("rewrite");
            drop(guard);

            let links = reader.join().expect("reader thread").expect("head");
            assert_eq!(links, vec![link(2)]);
        });
    }
}
