use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;

use linkroll::application::handler::RequestHandler;
use linkroll::application::publishing::{Staging, StoreAggregator};
use linkroll::application::repos::LinkSource;
use linkroll::config::Settings;
use linkroll::domain::link::Link;
use linkroll::infra::flatfile::{FlatStore, InsertPosition, InsertStrategy, read_raw};

fn settings(dir: &tempfile::TempDir, memory_wise: bool) -> Settings {
    let mut settings = Settings::defaults().expect("defaults");
    settings.html.link_per_page = NonZeroUsize::new(3).expect("non zero");
    settings.database.filepath = dir.path().join("links.dsv");
    settings.database.memory_wise = memory_wise;
    settings.database.seed_when_empty = false;
    settings.autopublish.active = true;
    settings.autopublish.every = "week".to_string();
    settings.autopublish.link_per_publication = NonZeroUsize::new(2).expect("non zero");
    settings.autopublish.filepath = dir.path().join("staging.dsv");
    settings
}

fn entry(n: u32) -> Link {
    Link::from_entry(&format!("entry {n}\nhttps://example.org/{n}\nnotes {n}"), 0)
        .expect("valid entry")
}

fn titles(store: &mut impl LinkSource) -> Vec<String> {
    store
        .iterate()
        .expect("iterate")
        .map(|link| link.title)
        .collect()
}

#[test]
fn scheduled_batches_land_newest_first_with_either_strategy() {
    for memory_wise in [false, true] {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings(&dir, memory_wise);
        let mut staging =
            FlatStore::open(settings.autopublish.filepath.clone(), InsertStrategy::TimeWise)
                .expect("staging");
        staging
            .insert(&(1..=5).map(entry).collect::<Vec<_>>(), InsertPosition::Back)
            .expect("stage");

        let handler = RequestHandler::from_settings(&settings).expect("handler");
        let page = handler.handle("/").expect("page");
        assert!(page.contains("entry 2") && page.contains("entry 1"));
        assert!(!page.contains("entry 3"));

        let mut target =
            FlatStore::open(settings.database.filepath.clone(), InsertStrategy::TimeWise)
                .expect("target");
        assert_eq!(titles(&mut target), ["entry 2", "entry 1"]);
        assert_eq!(titles(&mut staging), ["entry 3", "entry 4", "entry 5"]);

        let backup = dir.path().join("links.dsv.bak");
        assert!(!backup.exists(), "backup left behind (memory_wise={memory_wise})");
    }
}

#[test]
fn aggregator_reads_only_the_published_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = FlatStore::open(dir.path().join("links.dsv"), InsertStrategy::MemoryWise)
        .expect("target");
    let source = FlatStore::open(dir.path().join("staging.dsv"), InsertStrategy::MemoryWise)
        .expect("source");
    let mut db = StoreAggregator::new(
        target,
        Some(Staging::new(
            source,
            "60",
            NonZeroUsize::new(1).expect("non zero"),
        )),
    );

    db.publish_later(&[entry(1), entry(2)]).expect("stage");
    db.publish(vec![entry(3)]).expect("publish");

    assert_eq!(titles(&mut db), ["entry 3"]);
    assert_eq!(db.record_count().expect("count"), 1);
    assert!(!db.move_if_due().expect("just published"));
    assert_eq!(db.move_entries(5).expect("move"), 2);
    assert_eq!(titles(&mut db), ["entry 2", "entry 1", "entry 3"]);
}

#[test]
fn concurrent_pushes_keep_every_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let handler = Arc::new(RequestHandler::from_settings(&settings(&dir, true)).expect("handler"));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                for _ in 0..5 {
                    handler.handle("/push").expect("push");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker finished");
    }

    let raw = read_raw(&dir.path().join("links.dsv")).expect("raw contents");
    assert_eq!(raw.lines().count(), 20);
    assert_eq!(handler.handle("/print").expect("print").split("\n<hr>\n").count(), 20);
}
