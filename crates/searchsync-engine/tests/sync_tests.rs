mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use common::*;
use searchsync_core::error::{Error, Result};
use searchsync_core::predicate::Predicate;
use searchsync_core::query::Query;
use searchsync_core::registry::Registry;
use searchsync_core::schema::{FieldAction, FieldSpec, IndexSchema};
use searchsync_core::traits::{ChangeLog, SearchBackend, WatermarkStore, WriteConnection};
use searchsync_core::types::{Document, DocumentId, RawResults, Record};
use searchsync_engine::{Engine, DEFAULT_CONSUMER};
use searchsync_store::SqliteStore;
use searchsync_text::TantivyIndex;

#[test]
fn incremental_updates_converge_with_a_rebuild() {
    let f = fixture();
    f.store.save(&book("1", "Dune", &["sf", "desert"])).unwrap();
    f.store.save(&book("2", "Emma", &["romance"])).unwrap();
    f.store.save(&user("7", "dune_fan", true)).unwrap();
    f.store.save(&user("8", "paul", false)).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();

    f.store.save(&book("1", "Dune Messiah", &["sf"])).unwrap();
    f.store.delete(&ty("book"), &key("2")).unwrap();
    f.store.save(&user("8", "paul", true)).unwrap();
    f.store.save(&user("7", "dune_fan", false)).unwrap();
    f.store.save(&book("3", "Ubik", &["sf", "Classic"])).unwrap();
    let outcome = f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    assert_eq!(outcome.watermark, f.store.head().unwrap());

    let incremental = contents(&f.engine, "catalog");
    assert_eq!(incremental.keys().collect::<Vec<_>>(), ["book:1", "book:3", "user:8"]);
    assert_eq!(incremental["book:3"]["tags"], ["sf", "classic"]);

    let report = f.engine.rebuild_all().unwrap();
    assert_eq!(report.documents(), 3);
    assert_eq!(contents(&f.engine, "catalog"), incremental);
}

#[test]
fn empty_keys_survive_a_rebuild() {
    let f = fixture();
    f.store.save(&book("", "Dune", &[])).unwrap();
    f.store.save(&book("1", "Emma", &[])).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    let incremental = contents(&f.engine, "catalog");
    assert_eq!(incremental.len(), 2);

    assert_eq!(f.engine.rebuild_all().unwrap().documents(), 2);
    assert_eq!(contents(&f.engine, "catalog"), incremental);
}

#[test]
fn replaying_from_an_old_watermark_changes_nothing() {
    let f = fixture();
    f.store.save(&book("1", "Dune", &["sf"])).unwrap();
    f.store.save(&book("1", "Dune Messiah", &["sf"])).unwrap();
    f.store.save(&user("7", "dune_fan", true)).unwrap();
    f.store.save(&book("2", "Emma", &[])).unwrap();
    f.store.delete(&ty("book"), &key("2")).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    let before = contents(&f.engine, "catalog");

    let replay = f.engine.apply_since(DEFAULT_CONSUMER, 0).unwrap();
    assert_eq!(replay.report.entries_read, 5);
    assert_eq!(replay.report.folded, 2);
    assert_eq!(contents(&f.engine, "catalog"), before);
    assert_eq!(f.store.load(DEFAULT_CONSUMER).unwrap(), 5, "apply_since leaves the stored watermark alone");
}

#[test]
fn leaving_the_predicate_removes_the_document() {
    let f = fixture();
    f.store.save(&user("7", "dune_fan", true)).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    assert_eq!(ids(&f.engine, "catalog", "dune"), ["user:7"]);

    f.store.save(&user("7", "dune_fan", false)).unwrap();
    let outcome = f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    assert_eq!(outcome.report.deleted, 1);
    assert!(ids(&f.engine, "catalog", "dune").is_empty());
}

#[test]
fn book_and_user_share_one_field() {
    let f = fixture();
    f.store.save(&book("1", "Dune", &[])).unwrap();
    f.store.save(&user("7", "dune_fan", true)).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    assert_eq!(ids(&f.engine, "catalog", "dune"), ["book:1", "user:7"]);

    f.store.delete(&ty("book"), &key("1")).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    assert_eq!(ids(&f.engine, "catalog", "dune"), ["user:7"]);
}

#[test]
fn each_value_of_a_lazy_field_is_matchable() {
    let f = fixture();
    f.store.save(&book("1", "Dune", &["SF", "desert", "spice"])).unwrap();
    f.store.save(&book("2", "Emma", &["romance"])).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    for tag in ["sf", "desert", "spice"] {
        assert_eq!(ids(&f.engine, "catalog", Query::term("tags", tag)), ["book:1"], "{tag}");
    }
}

#[test]
fn unregistered_types_are_skipped() {
    let f = fixture();
    f.store.save(&book("1", "Dune", &[])).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();

    f.store.save(&book("1", "Dune Messiah", &[])).unwrap();
    f.store.save(&Record::new(ty("poll"), "1", json!({"question": "dune?"}))).unwrap();
    f.store.delete(&ty("book"), &key("1")).unwrap();

    let outcome = f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    assert_eq!(outcome.report.entries_read, 3);
    assert_eq!(outcome.report.folded, 1);
    assert_eq!(outcome.report.skipped_unregistered, 1);
    assert_eq!(outcome.watermark, 4);
    assert!(ids(&f.engine, "catalog", Query::All).is_empty());
}

#[test]
fn updates_of_vanished_records_delete_the_document() {
    let tmp = TempDir::new().unwrap();
    let (registry, backend) = catalog_registry(&tmp.path().join("catalog"));
    let path = tmp.path().join("records.db");
    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let engine = Engine::builder(registry).store(Arc::clone(&store)).index(Arc::new(backend)).build().unwrap();
    store.save(&book("1", "Dune", &[])).unwrap();
    engine.apply_changes(DEFAULT_CONSUMER).unwrap();

    store.save(&book("1", "Dune Messiah", &[])).unwrap();
    // removed behind the log's back
    rusqlite::Connection::open(&path).unwrap().execute("DELETE FROM records WHERE record_type = 'book'", []).unwrap();

    let outcome = engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    assert_eq!(outcome.report.missing_records, 1);
    assert_eq!(outcome.report.deleted, 1);
    assert!(ids(&engine, "catalog", Query::All).is_empty());
}

#[test]
fn extraction_failures_do_not_stop_the_batch() {
    let f = fixture();
    f.store.save(&book("1", "Dune", &[])).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();

    f.store.save(&Record::new(ty("book"), "1", json!({"title": "Dune", "poison": true}))).unwrap();
    f.store.save(&book("2", "Emma", &[])).unwrap();
    let outcome = f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    assert_eq!(outcome.report.failures.len(), 1);
    assert_eq!(outcome.report.failures[0].document, "book:1");
    assert_eq!(outcome.report.failures[0].field, "name");
    assert_eq!(ids(&f.engine, "catalog", Query::All), ["book:2"], "the stale version is gone");
    assert_eq!(f.store.load(DEFAULT_CONSUMER).unwrap(), 3);
}

#[test]
fn small_batches_advance_the_watermark_step_by_step() {
    let f = fixture_with(|b| b.batch_size(2));
    for i in 0..5 {
        f.store.save(&book(&i.to_string(), "Dune", &[])).unwrap();
    }
    let outcome = f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    assert_eq!(outcome.report.batches, 3);
    assert_eq!(outcome.report.upserted, 5);
    assert_eq!(f.store.load(DEFAULT_CONSUMER).unwrap(), 5);
    assert_eq!(f.engine.apply_changes(DEFAULT_CONSUMER).unwrap().report.batches, 0);
}

/// Wraps a tantivy index; commits fail on demand and can be slowed down.
struct Flaky {
    inner: TantivyIndex,
    failing: Arc<AtomicBool>,
    commit_delay: Duration,
}

struct FlakyWriter {
    inner: Box<dyn WriteConnection>,
    failing: Arc<AtomicBool>,
    commit_delay: Duration,
}

impl SearchBackend for Flaky {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn writer(&self) -> Result<Box<dyn WriteConnection>> {
        Ok(Box::new(FlakyWriter {
            inner: self.inner.writer()?,
            failing: Arc::clone(&self.failing),
            commit_delay: self.commit_delay,
        }))
    }

    fn search(&self, query: &Query, offset: usize, limit: usize) -> Result<RawResults> {
        self.inner.search(query, offset, limit)
    }

    fn spell_correct(&self, text: &str) -> Result<Option<String>> {
        self.inner.spell_correct(text)
    }

    fn highlight(&self, query: &Query, field: &str, text: &str, max_chars: usize) -> Result<String> {
        self.inner.highlight(query, field, text, max_chars)
    }

    fn doc_count(&self) -> Result<u64> {
        self.inner.doc_count()
    }
}

impl WriteConnection for FlakyWriter {
    fn replace(&mut self, document: &Document) -> Result<()> {
        self.inner.replace(document)
    }

    fn delete(&mut self, id: &DocumentId) -> Result<()> {
        self.inner.delete(id)
    }

    fn clear(&mut self) -> Result<()> {
        self.inner.clear()
    }

    fn commit(self: Box<Self>) -> Result<()> {
        thread::sleep(self.commit_delay);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::backend("catalog", "disk full"));
        }
        self.inner.commit()
    }
}

#[test]
fn failed_commit_keeps_the_watermark_and_retry_applies() {
    let tmp = TempDir::new().unwrap();
    let (registry, backend) = catalog_registry(&tmp.path().join("catalog"));
    let failing = Arc::new(AtomicBool::new(true));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = Engine::builder(registry)
        .store(Arc::clone(&store))
        .index(Arc::new(Flaky { inner: backend, failing: Arc::clone(&failing), commit_delay: Duration::ZERO }))
        .build()
        .unwrap();

    store.save(&book("1", "Dune", &[])).unwrap();
    store.save(&user("7", "dune_fan", true)).unwrap();
    let err = engine.apply_changes(DEFAULT_CONSUMER).unwrap_err();
    assert!(matches!(err, Error::BackendUnavailable { .. }), "{err}");
    assert_eq!(store.load(DEFAULT_CONSUMER).unwrap(), 0);
    assert_eq!(engine.backend("catalog").unwrap().doc_count().unwrap(), 0);

    failing.store(false, Ordering::SeqCst);
    let outcome = engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    assert_eq!(outcome.watermark, 2);
    assert_eq!(ids(&engine, "catalog", "dune"), ["book:1", "user:7"]);
}

#[test]
fn concurrent_updates_on_one_engine_are_serialised() {
    let tmp = TempDir::new().unwrap();
    let (registry, backend) = catalog_registry(&tmp.path().join("catalog"));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let slow = Flaky { inner: backend, failing: Arc::new(AtomicBool::new(false)), commit_delay: Duration::from_millis(400) };
    let engine = Engine::builder(registry).store(Arc::clone(&store)).index(Arc::new(slow)).build().unwrap();
    store.save(&book("1", "Dune", &[])).unwrap();

    thread::scope(|s| {
        let first = s.spawn(|| engine.apply_changes(DEFAULT_CONSUMER));
        thread::sleep(Duration::from_millis(100));

        let second = engine.apply_changes(DEFAULT_CONSUMER);
        assert!(matches!(second, Err(Error::UpdateInProgress(_))), "{:?}", second.err());
        assert!(
            !store.try_lock(DEFAULT_CONSUMER, "other-process", Duration::from_secs(600)).unwrap(),
            "the refused run must not release the running one's lease"
        );
        assert_eq!(first.join().unwrap().unwrap().watermark, 1);
    });
    assert!(store.try_lock(DEFAULT_CONSUMER, "other-process", Duration::from_secs(600)).unwrap());
}

#[test]
fn a_held_lease_blocks_other_updaters() {
    let f = fixture();
    f.store.save(&book("1", "Dune", &[])).unwrap();
    assert!(f.store.try_lock(DEFAULT_CONSUMER, "someone-else", Duration::from_secs(600)).unwrap());
    assert!(matches!(f.engine.apply_changes(DEFAULT_CONSUMER), Err(Error::UpdateInProgress(_))));
    assert!(matches!(f.engine.rebuild_all(), Err(Error::UpdateInProgress(_))));
    assert_eq!(f.store.load(DEFAULT_CONSUMER).unwrap(), 0);

    f.store.unlock(DEFAULT_CONSUMER, "someone-else").unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    assert!(f.store.try_lock(DEFAULT_CONSUMER, "someone-else", Duration::from_secs(600)).unwrap(), "released after use");
}

#[test]
fn a_stale_lease_is_taken_over() {
    let f = fixture_with(|b| b.lease(Duration::ZERO));
    f.store.save(&book("1", "Dune", &[])).unwrap();
    assert!(f.store.try_lock(DEFAULT_CONSUMER, "crashed", Duration::from_secs(600)).unwrap());
    thread::sleep(Duration::from_millis(5));
    assert_eq!(f.engine.apply_changes(DEFAULT_CONSUMER).unwrap().watermark, 1);
}

#[test]
fn compaction_keeps_unapplied_entries() {
    let f = fixture();
    assert_eq!(f.engine.compact_log().unwrap(), 0);
    f.store.save(&book("1", "Dune", &[])).unwrap();
    f.store.save(&book("2", "Emma", &[])).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    f.store.save(&book("3", "Ubik", &[])).unwrap();

    assert_eq!(f.engine.compact_log().unwrap(), 2);
    assert_eq!(f.store.head().unwrap(), 3);
    assert_eq!(f.store.count_after(0).unwrap(), 1);

    let status = f.engine.status().unwrap();
    assert_eq!(status.head, 3);
    assert_eq!(status.consumers[0].watermark, 2);
    assert_eq!(status.consumers[0].pending, 1);
    assert_eq!(status.indexes, [("catalog".to_string(), 2)]);
}

fn named_schema(name: &str, location: &std::path::Path, record_type: &str, path: &'static str) -> IndexSchema {
    IndexSchema::builder(name, location.join(name))
        .field(
            FieldSpec::new("name")
                .actions([FieldAction::Freetext, FieldAction::Store])
                .extract_for(ty(record_type), move |r| Ok(r.text(path))),
        )
        .build()
        .unwrap()
}

/// `shared` owns catalog and people, `solo` owns archive.
fn three_index_engine(tmp: &TempDir) -> (Arc<SqliteStore>, Engine) {
    let mut registry = Registry::new();
    let mut builder_backends = Vec::new();
    for (name, record_type, path) in [("catalog", "book", "title"), ("people", "user", "username"), ("archive", "book", "title")] {
        let schema = named_schema(name, tmp.path(), record_type, path);
        builder_backends.push(Arc::new(TantivyIndex::open_in_ram(&schema).unwrap()));
        registry.add_schema(schema).unwrap();
        registry.register(ty(record_type), name, Predicate::All).unwrap();
    }
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let mut builder = Engine::builder(registry)
        .store(Arc::clone(&store))
        .consumer("shared", ["catalog", "people"])
        .consumer("solo", ["archive"]);
    for backend in builder_backends {
        builder = builder.index(backend);
    }
    (store, builder.build().unwrap())
}

#[test]
fn rebuild_moves_only_fully_rebuilt_shared_watermarks() {
    let tmp = TempDir::new().unwrap();
    let (store, engine) = three_index_engine(&tmp);
    store.save(&book("1", "Dune", &[])).unwrap();
    store.save(&user("7", "paul", true)).unwrap();

    let report = engine.rebuild(&["archive"]).unwrap();
    assert_eq!(report.snapshot, 2);
    assert_eq!(store.load("solo").unwrap(), 0, "unshared watermark is left alone");

    engine.rebuild(&["catalog"]).unwrap();
    assert_eq!(store.load("shared").unwrap(), 0, "partial rebuild of a shared consumer");

    let report = engine.rebuild(&["catalog", "people"]).unwrap();
    assert_eq!(report.indexes.len(), 2);
    assert_eq!(report.indexes[1].per_type[&ty("user")], 1);
    assert_eq!(store.load("shared").unwrap(), 2);

    store.save(&user("8", "chani", true)).unwrap();
    let outcome = engine.apply_changes("shared").unwrap();
    assert_eq!(outcome.report.entries_read, 1, "only changes after the snapshot are replayed");
    assert_eq!(ids(&engine, "people", Query::All), ["user:7", "user:8"]);

    let outcome = engine.apply_changes("solo").unwrap();
    assert_eq!(outcome.report.entries_read, 3);
    assert_eq!(ids(&engine, "archive", Query::All), ["book:1"]);
    assert_eq!(engine.compact_log().unwrap(), 3);
}

#[test]
fn rebuild_rejects_unknown_indexes() {
    let f = fixture();
    assert!(matches!(f.engine.rebuild(&["nope"]), Err(Error::NotFound(_))));
}

#[test]
fn builder_checks_backends_and_consumers() {
    let tmp = TempDir::new().unwrap();
    let (registry, _) = catalog_registry(tmp.path());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let err = Engine::builder(registry).store(Arc::clone(&store)).build().err().unwrap();
    assert!(matches!(err, Error::InvalidConfig(_)), "{err}");

    let (registry, backend) = catalog_registry(tmp.path());
    let err = Engine::builder(registry)
        .store(store)
        .index(Arc::new(backend))
        .consumer("a", ["catalog"])
        .consumer("b", ["catalog"])
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
}
