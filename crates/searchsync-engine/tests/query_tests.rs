mod common;

use serde_json::json;
use tempfile::TempDir;

use common::*;
use searchsync_core::config::Config;
use searchsync_core::error::Error;
use searchsync_core::query::Query;
use searchsync_core::types::{DocumentId, Record, UnresolvedPolicy};
use searchsync_engine::bootstrap::{open_engine, open_engine_with, OnMismatch};
use searchsync_engine::DEFAULT_CONSUMER;

fn seed_books(f: &Fixture, n: usize) {
    for i in 0..n {
        let title = format!("dune {}", "dune ".repeat(i));
        f.store.save(&book(&i.to_string(), title.trim(), &[])).unwrap();
    }
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
}

#[test]
fn page_two_of_five_is_the_second_half_of_page_one_of_ten() {
    let f = fixture();
    seed_books(&f, 12);
    let index = f.engine.index("catalog").unwrap();

    let big = index.search("dune", 1, 10, None).unwrap();
    let small = index.search("dune", 2, 5, None).unwrap();
    assert_eq!(big.total(), 12);
    assert_eq!(small.offset(), 5);
    assert_eq!(small.num_per_page(), 5);
    assert_eq!(small.num_pages(), 3);
    let expected: Vec<&DocumentId> = big.hits()[5..10].iter().map(|h| &h.id).collect();
    let got: Vec<&DocumentId> = small.hits().iter().map(|h| &h.id).collect();
    assert_eq!(got, expected);
}

#[test]
fn pages_past_the_end_fall_back_to_the_last_page() {
    let f = fixture();
    seed_books(&f, 12);
    let index = f.engine.index("catalog").unwrap();

    let results = index.search("dune", 9, 5, None).unwrap();
    assert_eq!(results.page(), 3);
    assert_eq!(results.len(), 2);
    assert_eq!(results.offset(), 10);

    let huge = index.search("dune", usize::MAX, 10, None).unwrap();
    assert_eq!((huge.page(), huge.offset(), huge.len()), (2, 10, 2));

    let none = index.search("zzz", 4, 5, None).unwrap();
    assert_eq!(none.page(), 4, "nothing to fall back to");
    assert!(none.is_empty());

    let nothing_huge = index.search("zzz", usize::MAX, usize::MAX, None).unwrap();
    assert!(nothing_huge.is_empty());
    assert_eq!(nothing_huge.opensearch(false).start_index, usize::MAX);

    let clamped = index.search("dune", 0, 0, None).unwrap();
    assert_eq!((clamped.page(), clamped.num_per_page(), clamped.len()), (1, 1, 1));
}

#[test]
fn results_resolve_to_records_in_rank_order() {
    let f = fixture();
    f.store.save(&book("1", "Dune", &["sf"])).unwrap();
    f.store.save(&user("7", "dune_fan", true)).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    let index = f.engine.index("catalog").unwrap();

    let results = index.search("dune", 1, 10, None).unwrap();
    let resolved = results.results().unwrap();
    assert_eq!(resolved.len(), 2);
    for (result, hit) in resolved.iter().zip(results.hits()) {
        assert_eq!(result.id(), &hit.id);
        assert_eq!(result.record().unwrap().document_id(), hit.id);
    }
    let book = resolved.iter().find(|r| r.record_type() == &ty("book")).unwrap();
    assert_eq!(book.first("name"), Some("Dune"));
    assert_eq!(book.stored("tags"), ["sf"]);
    assert!(book.stored("missing").is_empty());
}

#[test]
fn unresolved_hits_follow_the_policy() {
    let f = fixture();
    f.store.save(&book("1", "Dune", &[])).unwrap();
    f.store.save(&book("2", "Dune Messiah", &[])).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    // deleted from the store, not yet from the index
    f.store.delete(&ty("book"), &key("1")).unwrap();

    let skip = f.engine.index("catalog").unwrap();
    let results = skip.search("dune", 1, 10, None).unwrap();
    assert_eq!(results.len(), 2);
    let resolved = results.results().unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].key().as_str(), "2");

    let surface = f.engine.index("catalog").unwrap().with_unresolved(UnresolvedPolicy::Surface);
    let results = surface.search("dune", 1, 10, None).unwrap();
    let resolved = results.results().unwrap();
    assert_eq!(resolved.len(), 2);
    let orphan = resolved.iter().find(|r| !r.is_resolved()).unwrap();
    assert_eq!(orphan.key().as_str(), "1");
    assert_eq!(orphan.first("name"), Some("Dune"));
}

#[test]
fn misspelt_queries_get_a_suggestion() {
    let f = fixture();
    f.store.save(&book("1", "Dune by Frank Herbert", &[])).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    let index = f.engine.index("catalog").unwrap();

    let results = index.search("dume by herbert", 1, 10, None).unwrap();
    assert_eq!(results.spell_suggestion(), Some("dune by herbert"));
    assert_eq!(results.spell_suggestion_html().as_deref(), Some("<strong><em>dune</em></strong> by herbert"));

    let spelled = index.search("dune", 1, 10, None).unwrap();
    assert_eq!(spelled.spell_suggestion(), None);

    let mut structured = index.search(Query::term("name", "dune"), 1, 10, None).unwrap();
    assert_eq!(structured.spell_suggestion(), None);
    assert_eq!(structured.suggest_spelling("herbret").unwrap(), Some("herbert"));
    assert_eq!(structured.query_string(), Some("herbret"));
}

#[test]
fn highlights_and_summaries_mark_query_terms() {
    let f = fixture();
    let blurb = "Set on the desert planet Arrakis, Dune is the story of Paul Atreides. ".repeat(3)
        + "The spice melange is the most valuable substance in the universe.";
    f.store
        .save(&Record::new(ty("book"), "1", json!({"title": "Dune", "blurb": blurb})))
        .unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    let index = f.engine.index("catalog").unwrap();

    let results = index.search("spice", 1, 10, None).unwrap();
    let resolved = results.results().unwrap();
    let hit = &resolved[0];
    assert!(hit.highlighted("blurb").unwrap()[0].contains("<b>spice</b>"));
    let summary = hit.summarised("blurb").unwrap();
    assert!(summary.contains("<b>spice</b>"), "{summary}");
    assert!(summary.replace("<b>", "").replace("</b>", "").chars().count() <= 180);
    assert_eq!(hit.summarised("tags").unwrap(), "");
}

#[test]
fn type_filters_and_counts() {
    let f = fixture();
    f.store.save(&book("1", "Dune", &[])).unwrap();
    f.store.save(&book("2", "Dune Messiah", &[])).unwrap();
    f.store.save(&user("7", "dune_fan", true)).unwrap();
    f.engine.apply_changes(DEFAULT_CONSUMER).unwrap();
    let index = f.engine.index("catalog").unwrap();

    let users = index.search(Query::parse("dune").filter(Query::RecordType(ty("user"))), 1, 10, Some("dune")).unwrap();
    assert_eq!(users.total(), 1);
    assert_eq!(users.query_string(), Some("dune"));

    let all = index.search("dune", 1, 10, None).unwrap();
    assert_eq!(all.type_counts().unwrap(), [(ty("book"), 2), (ty("user"), 1)]);
}

#[test]
fn opensearch_metadata_describes_the_page() {
    let f = fixture();
    seed_books(&f, 12);
    let index = f.engine.index("catalog").unwrap();

    let results = index.search("dume", 2, 5, None).unwrap();
    assert_eq!(results.total(), 0);
    let results = index.search("dune", 2, 5, None).unwrap();
    let meta = results.opensearch(true);
    assert_eq!((meta.total_results, meta.start_index, meta.items_per_page), (12, 6, 5));
    assert_eq!(meta.request.search_terms, "dune");
    assert!(meta.correction.is_none());

    let misspelt = index.search("dume", 1, 5, None).unwrap();
    assert_eq!(misspelt.opensearch(true).correction.unwrap().search_terms, "dune");
    assert!(misspelt.opensearch(false).correction.is_none());
    let json = serde_json::to_value(misspelt.opensearch(true)).unwrap();
    assert_eq!(json["startIndex"], 1);
    assert_eq!(json["correction"]["searchTerms"], "dune");
}

#[test]
fn direct_writes_honour_registrations() {
    let f = fixture();
    let index = f.engine.index("catalog").unwrap();
    index.add(&book("1", "Dune", &[])).unwrap();
    index.update(&user("7", "dune_fan", false)).unwrap();
    index.flush().unwrap();
    assert_eq!(index.doc_count().unwrap(), 1);

    let poll = Record::new(ty("poll"), "1", json!({"question": "dune?"}));
    assert!(matches!(index.add(&poll), Err(Error::SchemaViolation(_))));

    let poisoned = Record::new(ty("book"), "1", json!({"title": "Dune", "poison": true}));
    assert!(matches!(index.add(&poisoned), Err(Error::Extraction(_))));
    index.flush().unwrap();
    assert_eq!(index.doc_count().unwrap(), 0, "the failed record's old document is removed");

    index.add(&book("2", "Emma", &[])).unwrap();
    index.delete_key(&ty("book"), &key("2")).unwrap();
    index.flush().unwrap();
    index.flush().unwrap();
    assert_eq!(index.doc_count().unwrap(), 0);
}

const SETTINGS: &str = r#"
[store]
path = "data/records.db"

[[indexes]]
name = "catalog"
location = "index/catalog"

[[indexes.fields]]
name = "name"
actions = ["freetext", "spell", "store"]
extract = { book = "title", user = "username" }

[[indexes.registrations]]
record_type = "book"

[[indexes.registrations]]
record_type = "user"
filter = { active = true }
"#;

#[test]
fn engines_open_from_settings() {
    let tmp = TempDir::new().unwrap();
    let settings = Config::from_toml(SETTINGS, tmp.path()).settings().unwrap();
    {
        let opened = open_engine(&settings).unwrap();
        opened.store.save(&book("1", "Dune", &[])).unwrap();
        opened.store.save(&user("7", "dune_fan", false)).unwrap();
        opened.store.save(&Record::new(ty("poll"), "1", json!({}))).unwrap();
        let outcomes = opened.engine.apply_all().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1.watermark, 2, "untracked types never reach the log");
        let index = opened.engine.index("catalog").unwrap();
        assert_eq!(index.search("dune", 1, 10, None).unwrap().total(), 1);
    }
    assert!(tmp.path().join("data/records.db").exists());

    let changed = SETTINGS.replace("name = \"name\"", "name = \"label\"");
    let settings = Config::from_toml(&changed, tmp.path()).settings().unwrap();
    assert!(matches!(open_engine(&settings).err(), Some(Error::SchemaViolation(_))));
    let reopened = open_engine_with(&settings, OnMismatch::Recreate).unwrap();
    assert_eq!(reopened.engine.status().unwrap().indexes, [("catalog".to_string(), 0)]);
    assert_eq!(reopened.engine.rebuild_all().unwrap().documents(), 1);
}
