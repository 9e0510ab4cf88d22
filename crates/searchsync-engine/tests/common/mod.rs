#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use searchsync_core::predicate::Predicate;
use searchsync_core::query::Query;
use searchsync_core::registry::Registry;
use searchsync_core::schema::{FieldAction, FieldSpec, IndexSchema};
use searchsync_core::types::{FieldValue, FieldValues, Record, RecordKey, RecordType};
use searchsync_engine::{Engine, EngineBuilder};
use searchsync_store::SqliteStore;
use searchsync_text::TantivyIndex;

pub fn ty(name: &str) -> RecordType {
    RecordType::new(name).unwrap()
}

pub fn key(key: &str) -> RecordKey {
    RecordKey::new(key)
}

pub fn book(key: &str, title: &str, tags: &[&str]) -> Record {
    Record::new(ty("book"), key, json!({ "title": title, "tags": tags }))
}

pub fn user(key: &str, username: &str, active: bool) -> Record {
    Record::new(ty("user"), key, json!({ "username": username, "active": active }))
}

/// Books and users share the `name` field; only books carry tags and a blurb.
pub fn catalog_schema(location: &Path) -> IndexSchema {
    IndexSchema::builder("catalog", location)
        .field(
            FieldSpec::new("name")
                .actions([FieldAction::Freetext, FieldAction::Spell, FieldAction::Store])
                .extract_for(ty("book"), |r| {
                    if r.get("poison").as_bool() == Some(true) {
                        anyhow::bail!("cannot read title");
                    }
                    Ok(r.text("title"))
                })
                .extract_for(ty("user"), |r| Ok(r.text("username"))),
        )
        .field(
            FieldSpec::new("tags").actions([FieldAction::Tag, FieldAction::Store]).extract_for(ty("book"), |r| {
                let tags: Vec<FieldValue> = r
                    .get("tags")
                    .as_array()
                    .map(|items| items.iter().filter_map(FieldValue::from_json).collect())
                    .unwrap_or_default();
                Ok(FieldValues::lazy(tags))
            }),
        )
        .field(
            FieldSpec::new("blurb")
                .actions([FieldAction::Freetext, FieldAction::Store])
                .extract_for(ty("book"), |r| Ok(r.text("blurb"))),
        )
        .build()
        .unwrap()
}

pub fn catalog_registry(location: &Path) -> (Registry, TantivyIndex) {
    let schema = catalog_schema(location);
    let backend = TantivyIndex::open_in_ram(&schema).unwrap();
    let mut registry = Registry::new();
    registry.add_schema(schema).unwrap();
    registry.register(ty("book"), "catalog", Predicate::All).unwrap();
    registry.register(ty("user"), "catalog", Predicate::equals("active", true)).unwrap();
    (registry, backend)
}

pub struct Fixture {
    pub tmp: TempDir,
    pub store: Arc<SqliteStore>,
    pub engine: Engine,
}

pub fn fixture() -> Fixture {
    fixture_with(|builder| builder)
}

pub fn fixture_with(customize: impl FnOnce(EngineBuilder) -> EngineBuilder) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let (registry, backend) = catalog_registry(&tmp.path().join("catalog"));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let builder = Engine::builder(registry).store(Arc::clone(&store)).index(Arc::new(backend));
    let engine = customize(builder).build().unwrap();
    Fixture { tmp, store, engine }
}

/// Sorted document ids matching `query` in `index`.
pub fn ids(engine: &Engine, index: &str, query: impl Into<Query>) -> Vec<String> {
    let raw = engine.backend(index).unwrap().search(&query.into(), 0, 10_000).unwrap();
    let mut ids: Vec<String> = raw.hits.into_iter().map(|h| h.id.to_string()).collect();
    ids.sort();
    ids
}

/// Every document of `index` with its stored values, keyed by id.
pub fn contents(engine: &Engine, index: &str) -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
    let raw = engine.backend(index).unwrap().search(&Query::All, 0, 10_000).unwrap();
    raw.hits.into_iter().map(|h| (h.id.to_string(), h.stored)).collect()
}
