//! Open the store, the indexes and the engine described by `Settings`.

use std::sync::Arc;
use std::time::Duration;

use searchsync_core::config::Settings;
use searchsync_core::error::{Error, Result};
use searchsync_core::schema::IndexSchema;
use searchsync_store::SqliteStore;
use searchsync_text::TantivyIndex;

use crate::engine::Engine;

/// What to do with an index whose on-disk layout no longer matches its schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMismatch {
    Fail,
    /// Wipe and recreate it; only sensible right before a full rebuild.
    Recreate,
}

pub struct Opened {
    pub engine: Engine,
    pub store: Arc<SqliteStore>,
}

pub fn open_engine(settings: &Settings) -> Result<Opened> {
    open_engine_with(settings, OnMismatch::Fail)
}

pub fn open_engine_with(settings: &Settings, on_mismatch: OnMismatch) -> Result<Opened> {
    let registry = settings.registry()?;
    let path = settings.store_path();
    let store = if path.as_os_str() == ":memory:" { SqliteStore::open_in_memory()? } else { SqliteStore::open(&path)? };
    let store = Arc::new(store.track_only(registry.record_types()));

    let mut backends = Vec::new();
    for schema in registry.schemas() {
        backends.push(Arc::new(open_index(schema, on_mismatch)?));
    }
    let mut builder = Engine::builder(registry);
    for backend in backends {
        builder = builder.index(backend);
    }
    for consumer in settings.consumer_groups()? {
        builder = builder.consumer(consumer.name, consumer.indexes);
    }
    let engine = builder
        .store(Arc::clone(&store))
        .batch_size(settings.sync.batch_size)
        .lease(Duration::from_secs(settings.sync.lease_secs))
        .unresolved(settings.sync.unresolved)
        .build()?;
    tracing::info!(store = %path.display(), indexes = engine.registry().schema_names().len(), "engine opened");
    Ok(Opened { engine, store })
}

fn open_index(schema: &IndexSchema, on_mismatch: OnMismatch) -> Result<TantivyIndex> {
    match TantivyIndex::open(schema) {
        Err(Error::SchemaViolation(reason)) if on_mismatch == OnMismatch::Recreate => {
            tracing::warn!(index = schema.name(), %reason, "index layout changed, recreating");
            TantivyIndex::create(schema)
        }
        other => other,
    }
}
