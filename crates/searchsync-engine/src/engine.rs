use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use searchsync_core::error::{Error, Result};
use searchsync_core::registry::Registry;
use searchsync_core::traits::{ChangeLog, RecordStore, SearchBackend, WatermarkStore, WriteConnection};
use searchsync_core::types::{Sequence, UnresolvedPolicy};

use crate::index::SearchIndex;

pub const DEFAULT_CONSUMER: &str = "default";

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Log entries read per batch; each batch ends with one commit per touched index.
    pub batch_size: usize,
    /// How long a lease stays valid without being released.
    pub lease: Duration,
    pub unresolved: UnresolvedPolicy,
    /// Identifies this engine in lease rows; each acquisition appends its own counter.
    pub holder: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            lease: Duration::from_secs(600),
            unresolved: UnresolvedPolicy::Skip,
            holder: format!("{}-{}", std::process::id(), Utc::now().timestamp_nanos_opt().unwrap_or_default()),
        }
    }
}

/// A named group of indexes sharing one watermark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer {
    pub name: String,
    pub indexes: Vec<String>,
}

impl Consumer {
    pub fn covers(&self, index: &str) -> bool {
        self.indexes.iter().any(|i| i == index)
    }

    /// A consumer with a single index owns its watermark outright.
    pub fn is_shared(&self) -> bool {
        self.indexes.len() > 1
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerStatus {
    pub name: String,
    pub watermark: Sequence,
    pub pending: u64,
}

#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub head: Sequence,
    pub consumers: Vec<ConsumerStatus>,
    pub indexes: Vec<(String, u64)>,
}

/// Wires the registry, the stores and one backend per index together.
pub struct Engine {
    pub(crate) registry: Arc<Registry>,
    pub(crate) indexes: BTreeMap<String, Arc<dyn SearchBackend>>,
    pub(crate) records: Arc<dyn RecordStore>,
    pub(crate) log: Arc<dyn ChangeLog>,
    pub(crate) watermarks: Arc<dyn WatermarkStore>,
    pub(crate) consumers: Vec<Consumer>,
    pub(crate) options: EngineOptions,
    pub(crate) acquisitions: AtomicU64,
}

impl Engine {
    pub fn builder(registry: Registry) -> EngineBuilder {
        EngineBuilder {
            registry,
            indexes: BTreeMap::new(),
            records: None,
            log: None,
            watermarks: None,
            consumers: Vec::new(),
            options: EngineOptions::default(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn consumers(&self) -> &[Consumer] {
        &self.consumers
    }

    pub fn consumer(&self, name: &str) -> Result<&Consumer> {
        self.consumers
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::NotFound(format!("consumer '{name}'")))
    }

    pub fn consumer_of(&self, index: &str) -> Option<&Consumer> {
        self.consumers.iter().find(|c| c.covers(index))
    }

    pub fn backend(&self, index: &str) -> Result<&Arc<dyn SearchBackend>> {
        self.indexes.get(index).ok_or_else(|| Error::NotFound(format!("index '{index}'")))
    }

    /// Runtime handle for querying and direct writes to one index.
    pub fn index(&self, name: &str) -> Result<SearchIndex> {
        let schema = self
            .registry
            .schema(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("index '{name}'")))?;
        let registrations = self.registry.registrations_for_schema(name).into_iter().cloned().collect();
        Ok(SearchIndex::new(schema, Arc::clone(self.backend(name)?), registrations, Arc::clone(&self.records))
            .with_unresolved(self.options.unresolved))
    }

    pub fn status(&self) -> Result<EngineStatus> {
        let head = self.log.head()?;
        let mut consumers = Vec::with_capacity(self.consumers.len());
        for consumer in &self.consumers {
            let watermark = self.watermarks.load(&consumer.name)?;
            consumers.push(ConsumerStatus {
                name: consumer.name.clone(),
                watermark,
                pending: self.log.count_after(watermark)?,
            });
        }
        let mut indexes = Vec::with_capacity(self.indexes.len());
        for (name, backend) in &self.indexes {
            indexes.push((name.clone(), backend.doc_count()?));
        }
        Ok(EngineStatus { head, consumers, indexes })
    }

    /// Drop log entries every consumer has already applied.
    pub fn compact_log(&self) -> Result<usize> {
        let mut floor = Sequence::MAX;
        for consumer in &self.consumers {
            floor = floor.min(self.watermarks.load(&consumer.name)?);
        }
        if floor == 0 || floor == Sequence::MAX {
            return Ok(0);
        }
        self.log.prune_through(floor)
    }

    /// Leases are not re-entrant: two runs on one engine get distinct holder tokens.
    pub(crate) fn lease(&self, consumer: &str) -> Result<Lease<'_>> {
        let n = self.acquisitions.fetch_add(1, Ordering::Relaxed);
        let holder = format!("{}#{n}", self.options.holder);
        if !self.watermarks.try_lock(consumer, &holder, self.options.lease)? {
            return Err(Error::UpdateInProgress(consumer.to_string()));
        }
        Ok(Lease { store: self.watermarks.as_ref(), consumer: consumer.to_string(), holder })
    }

    /// Open (once) the writer of `index` inside a batch.
    pub(crate) fn writer_for<'w>(
        &self,
        writers: &'w mut BTreeMap<String, Box<dyn WriteConnection>>,
        index: &str,
    ) -> Result<&'w mut Box<dyn WriteConnection>> {
        if !writers.contains_key(index) {
            let writer = self.backend(index)?.writer()?;
            writers.insert(index.to_string(), writer);
        }
        writers.get_mut(index).ok_or_else(|| Error::NotFound(format!("index '{index}'")))
    }
}

/// Held while a consumer's watermark may move; released on drop.
pub(crate) struct Lease<'a> {
    store: &'a dyn WatermarkStore,
    consumer: String,
    holder: String,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.unlock(&self.consumer, &self.holder) {
            tracing::warn!(consumer = %self.consumer, error = %e, "failed to release lease");
        }
    }
}

pub struct EngineBuilder {
    registry: Registry,
    indexes: BTreeMap<String, Arc<dyn SearchBackend>>,
    records: Option<Arc<dyn RecordStore>>,
    log: Option<Arc<dyn ChangeLog>>,
    watermarks: Option<Arc<dyn WatermarkStore>>,
    consumers: Vec<Consumer>,
    options: EngineOptions,
}

impl EngineBuilder {
    /// Use one store for records, change log and watermarks.
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: RecordStore + ChangeLog + WatermarkStore + 'static,
    {
        self.records = Some(Arc::clone(&store) as Arc<dyn RecordStore>);
        self.log = Some(Arc::clone(&store) as Arc<dyn ChangeLog>);
        self.watermarks = Some(store as Arc<dyn WatermarkStore>);
        self
    }

    pub fn records(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn log(mut self, log: Arc<dyn ChangeLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn watermarks(mut self, watermarks: Arc<dyn WatermarkStore>) -> Self {
        self.watermarks = Some(watermarks);
        self
    }

    pub fn index(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.indexes.insert(backend.name().to_string(), backend);
        self
    }

    pub fn consumer(mut self, name: impl Into<String>, indexes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.consumers.push(Consumer { name: name.into(), indexes: indexes.into_iter().map(Into::into).collect() });
        self
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.options.batch_size = batch_size;
        self
    }

    pub fn lease(mut self, lease: Duration) -> Self {
        self.options.lease = lease;
        self
    }

    pub fn unresolved(mut self, policy: UnresolvedPolicy) -> Self {
        self.options.unresolved = policy;
        self
    }

    pub fn build(mut self) -> Result<Engine> {
        let missing = |what: &str| Error::InvalidConfig(format!("engine has no {what}"));
        let records = self.records.ok_or_else(|| missing("record store"))?;
        let log = self.log.ok_or_else(|| missing("change log"))?;
        let watermarks = self.watermarks.ok_or_else(|| missing("watermark store"))?;

        let schemas: BTreeSet<String> = self.registry.schema_names().into_iter().collect();
        for name in &schemas {
            if !self.indexes.contains_key(name) {
                return Err(Error::InvalidConfig(format!("index '{name}' has no backend")));
            }
        }
        if let Some(extra) = self.indexes.keys().find(|name| !schemas.contains(*name)) {
            return Err(Error::InvalidConfig(format!("backend '{extra}' has no schema")));
        }

        if self.consumers.is_empty() {
            self.consumers.push(Consumer { name: DEFAULT_CONSUMER.to_string(), indexes: schemas.iter().cloned().collect() });
        }
        let mut names = BTreeSet::new();
        for consumer in &self.consumers {
            if !names.insert(consumer.name.as_str()) {
                return Err(Error::InvalidConfig(format!("consumer '{}' is declared twice", consumer.name)));
            }
            if let Some(unknown) = consumer.indexes.iter().find(|i| !schemas.contains(*i)) {
                return Err(Error::InvalidConfig(format!("consumer '{}' names unknown index '{unknown}'", consumer.name)));
            }
        }
        for name in &schemas {
            let owners = self.consumers.iter().filter(|c| c.covers(name)).count();
            if owners != 1 {
                return Err(Error::InvalidConfig(format!(
                    "index '{name}' must belong to exactly one consumer, found {owners}"
                )));
            }
        }
        if self.options.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be at least 1".into()));
        }

        tracing::debug!(indexes = schemas.len(), consumers = self.consumers.len(), "engine ready");
        Ok(Engine {
            registry: Arc::new(self.registry),
            indexes: self.indexes,
            records,
            log,
            watermarks,
            consumers: self.consumers,
            options: self.options,
            acquisitions: AtomicU64::new(0),
        })
    }
}
