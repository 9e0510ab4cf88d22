use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use searchsync_core::error::{Error, Result};
use searchsync_core::query::Query;
use searchsync_core::registry::Registration;
use searchsync_core::schema::IndexSchema;
use searchsync_core::traits::{RecordStore, SearchBackend, WriteConnection};
use searchsync_core::types::{DocumentId, Record, RecordKey, RecordType, UnresolvedPolicy};

use crate::results::ResultSet;
use crate::update::{project, Projection};

/// Runtime handle on one index: direct writes plus the query side.
pub struct SearchIndex {
    schema: Arc<IndexSchema>,
    backend: Arc<dyn SearchBackend>,
    registrations: Vec<Registration>,
    records: Arc<dyn RecordStore>,
    pending: Mutex<Option<Box<dyn WriteConnection>>>,
    unresolved: UnresolvedPolicy,
}

impl SearchIndex {
    pub fn new(
        schema: Arc<IndexSchema>,
        backend: Arc<dyn SearchBackend>,
        registrations: Vec<Registration>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self { schema, backend, registrations, records, pending: Mutex::new(None), unresolved: UnresolvedPolicy::default() }
    }

    pub fn with_unresolved(mut self, policy: UnresolvedPolicy) -> Self {
        self.unresolved = policy;
        self
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    pub fn backend(&self) -> &dyn SearchBackend {
        self.backend.as_ref()
    }

    pub(crate) fn records(&self) -> &dyn RecordStore {
        self.records.as_ref()
    }

    pub(crate) fn unresolved(&self) -> UnresolvedPolicy {
        self.unresolved
    }

    pub(crate) fn registered_types(&self) -> Vec<RecordType> {
        self.registrations.iter().map(|r| r.record_type.clone()).collect()
    }

    /// Upsert `record`, honouring its registration predicate. Visible after `flush`.
    pub fn add(&self, record: &Record) -> Result<()> {
        let registration = self
            .registrations
            .iter()
            .find(|r| r.record_type == record.record_type)
            .ok_or_else(|| {
                Error::SchemaViolation(format!("'{}' is not registered with index '{}'", record.record_type, self.name()))
            })?;
        let mut pending = self.pending()?;
        let writer = open_writer(&mut pending, self.backend.as_ref())?;
        match project(writer.as_mut(), registration, record)? {
            Projection::Upserted | Projection::Removed => Ok(()),
            Projection::Failed(e) => Err(Error::Extraction(e)),
        }
    }

    /// Same as `add`: documents are always replaced whole.
    pub fn update(&self, record: &Record) -> Result<()> {
        self.add(record)
    }

    pub fn delete(&self, record: &Record) -> Result<()> {
        self.delete_key(&record.record_type, &record.key)
    }

    pub fn delete_key(&self, record_type: &RecordType, key: &RecordKey) -> Result<()> {
        let mut pending = self.pending()?;
        open_writer(&mut pending, self.backend.as_ref())?.delete(&DocumentId::new(record_type, key))
    }

    /// Commit the pending writes, if any.
    pub fn flush(&self) -> Result<()> {
        let writer = self.pending()?.take();
        match writer {
            Some(writer) => writer.commit(),
            None => Ok(()),
        }
    }

    pub fn doc_count(&self) -> Result<u64> {
        self.backend.doc_count()
    }

    pub fn spell_correct(&self, text: &str) -> Result<Option<String>> {
        self.backend.spell_correct(text)
    }

    /// One page of results. `page` is 1-based; a page past the end falls back to the last one.
    pub fn search(
        &self,
        query: impl Into<Query>,
        page: usize,
        num_per_page: usize,
        query_string: Option<&str>,
    ) -> Result<ResultSet<'_>> {
        let started = Instant::now();
        let query = query.into();
        let num_per_page = num_per_page.max(1);
        let mut page = page.max(1);

        let offset = (page - 1).saturating_mul(num_per_page);
        let mut raw = self.backend.search(&query, offset, num_per_page)?;
        if raw.hits.is_empty() && raw.total_is_exact && raw.total > 0 && offset >= raw.total {
            page = (raw.total - 1) / num_per_page + 1;
            raw = self.backend.search(&query, (page - 1) * num_per_page, num_per_page)?;
        }

        let query_string = query_string.map(str::to_string).or_else(|| query.as_raw().map(str::to_string));
        let spell_suggestion = match &query_string {
            Some(text) if !text.trim().is_empty() => self.backend.spell_correct(text)?,
            _ => None,
        };
        tracing::debug!(index = self.name(), page, total = raw.total, "searched");
        Ok(ResultSet::new(self, query, query_string, page, num_per_page, raw, spell_suggestion, started.elapsed()))
    }

    fn pending(&self) -> Result<MutexGuard<'_, Option<Box<dyn WriteConnection>>>> {
        self.pending.lock().map_err(|_| Error::backend(self.name(), "pending writer lock poisoned"))
    }
}

fn open_writer<'a>(
    pending: &'a mut Option<Box<dyn WriteConnection>>,
    backend: &dyn SearchBackend,
) -> Result<&'a mut Box<dyn WriteConnection>> {
    if pending.is_none() {
        *pending = Some(backend.writer()?);
    }
    pending.as_mut().ok_or_else(|| Error::backend(backend.name(), "no writer"))
}
