use std::collections::VecDeque;
use std::time::Duration;

use crate::error::Result;
use crate::predicate::Predicate;
use crate::query::Query;
use crate::types::{ChangeLogEntry, Document, DocumentId, Operation, RawResults, Record, RecordKey, RecordType, Sequence};

/// Read side of the source-of-truth data store.
pub trait RecordStore: Send + Sync {
    fn fetch(&self, record_type: &RecordType, key: &RecordKey) -> Result<Option<Record>>;

    /// Records of one type among `keys`; absent keys are simply missing from the result.
    fn fetch_many(&self, record_type: &RecordType, keys: &[RecordKey]) -> Result<Vec<Record>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.fetch(record_type, key)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Stream the current selection of `record_type` matching `predicate`.
    fn scan(
        &self,
        record_type: &RecordType,
        predicate: &Predicate,
        visit: &mut dyn FnMut(Record) -> Result<()>,
    ) -> Result<usize>;
}

/// Append-only, totally ordered history of record mutations.
pub trait ChangeLog: Send + Sync {
    fn append(&self, record_type: &RecordType, key: &RecordKey, operation: Operation) -> Result<Sequence>;

    /// Up to `limit` entries with `seq > after`, ascending.
    fn read_after(&self, after: Sequence, limit: usize) -> Result<Vec<ChangeLogEntry>>;

    /// Highest sequence assigned so far, `0` for an empty log.
    fn head(&self) -> Result<Sequence>;

    /// Number of entries still waiting behind `after`.
    fn count_after(&self, after: Sequence) -> Result<u64>;

    /// Drop entries with `seq <= through`. Returns how many were removed.
    fn prune_through(&self, through: Sequence) -> Result<usize>;
}

/// Lazy, restartable walk over the log from a watermark.
pub struct ChangeLogCursor<'a> {
    log: &'a dyn ChangeLog,
    after: Sequence,
    page_size: usize,
    buffer: VecDeque<ChangeLogEntry>,
    exhausted: bool,
}

impl<'a> ChangeLogCursor<'a> {
    pub fn new(log: &'a dyn ChangeLog, after: Sequence, page_size: usize) -> Self {
        Self { log, after, page_size: page_size.max(1), buffer: VecDeque::new(), exhausted: false }
    }

    /// Sequence of the last entry handed out (or the starting watermark).
    pub fn position(&self) -> Sequence {
        self.after
    }
}

impl Iterator for ChangeLogCursor<'_> {
    type Item = Result<ChangeLogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.log.read_after(self.after, self.page_size) {
                Ok(page) => {
                    self.exhausted = page.len() < self.page_size;
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        let entry = self.buffer.pop_front()?;
        self.after = entry.seq;
        Some(Ok(entry))
    }
}

/// Per-consumer watermarks plus the lease that serializes their consumers.
pub trait WatermarkStore: Send + Sync {
    fn load(&self, consumer: &str) -> Result<Sequence>;

    /// Compare-and-set; fails with `WatermarkConflict` if the stored value is not `expected`.
    fn advance(&self, consumer: &str, expected: Sequence, to: Sequence) -> Result<()>;

    /// Take the consumer's lease. Expired leases of other holders can be taken over.
    fn try_lock(&self, consumer: &str, holder: &str, lease: Duration) -> Result<bool>;

    fn unlock(&self, consumer: &str, holder: &str) -> Result<()>;

    fn consumers(&self) -> Result<Vec<(String, Sequence)>>;
}

/// One physical search index.
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Open the single write connection of this index.
    fn writer(&self) -> Result<Box<dyn WriteConnection>>;

    fn search(&self, query: &Query, offset: usize, limit: usize) -> Result<RawResults>;

    /// Corrected form of `text`, if the spelling dictionary suggests one.
    fn spell_correct(&self, text: &str) -> Result<Option<String>>;

    /// `text` (a stored value of `field`) with the terms of `query` marked up as HTML.
    fn highlight(&self, query: &Query, field: &str, text: &str, max_chars: usize) -> Result<String>;

    fn doc_count(&self) -> Result<u64>;
}

/// Buffered writes; nothing is visible until `commit`. Dropping discards the buffer.
pub trait WriteConnection: Send {
    /// Add or overwrite the document with the same id.
    fn replace(&mut self, document: &Document) -> Result<()>;

    /// Remove a document; absent ids are not an error.
    fn delete(&mut self, id: &DocumentId) -> Result<()>;

    /// Remove every document (used by full rebuilds).
    fn clear(&mut self) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;
}
