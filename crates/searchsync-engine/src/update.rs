//! Incremental update: drain the change log into the indexes of one consumer.

use std::collections::{BTreeMap, HashMap};

use searchsync_core::error::{Error, ExtractionError, Result};
use searchsync_core::extract::{extract, RecordProxy};
use searchsync_core::registry::Registration;
use searchsync_core::traits::{ChangeLogCursor, WriteConnection};
use searchsync_core::types::{ChangeLogEntry, DocumentId, Operation, Record, RecordKey, RecordType, Sequence};

use crate::engine::{Consumer, Engine};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub entries_read: usize,
    /// Entries superseded by a later entry for the same record in the same batch.
    pub folded: usize,
    pub upserted: usize,
    pub deleted: usize,
    pub skipped_unregistered: usize,
    pub missing_records: usize,
    pub failures: Vec<ExtractionError>,
    pub batches: usize,
}

impl UpdateReport {
    fn merge(&mut self, other: UpdateReport) {
        self.entries_read += other.entries_read;
        self.folded += other.folded;
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.skipped_unregistered += other.skipped_unregistered;
        self.missing_records += other.missing_records;
        self.failures.extend(other.failures);
        self.batches += other.batches;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Highest sequence whose effects are committed to every index of the consumer.
    pub watermark: Sequence,
    pub report: UpdateReport,
}

/// What projecting one record into one index did.
#[derive(Debug)]
pub(crate) enum Projection {
    Upserted,
    Removed,
    Failed(ExtractionError),
}

/// Write `record` into an index according to `registration`.
///
/// A record outside the predicate is removed; a record whose extraction
/// fails is removed too, so the index never keeps a stale version.
pub(crate) fn project(writer: &mut dyn WriteConnection, registration: &Registration, record: &Record) -> Result<Projection> {
    if !registration.predicate.matches(record) {
        writer.delete(&record.document_id())?;
        return Ok(Projection::Removed);
    }
    match extract(&registration.schema, &RecordProxy::new(record)) {
        Ok(document) => {
            writer.replace(&document)?;
            Ok(Projection::Upserted)
        }
        Err(e) => {
            writer.delete(&record.document_id())?;
            Ok(Projection::Failed(e))
        }
    }
}

/// Keep only the newest entry per record, in sequence order.
pub(crate) fn fold(entries: Vec<ChangeLogEntry>) -> Vec<ChangeLogEntry> {
    let mut latest: HashMap<(RecordType, RecordKey), ChangeLogEntry> = HashMap::with_capacity(entries.len());
    for entry in entries {
        let slot = (entry.record_type.clone(), entry.key.clone());
        match latest.get(&slot) {
            Some(seen) if seen.seq >= entry.seq => {}
            _ => {
                latest.insert(slot, entry);
            }
        }
    }
    let mut folded: Vec<ChangeLogEntry> = latest.into_values().collect();
    folded.sort_by_key(|e| e.seq);
    folded
}

impl Engine {
    /// Apply every entry after `watermark` to the consumer's indexes.
    ///
    /// Does not touch the stored watermark; the returned one is where the caller may move it.
    pub fn apply_since(&self, consumer: &str, watermark: Sequence) -> Result<ApplyOutcome> {
        self.run(consumer, watermark, &mut |_: Sequence, _: Sequence| Ok(()))
    }

    /// Lease, apply and advance the stored watermark batch by batch.
    pub fn apply_changes(&self, consumer: &str) -> Result<ApplyOutcome> {
        let _lease = self.lease(consumer)?;
        let from = self.watermarks.load(consumer)?;
        let outcome = self.run(consumer, from, &mut |expected: Sequence, to: Sequence| self.watermarks.advance(consumer, expected, to))?;
        tracing::info!(
            consumer,
            from,
            to = outcome.watermark,
            read = outcome.report.entries_read,
            upserted = outcome.report.upserted,
            deleted = outcome.report.deleted,
            failures = outcome.report.failures.len(),
            "update applied"
        );
        Ok(outcome)
    }

    /// `apply_changes` for every consumer, in declaration order.
    pub fn apply_all(&self) -> Result<Vec<(String, ApplyOutcome)>> {
        let names: Vec<String> = self.consumers.iter().map(|c| c.name.clone()).collect();
        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            let outcome = self.apply_changes(&name)?;
            outcomes.push((name, outcome));
        }
        Ok(outcomes)
    }

    /// Batches are committed in turn; `committed(from, to)` runs after each batch's commits.
    fn run(
        &self,
        consumer: &str,
        from: Sequence,
        committed: &mut dyn FnMut(Sequence, Sequence) -> Result<()>,
    ) -> Result<ApplyOutcome> {
        let consumer = self.consumer(consumer)?;
        let mut cursor = ChangeLogCursor::new(self.log.as_ref(), from, self.options.batch_size);
        let mut watermark = from;
        let mut report = UpdateReport::default();
        loop {
            let batch: Vec<ChangeLogEntry> = cursor.by_ref().take(self.options.batch_size).collect::<Result<_>>()?;
            let Some(last) = batch.last().map(|e| e.seq) else {
                break;
            };
            tracing::debug!(consumer = %consumer.name, entries = batch.len(), from = watermark, to = last, "applying batch");
            let batch_report = self.apply_batch(consumer, batch)?;
            committed(watermark, last)?;
            watermark = last;
            report.merge(batch_report);
        }
        Ok(ApplyOutcome { watermark, report })
    }

    fn apply_batch(&self, consumer: &Consumer, batch: Vec<ChangeLogEntry>) -> Result<UpdateReport> {
        let mut report = UpdateReport { entries_read: batch.len(), batches: 1, ..Default::default() };
        let entries = fold(batch);
        report.folded = report.entries_read - entries.len();

        let mut writers: BTreeMap<String, Box<dyn WriteConnection>> = BTreeMap::new();
        for entry in &entries {
            let registrations: Vec<&Registration> = self
                .registry
                .schemas_for(&entry.record_type)
                .into_iter()
                .filter(|r| consumer.covers(r.schema_name()))
                .collect();
            if registrations.is_empty() {
                report.skipped_unregistered += 1;
                continue;
            }

            let record = match entry.operation {
                Operation::Deleted => None,
                Operation::Added | Operation::Updated => {
                    let record = self.records.fetch(&entry.record_type, &entry.key)?;
                    if record.is_none() {
                        tracing::warn!(
                            seq = entry.seq,
                            "#{} of type {} is gone from the store, removing it",
                            entry.key,
                            entry.record_type
                        );
                        report.missing_records += 1;
                    }
                    record
                }
            };

            let Some(record) = record else {
                let id = DocumentId::new(&entry.record_type, &entry.key);
                for registration in &registrations {
                    self.writer_for(&mut writers, registration.schema_name())?.delete(&id)?;
                }
                report.deleted += registrations.len();
                tracing::debug!("#{} of type {} was deleted from {} indexes", entry.key, entry.record_type, registrations.len());
                continue;
            };

            for registration in &registrations {
                let writer = self.writer_for(&mut writers, registration.schema_name())?;
                match project(writer.as_mut(), registration, &record)? {
                    Projection::Upserted => report.upserted += 1,
                    Projection::Removed => report.deleted += 1,
                    Projection::Failed(e) => {
                        tracing::warn!(index = registration.schema_name(), error = %e, "extraction failed, document removed");
                        report.deleted += 1;
                        report.failures.push(e);
                    }
                }
            }
            tracing::debug!(
                "#{} of type {} was {} in {} indexes",
                entry.key,
                entry.record_type,
                entry.operation.as_str(),
                registrations.len()
            );
        }

        for (index, writer) in writers {
            writer.commit().map_err(|e| match e {
                e @ Error::BackendUnavailable { .. } => e,
                other => Error::backend(&index, other),
            })?;
        }
        Ok(report)
    }
}
