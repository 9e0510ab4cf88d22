//! Full rebuild: recompute indexes from the current record set.

use std::collections::BTreeMap;

use searchsync_core::error::{Error, ExtractionError, Result};
use searchsync_core::types::{Record, RecordType, Sequence};

use crate::engine::{Consumer, Engine};
use crate::update::{project, Projection};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRebuild {
    pub index: String,
    pub documents: usize,
    pub per_type: BTreeMap<RecordType, usize>,
    pub failures: Vec<ExtractionError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Log head when the rebuild started; later entries are left to the next update.
    pub snapshot: Sequence,
    pub indexes: Vec<IndexRebuild>,
}

impl RebuildReport {
    pub fn documents(&self) -> usize {
        self.indexes.iter().map(|i| i.documents).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExtractionError> {
        self.indexes.iter().flat_map(|i| i.failures.iter())
    }
}

impl Engine {
    pub fn rebuild_all(&self) -> Result<RebuildReport> {
        let names = self.registry.schema_names();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        self.rebuild(&names)
    }

    /// Clear and repopulate each named index, then settle the watermarks.
    pub fn rebuild(&self, names: &[&str]) -> Result<RebuildReport> {
        let mut targets: Vec<&str> = Vec::with_capacity(names.len());
        for name in names {
            self.backend(name)?;
            if !targets.contains(name) {
                targets.push(*name);
            }
        }

        let mut affected: Vec<&Consumer> = Vec::new();
        for name in &targets {
            if let Some(consumer) = self.consumer_of(name) {
                if !affected.iter().any(|c| c.name == consumer.name) {
                    affected.push(consumer);
                }
            }
        }
        let mut leases = Vec::with_capacity(affected.len());
        for consumer in &affected {
            leases.push(self.lease(&consumer.name)?);
        }

        let snapshot = self.log.head()?;
        tracing::info!(indexes = ?targets, snapshot, "rebuilding");
        let mut report = RebuildReport { snapshot, indexes: Vec::with_capacity(targets.len()) };
        for name in &targets {
            report.indexes.push(self.rebuild_one(name)?);
        }

        for consumer in affected {
            if !consumer.is_shared() {
                continue;
            }
            if !consumer.indexes.iter().all(|i| targets.contains(&i.as_str())) {
                tracing::debug!(consumer = %consumer.name, "partial rebuild of a shared consumer, watermark kept");
                continue;
            }
            let current = self.watermarks.load(&consumer.name)?;
            if current != snapshot {
                self.watermarks.advance(&consumer.name, current, snapshot)?;
                tracing::info!(consumer = %consumer.name, from = current, to = snapshot, "watermark moved to rebuild snapshot");
            }
        }
        drop(leases);
        Ok(report)
    }

    fn rebuild_one(&self, name: &str) -> Result<IndexRebuild> {
        let mut writer = self.backend(name)?.writer()?;
        writer.clear()?;

        let mut rebuilt = IndexRebuild { index: name.to_string(), ..Default::default() };
        for registration in self.registry.registrations_for_schema(name) {
            let mut count = 0usize;
            let scanned = self.records.scan(&registration.record_type, &registration.predicate, &mut |record: Record| -> Result<()> {
                match project(writer.as_mut(), registration, &record)? {
                    Projection::Upserted => count += 1,
                    Projection::Removed => {}
                    Projection::Failed(e) => {
                        tracing::warn!(index = name, error = %e, "extraction failed, record left out");
                        rebuilt.failures.push(e);
                    }
                }
                Ok(())
            })?;
            tracing::info!(index = name, record_type = %registration.record_type, scanned, indexed = count, "scanned");
            rebuilt.documents += count;
            *rebuilt.per_type.entry(registration.record_type.clone()).or_default() += count;
        }

        writer.commit().map_err(|e| match e {
            e @ Error::BackendUnavailable { .. } => e,
            other => Error::backend(name, other),
        })?;
        tracing::info!(index = name, documents = rebuilt.documents, "cutover committed");
        Ok(rebuilt)
    }
}
