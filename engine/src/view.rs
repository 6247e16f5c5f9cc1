//! LocalView - the list the UI renders, plus the bookkeeping needed to
//! settle optimistic mutations.
//!
//! Every method runs to completion without suspending, so a caller that holds
//! exclusive access (the client's session store) always publishes a whole,
//! consistent list.

use crate::{
    error::Result,
    operation::{DeleteResolution, PendingDelete, Phase},
    reconcile::{ProtectionPolicy, ReconcileReport, Reconciler, SnapshotSource},
    record::{Entity, LocalMeta},
    Error, RecordId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Locally held view of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalView<T> {
    /// Visible records, newest first
    records: Vec<T>,
    /// Optimistically removed records by id
    pending_deletes: BTreeMap<RecordId, PendingDelete<T>>,
    /// Pre-patch versions of optimistically updated records
    pending_updates: BTreeMap<RecordId, T>,
}

impl<T> Default for LocalView<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            pending_deletes: BTreeMap::new(),
            pending_updates: BTreeMap::new(),
        }
    }
}

impl<T: Entity> LocalView<T> {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        records: Vec<T>,
        pending_deletes: BTreeMap<RecordId, PendingDelete<T>>,
    ) -> Self {
        Self {
            records,
            pending_deletes,
            pending_updates: BTreeMap::new(),
        }
    }

    /// Visible records in display order.
    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id() == id)
    }

    pub fn pending_deletes(&self) -> &BTreeMap<RecordId, PendingDelete<T>> {
        &self.pending_deletes
    }

    /// Number of mutations whose remote call has not settled.
    pub fn in_flight(&self) -> usize {
        self.records.iter().filter(|r| r.is_temporary()).count()
            + self.pending_updates.len()
            + self
                .pending_deletes
                .values()
                .filter(|t| !t.is_settled())
                .count()
    }

    /// Lifecycle phase of an id, if this view knows it at all.
    pub fn phase(&self, id: &str) -> Option<Phase> {
        if let Some(record) = self.get(id) {
            return Some(if record.is_temporary() {
                Phase::PendingCreate
            } else if self.pending_updates.contains_key(id) {
                Phase::PendingUpdate
            } else {
                Phase::Confirmed
            });
        }
        self.pending_deletes.get(id).map(PendingDelete::phase)
    }

    /// Prepend a record created locally, stamping it temporary at `now`.
    pub fn insert_optimistic(&mut self, mut record: T, now: Timestamp) -> Result<()> {
        if self.get(record.id()).is_some() {
            return Err(Error::DuplicateRecord(record.id().to_string()));
        }
        *record.local_mut() = LocalMeta::temporary(now);
        self.records.insert(0, record);
        Ok(())
    }

    /// Swap a temporary record for the server's version.
    ///
    /// The confirmed record takes the temporary one's position and gets a
    /// fresh protection stamp. If a snapshot already delivered the server id,
    /// that copy is dropped so the id appears once.
    pub fn confirm_create(&mut self, temp_id: &str, mut confirmed: T, now: Timestamp) -> Phase {
        *confirmed.local_mut() = LocalMeta::acknowledged(now);
        let confirmed_id = confirmed.id().to_string();
        self.records
            .retain(|r| r.id() != confirmed_id || r.id() == temp_id);

        match self.position(temp_id) {
            Some(pos) => self.records[pos] = confirmed,
            None => self.records.insert(0, confirmed),
        }
        Phase::Confirmed
    }

    /// Drop a temporary record whose create call failed.
    pub fn reject_create(&mut self, temp_id: &str) -> Phase {
        if let Some(pos) = self.position(temp_id) {
            self.records.remove(pos);
        }
        Phase::Failed
    }

    /// Remove a record ahead of its delete call, remembering where it was.
    pub fn begin_delete(&mut self, id: &str, now: Timestamp) -> Result<&PendingDelete<T>> {
        let pos = self
            .position(id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
        if self.records[pos].is_temporary() {
            return Err(Error::TemporaryRecord(id.to_string()));
        }
        let record = self.records.remove(pos);
        self.pending_updates.remove(id);
        let tombstone = self
            .pending_deletes
            .entry(id.to_string())
            .or_insert_with(|| PendingDelete::new(record, pos, now));
        Ok(tombstone)
    }

    /// Settle a delete call.
    ///
    /// `Restored` puts the record back at its prior position (clamped to the
    /// current length) unless a snapshot already brought it back. Every
    /// other resolution keeps the removal and marks the tombstone settled.
    pub fn settle_delete(&mut self, id: &str, resolution: DeleteResolution, now: Timestamp) -> Phase {
        if resolution.keeps_removal() {
            if let Some(tombstone) = self.pending_deletes.get_mut(id) {
                tombstone.settled_at = Some(now);
            }
            return Phase::Deleted;
        }

        if let Some(tombstone) = self.pending_deletes.remove(id) {
            if self.get(id).is_none() {
                let index = tombstone.index.min(self.records.len());
                self.records.insert(index, tombstone.record);
            }
        }
        Phase::Confirmed
    }

    /// Apply a local edit ahead of its update call.
    pub fn begin_update(&mut self, id: &str, edit: impl FnOnce(&mut T)) -> Result<&T> {
        let pos = self
            .position(id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
        if self.records[pos].is_temporary() {
            return Err(Error::TemporaryRecord(id.to_string()));
        }
        if !self.pending_updates.contains_key(id) {
            let previous = self.records[pos].clone();
            self.pending_updates.insert(id.to_string(), previous);
        }
        edit(&mut self.records[pos]);
        Ok(&self.records[pos])
    }

    /// Settle a successful update; `updated` replaces the local edit when the
    /// server returned its version.
    pub fn confirm_update(&mut self, id: &str, updated: Option<T>) -> Phase {
        self.pending_updates.remove(id);
        if let (Some(mut updated), Some(pos)) = (updated, self.position(id)) {
            *updated.local_mut() = *self.records[pos].local();
            self.records[pos] = updated;
        }
        Phase::Confirmed
    }

    /// Undo a local edit whose update call failed.
    pub fn rollback_update(&mut self, id: &str) -> Phase {
        if let Some(previous) = self.pending_updates.remove(id) {
            if let Some(pos) = self.position(id) {
                self.records[pos] = previous;
            }
        }
        Phase::Confirmed
    }

    /// Merge an authoritative snapshot into the view.
    pub fn reconcile(
        &mut self,
        remote: Vec<T>,
        source: SnapshotSource,
        now: Timestamp,
        policy: &ProtectionPolicy,
    ) -> ReconcileReport {
        let reconciled =
            Reconciler::new(policy, source, now).reconcile(&self.records, remote, &self.pending_deletes);

        for id in &reconciled.report.released {
            self.pending_deletes.remove(id);
        }
        // Pending edits on evicted rows have nothing left to roll back
        let records = &reconciled.records;
        self.pending_updates
            .retain(|id, _| records.iter().any(|r| r.id() == id));

        self.records = reconciled.records;
        reconciled.report
    }
}
