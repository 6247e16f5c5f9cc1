//! Persisted mirror of a local view.
//!
//! The application keeps a serialized copy of its state so a reload can show
//! the last list immediately. This module owns that format for the view: it
//! must round-trip every timestamp exactly and it must not let a previous
//! session's in-flight mutations masquerade as in-flight in the new one.

use crate::{
    error::Result,
    operation::PendingDelete,
    record::{Entity, LocalMeta},
    view::LocalView,
    Error, RecordId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot<T> {
    pub format_version: u32,
    pub saved_at: Timestamp,
    /// Visible records in display order
    pub records: Vec<T>,
    /// Optimistic removals not yet confirmed by a server snapshot
    #[serde(default = "BTreeMap::new")]
    pub pending_deletes: BTreeMap<RecordId, PendingDelete<T>>,
}

impl<T: Entity> LocalView<T> {
    /// Export the view for persistence.
    pub fn export(&self, saved_at: Timestamp) -> ViewSnapshot<T> {
        ViewSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            saved_at,
            records: self.records().to_vec(),
            pending_deletes: self.pending_deletes().clone(),
        }
    }
}

impl<T: Entity> ViewSnapshot<T> {
    /// Count of visible records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Check structural invariants: known format, one row per id, no row that
    /// is also pending deletion.
    pub fn validate(&self) -> Result<()> {
        if self.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        let mut seen = HashSet::with_capacity(self.records.len());
        for record in &self.records {
            if !seen.insert(record.id()) {
                return Err(Error::InvalidSnapshot(format!(
                    "duplicate record id: {}",
                    record.id()
                )));
            }
            if self.pending_deletes.contains_key(record.id()) {
                return Err(Error::InvalidSnapshot(format!(
                    "record {} is both visible and pending deletion",
                    record.id()
                )));
            }
        }

        Ok(())
    }

    /// Rebuild a view in a new session.
    ///
    /// Calls that were in flight when the snapshot was taken cannot settle
    /// anymore: temporary records become ordinary window-protected records
    /// anchored at their original stamp, and unsettled deletes are treated as
    /// settled at `now`.
    pub fn into_view(self, now: Timestamp) -> Result<LocalView<T>> {
        self.validate()?;

        let records = self
            .records
            .into_iter()
            .map(|mut record| {
                if record.is_temporary() {
                    let added_at = record.local().added_at;
                    *record.local_mut() = LocalMeta {
                        is_temporary: false,
                        added_at,
                    };
                }
                record
            })
            .collect();

        let pending_deletes = self
            .pending_deletes
            .into_iter()
            .map(|(id, mut tombstone)| {
                if tombstone.settled_at.is_none() {
                    tombstone.settled_at = Some(now);
                }
                (id, tombstone)
            })
            .collect();

        Ok(LocalView::from_parts(records, pending_deletes))
    }
}

impl<T: Entity + Serialize> ViewSnapshot<T> {
    /// Serialize to JSON. Map keys are ordered, so output is deterministic.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }
}

impl<T: Entity + for<'de> Deserialize<'de>> ViewSnapshot<T> {
    /// Deserialize from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{DeleteResolution, Phase};
    use crate::reconcile::{ProtectionPolicy, SnapshotSource};
    use crate::record::{Category, DraftPayment, Payment};
    use crate::schema::ProjectIndex;

    fn payment(id: &str) -> Payment {
        let draft = DraftPayment::new("7", "Kim", Category::Material, 5000)
            .with_requested_at(1_706_745_600_000);
        Payment::from_draft(id, &draft, &ProjectIndex::new())
    }

    fn busy_view() -> LocalView<Payment> {
        let mut view = LocalView::new();
        view.reconcile(
            vec![payment("43"), payment("42"), payment("41")],
            SnapshotSource::Server,
            0,
            &ProtectionPolicy::default(),
        );
        view.insert_optimistic(payment("temp_a"), 1_706_745_600_123)
            .unwrap();
        view.begin_delete("42", 1_706_745_600_200).unwrap();
        view.begin_delete("41", 1_706_745_600_300).unwrap();
        view.settle_delete("41", DeleteResolution::ProbableSuccess, 1_706_745_600_400);
        view
    }

    #[test]
    fn json_roundtrip_is_lossless() {
        let snapshot = busy_view().export(1_706_745_601_000);
        let json = snapshot.to_json().unwrap();
        let parsed = ViewSnapshot::<Payment>::from_json(&json).unwrap();

        assert_eq!(parsed, snapshot);
        assert_eq!(parsed.records[0].local.added_at, Some(1_706_745_600_123));
        assert_eq!(parsed.records[0].requested_at, 1_706_745_600_000);
    }

    #[test]
    fn json_is_deterministic() {
        let snapshot = busy_view().export(1);
        assert_eq!(snapshot.to_json().unwrap(), snapshot.to_json().unwrap());
    }

    #[test]
    fn rehydration_demotes_orphaned_mutations() {
        let view = busy_view()
            .export(1_706_745_601_000)
            .into_view(1_706_745_700_000)
            .unwrap();

        let temp = view.get("temp_a").unwrap();
        assert!(!temp.local.is_temporary);
        assert_eq!(temp.local.added_at, Some(1_706_745_600_123));

        assert_eq!(view.phase("42"), Some(Phase::Deleted));
        assert_eq!(
            view.pending_deletes()["42"].settled_at,
            Some(1_706_745_700_000)
        );
        assert_eq!(
            view.pending_deletes()["41"].settled_at,
            Some(1_706_745_600_400)
        );
        assert_eq!(view.in_flight(), 0);
    }

    #[test]
    fn orphaned_create_expires_with_the_window() {
        let policy = ProtectionPolicy::default();
        let mut view = busy_view().export(0).into_view(1_706_745_601_000).unwrap();

        view.reconcile(vec![payment("43")], SnapshotSource::Server, 1_706_745_601_000, &policy);
        assert!(view.get("temp_a").is_some());

        view.reconcile(
            vec![payment("43")],
            SnapshotSource::Server,
            1_706_745_600_123 + policy.window_ms,
            &policy,
        );
        assert!(view.get("temp_a").is_none());
    }

    #[test]
    fn rejects_future_format() {
        let mut snapshot = busy_view().export(0);
        snapshot.format_version = SNAPSHOT_FORMAT_VERSION + 1;
        let json = snapshot.to_json().unwrap();

        let result = ViewSnapshot::<Payment>::from_json(&json);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let snapshot = ViewSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            saved_at: 0,
            records: vec![payment("42"), payment("42")],
            pending_deletes: BTreeMap::new(),
        };
        assert!(matches!(snapshot.validate(), Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn rejects_garbage() {
        let result = ViewSnapshot::<Payment>::from_json("{not json");
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }
}
