//! Reconciliation of the local list against an authoritative snapshot.
//!
//! This is where optimistic records either survive or give way.
//!
//! # Algorithm
//!
//! 1. Drop duplicate ids from the snapshot (first occurrence wins)
//! 2. On server snapshots, retire settled delete tombstones whose id is gone
//!    from the snapshot or whose window has passed
//! 3. Hide snapshot rows that still have a tombstone
//! 4. Partition the local list: a record is *protected* when it is temporary,
//!    or when its `added_at` is inside the window and the snapshot does not
//!    list it; unprotected records absent from the snapshot are evicted
//! 5. Result = protected records followed by the snapshot; the snapshot's
//!    version of any shared id always wins
//!
//! `added_at` is never rewritten here, so running a pass twice over the same
//! snapshot at the same instant yields the same list.

use crate::{
    operation::PendingDelete,
    record::{visibly_equal, Entity, LocalMeta},
    RecordId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Default protection window (30 seconds).
pub const DEFAULT_PROTECTION_WINDOW_MS: u64 = 30_000;

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotSource {
    /// Fetched from, or pushed by, the server
    Server,
    /// Served from the remote SDK's local cache without a round-trip
    Cache,
}

impl SnapshotSource {
    /// Only server snapshots may retire protection or tombstones.
    pub fn is_authoritative(&self) -> bool {
        matches!(self, SnapshotSource::Server)
    }
}

/// How long a locally stamped record is exempt from eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionPolicy {
    pub window_ms: u64,
}

impl Default for ProtectionPolicy {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_PROTECTION_WINDOW_MS,
        }
    }
}

impl ProtectionPolicy {
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms }
    }

    pub fn within_window(&self, meta: &LocalMeta, now: Timestamp) -> bool {
        meta.within_window(now, self.window_ms)
    }

    /// Whether `record` must be carried over even though the snapshot says
    /// otherwise.
    pub fn protects<T: Entity>(
        &self,
        record: &T,
        authoritative: &HashSet<RecordId>,
        now: Timestamp,
    ) -> bool {
        record.is_temporary()
            || (self.within_window(record.local(), now) && !authoritative.contains(record.id()))
    }
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub source: SnapshotSource,
    /// The visible list differs from before the pass
    pub changed: bool,
    /// Protected local records carried over
    pub kept: Vec<RecordId>,
    /// Local records dropped because the snapshot no longer lists them
    pub evicted: Vec<RecordId>,
    /// Snapshot rows hidden by a pending delete
    pub suppressed: Vec<RecordId>,
    /// Delete tombstones retired by this pass
    pub released: Vec<RecordId>,
    /// Ids that appeared more than once in the snapshot
    pub duplicates: Vec<RecordId>,
}

impl ReconcileReport {
    fn new(source: SnapshotSource) -> Self {
        Self {
            source,
            changed: false,
            kept: Vec::new(),
            evicted: Vec::new(),
            suppressed: Vec::new(),
            released: Vec::new(),
            duplicates: Vec::new(),
        }
    }
}

/// Output of [`Reconciler::reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled<T> {
    pub records: Vec<T>,
    pub report: ReconcileReport,
}

/// Merges a local list with one snapshot at one instant.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler<'a> {
    policy: &'a ProtectionPolicy,
    source: SnapshotSource,
    now: Timestamp,
}

impl<'a> Reconciler<'a> {
    pub fn new(policy: &'a ProtectionPolicy, source: SnapshotSource, now: Timestamp) -> Self {
        Self {
            policy,
            source,
            now,
        }
    }

    pub fn reconcile<T: Entity>(
        &self,
        local: &[T],
        remote: Vec<T>,
        tombstones: &BTreeMap<RecordId, PendingDelete<T>>,
    ) -> Reconciled<T> {
        let mut report = ReconcileReport::new(self.source);

        // Step 1: one row per id
        let mut listed: HashSet<RecordId> = HashSet::with_capacity(remote.len());
        let mut snapshot = Vec::with_capacity(remote.len());
        for record in remote {
            if listed.insert(record.id().to_string()) {
                snapshot.push(record);
            } else {
                report.duplicates.push(record.id().to_string());
            }
        }

        // Step 2: retire tombstones the server no longer contradicts
        if self.source.is_authoritative() {
            for (id, tombstone) in tombstones {
                if tombstone.is_settled()
                    && (!listed.contains(id) || tombstone.expired(self.now, self.policy.window_ms))
                {
                    report.released.push(id.clone());
                }
            }
        }

        // Step 3: keep optimistic removals removed
        snapshot.retain(|record| {
            let hidden = tombstones.contains_key(record.id())
                && !report.released.iter().any(|id| id == record.id());
            if hidden {
                report.suppressed.push(record.id().to_string());
            }
            !hidden
        });

        let authoritative: HashSet<RecordId> =
            snapshot.iter().map(|r| r.id().to_string()).collect();

        // Step 4: partition the local list
        let mut records = Vec::with_capacity(local.len() + snapshot.len());
        let mut carried: HashMap<RecordId, LocalMeta> = HashMap::new();
        let mut kept_ids: HashSet<&str> = HashSet::new();
        for record in local {
            if self.policy.protects(record, &authoritative, self.now) {
                if kept_ids.insert(record.id()) {
                    report.kept.push(record.id().to_string());
                    records.push(record.clone());
                }
            } else if !authoritative.contains(record.id()) {
                report.evicted.push(record.id().to_string());
            } else if !self.source.is_authoritative()
                && self.policy.within_window(record.local(), self.now)
            {
                // A cache snapshot is not proof the server has it yet
                carried.insert(record.id().to_string(), *record.local());
            }
        }

        // Step 5: protected first, then the snapshot as ordinary records
        for mut record in snapshot {
            *record.local_mut() = carried.remove(record.id()).unwrap_or_default();
            records.push(record);
        }

        // Local metadata is invisible to readers
        report.changed = !visibly_equal(&records, local);

        Reconciled { records, report }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Category, DraftPayment, Payment, PaymentStatus};
    use crate::schema::ProjectIndex;

    const WINDOW: u64 = 30_000;

    fn payment(id: &str) -> Payment {
        let draft = DraftPayment::new("7", "Kim", Category::Material, 5000);
        Payment::from_draft(id, &draft, &ProjectIndex::new())
    }

    fn temporary(id: &str, added_at: Timestamp) -> Payment {
        let mut p = payment(id);
        p.local = LocalMeta::temporary(added_at);
        p
    }

    fn acknowledged(id: &str, added_at: Timestamp) -> Payment {
        let mut p = payment(id);
        p.local = LocalMeta::acknowledged(added_at);
        p
    }

    fn ids(records: &[Payment]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    fn no_tombstones() -> BTreeMap<RecordId, PendingDelete<Payment>> {
        BTreeMap::new()
    }

    fn run(
        local: &[Payment],
        remote: Vec<Payment>,
        source: SnapshotSource,
        now: Timestamp,
    ) -> Reconciled<Payment> {
        let policy = ProtectionPolicy::new(WINDOW);
        Reconciler::new(&policy, source, now).reconcile(local, remote, &no_tombstones())
    }

    #[test]
    fn temporary_record_survives_absent_snapshot() {
        let local = vec![temporary("temp_a", 1_000), payment("41")];
        let out = run(&local, vec![payment("41")], SnapshotSource::Server, 2_000);

        assert_eq!(ids(&out.records), vec!["temp_a", "41"]);
        assert_eq!(out.report.kept, vec!["temp_a"]);
        assert!(!out.report.changed);
    }

    #[test]
    fn temporary_record_outlives_the_window() {
        // Protection for an in-flight create does not depend on time
        let local = vec![temporary("temp_a", 1_000)];
        let out = run(&local, vec![], SnapshotSource::Server, 1_000 + 10 * WINDOW);
        assert_eq!(ids(&out.records), vec!["temp_a"]);
        assert_eq!(out.records[0].local.added_at, Some(1_000));
    }

    #[test]
    fn acknowledged_record_protected_until_window_expires() {
        let local = vec![acknowledged("42", 1_000)];

        let inside = run(&local, vec![], SnapshotSource::Server, 1_000 + WINDOW - 1);
        assert_eq!(ids(&inside.records), vec!["42"]);

        let outside = run(&local, vec![], SnapshotSource::Server, 1_000 + WINDOW);
        assert!(outside.records.is_empty());
        assert_eq!(outside.report.evicted, vec!["42"]);
        assert!(outside.report.changed);
    }

    #[test]
    fn authoritative_version_wins_and_resets_metadata() {
        let local = vec![acknowledged("42", 1_000)];
        let mut remote = payment("42");
        remote.status = PaymentStatus::Approved;

        let out = run(&local, vec![remote], SnapshotSource::Server, 2_000);

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].status, PaymentStatus::Approved);
        assert_eq!(out.records[0].local, LocalMeta::default());
        assert!(out.report.kept.is_empty());
    }

    #[test]
    fn listing_an_acknowledged_record_is_not_a_change() {
        let local = vec![acknowledged("42", 1_000)];
        let out = run(&local, vec![payment("42")], SnapshotSource::Server, 2_000);

        assert_eq!(out.records[0].local, LocalMeta::default());
        assert!(!out.report.changed);

        let again = run(&out.records, vec![payment("42")], SnapshotSource::Server, 3_000);
        assert!(!again.report.changed);
        assert_eq!(again.records, out.records);
    }

    #[test]
    fn unprotected_absent_record_is_evicted() {
        let local = vec![payment("42"), payment("41")];
        let out = run(&local, vec![payment("41")], SnapshotSource::Server, 2_000);

        assert_eq!(ids(&out.records), vec!["41"]);
        assert_eq!(out.report.evicted, vec!["42"]);
    }

    #[test]
    fn duplicate_snapshot_rows_collapse() {
        let out = run(
            &[],
            vec![payment("42"), payment("41"), payment("42")],
            SnapshotSource::Server,
            0,
        );
        assert_eq!(ids(&out.records), vec!["42", "41"]);
        assert_eq!(out.report.duplicates, vec!["42"]);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let local = vec![temporary("temp_a", 1_000), acknowledged("43", 1_500), payment("1")];
        let remote = vec![payment("42"), payment("41")];

        let first = run(&local, remote.clone(), SnapshotSource::Server, 5_000);
        assert!(first.report.changed);

        let second = run(&first.records, remote, SnapshotSource::Server, 5_000);
        assert!(!second.report.changed);
        assert_eq!(first.records, second.records);
    }

    #[test]
    fn unsettled_tombstone_hides_row() {
        let policy = ProtectionPolicy::new(WINDOW);
        let mut tombstones = BTreeMap::new();
        tombstones.insert("42".to_string(), PendingDelete::new(payment("42"), 0, 1_000));

        let out = Reconciler::new(&policy, SnapshotSource::Server, 2_000).reconcile(
            &[payment("41")],
            vec![payment("42"), payment("41")],
            &tombstones,
        );

        assert_eq!(ids(&out.records), vec!["41"]);
        assert_eq!(out.report.suppressed, vec!["42"]);
        assert!(out.report.released.is_empty());
    }

    #[test]
    fn settled_tombstone_released_when_server_drops_the_row() {
        let policy = ProtectionPolicy::new(WINDOW);
        let mut tombstone = PendingDelete::new(payment("42"), 0, 1_000);
        tombstone.settled_at = Some(1_200);
        let mut tombstones = BTreeMap::new();
        tombstones.insert("42".to_string(), tombstone);

        // Stale server snapshot still lists it: stays hidden
        let stale = Reconciler::new(&policy, SnapshotSource::Server, 2_000).reconcile(
            &[],
            vec![payment("42")],
            &tombstones,
        );
        assert!(stale.records.is_empty());
        assert!(stale.report.released.is_empty());

        // Fresh snapshot without it: tombstone retired
        let fresh = Reconciler::new(&policy, SnapshotSource::Server, 3_000).reconcile(
            &[],
            vec![],
            &tombstones,
        );
        assert_eq!(fresh.report.released, vec!["42"]);

        // Server insists past the window: row comes back
        let late = Reconciler::new(&policy, SnapshotSource::Server, 1_200 + WINDOW).reconcile(
            &[],
            vec![payment("42")],
            &tombstones,
        );
        assert_eq!(ids(&late.records), vec!["42"]);
        assert_eq!(late.report.released, vec!["42"]);
    }

    #[test]
    fn cache_snapshot_never_releases_tombstones() {
        let policy = ProtectionPolicy::new(WINDOW);
        let mut tombstone = PendingDelete::new(payment("42"), 0, 1_000);
        tombstone.settled_at = Some(1_200);
        let mut tombstones = BTreeMap::new();
        tombstones.insert("42".to_string(), tombstone);

        let out = Reconciler::new(&policy, SnapshotSource::Cache, 1_200 + 2 * WINDOW).reconcile(
            &[],
            vec![payment("42")],
            &tombstones,
        );
        assert!(out.records.is_empty());
        assert!(out.report.released.is_empty());
    }

    #[test]
    fn cache_snapshot_keeps_protection_metadata() {
        let local = vec![acknowledged("42", 1_000)];
        let out = run(&local, vec![payment("42")], SnapshotSource::Cache, 2_000);

        assert_eq!(out.records[0].local, LocalMeta::acknowledged(1_000));
        assert!(!out.report.changed);

        // A later stale server snapshot can therefore still not evict it
        let stale = run(&out.records, vec![], SnapshotSource::Server, 3_000);
        assert_eq!(ids(&stale.records), vec!["42"]);
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_local() -> impl Strategy<Value = Vec<Payment>> {
            prop::collection::btree_map(0u32..40, (0u8..3, 0u64..60_000), 0..20).prop_map(|m| {
                m.into_iter()
                    .map(|(n, (kind, added_at))| match kind {
                        0 => temporary(&format!("temp_{}", n), added_at),
                        1 => acknowledged(&n.to_string(), added_at),
                        _ => payment(&n.to_string()),
                    })
                    .collect()
            })
        }

        fn arb_remote() -> impl Strategy<Value = Vec<Payment>> {
            prop::collection::vec(0u32..40, 0..30)
                .prop_map(|ids| ids.into_iter().map(|n| payment(&n.to_string())).collect())
        }

        fn arb_source() -> impl Strategy<Value = SnapshotSource> {
            prop_oneof![Just(SnapshotSource::Server), Just(SnapshotSource::Cache)]
        }

        proptest! {
            #[test]
            fn prop_at_most_one_row_per_id(
                local in arb_local(),
                remote in arb_remote(),
                source in arb_source(),
                now in 0u64..120_000,
            ) {
                let out = run(&local, remote, source, now);
                let unique: HashSet<_> = out.records.iter().map(|r| r.id.clone()).collect();
                prop_assert_eq!(unique.len(), out.records.len());
            }

            #[test]
            fn prop_idempotent(
                local in arb_local(),
                remote in arb_remote(),
                source in arb_source(),
                now in 0u64..120_000,
            ) {
                let first = run(&local, remote.clone(), source, now);
                let second = run(&first.records, remote, source, now);
                prop_assert!(!second.report.changed);
                prop_assert_eq!(first.records, second.records);
            }

            #[test]
            fn prop_temporary_records_never_dropped(
                local in arb_local(),
                remote in arb_remote(),
                now in 0u64..120_000,
            ) {
                let out = run(&local, remote, SnapshotSource::Server, now);
                for record in local.iter().filter(|r| r.local.is_temporary) {
                    prop_assert!(out.records.iter().any(|r| r.id == record.id));
                }
            }

            #[test]
            fn prop_converges_once_windows_expire(
                local in arb_local(),
                remote in arb_remote(),
            ) {
                // No temporaries left once every create settled
                let settled: Vec<Payment> = local
                    .into_iter()
                    .filter(|r| !r.local.is_temporary)
                    .collect();
                let out = run(&settled, remote.clone(), SnapshotSource::Server, 10 * WINDOW);

                let mut expected: Vec<String> = Vec::new();
                for r in &remote {
                    if !expected.contains(&r.id) {
                        expected.push(r.id.clone());
                    }
                }
                let got: Vec<String> = out.records.iter().map(|r| r.id.clone()).collect();
                prop_assert_eq!(got, expected);
            }
        }
    }
}
