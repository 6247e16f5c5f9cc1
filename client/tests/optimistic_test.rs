//! Integration tests for optimistic mutations and reconciliation.

use settle_client::{
    FailPoint, ManualClock, MemoryRemote, RemoteError, SessionInvalidator, SyncConfig, SyncError,
    SyncSession,
};
use settle_engine::{
    fingerprint, is_temporary_id, Category, DeleteResolution, DraftPayment, PaymentPatch,
    PaymentSchema, PaymentStatus, Phase, ProjectIndex, ProjectRef,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const START: u64 = 1_706_745_600_000;

/// Test helper to build a session over an in-memory store.
fn setup(remote: MemoryRemote) -> (Arc<MemoryRemote>, Arc<ManualClock>, Arc<SyncSession>) {
    let remote = Arc::new(remote);
    let clock = Arc::new(ManualClock::new(START));
    let session = SyncSession::builder(remote.clone(), SyncConfig::default())
        .with_clock(clock.clone())
        .build()
        .unwrap();
    (remote, clock, Arc::new(session))
}

fn draft(item: &str, amount: i64) -> DraftPayment {
    DraftPayment::new("7", "Kim", Category::Material, amount).with_item_name(item)
}

fn ids(session: &SyncSession) -> Vec<String> {
    session.records().iter().map(|p| p.id.clone()).collect()
}

async fn wait_for_records(session: &SyncSession, count: usize) {
    while session.records().len() < count {
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
struct CountingInvalidator(AtomicUsize);

impl SessionInvalidator for CountingInvalidator {
    fn invalidate(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod create_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_is_visible_before_ack_and_survives_reconcile() {
        let (remote, clock, session) = setup(MemoryRemote::new().with_next_id(42));
        remote.hold_creates();

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.create(draft("A", 5000)).await }
        });
        wait_for_records(&session, 1).await;

        let placeholder = session.records()[0].clone();
        assert!(is_temporary_id(&placeholder.id));
        assert_eq!(placeholder.item_name, "A");
        assert_eq!(session.store().phase(&placeholder.id), Some(Phase::PendingCreate));

        // Server has not stored "A" yet
        clock.advance(500);
        let report = session.reconcile().await.unwrap();
        assert!(!report.changed);
        assert_eq!(report.kept, vec![placeholder.id.clone()]);
        assert_eq!(ids(&session), vec![placeholder.id.clone()]);

        remote.release_creates();
        let created = pending.await.unwrap().unwrap();
        assert_eq!(created.id, "42");
        assert_eq!(ids(&session), vec!["42"]);
    }

    #[tokio::test]
    async fn test_reconcile_after_ack_has_no_duplicate() {
        let (remote, clock, session) = setup(MemoryRemote::new().with_next_id(42));

        let created = session.create(draft("A", 5000)).await.unwrap();
        assert_eq!(created.id, "42");
        assert_eq!(created.local.added_at, Some(START));
        assert!(!created.local.is_temporary);
        let before = fingerprint(session.records().as_slice());
        let mut rx = session.subscribe();
        rx.borrow_and_update();
        let revision = session.store().revision();

        clock.advance(1_000);
        let report = session.reconcile().await.unwrap();
        assert!(!report.changed);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(session.store().revision(), revision);
        assert_eq!(ids(&session), vec!["42"]);
        assert_eq!(fingerprint(session.records().as_slice()), before);

        let snapshot = PaymentSchema::new()
            .ingest_all(&remote.documents(), &ProjectIndex::new())
            .0;
        assert_eq!(fingerprint(&snapshot), before);

        let again = session.reconcile().await.unwrap();
        assert!(!again.changed);
        assert_eq!(ids(&session), vec!["42"]);
    }

    #[tokio::test]
    async fn test_failed_create_rolls_back() {
        let (remote, _clock, session) = setup(MemoryRemote::new());
        remote.fail_next(FailPoint::Create, RemoteError::from_status(500, "db down"));

        let result = session.create(draft("A", 5000)).await;

        assert!(matches!(
            result,
            Err(SyncError::Remote(RemoteError::Rejected { status: 500, .. }))
        ));
        assert!(session.records().is_empty());
        assert_eq!(session.store().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_create_uses_loaded_project_labels() {
        let (_remote, _clock, session) = setup(
            MemoryRemote::new().with_projects(vec![ProjectRef::new("7", "Seongsu loft")]),
        );
        session.reconcile().await.unwrap();

        let created = session.create(draft("A", 5000)).await.unwrap();
        assert_eq!(created.project_name, "Seongsu loft");
    }

    #[tokio::test]
    async fn test_no_data_loss_when_push_races_create() {
        let (remote, clock, session) = setup(MemoryRemote::new());
        remote.insert(&draft("existing", 100)).unwrap();
        session.reconcile().await.unwrap();
        remote.hold_creates();

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.create(draft("mine", 5000)).await }
        });
        wait_for_records(&session, 2).await;

        // Another client creates a record while ours is in flight
        remote.insert(&draft("theirs", 700)).unwrap();
        clock.advance(200);
        session.reconcile().await.unwrap();
        assert_eq!(session.records().len(), 3);

        remote.release_creates();
        let mine = pending.await.unwrap().unwrap();

        clock.advance(200);
        session.reconcile().await.unwrap();
        let items: Vec<String> = session
            .records()
            .iter()
            .map(|p| p.item_name.clone())
            .collect();
        assert_eq!(items, vec!["mine", "theirs", "existing"]);
        assert_eq!(ids(&session)[0], mine.id);
    }

    #[tokio::test]
    async fn test_unacknowledged_record_expires_after_window() {
        let (remote, clock, session) = setup(MemoryRemote::new());
        let created = session.create(draft("A", 5000)).await.unwrap();

        // Someone deletes it on the server straight away
        remote.remove(&created.id);
        clock.advance(29_999);
        session.reconcile().await.unwrap();
        assert_eq!(ids(&session), vec![created.id.clone()]);

        clock.advance(1);
        let report = session.reconcile().await.unwrap();
        assert_eq!(report.evicted, vec![created.id]);
        assert!(session.records().is_empty());
    }
}

#[cfg(test)]
mod delete_tests {
    use super::*;

    async fn seeded(count: usize) -> (Arc<MemoryRemote>, Arc<ManualClock>, Arc<SyncSession>) {
        let (remote, clock, session) = setup(MemoryRemote::new().with_next_id(40));
        for i in 0..count {
            remote.insert(&draft(&format!("item {}", i), 100)).unwrap();
        }
        session.reconcile().await.unwrap();
        (remote, clock, session)
    }

    #[tokio::test]
    async fn test_delete_confirmed() {
        let (remote, _clock, session) = seeded(3).await;

        let resolution = session.delete("41").await.unwrap();

        assert_eq!(resolution, DeleteResolution::Confirmed);
        assert_eq!(ids(&session), vec!["42", "40"]);
        assert!(remote.document("41").is_none());
    }

    #[tokio::test]
    async fn test_delete_with_gateway_error_keeps_removal() {
        let (remote, clock, session) = seeded(3).await;
        remote.fail_next(FailPoint::Delete, RemoteError::from_status(503, "unavailable"));

        let resolution = session.delete("42").await.unwrap();

        assert_eq!(resolution, DeleteResolution::ProbableSuccess);
        assert_eq!(ids(&session), vec!["41", "40"]);

        // The server still lists it; the removal holds
        clock.advance(1_000);
        session.reconcile().await.unwrap();
        assert_eq!(ids(&session), vec!["41", "40"]);
    }

    #[tokio::test]
    async fn test_delete_of_vanished_record_is_silent() {
        let (remote, _clock, session) = seeded(3).await;
        remote.remove("40");

        let resolution = session.delete("40").await.unwrap();

        assert_eq!(resolution, DeleteResolution::AlreadyGone);
        assert_eq!(ids(&session), vec!["42", "41"]);
    }

    #[tokio::test]
    async fn test_delete_unknown_id_not_found_is_silent() {
        let (_remote, _clock, session) = seeded(1).await;

        let resolution = session.delete("99").await.unwrap();

        assert_eq!(resolution, DeleteResolution::AlreadyGone);
        assert_eq!(ids(&session), vec!["40"]);
    }

    #[tokio::test]
    async fn test_delete_rejected_restores_position() {
        let (remote, _clock, session) = seeded(3).await;
        remote.fail_next(FailPoint::Delete, RemoteError::from_status(403, "forbidden"));

        let result = session.delete("41").await;

        assert!(matches!(
            result,
            Err(SyncError::Remote(RemoteError::Rejected { status: 403, .. }))
        ));
        assert_eq!(ids(&session), vec!["42", "41", "40"]);
        assert_eq!(session.store().pending_delete_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_delete_failure_does_not_restore_row() {
        let (remote, _clock, session) = seeded(3).await;
        assert_eq!(session.delete("41").await.unwrap(), DeleteResolution::Confirmed);

        // A second delete of the same id that the server refuses
        remote.fail_next(FailPoint::Delete, RemoteError::from_status(403, "forbidden"));
        let result = session.delete("41").await;

        assert!(matches!(
            result,
            Err(SyncError::Remote(RemoteError::Rejected { status: 403, .. }))
        ));
        assert_eq!(ids(&session), vec!["42", "40"]);
        assert_eq!(session.store().pending_delete_count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_delete_leaves_first_tombstone_alone() {
        let (remote, _clock, session) = seeded(2).await;
        remote.fail_next(FailPoint::Delete, RemoteError::from_status(503, "unavailable"));
        assert_eq!(
            session.delete("41").await.unwrap(),
            DeleteResolution::ProbableSuccess
        );

        // The row is still on the server, so this one goes through
        assert_eq!(session.delete("41").await.unwrap(), DeleteResolution::Confirmed);
        assert_eq!(ids(&session), vec!["40"]);
        assert!(remote.document("41").is_none());
    }

    #[tokio::test]
    async fn test_delete_of_temporary_record_is_refused() {
        let (remote, _clock, session) = seeded(0).await;
        remote.hold_creates();

        let _pending = tokio::spawn({
            let session = session.clone();
            async move { session.create(draft("A", 1)).await }
        });
        wait_for_records(&session, 1).await;
        let temp_id = ids(&session)[0].clone();

        let result = session.delete(&temp_id).await;
        assert!(matches!(result, Err(SyncError::TemporaryRecord(_))));
        assert_eq!(ids(&session), vec![temp_id]);
    }

    #[tokio::test]
    async fn test_auth_expiry_is_forwarded() {
        let remote = Arc::new(MemoryRemote::new());
        remote.insert(&draft("A", 1)).unwrap();
        let invalidator = Arc::new(CountingInvalidator::default());
        let session = SyncSession::builder(remote.clone(), SyncConfig::default())
            .with_clock(Arc::new(ManualClock::new(START)))
            .with_invalidator(invalidator.clone())
            .build()
            .unwrap();
        session.reconcile().await.unwrap();
        remote.fail_next(FailPoint::Delete, RemoteError::from_status(401, "expired"));

        let result = session.delete("1").await;

        assert!(matches!(result, Err(SyncError::Remote(RemoteError::AuthExpired))));
        assert_eq!(invalidator.0.load(Ordering::SeqCst), 1);
        assert_eq!(ids(&session), vec!["1"]);
    }
}

#[cfg(test)]
mod update_tests {
    use super::*;

    #[tokio::test]
    async fn test_status_update_uses_status_call() {
        let (remote, _clock, session) = setup(MemoryRemote::new());
        remote.insert(&draft("A", 1)).unwrap();
        session.reconcile().await.unwrap();

        let updated = session
            .update("1", PaymentPatch::status(PaymentStatus::Approved))
            .await
            .unwrap();

        assert_eq!(updated.status, PaymentStatus::Approved);
        assert_eq!(remote.document("1").unwrap().data["status"], "approved");
        assert_eq!(session.store().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failed_update_rolls_back() {
        let (remote, _clock, session) = setup(MemoryRemote::new());
        remote.insert(&draft("A", 1)).unwrap();
        session.reconcile().await.unwrap();
        remote.fail_next(FailPoint::Update, RemoteError::Network("reset".into()));

        let patch = PaymentPatch {
            amount: Some(9_000),
            notes: Some("typo fixed".into()),
            ..PaymentPatch::default()
        };
        let result = session.update("1", patch).await;

        assert!(matches!(result, Err(SyncError::Remote(RemoteError::Network(_)))));
        let record = &session.records()[0];
        assert_eq!(record.amount, 1);
        assert_eq!(record.notes, "");
    }

    #[tokio::test]
    async fn test_update_unknown_record() {
        let (_remote, _clock, session) = setup(MemoryRemote::new());
        let result = session
            .update("7", PaymentPatch::status(PaymentStatus::Rejected))
            .await;
        assert!(matches!(result, Err(SyncError::UnknownRecord(id)) if id == "7"));
    }
}

#[cfg(test)]
mod notification_tests {
    use super::*;

    #[tokio::test]
    async fn test_identical_snapshots_notify_once() {
        let (remote, clock, session) = setup(MemoryRemote::new());
        for i in 0..4 {
            remote.insert(&draft(&format!("item {}", i), 100)).unwrap();
        }
        let mut rx = session.subscribe();

        session.reconcile().await.unwrap();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        let revision = session.store().revision();

        clock.advance(3_000);
        let report = session.reconcile().await.unwrap();
        assert!(!report.changed);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(session.store().revision(), revision);
    }

    #[tokio::test]
    async fn test_persisted_mirror_restores_session() {
        let (remote, clock, session) = setup(MemoryRemote::new());
        remote.insert(&draft("A", 1)).unwrap();
        remote.insert(&draft("B", 2)).unwrap();
        session.reconcile().await.unwrap();
        remote.fail_next(FailPoint::Delete, RemoteError::from_status(504, "timeout"));
        session.delete("2").await.unwrap();

        let json = session.persist().to_json().unwrap();
        let snapshot = settle_engine::ViewSnapshot::from_json(&json).unwrap();

        let restored = SyncSession::builder(remote.clone(), SyncConfig::default())
            .with_clock(clock.clone())
            .with_snapshot(snapshot)
            .build()
            .unwrap();
        assert_eq!(ids(&restored), vec!["1"]);

        // Stale server listing still cannot resurrect the deleted row
        restored.reconcile().await.unwrap();
        assert_eq!(ids(&restored), vec!["1"]);
    }
}
