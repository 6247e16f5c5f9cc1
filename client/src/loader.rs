//! Fetches authoritative snapshots and merges them into the store.

use crate::clock::Clock;
use crate::directory::ProjectDirectory;
use crate::error::Result;
use crate::remote::RemoteStore;
use crate::store::MutationStore;
use settle_engine::{
    Payment, PaymentSchema, ProtectionPolicy, RawDocument, ReconcileReport, SnapshotSource,
};
use std::sync::Arc;

/// Turns raw remote snapshots into reconciliation passes over the store.
pub struct ReconciliationLoader {
    store: Arc<MutationStore>,
    remote: Arc<dyn RemoteStore>,
    directory: Arc<ProjectDirectory>,
    clock: Arc<dyn Clock>,
    schema: PaymentSchema,
    policy: ProtectionPolicy,
}

impl ReconciliationLoader {
    pub fn new(
        store: Arc<MutationStore>,
        remote: Arc<dyn RemoteStore>,
        directory: Arc<ProjectDirectory>,
        clock: Arc<dyn Clock>,
        policy: ProtectionPolicy,
    ) -> Self {
        Self {
            store,
            remote,
            directory,
            clock,
            schema: PaymentSchema::new(),
            policy,
        }
    }

    pub fn store(&self) -> &Arc<MutationStore> {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn policy(&self) -> &ProtectionPolicy {
        &self.policy
    }

    /// Fetch the full snapshot and reconcile the store against it.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let payments = self.fetch().await?;
        Ok(self.apply(payments, SnapshotSource::Server))
    }

    /// Fetch and validate the full snapshot without touching the store.
    pub async fn fetch(&self) -> Result<Vec<Payment>> {
        let documents = self.remote.list_all().await?;
        Ok(self.ingest(&documents).await)
    }

    /// Validate raw documents, enriching them with project labels.
    ///
    /// Invalid documents are logged and skipped; the rest keep their order.
    pub async fn ingest(&self, documents: &[RawDocument]) -> Vec<Payment> {
        let projects = self.directory.current_or_default().await;
        let (payments, rejected) = self.schema.ingest_all(documents, &projects);
        for (id, error) in &rejected {
            tracing::warn!(id = %id, error = %error, "Skipping invalid payment document");
        }
        payments
    }

    /// Merge a validated snapshot into the store.
    pub fn apply(&self, payments: Vec<Payment>, source: SnapshotSource) -> ReconcileReport {
        let now = self.clock.now();
        let count = payments.len();
        let report = self
            .store
            .mutate(|view| view.reconcile(payments, source, now, &self.policy));

        if report.changed || !report.evicted.is_empty() || !report.released.is_empty() {
            tracing::info!(
                source = ?report.source,
                snapshot = count,
                changed = report.changed,
                kept = report.kept.len(),
                evicted = report.evicted.len(),
                suppressed = report.suppressed.len(),
                released = report.released.len(),
                "Reconciled"
            );
        } else {
            tracing::debug!(source = ?report.source, snapshot = count, "Reconciled, no change");
        }
        if !report.duplicates.is_empty() {
            tracing::warn!(duplicates = ?report.duplicates, "Snapshot listed ids more than once");
        }

        report
    }
}

impl std::fmt::Debug for ReconciliationLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationLoader")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
