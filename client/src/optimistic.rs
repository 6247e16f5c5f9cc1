//! Optimistic create, update and delete.
//!
//! Each operation changes the store synchronously, then awaits the remote
//! call, then settles the change: the list reflects the user's intent
//! before any round-trip and never shows a half-applied mutation.

use crate::clock::Clock;
use crate::directory::ProjectDirectory;
use crate::error::{RemoteError, Result, SyncError};
use crate::remote::{RemoteStore, SessionInvalidator};
use crate::store::MutationStore;
use settle_engine::{
    DeleteResolution, DraftPayment, Payment, PaymentPatch, PaymentSchema, ProjectIndex,
    TEMP_ID_PREFIX,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Decides how a failed delete settles.
///
/// `NotFound` means somebody else already deleted the record. Statuses in
/// the probable-success set (gateway timeouts by default) usually mean the
/// delete went through behind a flaky proxy, so the removal is kept and the
/// next server snapshot decides. Anything else restores the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailurePolicy {
    probable_success: BTreeSet<u16>,
}

impl Default for DeleteFailurePolicy {
    fn default() -> Self {
        Self::new([502, 503, 504])
    }
}

impl DeleteFailurePolicy {
    pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            probable_success: statuses.into_iter().collect(),
        }
    }

    pub fn statuses(&self) -> impl Iterator<Item = u16> + '_ {
        self.probable_success.iter().copied()
    }

    pub fn resolve(&self, error: &RemoteError) -> DeleteResolution {
        match error {
            RemoteError::NotFound => DeleteResolution::AlreadyGone,
            _ => match error.status() {
                Some(status) if self.probable_success.contains(&status) => {
                    DeleteResolution::ProbableSuccess
                }
                _ => DeleteResolution::Restored,
            },
        }
    }
}

/// Generate a placeholder id for a record not yet known to the server.
pub fn temporary_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4().simple())
}

/// Runs optimistic mutations against one store.
pub struct OptimisticManager {
    store: Arc<MutationStore>,
    remote: Arc<dyn RemoteStore>,
    directory: Arc<ProjectDirectory>,
    clock: Arc<dyn Clock>,
    schema: PaymentSchema,
    delete_policy: DeleteFailurePolicy,
    invalidator: Option<Arc<dyn SessionInvalidator>>,
}

impl OptimisticManager {
    pub fn new(
        store: Arc<MutationStore>,
        remote: Arc<dyn RemoteStore>,
        directory: Arc<ProjectDirectory>,
        clock: Arc<dyn Clock>,
        delete_policy: DeleteFailurePolicy,
    ) -> Self {
        Self {
            store,
            remote,
            directory,
            clock,
            schema: PaymentSchema::new(),
            delete_policy,
            invalidator: None,
        }
    }

    pub fn with_invalidator(mut self, invalidator: Arc<dyn SessionInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    /// Insert `draft` under a temporary id, then create it remotely.
    ///
    /// On success the placeholder is swapped for the server record in
    /// place. On failure the placeholder is removed and the error returned.
    pub async fn create(&self, draft: DraftPayment) -> Result<Payment> {
        let temp_id = temporary_id();
        let projects = self.directory.peek();
        let placeholder = Payment::from_draft(temp_id.clone(), &draft, &projects);

        let now = self.clock.now();
        self.store
            .mutate(|view| view.insert_optimistic(placeholder, now))
            .map_err(SyncError::local)?;
        tracing::debug!(temp_id = %temp_id, "Optimistic create inserted");

        let confirmed = match self.remote.create(&draft).await {
            Ok(document) => self.schema.ingest(&document, &projects).map_err(SyncError::from),
            Err(e) => Err(self.remote_failure(e)),
        };

        match confirmed {
            Ok(confirmed) => {
                let id = confirmed.id.clone();
                let now = self.clock.now();
                self.store
                    .mutate(|view| view.confirm_create(&temp_id, confirmed.clone(), now));
                tracing::info!(temp_id = %temp_id, id = %id, "Create acknowledged");
                Ok(self.store.get(&id).unwrap_or(confirmed))
            }
            Err(e) => {
                let phase = self.store.mutate(|view| view.reject_create(&temp_id));
                tracing::warn!(temp_id = %temp_id, error = %e, ?phase, "Create failed, placeholder removed");
                Err(e)
            }
        }
    }

    /// Remove `id` from the list, then delete it remotely.
    ///
    /// Returns how the delete settled. Only a failure the policy cannot
    /// explain away restores the record and surfaces the error.
    pub async fn delete(&self, id: &str) -> Result<DeleteResolution> {
        let now = self.clock.now();
        let removed = match self.store.mutate(|view| view.begin_delete(id, now).map(|_| ())) {
            Ok(()) => true,
            // Not in the list: still ask the server, nothing to restore
            Err(settle_engine::Error::RecordNotFound(_)) => false,
            Err(e) => return Err(SyncError::local(e)),
        };
        tracing::debug!(id = %id, removed, "Optimistic delete applied");

        let resolution = match self.remote.delete(id).await {
            Ok(()) => DeleteResolution::Confirmed,
            Err(e) => {
                let resolution = self.delete_policy.resolve(&e);
                if resolution == DeleteResolution::Restored {
                    // Only the call that removed the row may put it back
                    if removed {
                        let now = self.clock.now();
                        self.store.mutate(|view| {
                            view.settle_delete(id, DeleteResolution::Restored, now)
                        });
                        tracing::warn!(id = %id, error = %e, "Delete failed, record restored");
                    } else {
                        tracing::warn!(id = %id, error = %e, "Delete failed");
                    }
                    return Err(self.remote_failure(e));
                }
                tracing::info!(id = %id, error = %e, ?resolution, "Delete failure treated as success");
                resolution
            }
        };

        if removed {
            let now = self.clock.now();
            self.store
                .mutate(|view| view.settle_delete(id, resolution, now));
        }
        tracing::info!(id = %id, ?resolution, "Delete settled");
        Ok(resolution)
    }

    /// Patch `id` locally, then remotely. A status-only patch uses the
    /// dedicated status call. The previous version comes back on failure.
    pub async fn update(&self, id: &str, patch: PaymentPatch) -> Result<Payment> {
        if patch.is_empty() {
            return self
                .store
                .get(id)
                .ok_or_else(|| SyncError::UnknownRecord(id.to_string()));
        }

        let projects = self.directory.peek();
        self.store
            .mutate(|view| {
                view.begin_update(id, |payment| apply_patch(&patch, payment, &projects))
                    .map(|_| ())
            })
            .map_err(SyncError::local)?;
        tracing::debug!(id = %id, "Optimistic update applied");

        let result = match patch.status {
            Some(status) if patch.is_status_only() => {
                self.remote.update_status(id, status).await
            }
            _ => self.remote.update(id, &patch).await,
        };

        match result {
            Ok(document) => {
                let updated = document.and_then(|doc| match self.schema.ingest(&doc, &projects) {
                    Ok(payment) => Some(payment),
                    Err(e) => {
                        tracing::warn!(id = %id, error = %e, "Server returned an invalid document, keeping local edit");
                        None
                    }
                });
                self.store.mutate(|view| view.confirm_update(id, updated));
                tracing::info!(id = %id, "Update acknowledged");
                self.store
                    .get(id)
                    .ok_or_else(|| SyncError::UnknownRecord(id.to_string()))
            }
            Err(e) => {
                self.store.mutate(|view| view.rollback_update(id));
                tracing::warn!(id = %id, error = %e, "Update failed, rolled back");
                Err(self.remote_failure(e))
            }
        }
    }

    fn remote_failure(&self, error: RemoteError) -> SyncError {
        if error == RemoteError::AuthExpired {
            tracing::warn!("Remote store reported an expired session");
            if let Some(invalidator) = &self.invalidator {
                invalidator.invalidate();
            }
        }
        SyncError::Remote(error)
    }
}

fn apply_patch(patch: &PaymentPatch, payment: &mut Payment, projects: &ProjectIndex) {
    patch.apply_to(payment);
    if let Some(project_id) = &patch.project_id {
        let label = projects.resolve(project_id);
        payment.project_name = label.name;
        payment.project_color = label.color;
    }
}

impl std::fmt::Debug for OptimisticManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticManager")
            .field("delete_policy", &self.delete_policy)
            .finish_non_exhaustive()
    }
}
