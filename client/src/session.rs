//! One sync session: the store and every component that writes to it.

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::directory::ProjectDirectory;
use crate::error::Result;
use crate::loader::ReconciliationLoader;
use crate::optimistic::OptimisticManager;
use crate::realtime::{start_realtime, RealtimeHandle};
use crate::remote::{PlatformCapability, RemoteStore, SessionInvalidator, StaticCapability};
use crate::store::{MutationStore, RecordList};
use settle_engine::{
    DeleteResolution, DraftPayment, Payment, PaymentPatch, ReconcileReport, ViewSnapshot,
};
use std::sync::Arc;
use tokio::sync::watch;

/// Builder for [`SyncSession`].
pub struct SyncSessionBuilder {
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    capability: Arc<dyn PlatformCapability>,
    invalidator: Option<Arc<dyn SessionInvalidator>>,
    snapshot: Option<ViewSnapshot<Payment>>,
}

impl SyncSessionBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_capability(mut self, capability: Arc<dyn PlatformCapability>) -> Self {
        self.capability = capability;
        self
    }

    pub fn with_invalidator(mut self, invalidator: Arc<dyn SessionInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    /// Start from a persisted mirror instead of an empty list.
    pub fn with_snapshot(mut self, snapshot: ViewSnapshot<Payment>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn build(self) -> Result<SyncSession> {
        let store = match self.snapshot {
            Some(snapshot) => MutationStore::rehydrate(snapshot, self.clock.now())?,
            None => MutationStore::new(),
        };
        let store = Arc::new(store);
        let directory = Arc::new(ProjectDirectory::new(Arc::clone(&self.remote)));

        let mut manager = OptimisticManager::new(
            Arc::clone(&store),
            Arc::clone(&self.remote),
            Arc::clone(&directory),
            Arc::clone(&self.clock),
            self.config.delete_policy.clone(),
        );
        if let Some(invalidator) = self.invalidator {
            manager = manager.with_invalidator(invalidator);
        }

        let loader = Arc::new(ReconciliationLoader::new(
            Arc::clone(&store),
            Arc::clone(&self.remote),
            Arc::clone(&directory),
            Arc::clone(&self.clock),
            self.config.protection_policy(),
        ));

        Ok(SyncSession {
            config: self.config,
            store,
            directory,
            manager,
            loader,
            clock: self.clock,
            capability: self.capability,
        })
    }
}

/// The payments list of one signed-in session and the machinery that keeps
/// it in sync.
pub struct SyncSession {
    config: SyncConfig,
    store: Arc<MutationStore>,
    directory: Arc<ProjectDirectory>,
    manager: OptimisticManager,
    loader: Arc<ReconciliationLoader>,
    clock: Arc<dyn Clock>,
    capability: Arc<dyn PlatformCapability>,
}

impl SyncSession {
    /// Start building a session. Defaults: system clock, push trusted.
    pub fn builder(remote: Arc<dyn RemoteStore>, config: SyncConfig) -> SyncSessionBuilder {
        SyncSessionBuilder {
            remote,
            config,
            clock: Arc::new(SystemClock),
            capability: Arc::new(StaticCapability(false)),
            invalidator: None,
            snapshot: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MutationStore> {
        &self.store
    }

    pub fn records(&self) -> RecordList {
        self.store.records()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecordList> {
        self.store.subscribe()
    }

    pub async fn create(&self, draft: DraftPayment) -> Result<Payment> {
        self.manager.create(draft).await
    }

    pub async fn update(&self, id: &str, patch: PaymentPatch) -> Result<Payment> {
        self.manager.update(id, patch).await
    }

    pub async fn delete(&self, id: &str) -> Result<DeleteResolution> {
        self.manager.delete(id).await
    }

    /// Fetch the full collection once and reconcile against it.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.loader.reconcile().await
    }

    /// Reload project labels on the next pass.
    pub async fn refresh_projects(&self) {
        self.directory.invalidate().await;
    }

    /// Start push sync (and polling where needed).
    pub fn start_realtime(
        &self,
        on_change: impl Fn(&[Payment]) + Send + Sync + 'static,
    ) -> RealtimeHandle {
        start_realtime(
            Arc::clone(&self.loader),
            &self.config,
            self.capability.as_ref(),
            Arc::new(on_change),
        )
    }

    /// Snapshot the store for persistence.
    pub fn persist(&self) -> ViewSnapshot<Payment> {
        self.store.persist(self.clock.now())
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("config", &self.config)
            .field("records", &self.store.records().len())
            .finish_non_exhaustive()
    }
}
