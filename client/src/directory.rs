//! Project directory: the project id → label lookup that payment documents
//! are enriched with before they reach the store.

use crate::error::RemoteError;
use crate::remote::RemoteStore;
use settle_engine::ProjectIndex;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Lazily loaded, shared project lookup.
///
/// Concurrent callers of [`ProjectDirectory::ensure_loaded`] share one
/// remote call. A failed load is not cached, so the next caller retries.
pub struct ProjectDirectory {
    remote: Arc<dyn RemoteStore>,
    index: Mutex<Option<Arc<ProjectIndex>>>,
}

impl ProjectDirectory {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            index: Mutex::new(None),
        }
    }

    /// Return the loaded index, fetching it first if needed.
    pub async fn ensure_loaded(&self) -> Result<Arc<ProjectIndex>, RemoteError> {
        let mut index = self.index.lock().await;
        if let Some(loaded) = index.as_ref() {
            return Ok(Arc::clone(loaded));
        }

        let projects = self.remote.list_projects().await?;
        let loaded = Arc::new(ProjectIndex::from_refs(projects));
        tracing::info!(projects = loaded.len(), "Project directory loaded");
        *index = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Like [`ensure_loaded`](Self::ensure_loaded), but falls back to an
    /// empty index (default labels) when the load fails.
    pub async fn current_or_default(&self) -> Arc<ProjectIndex> {
        match self.ensure_loaded().await {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(error = %e, "Project directory unavailable, using default labels");
                Arc::default()
            }
        }
    }

    /// The loaded index without waiting on the network. Default labels if
    /// nothing is loaded yet or a load is in progress.
    pub fn peek(&self) -> Arc<ProjectIndex> {
        match self.index.try_lock() {
            Ok(index) => index.clone().unwrap_or_default(),
            Err(_) => Arc::default(),
        }
    }

    pub async fn is_loaded(&self) -> bool {
        self.index.lock().await.is_some()
    }

    /// Forget the loaded index; the next lookup refetches.
    pub async fn invalidate(&self) {
        *self.index.lock().await = None;
        tracing::debug!("Project directory invalidated");
    }
}

impl std::fmt::Debug for ProjectDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectDirectory").finish_non_exhaustive()
    }
}
