//! The session's single source of truth for the payments list.
//!
//! All writers (optimistic manager, loader, listener, poller) go through
//! [`MutationStore::mutate`]. Each mutation runs to completion under the
//! store lock without awaiting, and readers only ever see whole lists
//! published through a `watch` channel.

use settle_engine::{visibly_equal, LocalView, Payment, Phase, Timestamp, ViewSnapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Published, read-only copy of the visible list.
pub type RecordList = Arc<Vec<Payment>>;

/// Local mutation store for one session.
#[derive(Debug)]
pub struct MutationStore {
    view: Mutex<LocalView<Payment>>,
    published: watch::Sender<RecordList>,
    revision: AtomicU64,
}

impl Default for MutationStore {
    fn default() -> Self {
        Self::from_view(LocalView::new())
    }
}

impl MutationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn from_view(view: LocalView<Payment>) -> Self {
        let (published, _) = watch::channel(Arc::new(view.records().to_vec()));
        Self {
            view: Mutex::new(view),
            published,
            revision: AtomicU64::new(0),
        }
    }

    /// Rebuild a store from a persisted mirror.
    pub fn rehydrate(
        snapshot: ViewSnapshot<Payment>,
        now: Timestamp,
    ) -> settle_engine::error::Result<Self> {
        let view = snapshot.into_view(now)?;
        tracing::info!(
            records = view.len(),
            pending_deletes = view.pending_deletes().len(),
            "Store rehydrated"
        );
        Ok(Self::from_view(view))
    }

    /// Snapshot the store for persistence.
    pub fn persist(&self, saved_at: Timestamp) -> ViewSnapshot<Payment> {
        self.lock().export(saved_at)
    }

    /// Apply `f` to the view, then publish the list if it changed.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut LocalView<Payment>) -> R) -> R {
        let mut view = self.lock();
        let result = f(&mut view);

        // Metadata-only changes refresh the published copy silently
        let notified = self.published.send_if_modified(|current| {
            if current.as_slice() == view.records() {
                return false;
            }
            let visible = !visibly_equal(current.as_slice(), view.records());
            *current = Arc::new(view.records().to_vec());
            visible
        });
        if notified {
            let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::trace!(revision, records = view.len(), "List published");
        }

        result
    }

    /// Receive every published list. Only whole lists are ever observed.
    pub fn subscribe(&self) -> watch::Receiver<RecordList> {
        self.published.subscribe()
    }

    /// The currently visible list.
    pub fn records(&self) -> RecordList {
        Arc::clone(&self.published.borrow())
    }

    /// Number of lists published so far.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: &str) -> Option<Payment> {
        self.lock().get(id).cloned()
    }

    pub fn phase(&self, id: &str) -> Option<Phase> {
        self.lock().phase(id)
    }

    /// Mutations whose remote call has not settled.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight()
    }

    pub fn pending_delete_count(&self) -> usize {
        self.lock().pending_deletes().len()
    }

    fn lock(&self) -> MutexGuard<'_, LocalView<Payment>> {
        // A panicking writer leaves a whole list behind; keep serving it
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
