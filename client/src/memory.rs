//! In-memory remote store.
//!
//! Behaves like the hosted document store closely enough to drive the whole
//! runtime: numeric server-assigned ids, newest-first snapshots, a push
//! subscription per caller. On top of that it can inject failures, hold
//! create calls open, replay stale cache deliveries and break live
//! subscriptions.

use crate::error::RemoteError;
use crate::remote::{CollectionQuery, RawSnapshot, RemoteStore, SnapshotStream};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use settle_engine::{
    DraftPayment, PaymentPatch, PaymentSchema, PaymentStatus, ProjectRef, RawDocument,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

/// Remote call a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    List,
    Create,
    Update,
    Delete,
    Projects,
    Subscribe,
}

type Subscriber = mpsc::UnboundedSender<Result<RawSnapshot, RemoteError>>;

#[derive(Debug)]
struct State {
    documents: BTreeMap<u64, Value>,
    next_id: u64,
    projects: Vec<ProjectRef>,
    failures: HashMap<FailPoint, VecDeque<RemoteError>>,
    subscribers: Vec<Subscriber>,
    push_muted: bool,
}

impl State {
    fn snapshot(&self) -> Vec<RawDocument> {
        self.documents
            .iter()
            .rev()
            .map(|(id, data)| RawDocument::new(id.to_string(), data.clone()))
            .collect()
    }

    fn publish(&mut self) {
        if self.push_muted {
            return;
        }
        let snapshot = RawSnapshot {
            documents: self.snapshot(),
            from_cache: false,
        };
        self.subscribers
            .retain(|tx| tx.send(Ok(snapshot.clone())).is_ok());
    }

    fn document(&self, id: &str) -> Option<RawDocument> {
        let key = id.parse::<u64>().ok()?;
        self.documents
            .get(&key)
            .map(|data| RawDocument::new(id, data.clone()))
    }
}

/// A `RemoteStore` held entirely in memory.
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<State>,
    create_gate: watch::Sender<bool>,
    list_calls: AtomicUsize,
    project_calls: AtomicUsize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (create_gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(State {
                documents: BTreeMap::new(),
                next_id: 1,
                projects: Vec::new(),
                failures: HashMap::new(),
                subscribers: Vec::new(),
                push_muted: false,
            }),
            create_gate,
            list_calls: AtomicUsize::new(0),
            project_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_projects(self, projects: Vec<ProjectRef>) -> Self {
        self.state().projects = projects;
        self
    }

    /// Id the next created document receives.
    pub fn with_next_id(self, next_id: u64) -> Self {
        self.state().next_id = next_id;
        self
    }

    // ------------------------------------------------------------------
    // Server-side changes (other clients, background jobs)
    // ------------------------------------------------------------------

    /// Store a draft as if another client created it.
    pub fn insert(&self, draft: &DraftPayment) -> Result<RawDocument, RemoteError> {
        let data = PaymentSchema::draft_document(draft).map_err(|e| RemoteError::Rejected {
            status: 400,
            message: e.to_string(),
        })?;
        Ok(self.insert_raw(data))
    }

    /// Store a document body verbatim, valid or not.
    pub fn insert_raw(&self, data: Value) -> RawDocument {
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        state.documents.insert(id, data.clone());
        state.publish();
        RawDocument::new(id.to_string(), data)
    }

    /// Move a document's status. Returns `false` if the id is unknown.
    pub fn set_status(&self, id: &str, status: PaymentStatus) -> bool {
        let Ok(key) = id.parse::<u64>() else {
            return false;
        };
        let mut state = self.state();
        let Some(data) = state.documents.get_mut(&key).and_then(Value::as_object_mut) else {
            return false;
        };
        data.insert(
            "status".to_string(),
            Value::String(status.as_str().to_string()),
        );
        state.publish();
        true
    }

    /// Remove a document. Returns `false` if the id is unknown.
    pub fn remove(&self, id: &str) -> bool {
        let Ok(key) = id.parse::<u64>() else {
            return false;
        };
        let mut state = self.state();
        let removed = state.documents.remove(&key).is_some();
        if removed {
            state.publish();
        }
        removed
    }

    pub fn documents(&self) -> Vec<RawDocument> {
        self.state().snapshot()
    }

    pub fn document(&self, id: &str) -> Option<RawDocument> {
        self.state().document(id)
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Make the next call through `point` fail with `error`. Queued errors
    /// are consumed in order.
    pub fn fail_next(&self, point: FailPoint, error: RemoteError) {
        self.state()
            .failures
            .entry(point)
            .or_default()
            .push_back(error);
    }

    /// Keep create calls pending until [`release_creates`](Self::release_creates).
    pub fn hold_creates(&self) {
        self.create_gate.send_replace(false);
    }

    pub fn release_creates(&self) {
        self.create_gate.send_replace(true);
    }

    /// Stop (or resume) push deliveries without closing subscriptions.
    pub fn mute_push(&self, muted: bool) {
        self.state().push_muted = muted;
    }

    /// Deliver `documents` to every subscriber as a cache-origin snapshot.
    pub fn push_cached(&self, documents: Vec<RawDocument>) {
        let snapshot = RawSnapshot {
            documents,
            from_cache: true,
        };
        self.state()
            .subscribers
            .retain(|tx| tx.send(Ok(snapshot.clone())).is_ok());
    }

    /// Fail every live subscription with `error` and close it.
    pub fn break_subscriptions(&self, error: RemoteError) {
        let subscribers = std::mem::take(&mut self.state().subscribers);
        for tx in subscribers {
            let _ = tx.send(Err(error.clone()));
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Live push subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn project_calls(&self) -> usize {
        self.project_calls.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(&self, point: FailPoint) -> Result<(), RemoteError> {
        match self
            .state()
            .failures
            .get_mut(&point)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn patch_document(&self, id: &str, fields: Value) -> Result<RawDocument, RemoteError> {
        let mut state = self.state();
        let key = id.parse::<u64>().map_err(|_| RemoteError::NotFound)?;
        let data = state
            .documents
            .get_mut(&key)
            .ok_or(RemoteError::NotFound)?;

        if let (Some(target), Value::Object(fields)) = (data.as_object_mut(), fields) {
            for (name, value) in fields {
                target.insert(name, value);
            }
        }
        let document = RawDocument::new(id, data.clone());
        state.publish();
        Ok(document)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn list_all(&self) -> Result<Vec<RawDocument>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure(FailPoint::List)?;
        Ok(self.documents())
    }

    async fn create(&self, draft: &DraftPayment) -> Result<RawDocument, RemoteError> {
        self.take_failure(FailPoint::Create)?;

        let mut gate = self.create_gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(RemoteError::Closed);
        }

        self.insert(draft)
    }

    async fn update(
        &self,
        id: &str,
        patch: &PaymentPatch,
    ) -> Result<Option<RawDocument>, RemoteError> {
        self.take_failure(FailPoint::Update)?;
        let fields = serde_json::to_value(patch).map_err(|e| RemoteError::Rejected {
            status: 400,
            message: e.to_string(),
        })?;
        self.patch_document(id, fields).map(Some)
    }

    async fn update_status(
        &self,
        id: &str,
        status: PaymentStatus,
    ) -> Result<Option<RawDocument>, RemoteError> {
        self.take_failure(FailPoint::Update)?;
        let fields = serde_json::json!({ "status": status.as_str() });
        self.patch_document(id, fields).map(Some)
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.take_failure(FailPoint::Delete)?;
        if self.remove(id) {
            Ok(())
        } else {
            Err(RemoteError::NotFound)
        }
    }

    async fn list_projects(&self) -> Result<Vec<ProjectRef>, RemoteError> {
        self.project_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure(FailPoint::Projects)?;
        Ok(self.state().projects.clone())
    }

    async fn subscribe(&self, query: &CollectionQuery) -> Result<SnapshotStream, RemoteError> {
        self.take_failure(FailPoint::Subscribe)?;

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state();
            if !state.push_muted {
                let initial = RawSnapshot {
                    documents: state.snapshot(),
                    from_cache: false,
                };
                let _ = tx.send(Ok(initial));
            }
            state.subscribers.push(tx);
        }
        tracing::debug!(collection = %query.collection, "Memory subscription opened");

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}
