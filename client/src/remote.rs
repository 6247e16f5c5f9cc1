//! Contract with the authoritative document store and its collaborators.

use crate::error::RemoteError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use settle_engine::{
    DraftPayment, PaymentPatch, PaymentStatus, ProjectRef, RawDocument, SnapshotSource,
};

/// Which collection a subscription follows, and in what order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionQuery {
    pub collection: String,
    pub order_by: String,
    pub descending: bool,
}

impl CollectionQuery {
    /// Payment requests, newest id first.
    pub fn payments() -> Self {
        Self {
            collection: "payments".to_string(),
            order_by: "id".to_string(),
            descending: true,
        }
    }
}

/// One delivery from a push subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSnapshot {
    pub documents: Vec<RawDocument>,
    /// Served from the store SDK's local cache rather than the server
    pub from_cache: bool,
}

impl RawSnapshot {
    pub fn source(&self) -> SnapshotSource {
        if self.from_cache {
            SnapshotSource::Cache
        } else {
            SnapshotSource::Server
        }
    }
}

/// Stream of push deliveries. Dropping it unsubscribes.
pub type SnapshotStream = BoxStream<'static, Result<RawSnapshot, RemoteError>>;

/// The remote document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Full payments snapshot, newest id first.
    async fn list_all(&self) -> Result<Vec<RawDocument>, RemoteError>;

    /// Persist a draft. The store assigns the id.
    async fn create(&self, draft: &DraftPayment) -> Result<RawDocument, RemoteError>;

    async fn update(
        &self,
        id: &str,
        patch: &PaymentPatch,
    ) -> Result<Option<RawDocument>, RemoteError>;

    async fn update_status(
        &self,
        id: &str,
        status: PaymentStatus,
    ) -> Result<Option<RawDocument>, RemoteError>;

    async fn delete(&self, id: &str) -> Result<(), RemoteError>;

    /// Projects used to label payments.
    async fn list_projects(&self) -> Result<Vec<ProjectRef>, RemoteError>;

    /// Open a push subscription. The first delivery is the current snapshot.
    async fn subscribe(&self, query: &CollectionQuery) -> Result<SnapshotStream, RemoteError>;
}

/// Tells whether push delivery can be trusted on this platform.
pub trait PlatformCapability: Send + Sync {
    fn needs_polling_fallback(&self) -> bool;
}

/// A capability check with a fixed answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCapability(pub bool);

impl PlatformCapability for StaticCapability {
    fn needs_polling_fallback(&self) -> bool {
        self.0
    }
}

/// Notified when the remote store reports an expired session.
pub trait SessionInvalidator: Send + Sync {
    fn invalidate(&self);
}
