//! Optimistic mutation bookkeeping.
//!
//! Every locally initiated change moves a record through a small state
//! machine:
//!
//! ```text
//! PendingCreate ──ack──▶ Confirmed ──delete──▶ PendingDelete ──ack──▶ Deleted
//!       │                  ▲    │                    │
//!       └──fail──▶ Failed  │    └─update─▶ PendingUpdate
//!                          └──────restore────────────┘
//! ```

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Where a record sits in its optimistic lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Inserted under a temporary id, create call in flight
    PendingCreate,
    /// Known to the server (or treated as such)
    Confirmed,
    /// Optimistically patched, update call in flight
    PendingUpdate,
    /// Optimistically removed, delete call in flight
    PendingDelete,
    /// Removal settled; tombstone kept until the server stops listing it
    Deleted,
    /// Create rejected; record removed
    Failed,
}

/// How a delete call settled, from the list's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteResolution {
    /// The server acknowledged the delete
    Confirmed,
    /// The server did not know the id; nothing to undo
    AlreadyGone,
    /// The call failed in a way that usually means it went through
    ProbableSuccess,
    /// The call failed for real; the record goes back where it was
    Restored,
}

impl DeleteResolution {
    /// Whether the optimistic removal stays applied.
    pub fn keeps_removal(&self) -> bool {
        !matches!(self, DeleteResolution::Restored)
    }
}

/// An optimistically removed record, kept so it can be restored in place and
/// so stale snapshots cannot resurrect it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDelete<T> {
    pub record: T,
    /// Position in the list at removal time
    pub index: usize,
    pub requested_at: Timestamp,
    /// Set once the delete call settled without a restore
    pub settled_at: Option<Timestamp>,
}

impl<T> PendingDelete<T> {
    pub fn new(record: T, index: usize, requested_at: Timestamp) -> Self {
        Self {
            record,
            index,
            requested_at,
            settled_at: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled_at.is_some()
    }

    pub fn phase(&self) -> Phase {
        if self.is_settled() {
            Phase::Deleted
        } else {
            Phase::PendingDelete
        }
    }

    /// Whether a server snapshot listing the id may bring the record back.
    pub fn expired(&self, now: Timestamp, window_ms: u64) -> bool {
        match self.settled_at {
            Some(settled_at) => now.saturating_sub(settled_at) >= window_ms,
            None => false,
        }
    }
}
