//! # Settle Engine
//!
//! The deterministic core behind Settle's optimistic payment-request list.
//!
//! This crate owns every decision about what the locally held list looks like:
//! which optimistic records survive a reconciliation pass, how an acknowledged
//! create replaces its placeholder, when an optimistic delete is rolled back,
//! and whether a freshly fetched snapshot differs enough to notify anyone.
//! The async runtime (network calls, push subscriptions, timers) lives in
//! `settle-client` and only ever feeds data in here.
//!
//! ## Design Principles
//!
//! - **No IO**: time is passed in as a [`Timestamp`], remote data arrives as
//!   [`RawDocument`]s
//! - **Deterministic**: same inputs always produce the same list
//! - **Typed at the boundary**: raw documents are validated once by
//!   [`PaymentSchema`] and never trusted implicitly downstream
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Payment`] carries its domain fields plus [`LocalMeta`], the local-only
//! protection metadata (`is_temporary`, `added_at`). Algorithms are generic
//! over the [`Entity`] trait.
//!
//! ### Protection Window
//!
//! A record created locally is exempt from eviction while it is temporary
//! (its create call is in flight) or while `now - added_at` is below the
//! [`ProtectionPolicy`] window and the authoritative snapshot does not yet
//! contain it.
//!
//! ### Reconciliation
//!
//! [`Reconciler`] merges the local list with an authoritative snapshot:
//! protected records first, then the snapshot, authoritative version winning
//! on any shared id.
//!
//! ### Fingerprints
//!
//! [`fingerprint`] reduces a snapshot to its ordered `(id, status)` pairs so
//! pollers can skip snapshots that changed nothing observable.
//!
//! ## Quick Start
//!
//! ```rust
//! use settle_engine::{
//!     Category, DraftPayment, LocalView, Payment, ProjectIndex, ProtectionPolicy,
//!     SnapshotSource,
//! };
//!
//! let policy = ProtectionPolicy::default();
//! let mut view: LocalView<Payment> = LocalView::new();
//!
//! // 1. Optimistically insert a draft under a temporary id
//! let draft = DraftPayment::new("7", "Kim", Category::Material, 5000);
//! let optimistic = Payment::from_draft("temp_1", &draft, &ProjectIndex::new());
//! view.insert_optimistic(optimistic, 1_000).unwrap();
//!
//! // 2. A reconciliation pass that does not know about it yet keeps it
//! let report = view.reconcile(Vec::new(), SnapshotSource::Server, 1_500, &policy);
//! assert!(!report.changed);
//! assert_eq!(view.len(), 1);
//!
//! // 3. The server acknowledges with its own id
//! let confirmed = Payment::from_draft("42", &draft, &ProjectIndex::new());
//! view.confirm_create("temp_1", confirmed, 2_000);
//! assert_eq!(view.records()[0].id, "42");
//! ```
//!
//! ## Persistence
//!
//! Use [`LocalView::export`] and [`ViewSnapshot::into_view`] to mirror the list
//! into local storage. Timestamps are plain integers and round-trip exactly.

pub mod error;
pub mod fingerprint;
pub mod operation;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod view;

// Re-export main types at crate root
pub use error::Error;
pub use fingerprint::{fingerprint, Fingerprint, FingerprintGate};
pub use operation::{DeleteResolution, PendingDelete, Phase};
pub use reconcile::{ProtectionPolicy, ReconcileReport, Reconciled, Reconciler, SnapshotSource};
pub use record::{
    is_temporary_id, BankInfo, Category, DraftPayment, Entity, LocalMeta, Payment, PaymentPatch,
    PaymentStatus, Urgency, visibly_equal, TEMP_ID_PREFIX,
};
pub use schema::{
    FieldDef, FieldType, PaymentSchema, ProjectIndex, ProjectLabel, ProjectRef, RawDocument,
    DEFAULT_PROJECT_COLOR,
};
pub use snapshot::{ViewSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use view::LocalView;

/// Type aliases for clarity
pub type RecordId = String;
pub type ProjectId = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
/// Amounts are whole currency units.
pub type Money = i64;
