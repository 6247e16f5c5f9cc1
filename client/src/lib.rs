//! # Settle Client
//!
//! Async runtime around `settle-engine`: keeps a session's payment-request
//! list in step with the remote document store while the user mutates it
//! optimistically.
//!
//! ## Components
//!
//! - [`MutationStore`]: the single list every writer goes through
//! - [`OptimisticManager`]: create/update/delete, applied locally first
//! - [`ReconciliationLoader`]: full fetch + protection-aware merge
//! - [`ChangeListener`]: push subscription with reconnect
//! - [`Poller`]: fingerprint-gated polling fallback
//! - [`RealtimeHandle`]: one teardown for both channels
//! - [`SyncSession`]: wires all of the above for one signed-in user
//!
//! ## Example
//!
//! ```rust,no_run
//! use settle_client::{MemoryRemote, SyncConfig, SyncSession};
//! use settle_engine::{Category, DraftPayment};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let remote = Arc::new(MemoryRemote::new());
//! let session = SyncSession::builder(remote, SyncConfig::default()).build()?;
//! let mut realtime = session.start_realtime(|records| {
//!     println!("{} payment requests", records.len());
//! });
//!
//! let draft = DraftPayment::new("7", "Kim", Category::Material, 5000);
//! let payment = session.create(draft).await?;
//! println!("created {}", payment.id);
//!
//! realtime.teardown();
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod listener;
pub mod loader;
pub mod logging;
pub mod memory;
pub mod optimistic;
pub mod poller;
pub mod realtime;
pub mod remote;
pub mod session;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use directory::ProjectDirectory;
pub use error::{RemoteError, Result, SyncError};
pub use listener::ChangeListener;
pub use loader::ReconciliationLoader;
pub use memory::{FailPoint, MemoryRemote};
pub use optimistic::{DeleteFailurePolicy, OptimisticManager};
pub use poller::Poller;
pub use realtime::{start_realtime, ChangeCallback, RealtimeHandle, SharedGate};
pub use remote::{
    PlatformCapability, CollectionQuery, RawSnapshot, RemoteStore, SessionInvalidator,
    SnapshotStream, StaticCapability,
};
pub use session::{SyncSession, SyncSessionBuilder};
pub use store::{MutationStore, RecordList};
