//! Dual-channel real-time sync: the push listener plus, where push cannot be
//! trusted, the polling fallback. Both run until the returned handle is torn
//! down or dropped.

use crate::config::SyncConfig;
use crate::listener::ChangeListener;
use crate::loader::ReconciliationLoader;
use crate::poller::Poller;
use crate::remote::PlatformCapability;
use settle_engine::{FingerprintGate, Payment};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Invoked with the visible list whenever a sync channel changed it.
pub type ChangeCallback = Arc<dyn Fn(&[Payment]) + Send + Sync>;

/// Fingerprint of the last list notified through either channel.
pub type SharedGate = Arc<Mutex<FingerprintGate>>;

/// Owns the background sync tasks.
#[derive(Debug)]
pub struct RealtimeHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    polling: bool,
}

impl RealtimeHandle {
    /// Whether the polling fallback was started.
    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn is_active(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Cancel both channels. Calling it again does nothing.
    pub fn teardown(&mut self) {
        if !self.is_active() {
            return;
        }
        self.shutdown.send_replace(true);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::info!("Realtime sync torn down");
    }

    /// Signal both channels and wait for them to finish their current step.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Realtime task ended abnormally");
            }
        }
        tracing::info!("Realtime sync shut down");
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Start the push listener, and the poller if `capability` (or the config)
/// asks for it.
pub fn start_realtime(
    loader: Arc<ReconciliationLoader>,
    config: &SyncConfig,
    capability: &dyn PlatformCapability,
    on_change: ChangeCallback,
) -> RealtimeHandle {
    let (shutdown, _) = watch::channel(false);
    let gate: SharedGate = Arc::new(Mutex::new(FingerprintGate::new()));

    let listener = ChangeListener::new(
        Arc::clone(&loader),
        config.reconnect_delay,
        Arc::clone(&gate),
        Arc::clone(&on_change),
    );
    let mut tasks = vec![listener.spawn(shutdown.subscribe())];

    let polling = config.force_polling || capability.needs_polling_fallback();
    if polling {
        let poller = Poller::new(loader, config.poll_interval, gate, on_change);
        tasks.push(poller.spawn(shutdown.subscribe()));
    }

    tracing::info!(polling, "Realtime sync started");
    RealtimeHandle {
        shutdown,
        tasks,
        polling,
    }
}
