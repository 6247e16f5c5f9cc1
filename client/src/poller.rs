//! Polling fallback for platforms where push delivery silently stalls.

use crate::loader::ReconciliationLoader;
use crate::realtime::{ChangeCallback, SharedGate};
use settle_engine::{fingerprint, ReconcileReport, SnapshotSource};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Fetches the full collection on a fixed interval.
///
/// A fetch whose fingerprint matches the last notified one is dropped
/// without touching the store or the callback.
pub struct Poller {
    loader: Arc<ReconciliationLoader>,
    interval: Duration,
    gate: SharedGate,
    on_change: ChangeCallback,
}

impl Poller {
    pub fn new(
        loader: Arc<ReconciliationLoader>,
        interval: Duration,
        gate: SharedGate,
        on_change: ChangeCallback,
    ) -> Self {
        Self {
            loader,
            interval,
            gate,
            on_change,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Polling fallback started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
        tracing::debug!("Polling fallback stopped");
    }

    /// One fetch. Returns the reconcile report if the snapshot was new.
    pub async fn poll_once(&self) -> Option<ReconcileReport> {
        let payments = match self.loader.fetch().await {
            Ok(payments) => payments,
            Err(e) => {
                tracing::warn!(error = %e, "Poll failed");
                return None;
            }
        };

        let admitted = self
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .admit(fingerprint(&payments));
        if !admitted {
            tracing::trace!(records = payments.len(), "Poll unchanged");
            return None;
        }

        let report = self.loader.apply(payments, SnapshotSource::Server);
        let records = self.loader.store().records();
        (self.on_change)(records.as_slice());
        Some(report)
    }
}
