//! Push channel: follows the remote subscription and feeds every delivery
//! into the store.

use crate::loader::ReconciliationLoader;
use crate::realtime::{ChangeCallback, SharedGate};
use crate::remote::{CollectionQuery, RawSnapshot};
use futures::StreamExt;
use settle_engine::fingerprint;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Background consumer of the push subscription.
///
/// Transport failures and stream ends are logged, followed by a fixed
/// reconnect delay and a fresh subscription. The store keeps showing the
/// last good list meanwhile.
pub struct ChangeListener {
    loader: Arc<ReconciliationLoader>,
    query: CollectionQuery,
    reconnect_delay: Duration,
    gate: SharedGate,
    on_change: ChangeCallback,
}

impl ChangeListener {
    pub fn new(
        loader: Arc<ReconciliationLoader>,
        reconnect_delay: Duration,
        gate: SharedGate,
        on_change: ChangeCallback,
    ) -> Self {
        Self {
            loader,
            query: CollectionQuery::payments(),
            reconnect_delay,
            gate,
            on_change,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u64 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }
            attempt += 1;

            match self.loader.remote().subscribe(&self.query).await {
                Ok(mut stream) => {
                    tracing::info!(collection = %self.query.collection, attempt, "Push subscription established");
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            delivery = stream.next() => match delivery {
                                Some(Ok(snapshot)) => self.handle(snapshot).await,
                                Some(Err(e)) => {
                                    tracing::warn!(error = %e, "Push subscription failed");
                                    break;
                                }
                                None => {
                                    tracing::warn!("Push subscription ended");
                                    break;
                                }
                            },
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "Push subscription could not be opened");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(self.reconnect_delay) => {
                    tracing::info!(delay_ms = self.reconnect_delay.as_millis() as u64, "Reconnecting push subscription");
                }
            }
        }
    }

    async fn handle(&self, snapshot: RawSnapshot) {
        let source = snapshot.source();
        let payments = self.loader.ingest(&snapshot.documents).await;
        let signature = fingerprint(&payments);
        let report = self.loader.apply(payments, source);

        // Polls returning what push already delivered stay quiet
        if source.is_authoritative() {
            self.gate
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(signature);
        }

        if report.changed {
            let records = self.loader.store().records();
            (self.on_change)(records.as_slice());
        }
    }
}
