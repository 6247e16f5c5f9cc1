//! settle-watch - run a sync session against an in-memory store and log
//! every list change.
//!
//! A background job keeps moving payment statuses on the "server" while the
//! session creates and deletes its own requests, so push, polling and
//! optimistic paths all get exercised. Stop with Ctrl-C.

use settle_client::{logging, MemoryRemote, StaticCapability, SyncConfig, SyncSession};
use settle_engine::{Category, DraftPayment, PaymentStatus, ProjectRef, Urgency};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    dotenvy::dotenv().ok();
    logging::init("settle_client=debug,settle_watch=info");
    let config = SyncConfig::from_env()?;

    tracing::info!(
        window_ms = config.protection_window_ms,
        poll_ms = config.poll_interval.as_millis() as u64,
        force_polling = config.force_polling,
        "Starting settle-watch"
    );

    let remote = Arc::new(MemoryRemote::new().with_projects(vec![
        ProjectRef {
            id: "7".into(),
            name: "Seongsu loft".into(),
            color: Some("#FF8800".into()),
        },
        ProjectRef::new("8", "Hannam villa"),
    ]));
    for (project, item, amount) in [("7", "Tiles", 320_000), ("8", "Scaffolding", 1_200_000)] {
        remote.insert(
            &DraftPayment::new(project, "Site office", Category::Material, amount)
                .with_item_name(item),
        )?;
    }

    let session = SyncSession::builder(remote.clone(), config)
        .with_capability(Arc::new(StaticCapability(true)))
        .build()?;

    let mut realtime = session.start_realtime(|records| {
        let summary: Vec<String> = records
            .iter()
            .map(|p| format!("{}:{}", p.id, p.status))
            .collect();
        tracing::info!(count = records.len(), list = %summary.join(" "), "List changed");
    });

    // Background job on the server side
    let job = tokio::spawn({
        let remote = remote.clone();
        async move {
            let cycle = [
                PaymentStatus::Reviewing,
                PaymentStatus::Approved,
                PaymentStatus::Completed,
            ];
            let mut tick = tokio::time::interval(Duration::from_secs(7));
            for step in 0usize.. {
                tick.tick().await;
                let documents = remote.documents();
                if documents.is_empty() {
                    continue;
                }
                let target = &documents[step % documents.len()];
                let status = cycle[step % cycle.len()];
                remote.set_status(&target.id, status);
                tracing::info!(id = %target.id, %status, "Background job moved status");
            }
        }
    });

    let mut draft = DraftPayment::new("7", "Kim", Category::Labor, 450_000)
        .with_item_name("Electrician day rate");
    draft.urgency = Urgency::Urgent;
    let created = session.create(draft).await?;
    tracing::info!(id = %created.id, "Created payment request");

    tokio::signal::ctrl_c().await?;

    job.abort();
    realtime.teardown();
    tracing::info!(
        records = session.records().len(),
        snapshot_bytes = session.persist().to_json()?.len(),
        "Stopped"
    );

    Ok(())
}
