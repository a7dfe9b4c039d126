//! Periodic removal of expired upload reservations.
//!
//! Expired rows are already invisible to every read, so the sweeper only keeps
//! the table small; a missed tick changes nothing observable.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use scoremate_db::ReservationStore;

/// Purge once. Returns how many reservations were removed.
pub async fn sweep_expired_reservations(store: &dyn ReservationStore) -> anyhow::Result<u64> {
    let removed = store.purge_expired().await?;
    if removed > 0 {
        tracing::debug!(removed, "Expired upload reservations swept");
    }
    Ok(removed)
}

pub(crate) async fn run(
    store: Arc<dyn ReservationStore>,
    every: Duration,
    mut stop: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = sweep_expired_reservations(store.as_ref()).await {
                    tracing::error!(error = %e, "Reservation sweeper failed");
                }
            }
            _ = stop.recv() => break,
        }
    }
    tracing::debug!("Reservation sweeper stopped");
}
