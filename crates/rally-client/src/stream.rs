//! Fixed-cadence position streaming.

use crate::connection::ConnectionManager;
use crate::error::ClientError;
use rally_core::PlayerPosition;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shortest cadence; a zero interval is raised to this.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Send the latest local position every `interval` while connected.
///
/// Ticks that find no session are skipped, so streaming resumes by itself
/// after a reconnect. The task ends when the sending side of `positions` is
/// dropped.
pub fn spawn_position_stream(
    manager: ConnectionManager,
    mut positions: watch::Receiver<PlayerPosition>,
    interval: Duration,
) -> JoinHandle<()> {
    let interval = interval.max(MIN_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sent: u64 = 0;

        loop {
            ticker.tick().await;
            if positions.has_changed().is_err() {
                break;
            }
            let position = positions.borrow_and_update().clone();

            match manager.send_position(&position).await {
                Ok(()) => sent += 1,
                Err(ClientError::NotConnected) => {}
                Err(e) => tracing::debug!(error = %e, "Position frame dropped"),
            }
        }

        tracing::debug!(sent, "Position stream finished");
    })
}
