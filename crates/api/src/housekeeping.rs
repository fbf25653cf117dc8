//! Scheduled background tasks for the relay.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::websocket::RelayState;

/// Spawn the periodic `check-sunset` reminder.
///
/// The first reminder goes out one full `period` after start. Returns a
/// handle that can be used to abort the task.
pub fn spawn_sunset_ticker(relay: RelayState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = period.as_secs(), "Sunset reminder task started");

        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            relay.check_sunset().await;
        }
    })
}
