//! Heartbeat sweep
//!
//! Every period: connections that never ponged since the last sweep are
//! terminated (silently; the peer is presumed gone), everything else is
//! marked stale and pinged again. The connection drivers flip the flag back
//! on pong receipt.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use super::connection::{table_handles, ConnectionTable};

pub(crate) fn spawn_sweep(
    table: ConnectionTable,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; connections deserve one full period
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => sweep_once(&table),
                _ = shutdown_rx.recv() => {
                    debug!("Heartbeat sweep stopped");
                    break;
                }
            }
        }
    })
}

fn sweep_once(table: &ConnectionTable) {
    for handle in table_handles(table) {
        if !handle.is_alive() {
            debug!(conn = handle.id(), "No pong since last sweep, terminating");
            handle.terminate();
            continue;
        }
        handle.mark_stale();
        handle.send_ping();
    }
}
