//! Per-session heartbeat task
//!
//! One task per session, started when the session registers and stopped
//! by its cancellation token at close. A probe failure is a liveness
//! signal only: it flips the health flag but never touches the timeout
//! streak, which is scored exclusively by the correlation engine.

use super::{ClientSession, HEARTBEAT_INTERVAL};
use crate::guard;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Spawn the heartbeat probe loop for a session.
pub fn spawn_heartbeat(session: Arc<ClientSession>) -> JoinHandle<()> {
    tokio::spawn(async move {
        guard::guarded("heartbeat", run(session)).await;
    })
}

async fn run(session: Arc<ClientSession>) {
    let mut ticker = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = session.closed() => break,
            _ = ticker.tick() => {
                if let Err(e) = session.send_ping().await {
                    tracing::debug!(
                        group = %session.group,
                        id = %session.id,
                        error = %e,
                        "heartbeat probe failed"
                    );
                    session.mark_unhealthy();
                }
            }
        }
    }
    tracing::debug!(group = %session.group, id = %session.id, "heartbeat task stopped");
}
