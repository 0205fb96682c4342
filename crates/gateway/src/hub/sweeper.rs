//! Heartbeat sweeper: drops connections that stopped heartbeating.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::state::ConnectionMap;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(60);

/// Wakes every 30 s and force-disconnects any connection whose last
/// heartbeat is older than 60 s. The loop itself never dies; per-connection
/// failures are logged and skipped.
pub fn spawn_sweeper(connections: Arc<ConnectionMap>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            for handle in connections.stale(HEARTBEAT_TTL) {
                tracing::warn!(
                    client_uid = %handle.client_uid,
                    age = ?handle.heartbeat_age(),
                    "heartbeat expired, disconnecting client"
                );
                handle.shutdown.cancel();
            }
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Outbound;
    use crate::state::ConnectionHandle;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn handle() -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::channel(8);
        ConnectionHandle::new(Uuid::new_v4(), Outbound::new(tx))
    }

    async fn advance_and_yield(duration: Duration) {
        tokio::time::advance(duration).await;
        // Give the sweeper task a chance to run its tick.
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stale_connection_is_disconnected_within_one_sweep() {
        let connections = Arc::new(ConnectionMap::new());
        let h = handle();
        connections.register(h.clone());

        let sweeper = spawn_sweeper(connections.clone());

        // 31 s in: still fresh enough.
        advance_and_yield(Duration::from_secs(31)).await;
        assert!(!h.shutdown.is_cancelled());

        // Once the TTL has passed, at most one further sweep period may
        // elapse before the connection is dropped.
        let mut cancelled = false;
        for _ in 0..3 {
            advance_and_yield(Duration::from_secs(31)).await;
            if h.shutdown.is_cancelled() {
                cancelled = true;
                break;
            }
        }
        assert!(cancelled);

        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_keep_the_connection_alive() {
        let connections = Arc::new(ConnectionMap::new());
        let h = handle();
        connections.register(h.clone());

        let sweeper = spawn_sweeper(connections.clone());

        for _ in 0..4 {
            advance_and_yield(Duration::from_secs(30)).await;
            h.touch();
        }
        assert!(!h.shutdown.is_cancelled());

        sweeper.abort();
    }
}
