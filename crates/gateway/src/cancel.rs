//! Per-connection turn tracking with at-most-one-in-flight semantics.
//!
//! Each running turn gets a `CancellationToken` plus its task handle.
//! Beginning a new turn cancels the previous one and waits for it to
//! observe the cancellation, so a new turn never publishes output while an
//! old one is still live. Registrations carry a sequence number so a stale
//! turn finishing late cannot evict its successor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How long we wait for a cancelled turn to wind down before moving on.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Handed to the task that runs the turn.
#[derive(Clone)]
pub struct TurnTicket {
    pub token: CancellationToken,
    pub seq: u64,
}

struct ActiveTurn {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    seq: u64,
}

#[derive(Default)]
pub struct TurnMap {
    turns: Mutex<HashMap<Uuid, ActiveTurn>>,
    next_seq: AtomicU64,
}

impl TurnMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and await any previous turn for this connection, then
    /// register and return a ticket for the new one.
    pub async fn begin(&self, client_uid: Uuid) -> TurnTicket {
        let previous = self.turns.lock().remove(&client_uid);
        if let Some(previous) = previous {
            previous.token.cancel();
            if let Some(handle) = previous.handle {
                if tokio::time::timeout(CANCEL_GRACE, handle).await.is_err() {
                    tracing::warn!(client_uid = %client_uid, "previous turn did not wind down in time");
                }
            }
            tracing::info!(client_uid = %client_uid, "cancelled previous turn");
        }

        let ticket = TurnTicket {
            token: CancellationToken::new(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.turns.lock().insert(
            client_uid,
            ActiveTurn {
                token: ticket.token.clone(),
                handle: None,
                seq: ticket.seq,
            },
        );
        ticket
    }

    /// Attach the spawned task handle to the registered turn.
    pub fn attach(&self, client_uid: Uuid, seq: u64, handle: JoinHandle<()>) {
        let mut turns = self.turns.lock();
        match turns.get_mut(&client_uid) {
            Some(turn) if turn.seq == seq => turn.handle = Some(handle),
            // The turn was already replaced between begin and attach.
            _ => handle.abort(),
        }
    }

    /// Cancel a running turn. Returns true if one was found. A second
    /// cancel on an already-cancelled turn is a no-op.
    pub fn cancel(&self, client_uid: Uuid) -> bool {
        if let Some(turn) = self.turns.lock().get(&client_uid) {
            turn.token.cancel();
            true
        } else {
            false
        }
    }

    /// Cancel and await the active turn, used on disconnect.
    pub async fn cancel_and_wait(&self, client_uid: Uuid) {
        let turn = self.turns.lock().remove(&client_uid);
        if let Some(turn) = turn {
            turn.token.cancel();
            if let Some(handle) = turn.handle {
                let _ = tokio::time::timeout(CANCEL_GRACE, handle).await;
            }
        }
    }

    /// Drop the registration when a turn completes, unless it has already
    /// been superseded.
    pub fn finish(&self, client_uid: Uuid, seq: u64) {
        let mut turns = self.turns.lock();
        if turns.get(&client_uid).is_some_and(|t| t.seq == seq) {
            turns.remove(&client_uid);
        }
    }

    pub fn is_running(&self, client_uid: Uuid) -> bool {
        self.turns.lock().contains_key(&client_uid)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
