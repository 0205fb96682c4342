//! The WebSocket hub: single point of ingress and egress.

pub mod sweeper;
pub mod ws;

use serde_json::Value;
use tokio::sync::mpsc;

use aria_protocol::ServerMessage;

use crate::state::ConnectionMap;

/// One frame queued for the client. Tool side-channel payloads carry their
/// own `type` field and go out verbatim.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Typed(ServerMessage),
    Raw(Value),
}

/// Per-connection sender. Sends are best-effort: a gone client just drops
/// the frame.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<OutboundMessage>,
}

impl Outbound {
    pub fn new(tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, message: ServerMessage) {
        if self.tx.send(OutboundMessage::Typed(message)).await.is_err() {
            tracing::debug!("outbound channel closed, dropping message");
        }
    }

    pub async fn send_raw(&self, payload: Value) {
        if self.tx.send(OutboundMessage::Raw(payload)).await.is_err() {
            tracing::debug!("outbound channel closed, dropping raw payload");
        }
    }

    pub fn try_send(&self, message: ServerMessage) -> bool {
        self.tx.try_send(OutboundMessage::Typed(message)).is_ok()
    }
}

/// Best-effort send to every connection; per-socket failures are logged
/// and skipped.
pub fn broadcast(connections: &ConnectionMap, message: &ServerMessage) {
    for handle in connections.all() {
        if !handle.outbound.try_send(message.clone()) {
            tracing::warn!(client_uid = %handle.client_uid, "broadcast send failed, skipping");
        }
    }
}
