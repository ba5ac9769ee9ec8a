//! Event delivery to connected clients.
//!
//! Each event is serialized once and the same frame is queued on every
//! recipient. Recipients are the connections open at the moment of the
//! call; a slow client drops frames instead of stalling the sender.

use std::sync::Arc;

use relay_core::events::OutboundEvent;
use relay_core::ids::ConnectionId;
use tokio::sync::mpsc::error::TrySendError;

use crate::connections::ConnectionRegistry;

/// Who receives an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Audience {
    /// Every open connection, the origin included.
    All,
    /// Every open connection except this one.
    Others(ConnectionId),
    /// This connection only.
    Only(ConnectionId),
}

impl Audience {
    fn includes(&self, id: &ConnectionId) -> bool {
        match self {
            Self::All => true,
            Self::Others(origin) => origin != id,
            Self::Only(target) => target == id,
        }
    }
}

#[derive(Clone)]
pub struct Fanout {
    connections: Arc<ConnectionRegistry>,
}

impl Fanout {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self { connections }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Queue `event` on every connection in `audience`.
    /// Returns how many connections accepted the frame.
    pub fn emit(&self, audience: Audience, event: &OutboundEvent) -> usize {
        let frame: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::error!(event = event.event_name(), error = %e, "failed to serialize event");
                return 0;
            }
        };

        let recipients: Vec<_> = match &audience {
            Audience::Only(id) => self.connections.get(id).into_iter().collect(),
            _ => self.connections.snapshot(),
        };

        let mut delivered = 0;
        for conn in recipients.iter().filter(|c| audience.includes(&c.id)) {
            match conn.send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection_id = %conn.id,
                        event = event.event_name(),
                        dropped = conn.drop_count(),
                        "send queue full, dropping event"
                    );
                }
                // Connection is closing; its disconnect path will clean up.
                Err(TrySendError::Closed(_)) => {}
            }
        }

        tracing::debug!(event = event.event_name(), recipients = delivered, "emitted");
        delivered
    }
}
