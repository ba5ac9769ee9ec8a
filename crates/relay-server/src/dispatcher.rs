//! Routes inbound chat events to presence updates, store calls and fanout.
//!
//! Every failure is caught here and reported to the originating connection
//! as an `error` event. Nothing a client sends can close its connection or
//! reach another client as an error.

use std::sync::Arc;

use relay_core::errors::RelayError;
use relay_core::events::{InboundEvent, MessageRef, OutboundEvent, Profile, UpdateMessage};
use relay_core::ids::ConnectionId;
use relay_core::messages::NewMessage;
use tokio::sync::mpsc;
use tracing::instrument;

use crate::connections::ConnectionRegistry;
use crate::fanout::{Audience, Fanout};
use crate::presence::PresenceRegistry;
use crate::service::MessageService;

pub const ERR_SAVE: &str = "Failed to save message";
pub const ERR_UPDATE: &str = "Failed to update message";
pub const ERR_DELETE: &str = "Failed to delete message";
pub const ERR_NOT_FOUND: &str = "Message not found";
pub const ERR_MALFORMED: &str = "Malformed event";

#[derive(Clone)]
pub struct Dispatcher {
    presence: Arc<PresenceRegistry>,
    fanout: Fanout,
    service: Arc<MessageService>,
}

impl Dispatcher {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        connections: Arc<ConnectionRegistry>,
        service: Arc<MessageService>,
    ) -> Self {
        Self {
            presence,
            fanout: Fanout::new(connections),
            service,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        self.fanout.connections()
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    pub fn service(&self) -> &Arc<MessageService> {
        &self.service
    }

    /// Open a connection. It receives broadcasts right away but is not
    /// present until it joins.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<Arc<str>>) {
        let (id, rx) = self.connections().register();
        tracing::info!(connection_id = %id, connections = self.connections().count(), "client connected");
        (id, rx)
    }

    /// Parse and handle one text frame from `origin`.
    pub async fn handle_frame(&self, origin: &ConnectionId, raw: &str) {
        match InboundEvent::parse(raw) {
            Ok(event) => self.handle(origin, event).await,
            Err(e) => {
                tracing::debug!(connection_id = %origin, error = %e, "rejected frame");
                self.reply_error(origin, ERR_MALFORMED);
            }
        }
    }

    #[instrument(skip(self, origin, event), fields(connection_id = %origin, event = event.event_name()))]
    pub async fn handle(&self, origin: &ConnectionId, event: InboundEvent) {
        match event {
            InboundEvent::Join(profile) => self.join(origin, profile),
            InboundEvent::SendMessage(message) => self.send_message(origin, message).await,
            InboundEvent::UpdateMessage(update) => self.update_message(origin, update).await,
            InboundEvent::DeleteMessage(target) => self.delete_message(origin, target).await,
            InboundEvent::Typing(data) => {
                self.fanout
                    .emit(Audience::Others(origin.clone()), &OutboundEvent::UserTyping(data));
            }
            InboundEvent::StopTyping(data) => {
                self.fanout.emit(
                    Audience::Others(origin.clone()),
                    &OutboundEvent::UserStoppedTyping(data),
                );
            }
        }
    }

    fn join(&self, origin: &ConnectionId, profile: Profile) {
        let fresh = self.presence.register(origin.clone(), profile.clone());
        tracing::info!(name = profile.name().unwrap_or(""), fresh, "participant joined");

        // Registration precedes the snapshot, so the joiner sees itself.
        let online = self.presence.snapshot();
        self.fanout
            .emit(Audience::Others(origin.clone()), &OutboundEvent::UserJoined(profile));
        self.fanout
            .emit(Audience::Only(origin.clone()), &OutboundEvent::OnlineUsers(online));
        self.broadcast_count();
    }

    async fn send_message(&self, origin: &ConnectionId, message: NewMessage) {
        match self.service.send(message).await {
            Ok(saved) => {
                tracing::info!(message_id = %saved.id, "message saved");
                self.fanout.emit(Audience::All, &OutboundEvent::NewMessage(saved));
            }
            Err(e) => self.fail(origin, &e, ERR_SAVE),
        }
    }

    async fn update_message(&self, origin: &ConnectionId, update: UpdateMessage) {
        match self.service.update(&update.message_id, &update.text).await {
            Ok(updated) => {
                tracing::info!(message_id = %updated.id, "message updated");
                self.fanout.emit(Audience::All, &OutboundEvent::MessageUpdated(updated));
            }
            Err(e @ RelayError::NotFound(_)) => self.fail(origin, &e, ERR_NOT_FOUND),
            Err(e) => self.fail(origin, &e, ERR_UPDATE),
        }
    }

    async fn delete_message(&self, origin: &ConnectionId, target: MessageRef) {
        match self.service.delete(&target.message_id).await {
            Ok(removed) => {
                tracing::info!(message_id = %target.message_id, removed, "message deleted");
                // Clients treat delete as idempotent; confirm even when nothing was removed.
                self.fanout
                    .emit(Audience::All, &OutboundEvent::MessageDeleted(target));
            }
            Err(e) => self.fail(origin, &e, ERR_DELETE),
        }
    }

    /// Close out a connection. Safe to call more than once; only the first
    /// call has any effect.
    pub fn disconnect(&self, id: &ConnectionId) {
        if !self.connections().unregister(id) {
            return;
        }
        let profile = self.presence.unregister(id);
        tracing::info!(
            connection_id = %id,
            joined = profile.is_some(),
            "client disconnected"
        );
        if let Some(profile) = profile {
            self.fanout
                .emit(Audience::Others(id.clone()), &OutboundEvent::UserLeft(profile));
        }
        self.broadcast_count();
    }

    fn broadcast_count(&self) {
        self.fanout
            .emit(Audience::All, &OutboundEvent::UserCount(self.presence.count()));
    }

    fn fail(&self, origin: &ConnectionId, err: &RelayError, message: &str) {
        tracing::warn!(kind = err.error_kind(), error = %err, "action failed");
        self.reply_error(origin, message);
    }

    fn reply_error(&self, origin: &ConnectionId, message: &str) {
        self.fanout
            .emit(Audience::Only(origin.clone()), &OutboundEvent::error(message));
    }
}
