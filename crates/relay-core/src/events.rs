//! Wire events exchanged over the chat channel.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Inbound frames are parsed through [`Envelope`] first so unknown names and
//! bad payloads can be reported separately; outbound frames serialize
//! straight from [`OutboundEvent`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;
use crate::ids::MessageId;
use crate::messages::{Message, NewMessage};

/// Client-supplied participant metadata, captured verbatim at join time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile(pub serde_json::Value);

impl Profile {
    /// Display name, when the client supplied one under `name`.
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(|v| v.as_str())
    }
}

impl From<serde_json::Value> for Profile {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessage {
    pub message_id: MessageId,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub message_id: MessageId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Raw inbound frame before its payload is checked against the event schema.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Actions a client can send.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum InboundEvent {
    Join(Profile),
    SendMessage(NewMessage),
    UpdateMessage(UpdateMessage),
    DeleteMessage(MessageRef),
    Typing(serde_json::Value),
    StopTyping(serde_json::Value),
}

impl InboundEvent {
    /// Parse a text frame into a typed event.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| RelayError::Malformed(e.to_string()))?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, RelayError> {
        let Envelope { event, data } = envelope;
        match event.as_str() {
            "join" => Ok(Self::Join(Profile(data))),
            "sendMessage" => payload(&event, data).map(Self::SendMessage),
            "updateMessage" => payload(&event, data).map(Self::UpdateMessage),
            "deleteMessage" => match data {
                // Older clients send the bare id.
                serde_json::Value::String(id) => Ok(Self::DeleteMessage(MessageRef {
                    message_id: MessageId::from_raw(id),
                })),
                data => payload(&event, data).map(Self::DeleteMessage),
            },
            "typing" => Ok(Self::Typing(data)),
            "stopTyping" => Ok(Self::StopTyping(data)),
            other => Err(RelayError::Malformed(format!("unknown event: {other}"))),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::SendMessage(_) => "sendMessage",
            Self::UpdateMessage(_) => "updateMessage",
            Self::DeleteMessage(_) => "deleteMessage",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stopTyping",
        }
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: serde_json::Value) -> Result<T, RelayError> {
    serde_json::from_value(data).map_err(|e| RelayError::Malformed(format!("{event}: {e}")))
}

/// Events the server pushes to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum OutboundEvent {
    UserJoined(Profile),
    OnlineUsers(Vec<Profile>),
    UserCount(usize),
    NewMessage(Message),
    MessageUpdated(Message),
    MessageDeleted(MessageRef),
    UserTyping(serde_json::Value),
    UserStoppedTyping(serde_json::Value),
    UserLeft(Profile),
    Error(ErrorPayload),
}

impl OutboundEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn message_deleted(message_id: MessageId) -> Self {
        Self::MessageDeleted(MessageRef { message_id })
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::UserJoined(_) => "userJoined",
            Self::OnlineUsers(_) => "onlineUsers",
            Self::UserCount(_) => "userCount",
            Self::NewMessage(_) => "newMessage",
            Self::MessageUpdated(_) => "messageUpdated",
            Self::MessageDeleted(_) => "messageDeleted",
            Self::UserTyping(_) => "userTyping",
            Self::UserStoppedTyping(_) => "userStoppedTyping",
            Self::UserLeft(_) => "userLeft",
            Self::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_join() {
        let evt = InboundEvent::parse(r#"{"event":"join","data":{"name":"A"}}"#).unwrap();
        assert_eq!(evt, InboundEvent::Join(Profile(json!({"name": "A"}))));
    }

    #[test]
    fn parse_send_message() {
        let evt = InboundEvent::parse(
            r##"{"event":"sendMessage","data":{"text":"hi","sender":"A","senderColor":"#fff"}}"##,
        )
        .unwrap();
        let InboundEvent::SendMessage(msg) = evt else {
            panic!("expected sendMessage");
        };
        assert_eq!(msg.text, "hi");
        assert_eq!(msg.sender, "A");
        assert_eq!(msg.sender_color.as_deref(), Some("#fff"));
    }

    #[test]
    fn parse_update_message() {
        let evt = InboundEvent::parse(
            r#"{"event":"updateMessage","data":{"messageId":"msg_1","text":"edited"}}"#,
        )
        .unwrap();
        assert_eq!(
            evt,
            InboundEvent::UpdateMessage(UpdateMessage {
                message_id: MessageId::from_raw("msg_1"),
                text: "edited".into(),
            })
        );
    }

    #[test]
    fn parse_delete_accepts_object_and_bare_id() {
        let expected = InboundEvent::DeleteMessage(MessageRef {
            message_id: MessageId::from_raw("xyz"),
        });
        let obj = InboundEvent::parse(r#"{"event":"deleteMessage","data":{"messageId":"xyz"}}"#).unwrap();
        let bare = InboundEvent::parse(r#"{"event":"deleteMessage","data":"xyz"}"#).unwrap();
        assert_eq!(obj, expected);
        assert_eq!(bare, expected);
    }

    #[test]
    fn typing_without_data_is_null() {
        let evt = InboundEvent::parse(r#"{"event":"typing"}"#).unwrap();
        assert_eq!(evt, InboundEvent::Typing(serde_json::Value::Null));
    }

    #[test]
    fn unknown_event_is_malformed() {
        let err = InboundEvent::parse(r#"{"event":"shout","data":{}}"#).unwrap_err();
        assert_eq!(err, RelayError::Malformed("unknown event: shout".into()));
    }

    #[test]
    fn bad_payload_is_malformed() {
        let err = InboundEvent::parse(r#"{"event":"sendMessage","data":{"text":5}}"#).unwrap_err();
        assert_eq!(err.error_kind(), "malformed");
        assert!(InboundEvent::parse("not json").is_err());
    }

    #[test]
    fn inbound_serializes_to_parseable_frame() {
        let evt = InboundEvent::SendMessage(NewMessage::new("hi", "A"));
        let raw = serde_json::to_string(&evt).unwrap();
        assert_eq!(InboundEvent::parse(&raw).unwrap(), evt);
    }

    #[test]
    fn outbound_wire_format() {
        let json = serde_json::to_value(OutboundEvent::UserCount(3)).unwrap();
        assert_eq!(json, json!({"event": "userCount", "data": 3}));

        let json = serde_json::to_value(OutboundEvent::message_deleted(MessageId::from_raw("xyz"))).unwrap();
        assert_eq!(json, json!({"event": "messageDeleted", "data": {"messageId": "xyz"}}));

        let json = serde_json::to_value(OutboundEvent::error("Failed to save message")).unwrap();
        assert_eq!(json, json!({"event": "error", "data": {"message": "Failed to save message"}}));
    }

    #[test]
    fn outbound_event_names_match_wire_tags() {
        let events = [
            OutboundEvent::UserJoined(Profile::default()),
            OutboundEvent::OnlineUsers(vec![]),
            OutboundEvent::UserCount(0),
            OutboundEvent::UserTyping(json!("A")),
            OutboundEvent::UserStoppedTyping(json!("A")),
            OutboundEvent::UserLeft(Profile::default()),
            OutboundEvent::error("x"),
        ];
        for evt in &events {
            let json = serde_json::to_value(evt).unwrap();
            assert_eq!(json["event"], evt.event_name());
        }
    }

    #[test]
    fn profile_name() {
        assert_eq!(Profile(json!({"name": "A"})).name(), Some("A"));
        assert_eq!(Profile(json!("A")).name(), None);
    }
}
