//! Event types for the Courier wire protocol.
//!
//! Each event is one JSON object per WebSocket text frame, discriminated by
//! an `event` field with the payload under `data`.

use serde::{Deserialize, Serialize};

/// A logical user identity. One identity may be bound to several live
/// connections at once (multiple tabs or devices).
pub type UserId = String;

/// A message addressed to a user identity.
///
/// Only `receiverId` is interpreted by the relay; every other field is
/// opaque and passed through to recipients unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The identity the message is addressed to.
    #[serde(rename = "receiverId")]
    pub receiver_id: UserId,

    /// Arbitrary passthrough payload fields.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Envelope {
    /// Create an envelope with an empty payload.
    #[must_use]
    pub fn new(receiver_id: impl Into<UserId>) -> Self {
        Self {
            receiver_id: receiver_id.into(),
            payload: serde_json::Map::new(),
        }
    }

    /// Add a payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}

/// An event sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Bind a user identity to this connection.
    Join(UserId),

    /// Unbind a user identity from this connection.
    Leave(UserId),

    /// Send a message to the identity named in the envelope.
    Message(Envelope),
}

impl ClientEvent {
    /// Create a new Join event.
    #[must_use]
    pub fn join(user_id: impl Into<UserId>) -> Self {
        ClientEvent::Join(user_id.into())
    }

    /// Create a new Leave event.
    #[must_use]
    pub fn leave(user_id: impl Into<UserId>) -> Self {
        ClientEvent::Leave(user_id.into())
    }

    /// Create a new Message event.
    #[must_use]
    pub fn message(envelope: Envelope) -> Self {
        ClientEvent::Message(envelope)
    }
}

/// An event sent by the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// A delivered (or echoed) message, carrying the original envelope
    /// verbatim.
    Message(Envelope),

    /// Full snapshot of all currently registered identities, in order.
    OnlineUsers(Vec<UserId>),
}

impl ServerEvent {
    /// Create a new Message event.
    #[must_use]
    pub fn message(envelope: Envelope) -> Self {
        ServerEvent::Message(envelope)
    }

    /// Create a new OnlineUsers snapshot event.
    #[must_use]
    pub fn online_users(users: Vec<UserId>) -> Self {
        ServerEvent::OnlineUsers(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_wire_shape() {
        let event = ClientEvent::join("alice");
        let text = serde_json::to_string(&event).unwrap();
        assert_eq!(text, r#"{"event":"join","data":"alice"}"#);
    }

    #[test]
    fn test_online_users_wire_shape() {
        let event = ServerEvent::online_users(vec!["alice".into(), "bob".into()]);
        let text = serde_json::to_string(&event).unwrap();
        assert_eq!(text, r#"{"event":"online-users","data":["alice","bob"]}"#);
    }

    #[test]
    fn test_envelope_passthrough_fields() {
        let text = r#"{"event":"message","data":{"receiverId":"bob","text":"hi","n":3}}"#;
        let event: ClientEvent = serde_json::from_str(text).unwrap();

        let ClientEvent::Message(envelope) = event else {
            panic!("expected message event");
        };
        assert_eq!(envelope.receiver_id, "bob");
        assert_eq!(envelope.payload.get("text"), Some(&json!("hi")));
        assert_eq!(envelope.payload.get("n"), Some(&json!(3)));

        // Re-emitting preserves the passthrough fields.
        let out = serde_json::to_value(ServerEvent::message(envelope)).unwrap();
        assert_eq!(out["data"]["text"], json!("hi"));
        assert_eq!(out["data"]["receiverId"], json!("bob"));
    }

    #[test]
    fn test_envelope_requires_receiver_id() {
        let text = r#"{"event":"message","data":{"text":"hi"}}"#;
        assert!(serde_json::from_str::<ClientEvent>(text).is_err());
    }

    #[test]
    fn test_envelope_builder() {
        let envelope = Envelope::new("bob").with_field("text", json!("hi"));
        assert_eq!(envelope.receiver_id, "bob");
        assert_eq!(envelope.payload.len(), 1);
    }
}
