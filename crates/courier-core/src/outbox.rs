//! Connection identity and outbound delivery handles.
//!
//! The relay never talks to a transport directly; each connection is
//! represented by an [`Outbox`] into which outbound events are enqueued.
//! The transport layer owns the receiving half and the actual framing.

use courier_protocol::ServerEvent;
use std::fmt;
use tokio::sync::mpsc;
use tracing::trace;

/// Unique identifier for a live transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        Self(format!("conn_{:x}", timestamp))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Outbound event queue for a single connection.
///
/// Emission is fire-and-forget: there is no acknowledgment, no retry, and a
/// send to a connection whose receiver is gone is silently dropped. Cleanup
/// of dead connections happens through the disconnect path, not here.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl Outbox {
    /// Create an outbox, returning the receiving half for the transport.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Enqueue an event for delivery.
    ///
    /// Returns `true` if the event was enqueued, `false` if the receiving
    /// half has been dropped.
    pub fn emit(&self, event: ServerEvent) -> bool {
        let delivered = self.sender.send(event).is_ok();
        if !delivered {
            trace!("Outbox receiver gone, event dropped");
        }
        delivered
    }

    /// Check if the receiving half is still attached.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}
