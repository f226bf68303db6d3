//! # courier-protocol
//!
//! Wire event definitions for the Courier realtime message relay.
//!
//! This crate defines the JSON events exchanged between clients and the
//! server: identity registration, point-to-point messages, and the
//! online-users presence snapshot.
//!
//! ## Events
//!
//! - `join` / `leave` - Bind or unbind a user identity to a connection
//! - `message` - Send a message addressed to a `receiverId`
//! - `online-users` - Full snapshot of currently registered identities
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::join("alice");
//! let encoded = codec::encode_client(&event).unwrap();
//! let decoded = codec::decode_client(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode_client, encode_server, ProtocolError};
pub use events::{ClientEvent, Envelope, ServerEvent, UserId};
