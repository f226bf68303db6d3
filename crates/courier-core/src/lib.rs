//! # courier-core
//!
//! Presence registry and fan-out message relay for Courier.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **PresenceRegistry** - Mapping from user identity to live connections
//! - **Outbox** - Fire-and-forget delivery handle for one connection
//! - **Relay** - Routes messages and presence updates across connections
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│    Relay    │────▶│   Outbox    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                   ┌──────────────────┐
//!                   │ PresenceRegistry │
//!                   └──────────────────┘
//! ```

pub mod outbox;
pub mod registry;
pub mod relay;

pub use outbox::{ConnectionId, Outbox};
pub use registry::PresenceRegistry;
pub use relay::{Relay, RelayConfig, RelayStats};
