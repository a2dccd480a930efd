//! mmbridge: the Mattermost adapter of a multi-platform chat relay.
//!
//! Connects one Mattermost server to a central message gateway. Inbound
//! vendor events (webhook posts or websocket session events) are normalized
//! into [`types::CanonicalMessage`]s; canonical messages coming back from the
//! gateway are translated into webhook posts or REST API calls.
//!
//! See `DESIGN.md` for the architecture and the grounding ledger.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod mattermost;
pub mod webhook;

pub mod bridge;
