//! Protocol-translating proxy for Bedrock Edition that moves players
//! between backend servers without sending them back to the server list.
//!
//! The proxied connection looks like this:
//! Bedrock client => this proxy => backend server
//!
//! # Proxying process
//! A client first negotiates network settings with the proxy and sends
//! its login. The proxy opens a connection to the initial backend,
//! repeats the negotiation there and forwards the login verbatim. From
//! then on batches flow through in both directions. Most packets are
//! never decoded: a batch nobody changed is forwarded with its original
//! bytes.
//!
//! Backends may disagree on block and item runtime ids, entity ids or
//! protocol details. Packets carrying such ids are decoded and rewritten
//! so the client keeps seeing the ids of the first backend it joined.
//!
//! # Transfers
//! Moving a player to another backend happens in two dimension changes.
//! Once the new backend sends start game, the client is sent to a
//! temporary dimension while the new backend's packets are queued. When
//! the client confirms, it is placed in the target dimension and the
//! queue is released. The second confirmation completes the transfer.

pub mod bridge;
pub mod chunk;
pub mod codec;
pub mod collaborators;
pub mod config;
pub mod connector;
pub mod disconnect;
pub mod entity_id;
pub mod entity_tracker;
pub mod handler;
pub mod link;
pub mod login;
pub mod palette;
pub mod position;
pub mod protocol;
pub mod proxy;
pub mod queue;
pub mod rewrite;
pub mod session;
pub mod transfer;
