//! Client side of the remote memory protocol.
//!
//! Every operation is a JSON command posted to a single endpoint; bulk
//! documents travel as zip uploads and signed downloads.

pub mod auth;
mod client;
pub mod protocol;

pub use auth::{HttpTicketIssuer, TicketIssuer};
pub use client::ReplicationClient;
