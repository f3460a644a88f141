//! Line-oriented chat relay.
//!
//! Every TCP connection becomes a participant with a generated id. Each line a
//! participant sends is rebroadcast to everyone else as `<id>: <text>`, and
//! joins and departures are announced to the room.
//!
//! All membership and routing decisions happen on one task, the [`hub`]. It
//! owns the participant registry outright and is only reachable through a
//! bounded event channel, so no lock guards the registry. Each module focuses
//! on a concrete responsibility:
//!
//! - [`participant`] holds the participant record and its bounded outbox.
//! - [`identity`] supplies unique participant ids.
//! - [`hub`] applies join, leave and message events in arrival order.
//! - [`connection`] supervises one connection: it starts the writer, runs the
//!   reader inline and emits exactly one leave.
//! - [`message`] frames lines on the wire and formats the announcements.
//! - [`config`] carries queue sizes and the overflow policy.
//! - [`error`] defines the library error type.
//! - [`server`] accepts TCP connections and wires everything together.
//! - [`client`] is a small terminal client for the relay.
//! - [`cli`] parses the command-line interface for both modes.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod identity;
pub mod message;
pub mod participant;
pub mod server;
