use std::{net::SocketAddr, num::NonZeroUsize, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{
    DEFAULT_INTAKE_CAPACITY, DEFAULT_MAX_LINE_LENGTH, DEFAULT_OUTBOX_CAPACITY, OverflowPolicy,
    RelayConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting line-oriented TCP connections.
    Server(ServerArgs),
    /// Connect to a relay, sending stdin lines and printing what arrives.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:2023")]
    pub listen: SocketAddr,

    /// Lines buffered per participant before the overflow policy applies.
    #[arg(long, default_value_t = DEFAULT_OUTBOX_CAPACITY)]
    pub outbox_capacity: NonZeroUsize,

    /// Events buffered at the hub's intake.
    #[arg(long, default_value_t = DEFAULT_INTAKE_CAPACITY)]
    pub intake_capacity: NonZeroUsize,

    /// What to do when a participant's outbox is full.
    #[arg(long, value_enum, default_value_t = Overflow::DropNewest)]
    pub overflow: Overflow,

    /// How long `--overflow wait` waits for room before dropping.
    #[arg(long, default_value_t = 100)]
    pub overflow_wait_ms: u64,

    /// Longest accepted input line in bytes; longer lines end the session.
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    pub max_line_length: usize,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Stall the relay until the slow participant catches up.
    Block,
    /// Skip the slow participant for that message.
    DropNewest,
    /// Wait up to --overflow-wait-ms, then skip.
    Wait,
}

impl ServerArgs {
    pub fn relay_config(&self) -> RelayConfig {
        let overflow = match self.overflow {
            Overflow::Block => OverflowPolicy::Block,
            Overflow::DropNewest => OverflowPolicy::DropNewest,
            Overflow::Wait => {
                OverflowPolicy::WaitThenDrop(Duration::from_millis(self.overflow_wait_ms))
            }
        };

        RelayConfig {
            outbox_capacity: self.outbox_capacity,
            intake_capacity: self.intake_capacity,
            overflow,
            max_line_length: self.max_line_length,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:2023")]
    pub server: SocketAddr,
}
