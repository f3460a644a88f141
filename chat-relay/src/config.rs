use std::{num::NonZeroUsize, time::Duration};

/// Default number of lines buffered per participant before the overflow policy kicks in.
pub const DEFAULT_OUTBOX_CAPACITY: NonZeroUsize = match NonZeroUsize::new(8) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Default number of events that may queue at the hub's intake.
pub const DEFAULT_INTAKE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Longest accepted input line in bytes, not counting the `\n` or `\r\n` terminator.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// What the hub does when a recipient's outbox is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait for the recipient's writer to make room. Stalls fan-out to everyone else meanwhile.
    Block,
    /// Skip the recipient for this message and keep going.
    #[default]
    DropNewest,
    /// Wait up to the given duration, then skip the recipient.
    WaitThenDrop(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub outbox_capacity: NonZeroUsize,
    pub intake_capacity: NonZeroUsize,
    pub overflow: OverflowPolicy,
    pub max_line_length: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
            overflow: OverflowPolicy::default(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}
