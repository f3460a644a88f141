use std::{
    fmt,
    net::SocketAddr,
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};

/// Opaque identity of one connected participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Distinguishes one connection's participant record from any other,
/// including a later or rejected record carrying the same [`ParticipantId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// A token never handed out before in this process.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Why a line could not be placed in an outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxError {
    /// The queue is at capacity.
    Full,
    /// The writer on the other side has gone away.
    Closed,
}

/// Producer half of a participant's bounded delivery queue.
///
/// Exactly one `Outbox` exists per participant. Dropping it (or calling
/// [`Outbox::close`]) is the terminal signal: the matching [`OutboxReader`]
/// yields what is still queued and then reports `None`.
#[derive(Debug)]
pub struct Outbox {
    sender: mpsc::Sender<String>,
}

/// Consumer half of a participant's delivery queue, owned by its writer.
#[derive(Debug)]
pub struct OutboxReader {
    receiver: mpsc::Receiver<String>,
}

/// Creates a participant's outbox with room for `capacity` undelivered lines.
pub fn outbox(capacity: NonZeroUsize) -> (Outbox, OutboxReader) {
    let (sender, receiver) = mpsc::channel(capacity.get());
    (Outbox { sender }, OutboxReader { receiver })
}

impl Outbox {
    /// Waits for space, failing only if the writer is gone.
    pub async fn send(&self, line: String) -> Result<(), OutboxError> {
        self.sender
            .send(line)
            .await
            .map_err(|_| OutboxError::Closed)
    }

    pub fn try_send(&self, line: String) -> Result<(), OutboxError> {
        self.sender.try_send(line).map_err(|err| match err {
            TrySendError::Full(_) => OutboxError::Full,
            TrySendError::Closed(_) => OutboxError::Closed,
        })
    }

    /// Waits at most `wait` for space; a timeout is reported as [`OutboxError::Full`].
    pub async fn send_timeout(&self, line: String, wait: Duration) -> Result<(), OutboxError> {
        self.sender
            .send_timeout(line, wait)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => OutboxError::Full,
                SendTimeoutError::Closed(_) => OutboxError::Closed,
            })
    }

    /// True once the writer has stopped reading.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn close(self) {
        drop(self);
    }
}

impl OutboxReader {
    /// Next queued line, or `None` once the outbox is closed and drained.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// A connected participant as recorded in the hub's registry.
#[derive(Debug)]
pub struct Participant {
    id: ParticipantId,
    session: SessionId,
    peer: Option<SocketAddr>,
    joined_at: Instant,
    outbox: Outbox,
    dropped: u64,
}

impl Participant {
    pub fn new(id: ParticipantId, peer: Option<SocketAddr>, outbox: Outbox) -> Self {
        Self {
            id,
            session: SessionId::next(),
            peer,
            joined_at: Instant::now(),
            outbox,
            dropped: 0,
        }
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn joined_at(&self) -> Instant {
        self.joined_at
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Lines skipped for this participant because its outbox was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) fn record_drop(&mut self) {
        self.dropped += 1;
    }

    /// Consumes the record, closing its outbox.
    pub fn close(self) {
        self.outbox.close();
    }
}
