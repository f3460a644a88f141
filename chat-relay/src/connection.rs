//! Per-connection supervision.
//!
//! A [`Supervisor`] turns one accepted byte stream into a participant: it
//! starts the writer task, queues the welcome line, registers with the hub,
//! runs the reader inline and finally emits exactly one leave. The stream is
//! released when both of its halves are dropped, which happens on every exit
//! path once this function and the writer task return.

use std::{net::SocketAddr, sync::Arc};

use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::{
    config::RelayConfig,
    error::RelayError,
    hub::HubHandle,
    identity::IdentityProvider,
    message::{self, LineReader, write_line},
    participant::{OutboxReader, Participant, ParticipantId, outbox},
};

#[derive(Clone)]
pub struct Supervisor {
    hub: HubHandle,
    identities: Arc<dyn IdentityProvider>,
    config: Arc<RelayConfig>,
}

impl Supervisor {
    pub fn new(
        hub: HubHandle,
        identities: Arc<dyn IdentityProvider>,
        config: Arc<RelayConfig>,
    ) -> Self {
        Self {
            hub,
            identities,
            config,
        }
    }

    /// Runs one participant's whole session over `stream`.
    ///
    /// Returns once the inbound side has ended, the leave has been submitted
    /// and the writer has drained the outbox. A read error is returned after
    /// the leave, so the hub never keeps a participant whose reader died.
    pub async fn run<S>(&self, stream: S, peer: Option<SocketAddr>) -> Result<(), RelayError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.identities.next_id();
        let (read_half, write_half) = io::split(stream);
        let (outbox, outbox_reader) = outbox(self.config.outbox_capacity);

        let writer = tokio::spawn(run_writer(id.clone(), outbox_reader, write_half));

        if outbox.send(message::welcome(&id)).await.is_err() {
            debug!(%id, "writer stopped before the welcome was queued");
        }
        let participant = Participant::new(id.clone(), peer, outbox);
        let session = participant.session();
        self.hub.join(participant).await?;
        self.hub.message(id.clone(), message::entered(&id)).await?;

        let mut lines = LineReader::new(BufReader::new(read_half), self.config.max_line_length);
        let read_result = self.relay_lines(&id, &mut lines).await;

        self.hub.leave(id.clone(), session).await?;
        self.hub.message(id.clone(), message::left(&id)).await?;

        if let Err(err) = writer.await {
            warn!(%id, error = ?err, "writer task failed");
        }

        read_result
    }

    async fn relay_lines<R>(
        &self,
        id: &ParticipantId,
        lines: &mut LineReader<R>,
    ) -> Result<(), RelayError>
    where
        R: io::AsyncBufRead + Unpin,
    {
        while let Some(text) = lines.next_line().await? {
            self.hub.message(id.clone(), message::chat(id, &text)).await?;
        }
        Ok(())
    }
}

/// Drains `outbox` onto `writer` until the hub closes it or a write fails.
pub async fn run_writer<W>(id: ParticipantId, mut outbox: OutboxReader, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbox.recv().await {
        if let Err(err) = write_line(&mut writer, &line).await {
            debug!(%id, error = ?err, "failed to deliver line, writer stopping");
            return;
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(%id, error = ?err, "failed to shut down writer cleanly");
    }
}
