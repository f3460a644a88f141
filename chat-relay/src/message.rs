use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::participant::ParticipantId;

/// Sent only to the participant who just connected.
pub fn welcome(id: &ParticipantId) -> String {
    format!("Welcome, {id}")
}

pub fn entered(id: &ParticipantId) -> String {
    format!("User: {id} has entered.")
}

pub fn chat(id: &ParticipantId, text: &str) -> String {
    format!("{id}: {text}")
}

pub fn left(id: &ParticipantId) -> String {
    format!("User: {id} has left.")
}

/// Splits an inbound byte stream into newline-delimited text lines.
///
/// The sequence is finite and fused: once the stream ends or a read fails,
/// every later call returns `Ok(None)`.
pub struct LineReader<R> {
    inner: R,
    max_line_length: usize,
    buf: Vec<u8>,
    finished: bool,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(inner: R, max_line_length: usize) -> Self {
        Self {
            inner,
            max_line_length,
            buf: Vec::new(),
            finished: false,
        }
    }

    /// Reads the next line without its `\n` or `\r\n` terminator.
    ///
    /// Invalid UTF-8 is replaced rather than rejected. A line longer than the
    /// configured maximum fails with [`io::ErrorKind::InvalidData`].
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        if self.finished {
            return Ok(None);
        }

        match self.read_frame().await {
            Ok(Some(line)) => Ok(Some(line)),
            other => {
                self.finished = true;
                other
            }
        }
    }

    async fn read_frame(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        // Room for the payload plus a `\r\n` terminator.
        let limit = self.max_line_length as u64 + 2;
        let bytes = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if bytes == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        if self.buf.len() > self.max_line_length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {} bytes", self.max_line_length),
            ));
        }

        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // One buffer per line and a flush, so peers see each line as soon as it is relayed.
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
