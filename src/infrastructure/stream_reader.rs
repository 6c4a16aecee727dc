// Telemetry stream reader - line reassembly over the worker's stdout
use crate::domain::link::{FaultKind, LinkEvent};
use crate::infrastructure::process_supervisor::EventSender;
use crate::infrastructure::wire_codec::decode_line;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

const READ_CHUNK: usize = 4096;
const MAX_LINE_BYTES: usize = 1 << 20;

/// Accumulates raw bytes and yields complete lines in arrival order.
///
/// A line that grows past the size limit without a terminator is dropped,
/// along with the rest of it up to the next newline.
#[derive(Debug)]
pub struct LineBuffer {
    pending: BytesMut,
    scanned: usize,
    max_line: usize,
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    pub fn extend(&mut self, mut bytes: &[u8]) {
        if self.discarding {
            let Some(newline) = bytes.iter().position(|b| *b == b'\n') else {
                return;
            };
            self.discarding = false;
            bytes = &bytes[newline + 1..];
        }
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line with its terminator and trailing whitespace removed.
    pub fn next_line(&mut self) -> Option<Bytes> {
        let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.pending.len();
            if self.scanned > self.max_line {
                tracing::warn!(
                    bytes = self.scanned,
                    limit = self.max_line,
                    "dropping oversized telemetry line"
                );
                self.pending.clear();
                self.scanned = 0;
                self.discarding = true;
            }
            return None;
        };

        let mut line = self.pending.split_to(self.scanned + offset + 1);
        self.scanned = 0;
        let end = line
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |i| i + 1);
        line.truncate(end);
        Some(line.freeze())
    }

    /// Bytes of a line still waiting for its terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Drives the wire codec over an output stream and publishes each decoded
/// record before looking at the next line.
pub struct TelemetryStreamReader<R> {
    source: R,
    lines: LineBuffer,
    idle_timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> TelemetryStreamReader<R> {
    pub fn new(source: R, idle_timeout: Option<Duration>) -> Self {
        Self {
            source,
            lines: LineBuffer::new(),
            idle_timeout,
        }
    }

    /// Reads until end of stream, a read failure, or the event channel closing.
    pub async fn run(mut self, events: EventSender) {
        let mut chunk = [0u8; READ_CHUNK];
        let mut stalled = false;

        loop {
            let read = match self.idle_timeout {
                Some(limit) => match timeout(limit, self.source.read(&mut chunk)).await {
                    Ok(read) => read,
                    Err(_) => {
                        if !stalled {
                            stalled = true;
                            tracing::warn!("no telemetry from worker for {} ms", limit.as_millis());
                            let message = format!("no output for {} ms", limit.as_millis());
                            if events.send(LinkEvent::fault(FaultKind::Timedout, message)).is_err() {
                                return;
                            }
                        }
                        continue;
                    }
                },
                None => self.source.read(&mut chunk).await,
            };

            match read {
                Ok(0) => {
                    if self.lines.pending_len() > 0 {
                        tracing::debug!(
                            bytes = self.lines.pending_len(),
                            "discarding unterminated line at end of stream"
                        );
                    }
                    tracing::debug!("worker output stream closed");
                    return;
                }
                Ok(n) => {
                    stalled = false;
                    self.lines.extend(&chunk[..n]);
                    if !self.drain(&events) {
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed reading worker output");
                    let _ = events.send(LinkEvent::fault(FaultKind::ReadError, e.to_string()));
                    return;
                }
            }
        }
    }

    /// Publishes every complete buffered line. Returns false once nobody is
    /// listening anymore.
    fn drain(&mut self, events: &EventSender) -> bool {
        while let Some(line) = self.lines.next_line() {
            if line.is_empty() {
                continue;
            }
            match decode_line(&line) {
                Ok(record) => {
                    if events.send(LinkEvent::Telemetry(record)).is_err() {
                        return false;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        line = %String::from_utf8_lossy(&line),
                        "dropping telemetry line"
                    );
                }
            }
        }
        true
    }
}
