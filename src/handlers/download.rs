use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, instrument, trace, warn};

use crate::error::{ConnectionLost, ProtocolError};
use crate::hw::{CommandStream, DeviceSession, StreamEvent};
use crate::protocol::CommandId;

/// Errors that end a file download early.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum DownloadError {
    /// No chunk arrived within the idle timeout.
    #[error("`{name}` stalled after {received} of {expected} bytes")]
    ChunkTimeout {
        name: String,
        received: u64,
        expected: u64,
    },
    /// The whole transfer exceeded its wall-clock ceiling.
    #[error("`{name}` exceeded the {ceiling:?} download limit after {received} of {expected} bytes")]
    WatchdogExpired {
        name: String,
        received: u64,
        expected: u64,
        ceiling: Duration,
    },
    /// The request expired before it reached the device.
    #[error("download of `{name}` expired in the queue")]
    Expired { name: String },
    #[error(transparent)]
    ConnectionLost(#[from] ConnectionLost),
}

/// Progress after one accepted chunk.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ChunkProgress {
    Partial { received: u64, expected: u64 },
    Complete { received: u64, expected: u64 },
}

impl ChunkProgress {
    /// Returns the running byte total.
    #[must_use]
    pub fn received(self) -> u64 {
        match self {
            Self::Partial { received, .. } | Self::Complete { received, .. } => received,
        }
    }

    /// Returns `true` once the declared length has been reached.
    #[must_use]
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// Tracks received bytes against a declared file length.
///
/// ```
/// use hidock::{ChunkProgress, StreamReassembler};
///
/// let mut reassembler = StreamReassembler::new(1000);
/// assert_eq!(
///     ChunkProgress::Partial { received: 600, expected: 1000 },
///     reassembler.accept(600)
/// );
/// assert!(reassembler.accept(400).is_complete());
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StreamReassembler {
    expected: u64,
    received: u64,
}

impl StreamReassembler {
    #[must_use]
    pub fn new(expected: u64) -> Self {
        Self {
            expected,
            received: 0,
        }
    }

    /// Adds a chunk of `len` bytes to the running total.
    pub fn accept(&mut self, len: usize) -> ChunkProgress {
        self.received = self
            .received
            .saturating_add(u64::try_from(len).unwrap_or(u64::MAX));
        self.progress()
    }

    /// Returns the current progress without accepting anything.
    #[must_use]
    pub fn progress(&self) -> ChunkProgress {
        let (received, expected) = (self.received, self.expected);
        if self.is_complete() {
            ChunkProgress::Complete { received, expected }
        } else {
            ChunkProgress::Partial { received, expected }
        }
    }

    #[must_use]
    pub fn expected(&self) -> u64 {
        self.expected
    }

    #[must_use]
    pub fn received(&self) -> u64 {
        self.received
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received >= self.expected
    }
}

/// One piece of a downloaded file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DownloadChunk {
    data: Vec<u8>,
    progress: ChunkProgress,
}

impl DownloadChunk {
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[must_use]
    pub fn progress(&self) -> ChunkProgress {
        self.progress
    }
}

/// A running download pulled chunk by chunk.
///
/// Dropping it before completion releases the device for the next command.
#[derive(Debug)]
pub struct FileDownload {
    name: String,
    stream: Option<CommandStream>,
    reassembler: StreamReassembler,
    watchdog: Duration,
    watchdog_deadline: Instant,
}

impl FileDownload {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn expected(&self) -> u64 {
        self.reassembler.expected()
    }

    #[must_use]
    pub fn received(&self) -> u64 {
        self.reassembler.received()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.reassembler.is_complete()
    }

    /// Waits for the next data chunk; `None` once the declared length arrived.
    ///
    /// Empty keep-alive chunks are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error on an idle timeout, the overall watchdog, or
    /// connection loss.
    pub async fn next_chunk(&mut self) -> Result<Option<DownloadChunk>, DownloadError> {
        if self.is_complete() {
            self.stream = None;
            return Ok(None);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };

        loop {
            let Ok(event) = timeout_at(self.watchdog_deadline, stream.next_event()).await else {
                warn!(
                    name = %self.name,
                    received = self.reassembler.received(),
                    expected = self.reassembler.expected(),
                    "download watchdog expired"
                );
                self.stream = None;
                return Err(DownloadError::WatchdogExpired {
                    name: self.name.clone(),
                    received: self.reassembler.received(),
                    expected: self.reassembler.expected(),
                    ceiling: self.watchdog,
                });
            };

            match event {
                Some(StreamEvent::Chunk(packet)) if packet.body().is_empty() => {
                    trace!(name = %self.name, "keep-alive chunk");
                }
                Some(StreamEvent::Chunk(packet)) => {
                    let progress = self.reassembler.accept(packet.body().len());
                    trace!(name = %self.name, received = progress.received(), "download chunk");
                    if progress.is_complete() {
                        self.stream = None;
                    }
                    return Ok(Some(DownloadChunk {
                        data: packet.into_body(),
                        progress,
                    }));
                }
                Some(StreamEvent::TimedOut) => {
                    self.stream = None;
                    return Err(DownloadError::ChunkTimeout {
                        name: self.name.clone(),
                        received: self.reassembler.received(),
                        expected: self.reassembler.expected(),
                    });
                }
                Some(StreamEvent::Expired) => {
                    self.stream = None;
                    return Err(DownloadError::Expired {
                        name: self.name.clone(),
                    });
                }
                Some(StreamEvent::Lost(lost)) => {
                    self.stream = None;
                    return Err(lost.into());
                }
                None => {
                    self.stream = None;
                    return Err(ConnectionLost::new("engine stopped").into());
                }
            }
        }
    }

    /// Abandons the download and frees the device for the next command.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is already closed.
    pub async fn cancel(mut self) -> Result<(), ConnectionLost> {
        match self.stream.take() {
            Some(stream) => stream.cancel().await,
            None => Ok(()),
        }
    }
}

/// Handler for streamed file downloads.
pub struct FileDownloadHandler;

impl FileDownloadHandler {
    /// Starts downloading `name`, expected to be `expected` bytes long.
    ///
    /// A zero-length file completes at once without contacting the device.
    ///
    /// ```
    /// # async fn demo(session: hidock::DeviceSession) -> Result<(), Box<dyn std::error::Error>> {
    /// use hidock::FileDownloadHandler;
    ///
    /// let mut download = FileDownloadHandler::begin(&session, "20250512114141REC01.wav", 64_000).await?;
    /// let mut bytes = Vec::new();
    /// while let Some(chunk) = download.next_chunk().await? {
    ///     bytes.extend_from_slice(chunk.data());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be framed or the session is closed.
    #[instrument(skip(session), level = "debug")]
    pub async fn begin(
        session: &DeviceSession,
        name: &str,
        expected: u64,
    ) -> Result<FileDownload, ProtocolError> {
        let config = session.config();
        let stream = if expected == 0 {
            debug!("zero-length file needs no transfer");
            None
        } else {
            Some(
                session
                    .open_stream(
                        CommandId::TransferFile,
                        name.as_bytes(),
                        Some(config.stream_idle_timeout()),
                    )
                    .await?,
            )
        };

        Ok(FileDownload {
            name: name.to_string(),
            stream,
            reassembler: StreamReassembler::new(expected),
            watchdog: config.download_watchdog(),
            watchdog_deadline: Instant::now() + config.download_watchdog(),
        })
    }

    /// Downloads a whole file through callbacks and returns the byte total.
    ///
    /// `on_chunk` gets every data chunk and `on_progress` gets
    /// `(received, expected)` after each one. Both run on the caller's task
    /// and should return quickly.
    ///
    /// # Errors
    ///
    /// Returns an error when the download stalls, exceeds the watchdog, or the
    /// connection drops.
    pub async fn download(
        session: &DeviceSession,
        name: &str,
        expected: u64,
        mut on_chunk: impl FnMut(&[u8]),
        mut on_progress: impl FnMut(u64, u64),
    ) -> Result<u64, ProtocolError> {
        let mut download = Self::begin(session, name, expected).await?;
        while let Some(chunk) = download.next_chunk().await? {
            on_chunk(chunk.data());
            on_progress(chunk.progress().received(), expected);
        }
        Ok(download.received())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn reassembler_completes_at_the_declared_length() {
        let mut reassembler = StreamReassembler::new(1000);

        assert_eq!(
            ChunkProgress::Partial {
                received: 600,
                expected: 1000
            },
            reassembler.accept(600)
        );
        assert_eq!(
            ChunkProgress::Complete {
                received: 1000,
                expected: 1000
            },
            reassembler.accept(400)
        );
    }

    #[test]
    fn overshoot_still_completes() {
        let mut reassembler = StreamReassembler::new(10);
        assert!(reassembler.accept(16).is_complete());
        assert_eq!(16, reassembler.received());
    }

    #[test]
    fn empty_expected_length_is_already_complete() {
        let reassembler = StreamReassembler::new(0);
        assert!(reassembler.is_complete());
        assert_eq!(
            ChunkProgress::Complete {
                received: 0,
                expected: 0
            },
            reassembler.progress()
        );
    }
}
