use std::fmt;

use async_trait::async_trait;

use crate::error::TransportError;

/// Largest single read requested from a transport.
pub(crate) const READ_CHUNK_LEN: usize = 64 * 1024;

/// Byte-level channel to one opened recorder.
///
/// Opening and claiming the device happens before a transport value exists;
/// the engine only writes, reads, and closes.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Writes one encoded frame and returns the number of bytes accepted.
    async fn write(&self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Reads up to `max_len` bytes.
    ///
    /// An empty vector means nothing arrived during the adapter's poll
    /// interval and is not an error.
    async fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Releases the device.
    async fn close(&self) -> Result<(), TransportError>;
}
