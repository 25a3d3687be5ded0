use derive_more::From;
use thiserror::Error;

use crate::handlers::{
    BcdError, DeviceInfoError, DownloadError, FrameCodecError, MeetingScheduleError,
};
use crate::hw::Feature;
use crate::protocol::CommandId;

/// Errors reported by a transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nothing arrived in time; the caller may try again.
    #[error("USB transfer timed out")]
    TimedOut,
    /// The endpoint stalled.
    #[error("USB endpoint stalled")]
    Stall,
    /// The device went away.
    #[error("device was disconnected")]
    Disconnected,
    /// The adapter was closed by the host.
    #[error("transport is closed")]
    Closed,
    /// Fewer bytes were written than requested.
    #[error("short USB write: wrote {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    /// The USB stack reported a transfer failure.
    #[error("USB transfer failed: {reason}")]
    Transfer { reason: String },
    #[error("USB I/O failed")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Returns `true` when the failure means "try again" rather than "connection lost".
    ///
    /// ```
    /// use hidock::TransportError;
    ///
    /// assert!(TransportError::TimedOut.is_retryable());
    /// assert!(!TransportError::Disconnected.is_retryable());
    /// ```
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Delivered to every outstanding request when a connection is torn down.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("device connection lost: {reason}")]
pub struct ConnectionLost {
    reason: String,
}

impl ConnectionLost {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the teardown reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Errors returned while discovering, opening, or establishing a device session.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("USB operation failed")]
    Usb(#[from] std::io::Error),
    #[error("no HiDock recorder was found on the USB bus")]
    NoDevices,
    #[error("USB product id {product_id:#06x} is not a supported recorder")]
    UnsupportedProduct { product_id: u16 },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    ConnectionLost(#[from] ConnectionLost),
    #[error("failed to queue the device-info request")]
    Identify { source: Box<ProtocolError> },
    #[error("the recorder did not answer the device-info request")]
    DeviceInfoTimedOut,
    #[error(transparent)]
    DeviceInfo(#[from] DeviceInfoError),
    #[error("failed while waiting for Ctrl+C")]
    CtrlC { source: std::io::Error },
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

/// Errors returned when parsing fake recorder fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake file fixture is empty")]
    EmptyFixture,
    #[error("file fixture `{record}` must contain three colon-delimited fields")]
    InvalidRecordFieldCount { record: String },
    #[error("file fixture records cannot have an empty name")]
    EmptyFileName,
    #[error("failed to parse a numeric fixture field")]
    InvalidNumber(#[from] std::num::ParseIntError),
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Top-level protocol errors wrapping module-specific error types.
#[derive(Debug, Error, From)]
pub enum ProtocolError {
    #[error(transparent)]
    #[from(FrameCodecError, Box<FrameCodecError>)]
    FrameCodec(Box<FrameCodecError>),
    #[error(transparent)]
    #[from(BcdError, Box<BcdError>)]
    Bcd(Box<BcdError>),
    #[error(transparent)]
    #[from(DeviceInfoError, Box<DeviceInfoError>)]
    DeviceInfo(Box<DeviceInfoError>),
    #[error(transparent)]
    #[from(DownloadError, Box<DownloadError>)]
    Download(Box<DownloadError>),
    #[error(transparent)]
    #[from(MeetingScheduleError, Box<MeetingScheduleError>)]
    MeetingSchedule(Box<MeetingScheduleError>),
    #[error(transparent)]
    #[from(InteractionError, Box<InteractionError>)]
    Interaction(Box<InteractionError>),
    #[error(transparent)]
    #[from(ConnectionLost)]
    ConnectionLost(ConnectionLost),
    #[error("`{command}` response is too short: expected at least {expected} bytes, got {actual}")]
    #[from(ignore)]
    ShortResponse {
        command: CommandId,
        expected: usize,
        actual: usize,
    },
    #[error("`{command}` response is malformed: {reason}")]
    #[from(ignore)]
    MalformedResponse {
        command: CommandId,
        reason: &'static str,
    },
    #[error("`{command}` timed out waiting for the recorder")]
    #[from(ignore)]
    TimedOut { command: CommandId },
    #[error("`{command}` expired in the queue before it was sent")]
    #[from(ignore)]
    Expired { command: CommandId },
    #[error("`{feature}` is not supported by this recorder model and firmware")]
    #[from(ignore)]
    Unsupported { feature: Feature },
}

impl ProtocolError {
    pub(crate) fn short_response(command: CommandId, expected: usize, actual: usize) -> Self {
        Self::ShortResponse {
            command,
            expected,
            actual,
        }
    }
}
