use serde::Serialize;

use crate::error::ProtocolError;
use crate::protocol::CommandId;

/// Raw status byte returned by commands that acknowledge with one byte.
///
/// `0` means success; other values are command-specific and surfaced verbatim.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, derive_more::Display)]
#[display("{_0}")]
pub struct DeviceStatus(u8);

impl DeviceStatus {
    /// Wraps a raw status byte.
    #[must_use]
    pub const fn new(code: u8) -> Self {
        Self(code)
    }

    /// Returns the raw status byte.
    #[must_use]
    pub const fn code(self) -> u8 {
        self.0
    }

    /// Returns `true` when the device reported success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }
}

/// Reads the leading status byte of an acknowledgement.
pub(crate) fn status_byte(command: CommandId, body: &[u8]) -> Result<DeviceStatus, ProtocolError> {
    body.first()
        .copied()
        .map(DeviceStatus::new)
        .ok_or_else(|| ProtocolError::short_response(command, 1, body.len()))
}

/// Reads a big-endian `u32` at `offset`.
pub(crate) fn be_u32(command: CommandId, body: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    body.get(offset..offset + 4)
        .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| ProtocolError::short_response(command, offset + 4, body.len()))
}

/// Reads a big-endian `u16` at `offset`.
pub(crate) fn be_u16(command: CommandId, body: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    body.get(offset..offset + 2)
        .and_then(|bytes| <[u8; 2]>::try_from(bytes).ok())
        .map(u16::from_be_bytes)
        .ok_or_else(|| ProtocolError::short_response(command, offset + 2, body.len()))
}

/// Keeps the non-NUL bytes of a fixed-width text field.
pub(crate) fn text_field(bytes: &[u8]) -> String {
    let kept: Vec<u8> = bytes.iter().copied().filter(|byte| *byte != 0).collect();
    String::from_utf8_lossy(&kept).trim().to_string()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn status_byte_requires_one_byte() {
        assert_eq!(
            DeviceStatus::new(2),
            status_byte(CommandId::DeleteFile, &[2, 9]).expect("status should parse")
        );
        assert_matches!(
            status_byte(CommandId::DeleteFile, &[]),
            Err(ProtocolError::ShortResponse { expected: 1, actual: 0, .. })
        );
    }

    #[test]
    fn integers_are_big_endian() {
        let body = [0x00, 0x01, 0x02, 0x03, 0x04];
        assert_eq!(0x0102_0304, be_u32(CommandId::CardInfo, &body, 1).expect("u32 fits"));
        assert_eq!(0x0001, be_u16(CommandId::CardInfo, &body, 0).expect("u16 fits"));
        assert_matches!(
            be_u32(CommandId::CardInfo, &body, 2),
            Err(ProtocolError::ShortResponse { expected: 6, actual: 5, .. })
        );
    }

    #[test]
    fn text_field_drops_nul_padding() {
        assert_eq!("HD1E2435", text_field(b"HD1E\0\x002435\0\0"));
    }
}
