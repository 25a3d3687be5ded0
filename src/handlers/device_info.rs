use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::error::ProtocolError;
use crate::hw::{DeviceSession, FirmwareVersion, Outcome};
use crate::protocol::CommandId;

use super::response::text_field;

const VERSION_LEN: usize = 4;
const SERIAL_LEN: usize = 16;

/// Errors returned when decoding a device-info response.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum DeviceInfoError {
    /// The response cannot hold the 4-byte version.
    #[error("device-info response is too short: expected at least 4 bytes, got {actual}")]
    TooShort { actual: usize },
}

/// Firmware version and serial number of a recorder.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DeviceInfo {
    firmware: FirmwareVersion,
    serial_number: String,
}

impl DeviceInfo {
    /// Returns the firmware version.
    #[must_use]
    pub fn firmware(&self) -> &FirmwareVersion {
        &self.firmware
    }

    /// Returns the serial number with NUL padding removed.
    #[must_use]
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }
}

/// Handler for the device-info command.
pub struct DeviceInfoHandler;

impl DeviceInfoHandler {
    /// Decodes a device-info response body.
    ///
    /// # Errors
    ///
    /// Returns an error when the body is shorter than the version field.
    ///
    /// ```
    /// use hidock::DeviceInfoHandler;
    ///
    /// let mut body = vec![0x00, 0x06, 0x01, 0x04];
    /// body.extend_from_slice(b"HD1E243505435\0\0\0");
    /// let info = DeviceInfoHandler::parse(&body)?;
    /// assert_eq!("6.1.4", info.firmware().code());
    /// assert_eq!("HD1E243505435", info.serial_number());
    /// # Ok::<(), hidock::DeviceInfoError>(())
    /// ```
    pub fn parse(body: &[u8]) -> Result<DeviceInfo, DeviceInfoError> {
        let Some(version) = body
            .get(..VERSION_LEN)
            .and_then(|bytes| <[u8; VERSION_LEN]>::try_from(bytes).ok())
        else {
            return Err(DeviceInfoError::TooShort { actual: body.len() });
        };
        let serial_end = body.len().min(VERSION_LEN + SERIAL_LEN);

        Ok(DeviceInfo {
            firmware: FirmwareVersion::from_bytes(version),
            serial_number: text_field(&body[VERSION_LEN..serial_end]),
        })
    }

    /// Re-reads the device info of a connected recorder.
    ///
    /// ```
    /// # async fn demo(session: hidock::DeviceSession) -> Result<(), hidock::ProtocolError> {
    /// use hidock::{CommandId, DeviceInfoHandler};
    ///
    /// let info = DeviceInfoHandler::query(&session)
    ///     .await?
    ///     .into_result(CommandId::DeviceInfo)?;
    /// println!("firmware {}", info.firmware());
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the response is malformed or the connection drops.
    #[instrument(skip(session), level = "debug")]
    pub async fn query(session: &DeviceSession) -> Result<Outcome<DeviceInfo>, ProtocolError> {
        session
            .send(CommandId::DeviceInfo, &[])
            .await?
            .try_map(|packet| Self::parse(packet.body()).map_err(ProtocolError::from))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parse_accepts_version_without_serial() {
        let info = DeviceInfoHandler::parse(&[0x00, 0x05, 0x00, 0x22]).expect("version fits");
        assert_eq!(327_714, info.firmware().number());
        assert_eq!("", info.serial_number());
    }

    #[test]
    fn parse_ignores_bytes_after_the_serial() {
        let mut body = vec![0x00, 0x05, 0x01, 0x00];
        body.extend_from_slice(b"SN0000000000001\0");
        body.extend_from_slice(&[0xFF; 8]);

        let info = DeviceInfoHandler::parse(&body).expect("body should parse");

        assert_eq!("SN0000000000001", info.serial_number());
    }

    #[test]
    fn parse_rejects_short_body() {
        assert_matches!(
            DeviceInfoHandler::parse(&[0x00, 0x05]),
            Err(DeviceInfoError::TooShort { actual: 2 })
        );
    }
}
