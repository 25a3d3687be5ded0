use serde::Serialize;
use tracing::{info, instrument};

use crate::error::ProtocolError;
use crate::hw::{DeviceSession, Outcome};
use crate::protocol::CommandId;

use super::response::{DeviceStatus, status_byte};

/// Answer to a firmware upgrade request.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareUpgradeStatus {
    #[display("accepted")]
    Accepted,
    #[display("wrong version")]
    WrongVersion,
    #[display("busy")]
    Busy,
    #[display("card full")]
    CardFull,
    #[display("card error")]
    CardError,
    #[display("unknown status {_0}")]
    Other(u8),
}

impl From<u8> for FirmwareUpgradeStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Accepted,
            1 => Self::WrongVersion,
            2 => Self::Busy,
            3 => Self::CardFull,
            4 => Self::CardError,
            other => Self::Other(other),
        }
    }
}

/// Handler for firmware upgrades.
pub struct FirmwareHandler;

impl FirmwareHandler {
    fn request_body(version_number: u32, image_len: u32) -> [u8; 8] {
        let mut body = [0u8; 8];
        body[..4].copy_from_slice(&version_number.to_be_bytes());
        body[4..].copy_from_slice(&image_len.to_be_bytes());
        body
    }

    /// Asks the recorder to accept an image of `image_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when the acknowledgement is empty or the connection drops.
    #[instrument(skip(session), level = "info")]
    pub async fn request_upgrade(
        session: &DeviceSession,
        version_number: u32,
        image_len: u32,
    ) -> Result<Outcome<FirmwareUpgradeStatus>, ProtocolError> {
        session
            .send(
                CommandId::RequestFirmwareUpgrade,
                &Self::request_body(version_number, image_len),
            )
            .await?
            .try_map(|packet| {
                status_byte(CommandId::RequestFirmwareUpgrade, packet.body())
                    .map(|status| FirmwareUpgradeStatus::from(status.code()))
            })
    }

    /// Sends the firmware image after an accepted request.
    ///
    /// Uses the download watchdog as the deadline since the device answers
    /// only once the whole image is stored.
    ///
    /// # Errors
    ///
    /// Returns an error when the image does not fit in one frame or the
    /// connection drops.
    #[instrument(skip(session, image), level = "info", fields(bytes = image.len()))]
    pub async fn upload(
        session: &DeviceSession,
        image: &[u8],
    ) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        info!("uploading firmware image");
        session
            .send_with_timeout(
                CommandId::FirmwareUpload,
                image,
                Some(session.config().download_watchdog()),
            )
            .await?
            .try_map(|packet| status_byte(CommandId::FirmwareUpload, packet.body()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn request_body_is_version_then_size() {
        assert_eq!(
            [0x00, 0x06, 0x01, 0x20, 0x00, 0x10, 0x00, 0x00],
            FirmwareHandler::request_body(393_504, 0x0010_0000)
        );
    }

    #[rstest]
    #[case(0, FirmwareUpgradeStatus::Accepted)]
    #[case(1, FirmwareUpgradeStatus::WrongVersion)]
    #[case(2, FirmwareUpgradeStatus::Busy)]
    #[case(3, FirmwareUpgradeStatus::CardFull)]
    #[case(4, FirmwareUpgradeStatus::CardError)]
    #[case(7, FirmwareUpgradeStatus::Other(7))]
    fn upgrade_status_codes(#[case] code: u8, #[case] expected: FirmwareUpgradeStatus) {
        assert_eq!(expected, FirmwareUpgradeStatus::from(code));
    }
}
