use serde::Serialize;
use tracing::{info, instrument};

use crate::error::ProtocolError;
use crate::hw::{DeviceSession, Feature, Outcome};
use crate::protocol::CommandId;

use super::response::{DeviceStatus, be_u32, status_byte, text_field};

/// Confirmation body required by destructive maintenance commands.
const CONFIRMATION: [u8; 4] = [1, 2, 3, 4];

/// Result of a delete request, as reported by the device.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    #[display("deleted")]
    Deleted,
    #[display("not found")]
    NotFound,
    #[display("failed")]
    Failed,
    /// A status byte outside the documented set.
    #[display("unknown status {_0}")]
    Other(u8),
}

impl From<u8> for DeleteStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Deleted,
            1 => Self::NotFound,
            2 => Self::Failed,
            other => Self::Other(other),
        }
    }
}

/// Storage card usage.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct CardInfo {
    /// Used space in MiB.
    pub used_mib: u32,
    /// Total space in MiB.
    pub capacity_mib: u32,
    /// Raw card status word.
    pub status: u32,
}

impl CardInfo {
    fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        Ok(Self {
            used_mib: be_u32(CommandId::CardInfo, body, 0)?,
            capacity_mib: be_u32(CommandId::CardInfo, body, 4)?,
            status: be_u32(CommandId::CardInfo, body, 8)?,
        })
    }

    /// Returns the free space in MiB.
    #[must_use]
    pub fn free_mib(&self) -> u32 {
        self.capacity_mib.saturating_sub(self.used_mib)
    }
}

/// Handler for file deletion, card maintenance, and resets.
pub struct StorageHandler;

impl StorageHandler {
    /// Deletes one recording.
    ///
    /// ```
    /// # async fn demo(session: hidock::DeviceSession) -> Result<(), hidock::ProtocolError> {
    /// use hidock::{CommandId, DeleteStatus, StorageHandler};
    ///
    /// let status = StorageHandler::delete_file(&session, "20250512114141REC01.wav")
    ///     .await?
    ///     .into_result(CommandId::DeleteFile)?;
    /// assert_eq!(DeleteStatus::Deleted, status);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the acknowledgement is empty or the connection drops.
    #[instrument(skip(session), level = "debug")]
    pub async fn delete_file(
        session: &DeviceSession,
        name: &str,
    ) -> Result<Outcome<DeleteStatus>, ProtocolError> {
        session
            .send(CommandId::DeleteFile, name.as_bytes())
            .await?
            .try_map(|packet| {
                status_byte(CommandId::DeleteFile, packet.body())
                    .map(|status| DeleteStatus::from(status.code()))
            })
    }

    /// Reads storage card usage.
    ///
    /// # Errors
    ///
    /// Returns an error when the response is truncated or the connection drops.
    #[instrument(skip(session), level = "debug")]
    pub async fn card_info(session: &DeviceSession) -> Result<Outcome<CardInfo>, ProtocolError> {
        session
            .send_gated(Feature::StorageFormat, CommandId::CardInfo, &[])
            .await?
            .try_map(|packet| CardInfo::decode(packet.body()))
    }

    /// Erases every recording on the card.
    ///
    /// # Errors
    ///
    /// Returns an error when the acknowledgement is empty or the connection drops.
    #[instrument(skip(session), level = "info")]
    pub async fn format_card(session: &DeviceSession) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        info!("formatting storage card");
        Self::confirmed(session, Feature::StorageFormat, CommandId::FormatCard).await
    }

    /// Returns the name of the file being recorded, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection drops.
    #[instrument(skip(session), level = "debug")]
    pub async fn current_recording(
        session: &DeviceSession,
    ) -> Result<Outcome<Option<String>>, ProtocolError> {
        Ok(session
            .send(CommandId::RecordingFile, &[])
            .await?
            .map(|packet| Some(text_field(packet.body())).filter(|name| !name.is_empty())))
    }

    /// Restores the behaviour settings to their factory values.
    ///
    /// # Errors
    ///
    /// Returns an error when the acknowledgement is empty or the connection drops.
    #[instrument(skip(session), level = "info")]
    pub async fn restore_factory_settings(
        session: &DeviceSession,
    ) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        Self::confirmed(
            session,
            Feature::FactoryReset,
            CommandId::RestoreFactorySettings,
        )
        .await
    }

    /// Resets the recorder to its factory state.
    ///
    /// # Errors
    ///
    /// Returns an error when the acknowledgement is empty or the connection drops.
    #[instrument(skip(session), level = "info")]
    pub async fn factory_reset(session: &DeviceSession) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        info!("resetting recorder to factory state");
        Self::confirmed(session, Feature::FactoryReset, CommandId::FactoryReset).await
    }

    async fn confirmed(
        session: &DeviceSession,
        feature: Feature,
        command: CommandId,
    ) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        session
            .send_gated(feature, command, &CONFIRMATION)
            .await?
            .try_map(|packet| status_byte(command, packet.body()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::deleted(0, DeleteStatus::Deleted)]
    #[case::missing(1, DeleteStatus::NotFound)]
    #[case::failed(2, DeleteStatus::Failed)]
    #[case::undocumented(9, DeleteStatus::Other(9))]
    fn delete_status_is_reported_verbatim(#[case] code: u8, #[case] expected: DeleteStatus) {
        assert_eq!(expected, DeleteStatus::from(code));
    }

    #[test]
    fn card_info_reads_three_words() {
        let body = [0, 0, 0x04, 0x00, 0, 0, 0x76, 0x00, 0, 0, 0, 1];
        let info = CardInfo::decode(&body).expect("card info should decode");

        assert_eq!(
            CardInfo {
                used_mib: 1024,
                capacity_mib: 30_208,
                status: 1,
            },
            info
        );
        assert_eq!(29_184, info.free_mib());
    }

    #[test]
    fn card_info_rejects_truncated_body() {
        assert_matches!(
            CardInfo::decode(&[0; 10]),
            Err(ProtocolError::ShortResponse { expected: 12, actual: 10, .. })
        );
    }
}
