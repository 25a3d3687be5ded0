use bon::Builder;
use serde::Serialize;
use tracing::instrument;

use crate::error::ProtocolError;
use crate::hw::{DeviceSession, Feature, Outcome};
use crate::protocol::CommandId;

use super::response::{DeviceStatus, status_byte};

/// Size of the settings record in both directions.
pub const SETTINGS_LEN: usize = 16;

const AUTO_RECORD_OFFSET: usize = 3;
const AUTO_PLAY_OFFSET: usize = 7;
const NOTIFICATION_OFFSET: usize = 11;
const BLUETOOTH_TONE_OFFSET: usize = 15;

const FLAG_UNCHANGED: u8 = 0;
const FLAG_ENABLE: u8 = 1;
const FLAG_DISABLE: u8 = 2;

/// Behaviour flags read back from the recorder.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct DeviceSettings {
    pub auto_record: bool,
    pub auto_play: bool,
    pub notification: bool,
    /// Read with the firmware's inverted polarity: `2` at offset 15 means on.
    pub bluetooth_tone: bool,
}

impl DeviceSettings {
    /// Decodes a settings response.
    ///
    /// # Errors
    ///
    /// Returns an error when the body is shorter than the settings record.
    ///
    /// ```
    /// use hidock::DeviceSettings;
    ///
    /// let mut body = [0u8; 16];
    /// body[3] = 1;
    /// body[15] = 2;
    /// let settings = DeviceSettings::decode(&body)?;
    /// assert!(settings.auto_record);
    /// assert!(settings.bluetooth_tone);
    /// # Ok::<(), hidock::ProtocolError>(())
    /// ```
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() < SETTINGS_LEN {
            return Err(ProtocolError::short_response(
                CommandId::GetSettings,
                SETTINGS_LEN,
                body.len(),
            ));
        }
        Ok(Self {
            auto_record: body[AUTO_RECORD_OFFSET] == FLAG_ENABLE,
            auto_play: body[AUTO_PLAY_OFFSET] == FLAG_ENABLE,
            notification: body[NOTIFICATION_OFFSET] == FLAG_ENABLE,
            bluetooth_tone: body[BLUETOOTH_TONE_OFFSET] == FLAG_DISABLE,
        })
    }
}

/// A partial settings change; `None` leaves a flag as it is.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Builder)]
pub struct SettingsUpdate {
    auto_record: Option<bool>,
    auto_play: Option<bool>,
    notification: Option<bool>,
    bluetooth_prompt: Option<bool>,
}

impl SettingsUpdate {
    /// Returns `true` when no flag would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns `true` when the update touches the Bluetooth prompt flag.
    #[must_use]
    pub fn touches_bluetooth_prompt(&self) -> bool {
        self.bluetooth_prompt.is_some()
    }

    /// Encodes the 16-byte settings record.
    ///
    /// ```
    /// use hidock::SettingsUpdate;
    ///
    /// let body = SettingsUpdate::builder().auto_record(true).build().encode();
    /// assert_eq!(1, body[3]);
    /// assert_eq!(0, body[15]);
    /// ```
    #[must_use]
    pub fn encode(&self) -> [u8; SETTINGS_LEN] {
        let mut body = [0u8; SETTINGS_LEN];
        body[AUTO_RECORD_OFFSET] = flag_byte(self.auto_record);
        body[AUTO_PLAY_OFFSET] = flag_byte(self.auto_play);
        body[NOTIFICATION_OFFSET] = flag_byte(self.notification);
        body[BLUETOOTH_TONE_OFFSET] = flag_byte(self.bluetooth_prompt);
        body
    }
}

fn flag_byte(flag: Option<bool>) -> u8 {
    match flag {
        None => FLAG_UNCHANGED,
        Some(true) => FLAG_ENABLE,
        Some(false) => FLAG_DISABLE,
    }
}

/// Handler for the behaviour settings commands.
pub struct SettingsHandler;

impl SettingsHandler {
    /// Reads the behaviour flags.
    ///
    /// # Errors
    ///
    /// Returns an error when the response is too short or the connection drops.
    #[instrument(skip(session), level = "debug")]
    pub async fn get_settings(
        session: &DeviceSession,
    ) -> Result<Outcome<DeviceSettings>, ProtocolError> {
        session
            .send_gated(Feature::Settings, CommandId::GetSettings, &[])
            .await?
            .try_map(|packet| DeviceSettings::decode(packet.body()))
    }

    /// Writes a partial settings change.
    ///
    /// Touching the Bluetooth prompt flag also requires the Bluetooth prompt
    /// capability; nothing is sent when either gate rejects the update.
    ///
    /// ```
    /// # async fn demo(session: hidock::DeviceSession) -> Result<(), hidock::ProtocolError> {
    /// use hidock::{SettingsHandler, SettingsUpdate};
    ///
    /// let update = SettingsUpdate::builder().auto_record(true).notification(false).build();
    /// SettingsHandler::apply(&session, update).await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the acknowledgement is empty or the connection drops.
    #[instrument(skip(session), level = "debug")]
    pub async fn apply(
        session: &DeviceSession,
        update: SettingsUpdate,
    ) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        if update.touches_bluetooth_prompt() && !session.supports(Feature::BluetoothPrompt) {
            return Ok(Outcome::Unsupported(Feature::BluetoothPrompt));
        }
        session
            .send_gated(Feature::Settings, CommandId::SetSettings, &update.encode())
            .await?
            .try_map(|packet| status_byte(CommandId::SetSettings, packet.body()))
    }

    /// Turns automatic recording on or off.
    ///
    /// # Errors
    ///
    /// See [`SettingsHandler::apply`].
    pub async fn set_auto_record(
        session: &DeviceSession,
        enabled: bool,
    ) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        Self::apply(session, SettingsUpdate::builder().auto_record(enabled).build()).await
    }

    /// Turns automatic playback on or off.
    ///
    /// # Errors
    ///
    /// See [`SettingsHandler::apply`].
    pub async fn set_auto_play(
        session: &DeviceSession,
        enabled: bool,
    ) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        Self::apply(session, SettingsUpdate::builder().auto_play(enabled).build()).await
    }

    /// Turns the recording notification on or off.
    ///
    /// # Errors
    ///
    /// See [`SettingsHandler::apply`].
    pub async fn set_notification(
        session: &DeviceSession,
        enabled: bool,
    ) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        Self::apply(session, SettingsUpdate::builder().notification(enabled).build()).await
    }

    /// Turns the Bluetooth connection prompt on or off.
    ///
    /// # Errors
    ///
    /// See [`SettingsHandler::apply`].
    pub async fn set_bluetooth_prompt(
        session: &DeviceSession,
        enabled: bool,
    ) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        Self::apply(
            session,
            SettingsUpdate::builder().bluetooth_prompt(enabled).build(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn update_writes_flags_at_fixed_offsets() {
        let update = SettingsUpdate::builder()
            .auto_record(true)
            .auto_play(false)
            .bluetooth_prompt(false)
            .build();

        insta::assert_debug_snapshot!(update.encode(), @r"
        [
            0,
            0,
            0,
            1,
            0,
            0,
            0,
            2,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            2,
        ]
        ");
    }

    #[test]
    fn disabled_prompt_reads_back_as_tone_on() {
        let encoded = SettingsUpdate::builder()
            .auto_record(true)
            .bluetooth_prompt(false)
            .build()
            .encode();

        let decoded = DeviceSettings::decode(&encoded).expect("record should decode");

        assert_eq!(
            DeviceSettings {
                auto_record: true,
                auto_play: false,
                notification: false,
                bluetooth_tone: true,
            },
            decoded
        );
    }

    #[rstest]
    #[case::unchanged(0, false)]
    #[case::enabled(1, true)]
    #[case::disabled(2, false)]
    fn ordinary_flags_read_one_as_on(#[case] byte: u8, #[case] expected: bool) {
        let mut body = [0u8; SETTINGS_LEN];
        body[NOTIFICATION_OFFSET] = byte;
        assert_eq!(
            expected,
            DeviceSettings::decode(&body).expect("record should decode").notification
        );
    }

    #[test]
    fn empty_update_is_detected() {
        assert!(SettingsUpdate::default().is_empty());
        assert!(!SettingsUpdate::builder().auto_play(true).build().is_empty());
    }

    #[test]
    fn decode_rejects_short_body() {
        assert_matches!(
            DeviceSettings::decode(&[1, 2, 3]),
            Err(ProtocolError::ShortResponse { expected: 16, actual: 3, .. })
        );
    }
}
