use serde::Serialize;
use time::PrimitiveDateTime;
use tracing::instrument;

use crate::error::ProtocolError;
use crate::hw::{DeviceSession, Outcome};
use crate::protocol::CommandId;

use super::bcd::{BCD_TIMESTAMP_LEN, decode_bcd_timestamp, encode_bcd_timestamp};
use super::response::{DeviceStatus, status_byte};

/// Clock reading returned by the recorder.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(tag = "state", content = "time", rename_all = "snake_case")]
pub enum DeviceTime {
    Known(PrimitiveDateTime),
    /// The device returned an all-zero clock.
    Unknown,
}

/// Handler for reading and setting the recorder clock.
pub struct DeviceTimeHandler;

impl DeviceTimeHandler {
    fn decode(body: &[u8]) -> Result<DeviceTime, ProtocolError> {
        let bytes = body.get(..BCD_TIMESTAMP_LEN).ok_or_else(|| {
            ProtocolError::short_response(CommandId::GetTime, BCD_TIMESTAMP_LEN, body.len())
        })?;
        Ok(match decode_bcd_timestamp(bytes)? {
            Some(timestamp) => DeviceTime::Known(timestamp),
            None => DeviceTime::Unknown,
        })
    }

    /// Reads the device clock.
    ///
    /// # Errors
    ///
    /// Returns an error when the response is not a valid BCD timestamp or the
    /// connection drops.
    #[instrument(skip(session), level = "debug")]
    pub async fn get_time(session: &DeviceSession) -> Result<Outcome<DeviceTime>, ProtocolError> {
        session
            .send(CommandId::GetTime, &[])
            .await?
            .try_map(|packet| Self::decode(packet.body()))
    }

    /// Sets the device clock to a local wall-clock time.
    ///
    /// ```
    /// # async fn demo(session: hidock::DeviceSession) -> Result<(), hidock::ProtocolError> {
    /// use hidock::DeviceTimeHandler;
    /// use time::{OffsetDateTime, PrimitiveDateTime};
    ///
    /// let now = OffsetDateTime::now_utc();
    /// DeviceTimeHandler::set_time(&session, PrimitiveDateTime::new(now.date(), now.time())).await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the timestamp cannot be encoded or the connection drops.
    #[instrument(skip(session), level = "debug", fields(%timestamp))]
    pub async fn set_time(
        session: &DeviceSession,
        timestamp: PrimitiveDateTime,
    ) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        let payload = encode_bcd_timestamp(timestamp)?;
        session
            .send(CommandId::SetTime, &payload)
            .await?
            .try_map(|packet| status_byte(CommandId::SetTime, packet.body()))
    }
}
