use serde::Serialize;
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;
use time::PrimitiveDateTime;
use tracing::instrument;

use crate::error::ProtocolError;
use crate::hw::{DeviceSession, Outcome};
use crate::protocol::CommandId;

use super::bcd::{BcdError, encode_bcd_timestamp};
use super::response::{DeviceStatus, status_byte};

const KEY_REPORT_LEN: usize = 8;
const SHORTCUT_SLOTS: usize = 4;
const RESERVED: [u8; 2] = [0, 0];

const CTRL: u8 = 0x01;
const SHIFT: u8 = 0x02;
const ALT: u8 = 0x04;
const GUI: u8 = 0x08;

const KEY_A: u8 = 0x04;
const KEY_D: u8 = 0x07;
const KEY_E: u8 = 0x08;
const KEY_H: u8 = 0x0B;
const KEY_K: u8 = 0x0E;
const KEY_L: u8 = 0x0F;
const KEY_M: u8 = 0x10;
const KEY_O: u8 = 0x12;
const KEY_Q: u8 = 0x14;
const KEY_R: u8 = 0x15;
const KEY_V: u8 = 0x19;
const KEY_W: u8 = 0x1A;
const KEY_Y: u8 = 0x1C;
const KEY_SPACE: u8 = 0x2C;

/// Errors returned when building a meeting schedule.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum MeetingScheduleError {
    #[error("meeting ends at {end} before it starts at {start}")]
    EndBeforeStart {
        start: PrimitiveDateTime,
        end: PrimitiveDateTime,
    },
    #[error("meeting time cannot be encoded")]
    Timestamp(#[from] BcdError),
}

/// Meeting application whose shortcuts the recorder buttons trigger.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, EnumString, Display, Serialize)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum MeetingPlatform {
    Zoom,
    Teams,
    GoogleMeet,
    Webex,
    Slack,
    Discord,
}

/// Operating system of the host the shortcuts are typed into.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, EnumString, Display, Serialize)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum HostOs {
    Windows,
    Mac,
    Linux,
}

/// One keyboard shortcut: HID modifier bits plus a HID usage code.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Shortcut {
    modifiers: u8,
    key: u8,
}

impl Shortcut {
    const NONE: Self = Self { modifiers: 0, key: 0 };

    const fn new(modifiers: u8, key: u8) -> Self {
        Self { modifiers, key }
    }

    fn key_report(self) -> [u8; KEY_REPORT_LEN] {
        [self.modifiers, 0, self.key, 0, 0, 0, 0, 0]
    }
}

/// Shortcuts for mute, camera, leave, and raise-hand, in button order.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ShortcutTable {
    slots: [Shortcut; SHORTCUT_SLOTS],
}

impl ShortcutTable {
    /// Looks up the fixed shortcut table for a platform and host OS.
    #[must_use]
    pub fn for_platform(platform: MeetingPlatform, os: HostOs) -> Self {
        let mac = os == HostOs::Mac;
        let slots = match platform {
            MeetingPlatform::Zoom if mac => [
                Shortcut::new(GUI | SHIFT, KEY_A),
                Shortcut::new(GUI | SHIFT, KEY_V),
                Shortcut::new(GUI, KEY_W),
                Shortcut::new(ALT, KEY_Y),
            ],
            MeetingPlatform::Zoom => [
                Shortcut::new(ALT, KEY_A),
                Shortcut::new(ALT, KEY_V),
                Shortcut::new(ALT, KEY_Q),
                Shortcut::new(ALT, KEY_Y),
            ],
            MeetingPlatform::Teams => {
                let modifiers = if mac { GUI | SHIFT } else { CTRL | SHIFT };
                [
                    Shortcut::new(modifiers, KEY_M),
                    Shortcut::new(modifiers, KEY_O),
                    Shortcut::new(modifiers, KEY_H),
                    Shortcut::new(modifiers, KEY_K),
                ]
            }
            MeetingPlatform::GoogleMeet if mac => [
                Shortcut::new(GUI, KEY_D),
                Shortcut::new(GUI, KEY_E),
                Shortcut::NONE,
                Shortcut::new(GUI | CTRL, KEY_H),
            ],
            MeetingPlatform::GoogleMeet => [
                Shortcut::new(CTRL, KEY_D),
                Shortcut::new(CTRL, KEY_E),
                Shortcut::NONE,
                Shortcut::new(CTRL | ALT, KEY_H),
            ],
            MeetingPlatform::Webex if mac => [
                Shortcut::new(GUI | SHIFT, KEY_M),
                Shortcut::new(GUI | SHIFT, KEY_V),
                Shortcut::new(GUI, KEY_L),
                Shortcut::new(GUI | SHIFT, KEY_R),
            ],
            MeetingPlatform::Webex => [
                Shortcut::new(CTRL, KEY_M),
                Shortcut::new(CTRL | SHIFT, KEY_V),
                Shortcut::new(CTRL, KEY_L),
                Shortcut::new(CTRL | SHIFT, KEY_R),
            ],
            MeetingPlatform::Slack => {
                let modifiers = if mac { GUI | SHIFT } else { CTRL | SHIFT };
                [
                    Shortcut::new(modifiers, KEY_SPACE),
                    Shortcut::new(modifiers, KEY_V),
                    Shortcut::new(modifiers, KEY_H),
                    Shortcut::NONE,
                ]
            }
            MeetingPlatform::Discord => {
                let modifiers = if mac { GUI | SHIFT } else { CTRL | SHIFT };
                [
                    Shortcut::new(modifiers, KEY_M),
                    Shortcut::NONE,
                    Shortcut::NONE,
                    Shortcut::NONE,
                ]
            }
        };
        Self { slots }
    }

    fn key_reports(&self) -> impl Iterator<Item = [u8; KEY_REPORT_LEN]> + '_ {
        self.slots.iter().map(|slot| slot.key_report())
    }
}

/// A scheduled meeting and the shortcuts the recorder should send during it.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MeetingSchedule {
    platform: MeetingPlatform,
    os: HostOs,
    start: PrimitiveDateTime,
    end: PrimitiveDateTime,
}

impl MeetingSchedule {
    /// Validates the meeting window.
    ///
    /// # Errors
    ///
    /// Returns an error when `end` is before `start`.
    pub fn new(
        platform: MeetingPlatform,
        os: HostOs,
        start: PrimitiveDateTime,
        end: PrimitiveDateTime,
    ) -> Result<Self, MeetingScheduleError> {
        if end < start {
            return Err(MeetingScheduleError::EndBeforeStart { start, end });
        }
        Ok(Self {
            platform,
            os,
            start,
            end,
        })
    }

    #[must_use]
    pub fn platform(&self) -> MeetingPlatform {
        self.platform
    }

    #[must_use]
    pub fn os(&self) -> HostOs {
        self.os
    }

    /// Encodes the schedule body: start, end, two reserved bytes, key reports.
    ///
    /// # Errors
    ///
    /// Returns an error when a timestamp falls outside the BCD year range.
    pub fn encode(&self) -> Result<Vec<u8>, MeetingScheduleError> {
        let table = ShortcutTable::for_platform(self.platform, self.os);
        let mut body = Vec::with_capacity(7 * 2 + RESERVED.len() + KEY_REPORT_LEN * SHORTCUT_SLOTS);
        body.extend_from_slice(&encode_bcd_timestamp(self.start)?);
        body.extend_from_slice(&encode_bcd_timestamp(self.end)?);
        body.extend_from_slice(&RESERVED);
        for report in table.key_reports() {
            body.extend_from_slice(&report);
        }
        Ok(body)
    }
}

/// Handler for meeting shortcut schedules.
pub struct MeetingScheduleHandler;

impl MeetingScheduleHandler {
    /// Sends one meeting schedule to the recorder.
    ///
    /// ```
    /// # async fn demo(session: hidock::DeviceSession) -> Result<(), hidock::ProtocolError> {
    /// use hidock::{HostOs, MeetingPlatform, MeetingSchedule, MeetingScheduleHandler};
    /// use time::macros::datetime;
    ///
    /// let schedule = MeetingSchedule::new(
    ///     MeetingPlatform::Teams,
    ///     HostOs::Windows,
    ///     datetime!(2025-05-12 09:00),
    ///     datetime!(2025-05-12 09:30),
    /// )?;
    /// MeetingScheduleHandler::send_schedule(&session, &schedule).await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the schedule cannot be encoded or the connection drops.
    #[instrument(skip(session), level = "debug")]
    pub async fn send_schedule(
        session: &DeviceSession,
        schedule: &MeetingSchedule,
    ) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        let body = schedule.encode()?;
        session
            .send(CommandId::MeetingSchedule, &body)
            .await?
            .try_map(|packet| status_byte(CommandId::MeetingSchedule, packet.body()))
    }
}
