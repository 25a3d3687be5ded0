use std::collections::HashMap;
use std::sync::LazyLock;

use serde::Serialize;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// Two-byte marker that starts every frame.
pub(crate) const SYNC_MARKER: [u8; 2] = [0x12, 0x34];

/// Fixed frame header length in bytes.
pub(crate) const HEADER_LEN: usize = 12;

/// Largest body length representable in the 24-bit length field.
pub(crate) const MAX_BODY_LEN: usize = 0x00FF_FFFF;

/// USB vendor identifier shared by every supported recorder.
pub const USB_VENDOR_ID: u16 = 0x10D6;

/// USB interface claimed for bulk traffic.
pub(crate) const USB_INTERFACE: u8 = 0;

/// Bulk OUT endpoint address.
pub(crate) const ENDPOINT_OUT: u8 = 0x01;

/// Bulk IN endpoint address.
pub(crate) const ENDPOINT_IN: u8 = 0x82;

/// Recorder commands understood by the device.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum CommandId {
    /// Firmware version and serial number.
    #[strum(to_string = "device_info")]
    DeviceInfo = 1,
    /// Read the device clock.
    #[strum(to_string = "get_time")]
    GetTime = 2,
    /// Set the device clock.
    #[strum(to_string = "set_time")]
    SetTime = 3,
    /// Enumerate stored recordings.
    #[strum(to_string = "file_list")]
    FileList = 4,
    /// Stream one recording to the host.
    #[strum(to_string = "transfer_file")]
    TransferFile = 5,
    /// Count stored recordings.
    #[strum(to_string = "file_count")]
    FileCount = 6,
    /// Delete one recording.
    #[strum(to_string = "delete_file")]
    DeleteFile = 7,
    /// Announce a firmware upgrade.
    #[strum(to_string = "request_firmware_upgrade")]
    RequestFirmwareUpgrade = 8,
    /// Upload a firmware image.
    #[strum(to_string = "firmware_upload")]
    FirmwareUpload = 9,
    /// Read behaviour settings.
    #[strum(to_string = "get_settings")]
    GetSettings = 11,
    /// Write behaviour settings.
    #[strum(to_string = "set_settings")]
    SetSettings = 12,
    /// Storage card usage.
    #[strum(to_string = "card_info")]
    CardInfo = 16,
    /// Format the storage card.
    #[strum(to_string = "format_card")]
    FormatCard = 17,
    /// Name of the recording currently being captured.
    #[strum(to_string = "recording_file")]
    RecordingFile = 18,
    /// Restore default behaviour settings.
    #[strum(to_string = "restore_factory_settings")]
    RestoreFactorySettings = 19,
    /// Schedule a meeting with keyboard shortcuts.
    #[strum(to_string = "meeting_schedule")]
    MeetingSchedule = 20,
    /// Scan for Bluetooth headsets.
    #[strum(to_string = "bluetooth_scan")]
    BluetoothScan = 0x1001,
    /// Connect or disconnect a Bluetooth headset.
    #[strum(to_string = "bluetooth_command")]
    BluetoothCommand = 0x1002,
    /// Current Bluetooth connection.
    #[strum(to_string = "bluetooth_status")]
    BluetoothStatus = 0x1003,
    /// Full factory reset.
    #[strum(to_string = "factory_reset")]
    FactoryReset = 0xF00B,
}

impl CommandId {
    /// Returns the numeric wire identifier.
    ///
    /// ```
    /// assert_eq!(5, hidock::CommandId::TransferFile.code());
    /// ```
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Looks up a command by its wire identifier.
    ///
    /// ```
    /// use hidock::CommandId;
    ///
    /// assert_eq!(Some(CommandId::FileList), CommandId::from_code(4));
    /// assert_eq!(None, CommandId::from_code(0x7777));
    /// ```
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        COMMANDS_BY_CODE.get(&code).copied()
    }

    /// Returns how the device answers this command.
    #[must_use]
    pub fn exchange(self) -> Exchange {
        match self {
            Self::FileList | Self::TransferFile => Exchange::Streaming,
            _ => Exchange::Single,
        }
    }
}

/// Shape of the device answer to one command.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum Exchange {
    /// Exactly one response packet echoing the request sequence.
    #[strum(to_string = "single")]
    Single,
    /// Any number of packets sharing the command identifier.
    #[strum(to_string = "streaming")]
    Streaming,
}

/// Commands keyed by wire identifier.
static COMMANDS_BY_CODE: LazyLock<HashMap<u16, CommandId>> =
    LazyLock::new(|| CommandId::iter().map(|command| (command.code(), command)).collect());

/// Supported recorder hardware variants.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display, EnumString, Serialize,
)]
#[strum(ascii_case_insensitive)]
pub enum DeviceModel {
    /// Base desk recorder.
    #[strum(to_string = "h1")]
    #[serde(rename = "h1")]
    H1,
    /// Enhanced desk recorder.
    #[strum(to_string = "h1e")]
    #[serde(rename = "h1e")]
    H1E,
    /// Portable recorder with Bluetooth headset support.
    #[strum(to_string = "p1")]
    #[serde(rename = "p1")]
    P1,
}

impl DeviceModel {
    /// Maps a USB product identifier to a hardware variant.
    ///
    /// ```
    /// use hidock::DeviceModel;
    ///
    /// assert_eq!(Some(DeviceModel::H1E), DeviceModel::from_product_id(0xB00D));
    /// assert_eq!(None, DeviceModel::from_product_id(0x0001));
    /// ```
    #[must_use]
    pub fn from_product_id(product_id: u16) -> Option<Self> {
        match product_id {
            0xAF0C | 0xB00C => Some(Self::H1),
            0xAF0D | 0xB00D => Some(Self::H1E),
            0xAF0E | 0xB00E => Some(Self::P1),
            _ => None,
        }
    }

    /// Returns the product identifier current production units enumerate with.
    #[must_use]
    pub fn default_product_id(self) -> u16 {
        match self {
            Self::H1 => 0xB00C,
            Self::H1E => 0xB00D,
            Self::P1 => 0xB00E,
        }
    }
}
