mod bcd;
mod bluetooth;
mod device_info;
mod download;
mod file_list;
mod firmware;
mod frame_codec;
mod meeting;
mod response;
mod settings;
mod storage;
mod time_sync;

pub use self::bcd::{
    BCD_TIMESTAMP_LEN, BcdError, decode_bcd, decode_bcd_timestamp, encode_bcd,
    encode_bcd_timestamp,
};
pub use self::bluetooth::{
    BluetoothDevice, BluetoothHandler, BluetoothStatus, MacAddress, MacAddressParseError,
};
pub use self::device_info::{DeviceInfo, DeviceInfoError, DeviceInfoHandler};
pub use self::download::{
    ChunkProgress, DownloadChunk, DownloadError, FileDownload, FileDownloadHandler,
    StreamReassembler,
};
pub use self::file_list::{
    FILE_COUNT_PREQUERY_MAX_FIRMWARE, FileListHandler, FileListParser, FileRecord, SIGNATURE_LEN,
    duration_seconds, timestamp_from_filename,
};
pub(crate) use self::file_list::local_now;
pub use self::firmware::{FirmwareHandler, FirmwareUpgradeStatus};
pub use self::frame_codec::{DecodeStep, FrameCodec, FrameCodecError, FrameDecoder, Packet};
pub use self::meeting::{
    HostOs, MeetingPlatform, MeetingSchedule, MeetingScheduleError, MeetingScheduleHandler,
    Shortcut, ShortcutTable,
};
pub use self::response::DeviceStatus;
pub use self::settings::{DeviceSettings, SETTINGS_LEN, SettingsHandler, SettingsUpdate};
pub use self::storage::{CardInfo, DeleteStatus, StorageHandler};
pub use self::time_sync::{DeviceTime, DeviceTimeHandler};
