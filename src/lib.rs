mod app;
mod cli;
mod error;
mod handlers;
mod hw;
mod protocol;
mod telemetry;
mod terminal;

pub use app::{RunOptions, SessionHandler, run, run_with_clients, run_with_options};
pub use cli::{
    Args, BluetoothAction, CardAction, Command, DeleteArgs, DownloadArgs, FakeArgs, LogLevel,
    OutputFormat, SettingsAction, SettingsSetArgs, TimeAction, Toggle,
};
pub use error::{ConnectionLost, FixtureError, InteractionError, ProtocolError, TransportError};
pub use handlers::{
    BCD_TIMESTAMP_LEN, BcdError, BluetoothDevice, BluetoothHandler, BluetoothStatus, CardInfo,
    ChunkProgress, DecodeStep, DeleteStatus, DeviceInfo, DeviceInfoError, DeviceInfoHandler,
    DeviceSettings, DeviceStatus, DeviceTime, DeviceTimeHandler, DownloadChunk, DownloadError,
    FILE_COUNT_PREQUERY_MAX_FIRMWARE, FileDownload, FileDownloadHandler, FileListHandler,
    FileListParser, FileRecord, FirmwareHandler, FirmwareUpgradeStatus, FrameCodec,
    FrameCodecError, FrameDecoder, HostOs, MacAddress, MacAddressParseError, MeetingPlatform,
    MeetingSchedule, MeetingScheduleError, MeetingScheduleHandler, Packet, SETTINGS_LEN,
    SIGNATURE_LEN, SettingsHandler, SettingsUpdate, Shortcut, ShortcutTable, StorageHandler,
    StreamReassembler, decode_bcd, decode_bcd_timestamp, duration_seconds, encode_bcd,
    encode_bcd_timestamp, timestamp_from_filename,
};
pub use hw::{
    CapabilityGate, DeviceIdentity, DeviceSession, DisconnectReason, FakeFile, FakeFiles,
    FakeRecorder, FakeRecorderConfig, Feature, FirmwareVersion, FoundDevice, HardwareClient,
    Outcome, PendingCommand, Reply, SessionConfig, SessionHooks, StreamEvent, Ticket, Transport,
    UsbTransport, fake_hardware_client, real_hardware_client,
};
pub use protocol::{CommandId, DeviceModel, Exchange, USB_VENDOR_ID};
pub use terminal::{SystemTerminalClient, TerminalClient};
