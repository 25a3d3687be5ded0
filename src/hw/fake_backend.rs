use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bon::Builder;
use time::PrimitiveDateTime;
use time::macros::datetime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::model::FoundDevice;
use super::transport::Transport;
use crate::error::{FixtureError, TransportError};
use crate::handlers::{FrameCodec, FrameDecoder, Packet, encode_bcd_timestamp};
use crate::protocol::{CommandId, DeviceModel, Exchange};

const DEFAULT_FIRMWARE: u32 = 393_504;
const DEFAULT_SERIAL: &str = "HD1E243505435";
const DEFAULT_CLOCK: PrimitiveDateTime = datetime!(2025-05-12 11:41:41);
const CARD_CAPACITY_MIB: u32 = 30_208;
const SERIAL_FIELD_LEN: usize = 16;
const STRAY_SEQUENCE_OFFSET: u32 = 0x1000;
const SCAN_RESULT: (&str, [u8; 6]) = ("HiDock Buds", [0x5C, 0xF3, 0x70, 0x12, 0x34, 0x56]);
/// auto-record on, auto-play off, notification on, Bluetooth tone off.
const DEFAULT_SETTINGS: [u8; 16] = [0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, 1];

/// One recording held by the fake recorder.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FakeFile {
    name: String,
    recording_type: u8,
    length: u32,
}

impl FakeFile {
    #[must_use]
    pub fn new(name: impl Into<String>, recording_type: u8, length: u32) -> Self {
        Self {
            name: name.into(),
            recording_type,
            length,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Returns the deterministic file contents: byte `i` is `i % 251`.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        let length = usize::try_from(self.length).unwrap_or(usize::MAX);
        (0..=250_u8).cycle().take(length).collect()
    }

    fn signature(&self) -> [u8; 16] {
        let mut signature = [0u8; 16];
        for (index, byte) in self.name.bytes().enumerate() {
            signature[index % 16] ^= byte;
        }
        signature
    }

    fn list_entry(&self) -> Vec<u8> {
        let name_len = u32::try_from(self.name.len()).unwrap_or(0).min(0x00FF_FFFF);
        let mut entry = vec![self.recording_type];
        entry.extend_from_slice(&name_len.to_be_bytes()[1..]);
        entry.extend_from_slice(self.name.as_bytes());
        entry.extend_from_slice(&self.length.to_be_bytes());
        entry.extend_from_slice(&[0; 6]);
        entry.extend_from_slice(&self.signature());
        entry
    }
}

/// Parsed `name:length:type;...` file fixture.
#[derive(Debug, Clone, derive_more::Into)]
pub struct FakeFiles {
    files: Vec<FakeFile>,
}

impl FromStr for FakeFiles {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(FixtureError::EmptyFixture);
        }
        let files = value
            .split(';')
            .map(str::trim)
            .filter(|record| !record.is_empty())
            .map(parse_file_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { files })
    }
}

fn parse_file_record(record: &str) -> Result<FakeFile, FixtureError> {
    let fields: Vec<&str> = record.split(':').map(str::trim).collect();
    let [name, length, recording_type] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount {
            record: record.to_string(),
        });
    };
    if name.is_empty() {
        return Err(FixtureError::EmptyFileName);
    }
    Ok(FakeFile::new(
        *name,
        recording_type.parse::<u8>()?,
        length.parse::<u32>()?,
    ))
}

fn default_files() -> Vec<FakeFile> {
    vec![
        FakeFile::new("20250512114141REC01.wav", 1, 64_000),
        FakeFile::new("2025May13-090000-Rec02.hda", 2, 960_044),
        FakeFile::new("2025May14-171500-Rec03.hda", 5, 120_000),
    ]
}

/// Behaviour of a simulated recorder.
#[derive(Debug, Clone, Builder)]
pub struct FakeRecorderConfig {
    #[builder(default = DeviceModel::H1E)]
    model: DeviceModel,
    #[builder(default = DEFAULT_FIRMWARE)]
    firmware_number: u32,
    #[builder(default = DEFAULT_SERIAL.to_string(), into)]
    serial: String,
    #[builder(default = default_files())]
    files: Vec<FakeFile>,
    #[builder(default = DEFAULT_CLOCK)]
    clock: PrimitiveDateTime,
    /// Report an all-zero clock.
    #[builder(default)]
    clock_unset: bool,
    /// Commands the recorder never answers.
    #[builder(default)]
    silent_commands: Vec<CommandId>,
    /// Garbage written ahead of every response.
    #[builder(default)]
    junk_prefix: Vec<u8>,
    /// Precede single responses with a packet carrying a wrong sequence.
    #[builder(default)]
    stray_packets: bool,
    #[builder(default = 4096)]
    transfer_chunk_size: usize,
    #[builder(default = 128)]
    list_chunk_size: usize,
    /// Split outgoing bytes into reads of at most this size.
    delivery_chunk_size: Option<usize>,
    /// Send an empty chunk before every transfer chunk after the first.
    #[builder(default)]
    keepalive_chunks: bool,
    /// Status byte answered to firmware upgrade requests.
    #[builder(default)]
    firmware_status: u8,
}

impl Default for FakeRecorderConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug)]
struct RecorderState {
    decoder: FrameDecoder,
    files: Vec<FakeFile>,
    clock: [u8; 7],
    settings: [u8; 16],
    headset: Option<[u8; 6]>,
    received: Vec<CommandId>,
}

#[derive(Debug)]
struct InboundQueue {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

#[derive(Debug)]
struct FakeTransport {
    config: FakeRecorderConfig,
    state: Mutex<RecorderState>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: tokio::sync::Mutex<InboundQueue>,
    unplugged: CancellationToken,
    closed: CancellationToken,
}

/// An in-process recorder that speaks the device protocol.
///
/// ```
/// use hidock::{CommandId, FakeRecorder, FakeRecorderConfig};
///
/// let recorder = FakeRecorder::new(
///     FakeRecorderConfig::builder()
///         .silent_commands(vec![CommandId::GetTime])
///         .build(),
/// );
/// assert!(recorder.received_commands().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct FakeRecorder {
    transport: Arc<FakeTransport>,
}

impl Default for FakeRecorder {
    fn default() -> Self {
        Self::new(FakeRecorderConfig::default())
    }
}

impl FakeRecorder {
    #[must_use]
    pub fn new(config: FakeRecorderConfig) -> Self {
        let clock = if config.clock_unset {
            [0; 7]
        } else {
            encode_bcd_timestamp(config.clock).unwrap_or([0; 7])
        };
        let (outbound, receiver) = mpsc::unbounded_channel();
        let state = RecorderState {
            decoder: FrameDecoder::new(),
            files: config.files.clone(),
            clock,
            settings: DEFAULT_SETTINGS,
            headset: None,
            received: Vec::new(),
        };

        Self {
            transport: Arc::new(FakeTransport {
                config,
                state: Mutex::new(state),
                outbound,
                inbound: tokio::sync::Mutex::new(InboundQueue {
                    receiver,
                    pending: VecDeque::new(),
                }),
                unplugged: CancellationToken::new(),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Returns the transport a session talks through.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport) as Arc<dyn Transport>
    }

    #[must_use]
    pub fn model(&self) -> DeviceModel {
        self.transport.config.model
    }

    #[must_use]
    pub fn product_id(&self) -> u16 {
        self.transport.config.model.default_product_id()
    }

    /// Returns the record `HardwareClient::list_devices` reports.
    #[must_use]
    pub fn found_device(&self) -> FoundDevice {
        FoundDevice::new(
            1,
            7,
            self.product_id(),
            self.model(),
            Some(self.transport.config.serial.clone()),
        )
    }

    /// Returns every command decoded so far, in arrival order.
    #[must_use]
    pub fn received_commands(&self) -> Vec<CommandId> {
        self.transport.lock_state().received.clone()
    }

    /// Returns the names of the files still stored.
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        self.transport
            .lock_state()
            .files
            .iter()
            .map(|file| file.name.clone())
            .collect()
    }

    /// Simulates pulling the USB cable.
    pub fn unplug(&self) {
        self.transport.unplugged.cancel();
    }
}

impl FakeTransport {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, frames: Vec<Vec<u8>>) {
        let mut bytes = Vec::new();
        for frame in frames {
            bytes.extend_from_slice(&self.config.junk_prefix);
            bytes.extend(frame);
        }
        if bytes.is_empty() {
            return;
        }
        let pieces: Vec<Vec<u8>> = match self.config.delivery_chunk_size {
            Some(size) if size > 0 => bytes.chunks(size).map(<[u8]>::to_vec).collect(),
            _ => vec![bytes],
        };
        for piece in pieces {
            if self.outbound.send(piece).is_err() {
                debug!("fake recorder reader is gone");
                return;
            }
        }
    }

    fn respond(&self, state: &mut RecorderState, packet: &Packet) -> Vec<Vec<u8>> {
        let Some(command) = packet.command() else {
            warn!(command = packet.command_code(), "fake recorder ignores unknown command");
            return Vec::new();
        };
        state.received.push(command);
        if self.config.silent_commands.contains(&command) {
            debug!(%command, "fake recorder stays silent");
            return Vec::new();
        }

        let sequence = packet.sequence();
        let bodies = self.bodies_for(state, command, packet.body());
        let mut frames = Vec::with_capacity(bodies.len() + 1);
        if self.config.stray_packets && command.exchange() == Exchange::Single {
            frames.extend(frame(
                command,
                sequence.wrapping_add(STRAY_SEQUENCE_OFFSET),
                &[0xEE; 4],
            ));
        }
        frames.extend(
            bodies
                .iter()
                .filter_map(|body| frame(command, sequence, body)),
        );
        frames
    }

    fn bodies_for(&self, state: &mut RecorderState, command: CommandId, body: &[u8]) -> Vec<Vec<u8>> {
        let config = &self.config;
        match command {
            CommandId::DeviceInfo => {
                let mut reply = config.firmware_number.to_be_bytes().to_vec();
                let mut serial = config.serial.as_bytes().to_vec();
                serial.resize(SERIAL_FIELD_LEN, 0);
                reply.extend(serial);
                vec![reply]
            }
            CommandId::GetTime => vec![state.clock.to_vec()],
            CommandId::SetTime => {
                if let Ok(clock) = <[u8; 7]>::try_from(body) {
                    state.clock = clock;
                }
                vec![vec![0]]
            }
            CommandId::FileCount => {
                let count = u32::try_from(state.files.len()).unwrap_or(u32::MAX);
                vec![count.to_be_bytes().to_vec()]
            }
            CommandId::FileList => {
                let mut payload = Vec::new();
                if config.firmware_number > crate::handlers::FILE_COUNT_PREQUERY_MAX_FIRMWARE {
                    let count = u32::try_from(state.files.len()).unwrap_or(u32::MAX);
                    payload.extend_from_slice(&[0xFF, 0xFF]);
                    payload.extend_from_slice(&count.to_be_bytes());
                }
                for file in &state.files {
                    payload.extend(file.list_entry());
                }
                payload
                    .chunks(config.list_chunk_size.max(1))
                    .map(<[u8]>::to_vec)
                    .collect()
            }
            CommandId::TransferFile => {
                let name = String::from_utf8_lossy(body);
                let Some(file) = state.files.iter().find(|file| file.name == name) else {
                    debug!(%name, "fake recorder has no such file");
                    return Vec::new();
                };
                let contents = file.contents();
                let mut chunks = Vec::new();
                for (index, chunk) in contents.chunks(config.transfer_chunk_size.max(1)).enumerate() {
                    if config.keepalive_chunks && index > 0 {
                        chunks.push(Vec::new());
                    }
                    chunks.push(chunk.to_vec());
                }
                chunks
            }
            CommandId::DeleteFile => {
                let name = String::from_utf8_lossy(body);
                let before = state.files.len();
                state.files.retain(|file| file.name != name);
                vec![vec![u8::from(state.files.len() == before)]]
            }
            CommandId::GetSettings => vec![state.settings.to_vec()],
            CommandId::SetSettings => {
                for offset in [3, 7, 11, 15] {
                    if let Some(&flag) = body.get(offset)
                        && flag != 0
                    {
                        state.settings[offset] = flag;
                    }
                }
                vec![vec![0]]
            }
            CommandId::CardInfo => {
                let used_bytes: u64 = state.files.iter().map(|file| u64::from(file.length)).sum();
                let used_mib = u32::try_from(used_bytes / (1024 * 1024)).unwrap_or(u32::MAX);
                let mut reply = used_mib.to_be_bytes().to_vec();
                reply.extend_from_slice(&CARD_CAPACITY_MIB.to_be_bytes());
                reply.extend_from_slice(&0_u32.to_be_bytes());
                vec![reply]
            }
            CommandId::FormatCard => {
                state.files.clear();
                vec![vec![0]]
            }
            CommandId::RecordingFile => vec![Vec::new()],
            CommandId::RestoreFactorySettings => {
                state.settings = DEFAULT_SETTINGS;
                vec![vec![0]]
            }
            CommandId::FactoryReset => {
                state.settings = DEFAULT_SETTINGS;
                state.files.clear();
                state.headset = None;
                vec![vec![0]]
            }
            CommandId::RequestFirmwareUpgrade => vec![vec![config.firmware_status]],
            CommandId::FirmwareUpload | CommandId::MeetingSchedule => vec![vec![0]],
            CommandId::BluetoothScan => {
                let (name, mac) = SCAN_RESULT;
                let mut reply = 1_u16.to_be_bytes().to_vec();
                reply.extend(headset_record(name, mac));
                vec![reply]
            }
            CommandId::BluetoothCommand => {
                match body.split_first() {
                    Some((0, mac)) => state.headset = <[u8; 6]>::try_from(mac).ok(),
                    Some((1, _)) => state.headset = None,
                    _ => return vec![vec![1]],
                }
                vec![vec![0]]
            }
            CommandId::BluetoothStatus => match state.headset {
                Some(mac) => {
                    let mut reply = vec![1];
                    reply.extend(headset_record(SCAN_RESULT.0, mac));
                    vec![reply]
                }
                None => vec![vec![0]],
            },
        }
    }
}

fn headset_record(name: &str, mac: [u8; 6]) -> Vec<u8> {
    let name_len = u16::try_from(name.len()).unwrap_or(u16::MAX);
    let mut record = name_len.to_be_bytes().to_vec();
    record.extend_from_slice(name.as_bytes());
    record.extend_from_slice(&mac);
    record
}

fn frame(command: CommandId, sequence: u32, body: &[u8]) -> Option<Vec<u8>> {
    match FrameCodec::encode(command.code(), sequence, body) {
        Ok(frame) => Some(frame),
        Err(error) => {
            warn!(%command, %error, "fake recorder cannot frame response");
            None
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn write(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        if self.unplugged.is_cancelled() {
            return Err(TransportError::Disconnected);
        }
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let frames = {
            let mut state = self.lock_state();
            state.decoder.extend(bytes);
            let mut frames = Vec::new();
            while let Some(packet) = state.decoder.next_packet() {
                trace!(command = packet.command_code(), sequence = packet.sequence(), "fake recorder received");
                frames.extend(self.respond(&mut state, &packet));
            }
            frames
        };
        self.deliver(frames);
        Ok(bytes.len())
    }

    async fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut inbound = self.inbound.lock().await;
        if inbound.pending.is_empty() {
            let bytes = tokio::select! {
                biased;
                () = self.unplugged.cancelled() => return Err(TransportError::Disconnected),
                () = self.closed.cancelled() => return Err(TransportError::Closed),
                bytes = inbound.receiver.recv() => bytes.ok_or(TransportError::Closed)?,
            };
            inbound.pending.extend(bytes);
        } else if self.unplugged.is_cancelled() {
            return Err(TransportError::Disconnected);
        }

        let take = inbound.pending.len().min(max_len.max(1));
        Ok(inbound.pending.drain(..take).collect())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("a.wav:100:1", 1)]
    #[case("a.wav:100:1; b.hda:1200:5", 2)]
    #[case("a.wav:100:1;", 1)]
    fn file_fixture_parses_records(#[case] fixture: &str, #[case] expected: usize) {
        let files: Vec<FakeFile> = fixture
            .parse::<FakeFiles>()
            .expect("fixture should parse")
            .into();
        assert_eq!(expected, files.len());
    }

    #[test]
    fn file_fixture_rejects_bad_records() {
        assert_matches!("".parse::<FakeFiles>(), Err(FixtureError::EmptyFixture));
        assert_matches!(
            "a.wav:100".parse::<FakeFiles>(),
            Err(FixtureError::InvalidRecordFieldCount { .. })
        );
        assert_matches!(":100:1".parse::<FakeFiles>(), Err(FixtureError::EmptyFileName));
        assert_matches!(
            "a.wav:big:1".parse::<FakeFiles>(),
            Err(FixtureError::InvalidNumber(_))
        );
    }

    #[test]
    fn contents_cycle_through_251_values() {
        let contents = FakeFile::new("x", 1, 600).contents();
        assert_eq!(600, contents.len());
        assert_eq!(0, contents[251]);
        assert_eq!(250, contents[250]);
    }

    #[tokio::test]
    async fn answers_device_info_with_echoed_sequence() {
        let recorder = FakeRecorder::default();
        let transport = recorder.transport();
        let request = FrameCodec::encode(CommandId::DeviceInfo.code(), 41, &[])
            .expect("empty body should encode");

        transport.write(&request).await.expect("write should succeed");
        let bytes = transport.read(4096).await.expect("read should succeed");

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        let packet = decoder.next_packet().expect("a response should be framed");
        assert_eq!(41, packet.sequence());
        assert_eq!(&[0x00, 0x06, 0x01, 0x20], &packet.body()[..4]);
        assert_eq!(vec![CommandId::DeviceInfo], recorder.received_commands());
    }

    #[tokio::test]
    async fn unplug_fails_reads_and_writes() {
        let recorder = FakeRecorder::default();
        let transport = recorder.transport();
        recorder.unplug();

        assert_matches!(transport.write(&[0x12]).await, Err(TransportError::Disconnected));
        assert_matches!(transport.read(64).await, Err(TransportError::Disconnected));
    }
}
