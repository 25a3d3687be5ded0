use serde::Serialize;
use serde_with::hex::Hex;
use serde_with::serde_as;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use tracing::{debug, instrument, warn};

use crate::error::{ConnectionLost, ProtocolError};
use crate::hw::{DeviceSession, Outcome, StreamEvent};
use crate::protocol::CommandId;

use super::bcd::parse_digit_timestamp;
use super::response::{be_u32, text_field};

/// Firmware at or below this version number needs a file-count pre-query.
pub const FILE_COUNT_PREQUERY_MAX_FIRMWARE: u32 = 327_722;

const LIST_HEADER_MARKER: [u8; 2] = [0xFF, 0xFF];
const LIST_HEADER_LEN: usize = 6;
const ENTRY_PREFIX_LEN: usize = 4;
const RESERVED_LEN: usize = 6;
/// Length of the opaque per-file signature.
pub const SIGNATURE_LEN: usize = 16;
const ENTRY_SUFFIX_LEN: usize = 4 + RESERVED_LEN + SIGNATURE_LEN;

/// One recording stored on the device.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    name: String,
    recording_type: u8,
    length_bytes: u32,
    #[serde_as(as = "Hex")]
    signature: [u8; SIGNATURE_LEN],
    created_at: PrimitiveDateTime,
    duration_seconds: f64,
}

impl FileRecord {
    fn new(
        name: String,
        recording_type: u8,
        length_bytes: u32,
        signature: [u8; SIGNATURE_LEN],
        fallback_time: PrimitiveDateTime,
    ) -> Self {
        let created_at = timestamp_from_filename(&name).unwrap_or(fallback_time);
        Self {
            duration_seconds: duration_seconds(recording_type, length_bytes),
            name,
            recording_type,
            length_bytes,
            signature,
            created_at,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tag selecting the duration formula.
    #[must_use]
    pub fn recording_type(&self) -> u8 {
        self.recording_type
    }

    #[must_use]
    pub fn length_bytes(&self) -> u32 {
        self.length_bytes
    }

    #[must_use]
    pub fn signature(&self) -> &[u8; SIGNATURE_LEN] {
        &self.signature
    }

    /// Returns the signature as lowercase hex.
    #[must_use]
    pub fn signature_hex(&self) -> String {
        hex::encode(self.signature)
    }

    /// Returns the creation time from the filename, or the listing time when
    /// the filename carries none.
    #[must_use]
    pub fn created_at(&self) -> PrimitiveDateTime {
        self.created_at
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }
}

/// Computes the playback duration the device firmware implies for a file.
///
/// The divisors match what shipping host software reports for each type.
///
/// ```
/// use hidock::duration_seconds;
///
/// assert_eq!(10.0, duration_seconds(5, 120_000));
/// assert_eq!(0.0, duration_seconds(2, 44));
/// ```
#[must_use]
pub fn duration_seconds(recording_type: u8, length_bytes: u32) -> f64 {
    let length = f64::from(length_bytes);
    let wav_48k = || {
        if length_bytes > 44 {
            (length - 44.0) / 96_000.0
        } else {
            0.0
        }
    };
    match recording_type {
        1 => (length / 32.0) * 2.0 * 2.0,
        2 => wav_48k(),
        3 => wav_48k() / 2.0,
        5 => length / 12_000.0,
        _ => length / 32_000.0,
    }
}

/// Extracts the creation time encoded in a recording filename.
///
/// Accepts a `YYYYMMDDHHMMSS` prefix or the `YYYYMmmDD-HHMMSS` form.
///
/// ```
/// use hidock::timestamp_from_filename;
/// use time::macros::datetime;
///
/// assert_eq!(
///     Some(datetime!(2025-05-12 11:41:41)),
///     timestamp_from_filename("2025May12-114141-Rec44.hda")
/// );
/// assert_eq!(None, timestamp_from_filename("notes.wav"));
/// ```
#[must_use]
pub fn timestamp_from_filename(name: &str) -> Option<PrimitiveDateTime> {
    if let Some(prefix) = name.get(..14)
        && let Some(timestamp) = parse_digit_timestamp(prefix)
    {
        return Some(timestamp);
    }
    parse_month_name_timestamp(name)
}

fn parse_month_name_timestamp(name: &str) -> Option<PrimitiveDateTime> {
    let number = |range: std::ops::Range<usize>| -> Option<u16> {
        let digits = name.get(range)?;
        if !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    };
    if name.get(9..10)? != "-" {
        return None;
    }

    let year = i32::from(number(0..4)?);
    let month = month_from_abbreviation(name.get(4..7)?)?;
    let day = u8::try_from(number(7..9)?).ok()?;
    let hour = u8::try_from(number(10..12)?).ok()?;
    let minute = u8::try_from(number(12..14)?).ok()?;
    let second = u8::try_from(number(14..16)?).ok()?;

    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}

fn month_from_abbreviation(abbreviation: &str) -> Option<Month> {
    let month = match abbreviation.to_ascii_lowercase().as_str() {
        "jan" => Month::January,
        "feb" => Month::February,
        "mar" => Month::March,
        "apr" => Month::April,
        "may" => Month::May,
        "jun" => Month::June,
        "jul" => Month::July,
        "aug" => Month::August,
        "sep" => Month::September,
        "oct" => Month::October,
        "nov" => Month::November,
        "dec" => Month::December,
        _ => return None,
    };
    Some(month)
}

/// Incremental parser for file-list payloads split across chunks.
///
/// ```
/// use hidock::FileListParser;
/// use time::macros::datetime;
///
/// let mut parser = FileListParser::new(Some(0), datetime!(2025-01-01 0:00));
/// assert!(parser.is_complete());
/// assert!(parser.finish().is_empty());
/// ```
#[derive(Debug)]
pub struct FileListParser {
    buffer: Vec<u8>,
    header_checked: bool,
    expected: Option<u32>,
    entries_seen: u32,
    records: Vec<FileRecord>,
    fallback_time: PrimitiveDateTime,
}

impl FileListParser {
    /// Creates a parser; `expected` comes from a file-count pre-query.
    ///
    /// `fallback_time` becomes the creation time of files whose names carry none.
    #[must_use]
    pub fn new(expected: Option<u32>, fallback_time: PrimitiveDateTime) -> Self {
        Self {
            buffer: Vec::new(),
            header_checked: false,
            expected,
            entries_seen: 0,
            records: Vec::new(),
            fallback_time,
        }
    }

    /// Returns the total the listing will stop at, once known.
    #[must_use]
    pub fn expected_total(&self) -> Option<u32> {
        self.expected
    }

    /// Returns how many entries have been parsed, including ones `finish` drops.
    #[must_use]
    pub fn entries_seen(&self) -> u32 {
        self.entries_seen
    }

    /// Returns `true` once the expected number of entries has been parsed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.expected
            .is_some_and(|expected| self.entries_seen >= expected)
    }

    /// Buffers a chunk and parses every complete entry it finishes.
    ///
    /// Returns the number of entries parsed from this chunk.
    pub fn push(&mut self, chunk: &[u8]) -> usize {
        if self.is_complete() {
            return 0;
        }
        self.buffer.extend_from_slice(chunk);
        if !self.header_checked && !self.read_header() {
            return 0;
        }

        let mut cursor = 0;
        let mut parsed = 0;
        while !self.is_complete() {
            let Some((record, consumed)) = self.parse_entry(&self.buffer[cursor..]) else {
                break;
            };
            cursor += consumed;
            parsed += 1;
            self.entries_seen += 1;
            self.records.push(record);
        }
        self.buffer.drain(..cursor);
        if self.is_complete() && !self.buffer.is_empty() {
            debug!(trailing = self.buffer.len(), "ignoring bytes after the last file entry");
            self.buffer.clear();
        }
        parsed
    }

    /// Returns `false` while too few bytes are buffered to decide on the header.
    fn read_header(&mut self) -> bool {
        if self.buffer.len() < LIST_HEADER_MARKER.len() {
            return false;
        }
        if self.buffer[..LIST_HEADER_MARKER.len()] == LIST_HEADER_MARKER {
            if self.buffer.len() < LIST_HEADER_LEN {
                return false;
            }
            let total = u32::from_be_bytes([
                self.buffer[2],
                self.buffer[3],
                self.buffer[4],
                self.buffer[5],
            ]);
            if self.expected.is_none() {
                self.expected = Some(total);
            }
            self.buffer.drain(..LIST_HEADER_LEN);
        }
        self.header_checked = true;
        true
    }

    fn parse_entry(&self, bytes: &[u8]) -> Option<(FileRecord, usize)> {
        let prefix = bytes.get(..ENTRY_PREFIX_LEN)?;
        let recording_type = prefix[0];
        let name_len = (usize::from(prefix[1]) << 16)
            | (usize::from(prefix[2]) << 8)
            | usize::from(prefix[3]);
        let entry_len = ENTRY_PREFIX_LEN + name_len + ENTRY_SUFFIX_LEN;
        let entry = bytes.get(..entry_len)?;

        let name_end = ENTRY_PREFIX_LEN + name_len;
        let name = text_field(&entry[ENTRY_PREFIX_LEN..name_end]);
        let length_bytes = u32::from_be_bytes(entry[name_end..name_end + 4].try_into().ok()?);
        let signature_start = name_end + 4 + RESERVED_LEN;
        let signature = entry[signature_start..signature_start + SIGNATURE_LEN]
            .try_into()
            .ok()?;

        let record = FileRecord::new(
            name,
            recording_type,
            length_bytes,
            signature,
            self.fallback_time,
        );
        Some((record, entry_len))
    }

    /// Returns the parsed records, minus entries with no name or no data.
    #[must_use]
    pub fn finish(self) -> Vec<FileRecord> {
        if !self.buffer.is_empty() && !self.is_complete() {
            debug!(
                leftover = self.buffer.len(),
                "file list ended inside an entry"
            );
        }
        self.records
            .into_iter()
            .filter(|record| !record.name.is_empty() && record.length_bytes > 0)
            .collect()
    }
}

/// Handler for file enumeration.
pub struct FileListHandler;

impl FileListHandler {
    /// Reads the number of stored files.
    ///
    /// # Errors
    ///
    /// Returns an error when the count is truncated or the connection drops.
    #[instrument(skip(session), level = "debug")]
    pub async fn file_count(session: &DeviceSession) -> Result<Outcome<u32>, ProtocolError> {
        session
            .send(CommandId::FileCount, &[])
            .await?
            .try_map(|packet| {
                if packet.body().is_empty() {
                    Ok(0)
                } else {
                    be_u32(CommandId::FileCount, packet.body(), 0)
                }
            })
    }

    /// Lists every recording on the device.
    ///
    /// ```
    /// # async fn demo(session: hidock::DeviceSession) -> Result<(), hidock::ProtocolError> {
    /// use hidock::{CommandId, FileListHandler};
    ///
    /// let files = FileListHandler::list_files(&session)
    ///     .await?
    ///     .into_result(CommandId::FileList)?;
    /// for file in &files {
    ///     println!("{} {:.1}s", file.name(), file.duration_seconds());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the count pre-query is malformed or the
    /// connection drops.
    #[instrument(skip(session), level = "debug")]
    pub async fn list_files(
        session: &DeviceSession,
    ) -> Result<Outcome<Vec<FileRecord>>, ProtocolError> {
        let firmware = session.identity().firmware().number();
        let expected = if firmware <= FILE_COUNT_PREQUERY_MAX_FIRMWARE {
            match Self::file_count(session).await? {
                Outcome::Completed(0) => return Ok(Outcome::Completed(Vec::new())),
                Outcome::Completed(count) => Some(count),
                Outcome::TimedOut => return Ok(Outcome::TimedOut),
                Outcome::Expired => return Ok(Outcome::Expired),
                Outcome::Unsupported(feature) => return Ok(Outcome::Unsupported(feature)),
            }
        } else {
            None
        };

        let mut parser = FileListParser::new(expected, local_now());
        let mut stream = session
            .open_stream(
                CommandId::FileList,
                &[],
                Some(session.config().stream_idle_timeout()),
            )
            .await?;
        let mut chunks = 0_usize;

        loop {
            match stream.next_event().await {
                Some(StreamEvent::Chunk(packet)) => {
                    if packet.body().is_empty() {
                        debug!(chunks, "empty file-list chunk ends the listing");
                        break;
                    }
                    chunks += 1;
                    parser.push(packet.body());
                    if parser.is_complete() {
                        break;
                    }
                }
                Some(StreamEvent::TimedOut) if chunks > 0 => {
                    warn!(
                        chunks,
                        parsed = parser.entries_seen(),
                        expected = ?parser.expected_total(),
                        "file list went quiet; returning what was received"
                    );
                    break;
                }
                Some(StreamEvent::TimedOut) => return Ok(Outcome::TimedOut),
                Some(StreamEvent::Expired) => return Ok(Outcome::Expired),
                Some(StreamEvent::Lost(lost)) => return Err(lost.into()),
                None => return Err(ConnectionLost::new("engine stopped").into()),
            }
        }
        drop(stream);

        let records = parser.finish();
        debug!(files = records.len(), chunks, "file list complete");
        Ok(Outcome::Completed(records))
    }
}

/// Host wall-clock time in the local offset, or UTC when the offset is unknown.
pub(crate) fn local_now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_offset| OffsetDateTime::now_utc());
    PrimitiveDateTime::new(now.date(), now.time())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use time::macros::datetime;

    use super::*;

    const FALLBACK: PrimitiveDateTime = datetime!(2030-01-01 00:00:00);

    fn entry(recording_type: u8, name: &str, length: u32, signature: u8) -> Vec<u8> {
        let name_len = u32::try_from(name.len()).expect("test names should be short");
        let mut bytes = vec![recording_type];
        bytes.extend_from_slice(&name_len.to_be_bytes()[1..]);
        bytes.extend_from_slice(name.as_bytes());
        bytes.extend_from_slice(&length.to_be_bytes());
        bytes.extend_from_slice(&[0; RESERVED_LEN]);
        bytes.extend_from_slice(&[signature; SIGNATURE_LEN]);
        bytes
    }

    fn listing(with_header: bool) -> Vec<u8> {
        let mut bytes = Vec::new();
        if with_header {
            bytes.extend_from_slice(&[0xFF, 0xFF, 0, 0, 0, 3]);
        }
        bytes.extend(entry(1, "20250512114141REC01.wav", 64_000, 0xA1));
        bytes.extend(entry(2, "2025May13-090000-Rec02.hda", 960_044, 0xB2));
        bytes.extend(entry(5, "memo.hda", 120_000, 0xC3));
        bytes
    }

    #[rstest]
    #[case::legacy(1, 32, 4.0)]
    #[case::wav_48k(2, 96_044, 1.0)]
    #[case::wav_header_only(2, 44, 0.0)]
    #[case::wav_24k(3, 96_044, 0.5)]
    #[case::opus(5, 120_000, 10.0)]
    #[case::other(4, 64_000, 2.0)]
    fn duration_follows_the_type_table(
        #[case] recording_type: u8,
        #[case] length: u32,
        #[case] expected: f64,
    ) {
        assert_eq!(expected, duration_seconds(recording_type, length));
    }

    #[rstest]
    #[case::digits("20241231235958-x.wav", Some(datetime!(2024-12-31 23:59:58)))]
    #[case::month_name("2025Dec01-010203-Rec9.hda", Some(datetime!(2025-12-01 01:02:03)))]
    #[case::lowercase_month("2025jan05-000000.hda", Some(datetime!(2025-01-05 00:00:00)))]
    #[case::bad_month("2025Xyz01-010203.hda", None)]
    #[case::impossible_date("20250230120000.wav", None)]
    #[case::short("2025.wav", None)]
    fn filename_timestamps(#[case] name: &str, #[case] expected: Option<PrimitiveDateTime>) {
        assert_eq!(expected, timestamp_from_filename(name));
    }

    #[test]
    fn header_sets_expected_total() {
        let mut parser = FileListParser::new(None, FALLBACK);
        parser.push(&listing(true));

        assert!(parser.is_complete());
        let records = parser.finish();
        assert_eq!(
            vec!["20250512114141REC01.wav", "2025May13-090000-Rec02.hda", "memo.hda"],
            records.iter().map(FileRecord::name).collect::<Vec<_>>()
        );
        assert_eq!(datetime!(2025-05-13 09:00:00), records[1].created_at());
        assert_eq!(FALLBACK, records[2].created_at());
        assert_eq!("b2".repeat(SIGNATURE_LEN), records[1].signature_hex());
    }

    #[test]
    fn arbitrary_chunking_yields_the_same_records() {
        let payload = listing(true);
        let mut whole = FileListParser::new(None, FALLBACK);
        whole.push(&payload);
        let expected = whole.finish();

        for chunk_len in [1, 2, 5, 7, 31, 64] {
            let mut parser = FileListParser::new(None, FALLBACK);
            for chunk in payload.chunks(chunk_len) {
                parser.push(chunk);
            }
            assert_eq!(expected, parser.finish(), "chunk length {chunk_len}");
        }
    }

    #[test]
    fn parsing_stops_at_the_expected_count() {
        let mut payload = listing(false);
        payload.extend_from_slice(&[0x00; 40]);
        let mut parser = FileListParser::new(Some(2), FALLBACK);

        assert_eq!(2, parser.push(&payload));
        assert!(parser.is_complete());
        assert_eq!(0, parser.push(&entry(1, "late.wav", 10, 0)));
        assert_eq!(2, parser.finish().len());
    }

    #[test]
    fn nameless_and_empty_entries_are_dropped() {
        let mut payload = entry(1, "", 500, 0);
        payload.extend(entry(1, "empty.wav", 0, 0));
        payload.extend(entry(1, "kept.wav", 500, 0));
        let mut parser = FileListParser::new(Some(3), FALLBACK);
        parser.push(&payload);

        assert_eq!(3, parser.entries_seen());
        let records = parser.finish();
        assert_eq!(1, records.len());
        assert_eq!("kept.wav", records[0].name());
    }

    #[test]
    fn nul_bytes_are_removed_from_names() {
        let mut parser = FileListParser::new(Some(1), FALLBACK);
        parser.push(&entry(1, "rec.wav\0\0", 10, 0));
        assert_eq!("rec.wav", parser.finish()[0].name());
    }

    #[test]
    fn incomplete_entry_waits_for_more_bytes() {
        let payload = entry(5, "memo.hda", 12_000, 1);
        let mut parser = FileListParser::new(None, FALLBACK);

        assert_eq!(0, parser.push(&payload[..payload.len() - 1]));
        assert_eq!(1, parser.push(&payload[payload.len() - 1..]));
    }
}
