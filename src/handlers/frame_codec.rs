use thiserror::Error;
use tracing::warn;

use crate::protocol::{CommandId, HEADER_LEN, MAX_BODY_LEN, SYNC_MARKER};

const SEQUENCE_OFFSET: usize = 4;
/// Declared bodies above this size are far beyond any recorder reply.
const SUSPICIOUS_BODY_LEN: usize = 1 << 20;

/// Errors returned by frame encoding.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FrameCodecError {
    /// The body does not fit in the 24-bit length field.
    #[error("frame body is too large: {body_len} bytes exceeds max {max_body_len}")]
    BodyTooLarge { body_len: usize, max_body_len: usize },
    /// A frame buffer is too short to carry a header.
    #[error("frame is too short to restamp: expected at least 12 bytes, got {actual}")]
    FrameTooShort { actual: usize },
}

/// One decoded protocol frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Packet {
    command: u16,
    sequence: u32,
    body: Vec<u8>,
}

impl Packet {
    /// Creates a packet from raw header values and body bytes.
    #[must_use]
    pub fn new(command: u16, sequence: u32, body: Vec<u8>) -> Self {
        Self {
            command,
            sequence,
            body,
        }
    }

    /// Returns the raw 16-bit command identifier.
    #[must_use]
    pub fn command_code(&self) -> u16 {
        self.command
    }

    /// Returns the catalogued command, if the identifier is known.
    #[must_use]
    pub fn command(&self) -> Option<CommandId> {
        CommandId::from_code(self.command)
    }

    /// Returns the 32-bit sequence identifier.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Returns the body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes the packet and returns its body.
    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Result of one decode attempt against a receive buffer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DecodeStep {
    /// A complete frame was decoded from the start of the buffer.
    Packet { packet: Packet, consumed: usize },
    /// More bytes are needed before anything can be decided.
    Incomplete,
    /// The first `discard` bytes are not part of any frame.
    Resync { discard: usize },
}

/// Codec helpers for the 12-byte headered recorder frame.
pub struct FrameCodec;

impl FrameCodec {
    /// Encodes one outbound frame.
    ///
    /// The checksum length in the top byte of the length field is always 0.
    ///
    /// # Errors
    ///
    /// Returns an error when `body` does not fit in the 24-bit length field.
    ///
    /// ```
    /// use hidock::FrameCodec;
    ///
    /// let frame = FrameCodec::encode(0x0001, 7, &[0xAA])?;
    /// assert_eq!(
    ///     vec![0x12, 0x34, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x01, 0xAA],
    ///     frame
    /// );
    /// # Ok::<(), hidock::FrameCodecError>(())
    /// ```
    pub fn encode(command: u16, sequence: u32, body: &[u8]) -> Result<Vec<u8>, FrameCodecError> {
        let too_large = || FrameCodecError::BodyTooLarge {
            body_len: body.len(),
            max_body_len: MAX_BODY_LEN,
        };
        if body.len() > MAX_BODY_LEN {
            return Err(too_large());
        }
        let length_field = u32::try_from(body.len()).map_err(|_overflow| too_large())?;

        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(&SYNC_MARKER);
        frame.extend_from_slice(&command.to_be_bytes());
        frame.extend_from_slice(&sequence.to_be_bytes());
        frame.extend_from_slice(&length_field.to_be_bytes());
        frame.extend_from_slice(body);
        Ok(frame)
    }

    /// Overwrites the sequence identifier of an already encoded frame.
    ///
    /// # Errors
    ///
    /// Returns an error when `frame` is shorter than a header.
    pub fn restamp_sequence(frame: &mut [u8], sequence: u32) -> Result<(), FrameCodecError> {
        let Some(slot) = frame.get_mut(SEQUENCE_OFFSET..SEQUENCE_OFFSET + 4) else {
            return Err(FrameCodecError::FrameTooShort {
                actual: frame.len(),
            });
        };
        slot.copy_from_slice(&sequence.to_be_bytes());
        Ok(())
    }

    /// Attempts to decode one frame from the start of `buffer`.
    ///
    /// Never fails: malformed input turns into [`DecodeStep::Resync`].
    ///
    /// ```
    /// use hidock::{DecodeStep, FrameCodec};
    ///
    /// let mut buffer = vec![0xEE, 0xEE];
    /// buffer.extend(FrameCodec::encode(6, 1, &[])?);
    /// assert_eq!(DecodeStep::Resync { discard: 2 }, FrameCodec::try_decode(&buffer));
    /// assert!(matches!(
    ///     FrameCodec::try_decode(&buffer[2..]),
    ///     DecodeStep::Packet { consumed: 12, .. }
    /// ));
    /// # Ok::<(), hidock::FrameCodecError>(())
    /// ```
    #[must_use]
    pub fn try_decode(buffer: &[u8]) -> DecodeStep {
        let Some(start) = buffer
            .windows(SYNC_MARKER.len())
            .position(|window| window == SYNC_MARKER)
        else {
            // A trailing first marker byte may begin the next frame.
            let keep = usize::from(buffer.last() == Some(&SYNC_MARKER[0]));
            let discard = buffer.len() - keep;
            return if discard == 0 {
                DecodeStep::Incomplete
            } else {
                DecodeStep::Resync { discard }
            };
        };
        if start > 0 {
            return DecodeStep::Resync { discard: start };
        }
        if buffer.len() < HEADER_LEN {
            return DecodeStep::Incomplete;
        }

        let command = u16::from_be_bytes([buffer[2], buffer[3]]);
        let sequence = u32::from_be_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]);
        let checksum_len = usize::from(buffer[8]);
        let body_len = (usize::from(buffer[9]) << 16)
            | (usize::from(buffer[10]) << 8)
            | usize::from(buffer[11]);
        let frame_len = HEADER_LEN + body_len + checksum_len;
        if buffer.len() < frame_len {
            return DecodeStep::Incomplete;
        }

        DecodeStep::Packet {
            packet: Packet::new(
                command,
                sequence,
                buffer[HEADER_LEN..HEADER_LEN + body_len].to_vec(),
            ),
            consumed: frame_len,
        }
    }
}

/// Growing receive buffer that yields complete packets.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    discarded: usize,
    header_reported: bool,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly received transport bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete packet, discarding corrupt bytes on the way.
    ///
    /// ```
    /// use hidock::{FrameCodec, FrameDecoder};
    ///
    /// let frame = FrameCodec::encode(2, 9, &[0x20, 0x25])?;
    /// let mut decoder = FrameDecoder::new();
    /// decoder.extend(&frame[..5]);
    /// assert!(decoder.next_packet().is_none());
    /// decoder.extend(&frame[5..]);
    /// let packet = decoder.next_packet().expect("frame is complete");
    /// assert_eq!(9, packet.sequence());
    /// # Ok::<(), hidock::FrameCodecError>(())
    /// ```
    pub fn next_packet(&mut self) -> Option<Packet> {
        loop {
            match FrameCodec::try_decode(&self.buffer) {
                DecodeStep::Packet { packet, consumed } => {
                    self.buffer.drain(..consumed);
                    self.header_reported = false;
                    return Some(packet);
                }
                DecodeStep::Incomplete => {
                    self.report_oversized_header();
                    return None;
                }
                DecodeStep::Resync { discard } => {
                    self.header_reported = false;
                    warn!(
                        discarded = discard,
                        buffered = self.buffer.len(),
                        "dropping bytes before frame sync marker"
                    );
                    self.discarded += discard;
                    self.buffer.drain(..discard);
                }
            }
        }
    }

    /// Returns the total length declared by a buffered header that is still
    /// waiting for its body.
    #[must_use]
    pub fn awaited_frame_len(&self) -> Option<usize> {
        let header = self.buffer.get(..HEADER_LEN)?;
        if header[..2] != SYNC_MARKER {
            return None;
        }
        let body_len = (usize::from(header[9]) << 16)
            | (usize::from(header[10]) << 8)
            | usize::from(header[11]);
        let frame_len = HEADER_LEN + body_len + usize::from(header[8]);
        (frame_len > self.buffer.len()).then_some(frame_len)
    }

    fn report_oversized_header(&mut self) {
        if self.header_reported {
            return;
        }
        if let Some(frame_len) = self.awaited_frame_len() {
            self.header_reported = true;
            if frame_len - HEADER_LEN > SUSPICIOUS_BODY_LEN {
                warn!(
                    frame_len,
                    buffered = self.buffer.len(),
                    "header declares an oversized frame; replies stall until it fills"
                );
            }
        }
    }

    /// Returns the number of bytes waiting for a complete frame.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the total number of bytes dropped while resynchronising.
    #[must_use]
    pub fn discarded_len(&self) -> usize {
        self.discarded
    }

    /// Drops everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.header_reported = false;
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn decode_all(decoder: &mut FrameDecoder) -> Vec<Packet> {
        std::iter::from_fn(|| decoder.next_packet()).collect()
    }

    #[rstest]
    #[case::empty_body(0x0001, 0, vec![])]
    #[case::small_body(0x0005, 42, b"20250512114141-Rec44.wav".to_vec())]
    #[case::max_sequence(0xF00B, u32::MAX, vec![1, 2, 3, 4])]
    #[case::bluetooth(0x1001, 0x0102_0304, vec![0x12, 0x34, 0x12, 0x34])]
    fn encoded_frames_decode_to_the_same_triple(
        #[case] command: u16,
        #[case] sequence: u32,
        #[case] body: Vec<u8>,
    ) {
        let frame = FrameCodec::encode(command, sequence, &body).expect("body should encode");

        let step = FrameCodec::try_decode(&frame);

        assert_eq!(
            DecodeStep::Packet {
                packet: Packet::new(command, sequence, body),
                consumed: frame.len(),
            },
            step
        );
    }

    #[test]
    fn encode_rejects_oversized_body() {
        let body = vec![0x00; MAX_BODY_LEN + 1];
        let result = FrameCodec::encode(1, 1, &body);
        assert_matches!(
            result,
            Err(FrameCodecError::BodyTooLarge { body_len, max_body_len: MAX_BODY_LEN })
                if body_len == MAX_BODY_LEN + 1
        );
    }

    #[test]
    fn decode_skips_trailing_checksum_bytes() {
        let mut frame = FrameCodec::encode(4, 3, &[0xAB, 0xCD]).expect("body should encode");
        frame[8] = 2;
        frame.extend_from_slice(&[0xFE, 0xFE]);
        frame.extend(FrameCodec::encode(4, 4, &[]).expect("body should encode"));

        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame);
        let packets = decode_all(&mut decoder);

        assert_eq!(
            vec![Packet::new(4, 3, vec![0xAB, 0xCD]), Packet::new(4, 4, vec![])],
            packets
        );
        assert_eq!(0, decoder.discarded_len());
    }

    #[rstest]
    #[case::single_byte(vec![0x00])]
    #[case::ascii_noise(b"hello world".to_vec())]
    #[case::half_marker_in_middle(vec![0x34, 0x12, 0x00, 0x12])]
    #[case::long_noise(vec![0xEE; 300])]
    fn garbage_prefix_is_discarded_exactly(#[case] garbage: Vec<u8>) {
        let frame = FrameCodec::encode(2, 77, &[0x20, 0x25, 0x05]).expect("body should encode");
        let mut buffer = garbage.clone();
        buffer.extend_from_slice(&frame);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&buffer);
        let packets = decode_all(&mut decoder);

        assert_eq!(vec![Packet::new(2, 77, vec![0x20, 0x25, 0x05])], packets);
        assert_eq!(garbage.len(), decoder.discarded_len());
        assert_eq!(0, decoder.buffered_len());
    }

    #[test]
    fn trailing_marker_byte_is_kept_for_the_next_read() {
        assert_eq!(
            DecodeStep::Resync { discard: 3 },
            FrameCodec::try_decode(&[0x01, 0x02, 0x03, 0x12])
        );
        assert_eq!(DecodeStep::Incomplete, FrameCodec::try_decode(&[0x12]));
        assert_eq!(DecodeStep::Incomplete, FrameCodec::try_decode(&[]));
    }

    #[test]
    fn byte_at_a_time_delivery_yields_one_packet_at_the_end() {
        let frame = FrameCodec::encode(5, 9, &[7; 40]).expect("body should encode");
        let mut decoder = FrameDecoder::new();

        for (index, byte) in frame.iter().enumerate() {
            decoder.extend(&[*byte]);
            let packet = decoder.next_packet();
            if index + 1 < frame.len() {
                assert_eq!(None, packet, "frame should be incomplete after {index} bytes");
            } else {
                assert_eq!(Some(Packet::new(5, 9, vec![7; 40])), packet);
            }
        }
        assert_eq!(0, decoder.discarded_len());
    }

    #[test]
    fn sync_marker_in_noise_can_declare_a_huge_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x12, 0x34, 0x00, 0x02, 0, 0, 0, 1, 0x00, 0xFF, 0xFF, 0xFF, 0xAA]);

        assert_eq!(None, decoder.next_packet());
        assert_eq!(Some(HEADER_LEN + 0x00FF_FFFF), decoder.awaited_frame_len());

        decoder.clear();
        assert_eq!(None, decoder.awaited_frame_len());
    }

    #[test]
    fn complete_frame_is_not_awaited() {
        let frame = FrameCodec::encode(2, 1, &[0x20]).expect("body should encode");
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame[..HEADER_LEN]);

        assert_eq!(Some(HEADER_LEN + 1), decoder.awaited_frame_len());
        decoder.extend(&frame[HEADER_LEN..]);
        assert_eq!(None, decoder.awaited_frame_len());
    }

    #[test]
    fn restamp_sequence_rewrites_header_only() {
        let mut frame = FrameCodec::encode(11, 0, &[1, 2]).expect("body should encode");
        FrameCodec::restamp_sequence(&mut frame, 0x0A0B_0C0D).expect("frame has a header");

        assert_eq!(
            DecodeStep::Packet {
                packet: Packet::new(11, 0x0A0B_0C0D, vec![1, 2]),
                consumed: 14,
            },
            FrameCodec::try_decode(&frame)
        );
        assert_matches!(
            FrameCodec::restamp_sequence(&mut [0x12, 0x34], 1),
            Err(FrameCodecError::FrameTooShort { actual: 2 })
        );
    }
}
