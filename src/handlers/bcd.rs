use thiserror::Error;
use time::{Date, Month, PrimitiveDateTime, Time};

/// Length of a BCD-encoded `YYYYMMDDHHMMSS` timestamp.
pub const BCD_TIMESTAMP_LEN: usize = 7;

/// Errors returned by BCD encoding and decoding.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum BcdError {
    /// The digit string has an odd length.
    #[error("BCD input must have an even number of digits, got {len}")]
    OddDigitCount { len: usize },
    /// The input contains something other than ASCII digits.
    #[error("BCD input contains non-digit character `{character}`")]
    NonDigit { character: char },
    /// A nibble holds a value above 9.
    #[error("byte {byte:#04x} is not valid packed BCD")]
    InvalidNibble { byte: u8 },
    /// A timestamp buffer has the wrong length.
    #[error("BCD timestamp must be 7 bytes, got {actual}")]
    TimestampLength { actual: usize },
    /// The decoded digits do not form a calendar timestamp.
    #[error("BCD timestamp `{digits}` is not a valid date and time")]
    InvalidTimestamp { digits: String },
}

/// Packs an even-length decimal digit string, two digits per byte.
///
/// # Errors
///
/// Returns an error for odd-length input or non-digit characters.
///
/// ```
/// use hidock::encode_bcd;
///
/// assert_eq!(vec![0x20, 0x25, 0x05, 0x12], encode_bcd("20250512")?);
/// # Ok::<(), hidock::BcdError>(())
/// ```
pub fn encode_bcd(digits: &str) -> Result<Vec<u8>, BcdError> {
    if digits.len() % 2 != 0 {
        return Err(BcdError::OddDigitCount { len: digits.len() });
    }
    let nibbles = digits
        .chars()
        .map(|character| {
            character
                .to_digit(10)
                .and_then(|digit| u8::try_from(digit).ok())
                .ok_or(BcdError::NonDigit { character })
        })
        .collect::<Result<Vec<u8>, _>>()?;

    Ok(nibbles
        .chunks_exact(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect())
}

/// Unpacks BCD bytes into a decimal digit string.
///
/// # Errors
///
/// Returns an error when a nibble is above 9.
pub fn decode_bcd(bytes: &[u8]) -> Result<String, BcdError> {
    let mut digits = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        let (high, low) = (byte >> 4, byte & 0x0F);
        if high > 9 || low > 9 {
            return Err(BcdError::InvalidNibble { byte });
        }
        digits.push(char::from(b'0' + high));
        digits.push(char::from(b'0' + low));
    }
    Ok(digits)
}

/// Encodes a calendar timestamp as 7 BCD bytes.
///
/// # Errors
///
/// Returns an error when the year is outside `0..=9999`.
///
/// ```
/// use hidock::encode_bcd_timestamp;
/// use time::macros::datetime;
///
/// let bytes = encode_bcd_timestamp(datetime!(2025-05-12 11:41:41))?;
/// assert_eq!([0x20, 0x25, 0x05, 0x12, 0x11, 0x41, 0x41], bytes);
/// # Ok::<(), hidock::BcdError>(())
/// ```
pub fn encode_bcd_timestamp(timestamp: PrimitiveDateTime) -> Result<[u8; BCD_TIMESTAMP_LEN], BcdError> {
    let digits = format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}",
        timestamp.year(),
        u8::from(timestamp.month()),
        timestamp.day(),
        timestamp.hour(),
        timestamp.minute(),
        timestamp.second()
    );
    let bytes = encode_bcd(&digits)?;
    <[u8; BCD_TIMESTAMP_LEN]>::try_from(bytes.as_slice())
        .map_err(|_length| BcdError::TimestampLength { actual: bytes.len() })
}

/// Decodes 7 BCD bytes into a timestamp; all-zero input means "not set".
///
/// # Errors
///
/// Returns an error for a wrong length, invalid nibbles, or impossible dates.
pub fn decode_bcd_timestamp(bytes: &[u8]) -> Result<Option<PrimitiveDateTime>, BcdError> {
    if bytes.len() != BCD_TIMESTAMP_LEN {
        return Err(BcdError::TimestampLength {
            actual: bytes.len(),
        });
    }
    if bytes.iter().all(|byte| *byte == 0) {
        return Ok(None);
    }

    let digits = decode_bcd(bytes)?;
    parse_digit_timestamp(&digits)
        .map(Some)
        .ok_or(BcdError::InvalidTimestamp { digits })
}

/// Parses a 14-digit `YYYYMMDDHHMMSS` string.
pub(crate) fn parse_digit_timestamp(digits: &str) -> Option<PrimitiveDateTime> {
    let field = |range: std::ops::Range<usize>| digits.get(range)?.parse::<u16>().ok();
    if digits.len() != 14 || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let year = i32::from(field(0..4)?);
    let month = Month::try_from(u8::try_from(field(4..6)?).ok()?).ok()?;
    let day = u8::try_from(field(6..8)?).ok()?;
    let hour = u8::try_from(field(8..10)?).ok()?;
    let minute = u8::try_from(field(10..12)?).ok()?;
    let second = u8::try_from(field(12..14)?).ok()?;

    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}
