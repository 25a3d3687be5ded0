use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::instrument;

use crate::error::ProtocolError;
use crate::hw::{DeviceSession, Feature, Outcome};
use crate::protocol::CommandId;

use super::response::{DeviceStatus, be_u16, status_byte};

const MAC_LEN: usize = 6;
const CONNECT: u8 = 0;
const DISCONNECT: u8 = 1;

/// A Bluetooth hardware address.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct MacAddress([u8; MAC_LEN]);

impl MacAddress {
    #[must_use]
    pub const fn new(bytes: [u8; MAC_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn octets(&self) -> [u8; MAC_LEN] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Returned when a string is not six colon-separated hex octets.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("`{input}` is not a Bluetooth address like `aa:bb:cc:dd:ee:ff`")]
pub struct MacAddressParseError {
    input: String,
}

impl FromStr for MacAddress {
    type Err = MacAddressParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || MacAddressParseError {
            input: input.to_string(),
        };
        let mut octets = [0; MAC_LEN];
        let mut parts = input.split([':', '-']);
        for octet in &mut octets {
            let part = parts
                .next()
                .filter(|part| part.len() == 2 && part.bytes().all(|byte| byte.is_ascii_hexdigit()))
                .ok_or_else(invalid)?;
            *octet = u8::from_str_radix(part, 16).map_err(|_error| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A headset seen by the recorder.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct BluetoothDevice {
    pub name: String,
    pub mac: MacAddress,
}

/// Pairing state of the recorder's Bluetooth radio.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BluetoothStatus {
    Idle,
    Connected { device: BluetoothDevice },
}

/// Reads a `u16` name length, the name, and a MAC at `offset`.
fn read_device(
    command: CommandId,
    body: &[u8],
    offset: usize,
) -> Result<(BluetoothDevice, usize), ProtocolError> {
    let name_len = usize::from(be_u16(command, body, offset)?);
    let name_start = offset + 2;
    let mac_start = name_start + name_len;
    let end = mac_start + MAC_LEN;
    let bytes = body
        .get(name_start..end)
        .ok_or_else(|| ProtocolError::short_response(command, end, body.len()))?;

    let name = String::from_utf8_lossy(&bytes[..name_len]).into_owned();
    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(&bytes[name_len..]);
    Ok((
        BluetoothDevice {
            name,
            mac: MacAddress::new(mac),
        },
        end,
    ))
}

fn decode_scan(body: &[u8]) -> Result<Vec<BluetoothDevice>, ProtocolError> {
    let count = be_u16(CommandId::BluetoothScan, body, 0)?;
    let mut offset = 2;
    let mut devices = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let (device, next) = read_device(CommandId::BluetoothScan, body, offset)?;
        devices.push(device);
        offset = next;
    }
    Ok(devices)
}

fn decode_status(body: &[u8]) -> Result<BluetoothStatus, ProtocolError> {
    match body.first() {
        None | Some(0) => Ok(BluetoothStatus::Idle),
        Some(1) => {
            let (device, _end) = read_device(CommandId::BluetoothStatus, body, 1)?;
            Ok(BluetoothStatus::Connected { device })
        }
        Some(_) => Err(ProtocolError::MalformedResponse {
            command: CommandId::BluetoothStatus,
            reason: "unknown connection state",
        }),
    }
}

/// Handler for headset pairing on recorders with a Bluetooth radio.
pub struct BluetoothHandler;

impl BluetoothHandler {
    /// Scans for nearby headsets for `seconds` seconds.
    ///
    /// # Errors
    ///
    /// Returns an error when the device list is truncated or the connection drops.
    #[instrument(skip(session), level = "debug")]
    pub async fn scan(
        session: &DeviceSession,
        seconds: u8,
    ) -> Result<Outcome<Vec<BluetoothDevice>>, ProtocolError> {
        if !session.supports(Feature::BluetoothPairing) {
            return Ok(Outcome::Unsupported(Feature::BluetoothPairing));
        }
        let deadline = session.config().command_timeout() + Duration::from_secs(seconds.into());
        session
            .send_with_timeout(CommandId::BluetoothScan, &[seconds], Some(deadline))
            .await?
            .try_map(|packet| decode_scan(packet.body()))
    }

    /// Pairs with the headset at `mac`.
    ///
    /// # Errors
    ///
    /// Returns an error when the acknowledgement is empty or the connection drops.
    #[instrument(skip(session), level = "debug", fields(%mac))]
    pub async fn connect(
        session: &DeviceSession,
        mac: MacAddress,
    ) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        let mut body = vec![CONNECT];
        body.extend_from_slice(&mac.octets());
        Self::command(session, &body).await
    }

    /// Drops the current headset connection.
    ///
    /// # Errors
    ///
    /// Returns an error when the acknowledgement is empty or the connection drops.
    #[instrument(skip(session), level = "debug")]
    pub async fn disconnect(session: &DeviceSession) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        Self::command(session, &[DISCONNECT]).await
    }

    /// Reads which headset, if any, is connected.
    ///
    /// # Errors
    ///
    /// Returns an error when the status is malformed or the connection drops.
    #[instrument(skip(session), level = "debug")]
    pub async fn status(session: &DeviceSession) -> Result<Outcome<BluetoothStatus>, ProtocolError> {
        session
            .send_gated(Feature::BluetoothPairing, CommandId::BluetoothStatus, &[])
            .await?
            .try_map(|packet| decode_status(packet.body()))
    }

    async fn command(
        session: &DeviceSession,
        body: &[u8],
    ) -> Result<Outcome<DeviceStatus>, ProtocolError> {
        session
            .send_gated(Feature::BluetoothPairing, CommandId::BluetoothCommand, body)
            .await?
            .try_map(|packet| status_byte(CommandId::BluetoothCommand, packet.body()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    const MAC: [u8; 6] = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01];

    fn device_bytes(name: &str) -> Vec<u8> {
        let name_len = u16::try_from(name.len()).expect("test names should be short");
        let mut bytes = name_len.to_be_bytes().to_vec();
        bytes.extend_from_slice(name.as_bytes());
        bytes.extend_from_slice(&MAC);
        bytes
    }

    #[test]
    fn scan_reads_each_device() {
        let mut body = vec![0, 2];
        body.extend(device_bytes("Buds"));
        body.extend(device_bytes("Headset Pro"));

        let devices = decode_scan(&body).expect("scan should decode");

        assert_eq!(
            vec!["Buds", "Headset Pro"],
            devices.iter().map(|device| device.name.as_str()).collect::<Vec<_>>()
        );
        assert_eq!("de:ad:be:ef:00:01", devices[1].mac.to_string());
    }

    #[test]
    fn scan_rejects_truncated_device() {
        let mut body = vec![0, 1];
        body.extend(&device_bytes("Buds")[..5]);
        assert_matches!(decode_scan(&body), Err(ProtocolError::ShortResponse { .. }));
    }

    #[test]
    fn status_distinguishes_idle_and_connected() {
        assert_eq!(BluetoothStatus::Idle, decode_status(&[0]).expect("idle should decode"));

        let mut body = vec![1];
        body.extend(device_bytes("Buds"));
        assert_eq!(
            BluetoothStatus::Connected {
                device: BluetoothDevice {
                    name: "Buds".to_string(),
                    mac: MacAddress::new(MAC),
                },
            },
            decode_status(&body).expect("connected should decode")
        );
    }

    #[test]
    fn mac_address_parses_either_separator() {
        let expected = MacAddress::new(MAC);
        assert_eq!(Ok(expected), "de:ad:be:ef:00:01".parse());
        assert_eq!(Ok(expected), "DE-AD-BE-EF-00-01".parse());
    }

    #[test]
    fn mac_address_rejects_wrong_shapes() {
        assert!("de:ad:be:ef:00".parse::<MacAddress>().is_err());
        assert!("de:ad:be:ef:00:01:02".parse::<MacAddress>().is_err());
        assert!("de:ad:be:ef:00:zz".parse::<MacAddress>().is_err());
        assert!("dead:be:ef:00:01:02".parse::<MacAddress>().is_err());
    }

    #[test]
    fn status_rejects_unknown_state() {
        assert_matches!(
            decode_status(&[7]),
            Err(ProtocolError::MalformedResponse { command: CommandId::BluetoothStatus, .. })
        );
    }
}
