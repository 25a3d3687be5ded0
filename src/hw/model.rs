use std::fmt;

use serde::Serialize;

use crate::protocol::DeviceModel;

/// One recorder seen on the USB bus.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct FoundDevice {
    bus_number: u8,
    device_address: u8,
    product_id: u16,
    model: DeviceModel,
    serial_number: Option<String>,
}

impl FoundDevice {
    /// Creates a new discovered-device record.
    pub(crate) fn new(
        bus_number: u8,
        device_address: u8,
        product_id: u16,
        model: DeviceModel,
        serial_number: Option<String>,
    ) -> Self {
        Self {
            bus_number,
            device_address,
            product_id,
            model,
            serial_number,
        }
    }

    /// Returns the USB bus number.
    #[must_use]
    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }

    /// Returns the USB device address on its bus.
    #[must_use]
    pub fn device_address(&self) -> u8 {
        self.device_address
    }

    /// Returns the USB product identifier.
    #[must_use]
    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    /// Returns the hardware variant implied by the product identifier.
    #[must_use]
    pub fn model(&self) -> DeviceModel {
        self.model
    }

    /// Returns the USB string-descriptor serial number, if the host could read it.
    #[must_use]
    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }
}

impl fmt::Display for FoundDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (bus {:03} device {:03}, pid {:#06x})",
            self.model, self.bus_number, self.device_address, self.product_id
        )
    }
}

/// Firmware version reported by the device-info command.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct FirmwareVersion {
    code: String,
    number: u32,
}

impl FirmwareVersion {
    /// Builds a version from the four raw version bytes.
    ///
    /// ```
    /// use hidock::FirmwareVersion;
    ///
    /// let version = FirmwareVersion::from_bytes([0x00, 0x05, 0x00, 0x22]);
    /// assert_eq!("5.0.34", version.code());
    /// assert_eq!(327_714, version.number());
    /// ```
    #[must_use]
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            code: format!("{}.{}.{}", bytes[1], bytes[2], bytes[3]),
            number: u32::from_be_bytes(bytes),
        }
    }

    /// Returns the dotted version code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the numeric version used for capability checks.
    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.number)
    }
}

/// Identity of the recorder behind an established session.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DeviceIdentity {
    model: DeviceModel,
    product_id: u16,
    firmware: FirmwareVersion,
    serial_number: String,
}

impl DeviceIdentity {
    pub(crate) fn new(
        model: DeviceModel,
        product_id: u16,
        firmware: FirmwareVersion,
        serial_number: String,
    ) -> Self {
        Self {
            model,
            product_id,
            firmware,
            serial_number,
        }
    }

    /// Returns the hardware variant.
    #[must_use]
    pub fn model(&self) -> DeviceModel {
        self.model
    }

    /// Returns the USB product identifier.
    #[must_use]
    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    /// Returns the firmware version.
    #[must_use]
    pub fn firmware(&self) -> &FirmwareVersion {
        &self.firmware
    }

    /// Returns the device serial number.
    #[must_use]
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::h1_settings_floor([0x00, 0x05, 0x00, 0x22], "5.0.34", 327_714)]
    #[case::h1e([0x00, 0x06, 0x01, 0x04], "6.1.4", 393_476)]
    #[case::ignores_first_byte_in_code([0x01, 0x00, 0x00, 0x01], "0.0.1", 16_777_217)]
    fn firmware_version_splits_code_and_number(
        #[case] bytes: [u8; 4],
        #[case] code: &str,
        #[case] number: u32,
    ) {
        let version = FirmwareVersion::from_bytes(bytes);
        assert_eq!(code, version.code());
        assert_eq!(number, version.number());
    }

    #[test]
    fn found_device_display_names_model_and_location() {
        let device = FoundDevice::new(1, 7, 0xB00C, DeviceModel::H1, None);
        assert_eq!("h1 (bus 001 device 007, pid 0xb00c)", device.to_string());
    }
}
