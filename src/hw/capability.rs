use serde::Serialize;
use strum_macros::{Display, EnumIter};

use crate::protocol::DeviceModel;

/// Firmware-gated recorder features.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Reading and writing behaviour settings.
    #[strum(to_string = "settings")]
    Settings,
    /// Card info and formatting.
    #[strum(to_string = "storage_format")]
    StorageFormat,
    /// Factory reset and restoring default settings.
    #[strum(to_string = "factory_reset")]
    FactoryReset,
    /// Toggling the Bluetooth connection prompt.
    #[strum(to_string = "bluetooth_prompt")]
    BluetoothPrompt,
    /// Scanning for and pairing Bluetooth headsets.
    #[strum(to_string = "bluetooth_pairing")]
    BluetoothPairing,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Requirement {
    Always,
    Never,
    MinFirmware(u32),
}

/// Pure model/firmware capability lookup.
pub struct CapabilityGate;

impl CapabilityGate {
    /// Returns whether `feature` is available on `model` running `firmware`.
    ///
    /// ```
    /// use hidock::{CapabilityGate, DeviceModel, Feature};
    ///
    /// assert!(!CapabilityGate::supports(DeviceModel::H1, 300_000, Feature::Settings));
    /// assert!(CapabilityGate::supports(DeviceModel::H1, 327_714, Feature::Settings));
    /// assert!(CapabilityGate::supports(DeviceModel::P1, 0, Feature::BluetoothPairing));
    /// ```
    #[must_use]
    pub fn supports(model: DeviceModel, firmware: u32, feature: Feature) -> bool {
        match requirement(model, feature) {
            Requirement::Always => true,
            Requirement::Never => false,
            Requirement::MinFirmware(minimum) => firmware >= minimum,
        }
    }
}

fn requirement(model: DeviceModel, feature: Feature) -> Requirement {
    match (model, feature) {
        (DeviceModel::P1, _) => Requirement::Always,
        (_, Feature::BluetoothPairing) => Requirement::Never,
        (DeviceModel::H1, Feature::Settings) => Requirement::MinFirmware(327_714),
        (DeviceModel::H1, Feature::StorageFormat) => Requirement::MinFirmware(327_733),
        (DeviceModel::H1, Feature::FactoryReset) => Requirement::MinFirmware(327_705),
        (DeviceModel::H1, Feature::BluetoothPrompt) => Requirement::MinFirmware(327_940),
        (DeviceModel::H1E, Feature::StorageFormat) => Requirement::MinFirmware(393_504),
        (
            DeviceModel::H1E,
            Feature::Settings | Feature::FactoryReset | Feature::BluetoothPrompt,
        ) => Requirement::MinFirmware(393_476),
    }
}
