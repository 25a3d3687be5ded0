use std::io;
use std::path::PathBuf;

use serde::Serialize;
use time::PrimitiveDateTime;
use time::macros::format_description;

use crate::cli::OutputFormat;
use crate::handlers::{
    BluetoothDevice, BluetoothStatus, CardInfo, DeleteStatus, DeviceSettings, DeviceStatus,
    DeviceTime, FileRecord, MacAddress,
};
use crate::hw::{DeviceIdentity, FoundDevice};

use super::ui::{Painter, Table};

/// One command result, rendered as JSON or as terminal text.
#[derive(Debug, Serialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub(crate) enum Report {
    Devices {
        devices: Vec<FoundDevice>,
    },
    Info {
        identity: DeviceIdentity,
        current_recording: Option<String>,
    },
    Files {
        files: Vec<FileRecord>,
    },
    Download {
        name: String,
        path: PathBuf,
        bytes: u64,
    },
    Delete {
        name: String,
        status: DeleteStatus,
    },
    Time {
        time: DeviceTime,
    },
    TimeSynced {
        time: PrimitiveDateTime,
        status: DeviceStatus,
    },
    Settings {
        settings: DeviceSettings,
    },
    SettingsApplied {
        status: DeviceStatus,
    },
    SettingsReset {
        status: DeviceStatus,
    },
    Card {
        card: CardInfo,
    },
    CardFormatted {
        status: DeviceStatus,
    },
    FactoryReset {
        status: DeviceStatus,
    },
    BluetoothScan {
        devices: Vec<BluetoothDevice>,
    },
    Bluetooth {
        status: BluetoothStatus,
    },
    BluetoothConnected {
        mac: MacAddress,
        status: DeviceStatus,
    },
    BluetoothDisconnected {
        status: DeviceStatus,
    },
}

impl Report {
    /// Writes the report in the requested format.
    pub(crate) fn emit<W>(
        &self,
        out: &mut W,
        output_format: OutputFormat,
        painter: &Painter,
    ) -> io::Result<()>
    where
        W: io::Write,
    {
        match output_format {
            OutputFormat::Json => write_json_line(out, self),
            OutputFormat::Pretty => writeln!(out, "{}", self.render(painter)),
        }
    }

    fn render(&self, painter: &Painter) -> String {
        match self {
            Self::Devices { devices } if devices.is_empty() => {
                painter.warning("No HiDock recorders found")
            }
            Self::Devices { devices } => {
                let rows = devices
                    .iter()
                    .map(|device| {
                        vec![
                            painter.value(device.model().to_string()),
                            format!("{:#06x}", device.product_id()),
                            format!("{:03}", device.bus_number()),
                            format!("{:03}", device.device_address()),
                            device.serial_number().unwrap_or("-").to_string(),
                        ]
                    })
                    .collect();
                Table::grid(["model", "product id", "bus", "address", "serial"], rows).to_string()
            }
            Self::Info {
                identity,
                current_recording,
            } => {
                let recording = current_recording
                    .clone()
                    .unwrap_or_else(|| painter.muted("none"));
                Table::key_value(
                    painter,
                    vec![
                        ("model", painter.value(identity.model().to_string())),
                        ("product id", format!("{:#06x}", identity.product_id())),
                        ("firmware", identity.firmware().to_string()),
                        ("serial", identity.serial_number().to_string()),
                        ("recording", recording),
                    ],
                )
                .to_string()
            }
            Self::Files { files } if files.is_empty() => painter.muted("No recordings"),
            Self::Files { files } => {
                let rows = files
                    .iter()
                    .map(|file| {
                        vec![
                            painter.value(file.name()),
                            file.recording_type().to_string(),
                            file.length_bytes().to_string(),
                            format_duration(file.duration_seconds()),
                            format_timestamp(file.created_at()),
                            painter.muted(file.signature_hex()),
                        ]
                    })
                    .collect();
                Table::grid(
                    ["name", "type", "bytes", "duration", "created", "signature"],
                    rows,
                )
                .to_string()
            }
            Self::Download { name, path, bytes } => format!(
                "{} Saved {} ({bytes} bytes) to {}",
                painter.success("✓"),
                painter.value(name),
                path.display()
            ),
            Self::Delete { name, status } => match status {
                DeleteStatus::Deleted => {
                    format!("{} Deleted {}", painter.success("✓"), painter.value(name))
                }
                other => format!("{} {}: {other}", painter.warning("!"), painter.value(name)),
            },
            Self::Time {
                time: DeviceTime::Known(time),
            } => format!("Recorder clock: {}", painter.value(format_timestamp(*time))),
            Self::Time {
                time: DeviceTime::Unknown,
            } => painter.warning("Recorder clock is not set"),
            Self::TimeSynced { time, status } => {
                status_line(painter, &format!("Clock set to {}", format_timestamp(*time)), *status)
            }
            Self::Settings { settings } => Table::key_value(
                painter,
                vec![
                    ("auto record", on_off(settings.auto_record)),
                    ("auto play", on_off(settings.auto_play)),
                    ("notification", on_off(settings.notification)),
                    ("bluetooth tone", on_off(settings.bluetooth_tone)),
                ],
            )
            .to_string(),
            Self::SettingsApplied { status } => status_line(painter, "Settings applied", *status),
            Self::SettingsReset { status } => {
                status_line(painter, "Default settings restored", *status)
            }
            Self::Card { card } => Table::key_value(
                painter,
                vec![
                    ("used", format!("{} MiB", card.used_mib)),
                    ("free", format!("{} MiB", card.free_mib())),
                    ("capacity", format!("{} MiB", card.capacity_mib)),
                    ("status", format!("{:#010x}", card.status)),
                ],
            )
            .to_string(),
            Self::CardFormatted { status } => status_line(painter, "Card formatted", *status),
            Self::FactoryReset { status } => status_line(painter, "Factory reset", *status),
            Self::BluetoothScan { devices } if devices.is_empty() => {
                painter.muted("No headsets found")
            }
            Self::BluetoothScan { devices } => {
                let rows = devices
                    .iter()
                    .map(|device| vec![painter.value(&device.name), device.mac.to_string()])
                    .collect();
                Table::grid(["name", "address"], rows).to_string()
            }
            Self::Bluetooth {
                status: BluetoothStatus::Idle,
            } => painter.muted("No headset connected"),
            Self::Bluetooth {
                status: BluetoothStatus::Connected { device },
            } => format!(
                "Connected to {} ({})",
                painter.value(&device.name),
                device.mac
            ),
            Self::BluetoothConnected { mac, status } => {
                status_line(painter, &format!("Connect request sent to {mac}"), *status)
            }
            Self::BluetoothDisconnected { status } => {
                status_line(painter, "Headset disconnected", *status)
            }
        }
    }
}

fn status_line(painter: &Painter, action: &str, status: DeviceStatus) -> String {
    if status.is_success() {
        format!("{} {action}", painter.success("✓"))
    } else {
        format!("{} {action}: device status {status}", painter.warning("!"))
    }
}

fn on_off(enabled: bool) -> String {
    String::from(if enabled { "on" } else { "off" })
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}:{:02}", total / 3600, total / 60 % 60, total % 60)
}

fn format_timestamp(timestamp: PrimitiveDateTime) -> String {
    timestamp
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .unwrap_or_else(|_error| timestamp.to_string())
}

fn write_json_line<W, T>(out: &mut W, value: &T) -> io::Result<()>
where
    W: io::Write,
    T: Serialize,
{
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use time::macros::datetime;

    use super::*;

    fn pretty(report: &Report) -> String {
        let mut out = Vec::new();
        report
            .emit(&mut out, OutputFormat::Pretty, &Painter::new(false))
            .expect("rendering into a vector should succeed");
        String::from_utf8(out).expect("rendered text should be UTF-8")
    }

    #[rstest]
    #[case::zero(0.0, "0:00:00")]
    #[case::rounds(59.6, "0:01:00")]
    #[case::hours(3725.0, "1:02:05")]
    fn durations_render_as_clock_time(#[case] seconds: f64, #[case] expected: &str) {
        assert_eq!(expected, format_duration(seconds));
    }

    #[test]
    fn json_reports_are_tagged() {
        let report = Report::Delete {
            name: "a.wav".to_string(),
            status: DeleteStatus::NotFound,
        };
        let mut out = Vec::new();
        report
            .emit(&mut out, OutputFormat::Json, &Painter::new(false))
            .expect("JSON output should succeed");

        let value: serde_json::Value =
            serde_json::from_slice(&out).expect("output should be one JSON document");
        assert_eq!(
            serde_json::json!({"report": "delete", "name": "a.wav", "status": "not_found"}),
            value
        );
    }

    #[test]
    fn unset_clock_is_called_out() {
        let report = Report::Time {
            time: DeviceTime::Unknown,
        };
        assert_eq!("Recorder clock is not set\n", pretty(&report));
    }

    #[test]
    fn failed_status_is_reported_with_its_code() {
        let report = Report::TimeSynced {
            time: datetime!(2025-05-12 11:41:41),
            status: DeviceStatus::new(3),
        };
        assert_eq!(
            "! Clock set to 2025-05-12 11:41:41: device status 3\n",
            pretty(&report)
        );
    }

    #[test]
    fn settings_render_as_key_value_table() {
        let report = Report::Settings {
            settings: DeviceSettings {
                auto_record: true,
                auto_play: false,
                notification: true,
                bluetooth_tone: false,
            },
        };
        assert_snapshot!(report.render(&Painter::new(false)), @r"
        ╭────────────────┬───────╮
        │ field          │ value │
        ├────────────────┼───────┤
        │ auto record    │ on    │
        │ auto play      │ off   │
        │ notification   │ on    │
        │ bluetooth tone │ off   │
        ╰────────────────┴───────╯
        ");
    }
}
