use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};

use crate::cli::{LogLevel, OutputFormat};
use crate::error::FixtureError;
use crate::handlers::{MacAddress, SettingsUpdate};
use crate::hw::{FakeFiles, FakeRecorder, FakeRecorderConfig, SessionConfig};
use crate::protocol::DeviceModel;

/// Command-line options for the HiDock recorder tool.
#[derive(Debug, Parser)]
#[command(name = "hidock", about = "Manage HiDock USB voice recorders.")]
pub struct Args {
    /// Overrides `RUST_LOG` for this run.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Deadline for ordinary commands (e.g. `500ms`, `5s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    timeout: Option<Duration>,
    /// Talks to an in-process fake recorder instead of USB hardware.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake recorder model (`h1`, `h1e`, `p1`).
    #[arg(long, global = true, requires = "fake")]
    fake_model: Option<DeviceModel>,
    /// Fake recorder firmware version number.
    #[arg(long, global = true, requires = "fake")]
    fake_firmware: Option<u32>,
    /// Fake recordings in the form `name:length:type;...`.
    #[arg(long, global = true, requires = "fake")]
    fake_files: Option<FakeFiles>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use hidock::{Args, Command};
    ///
    /// let args = Args::new(Command::Info);
    /// assert!(args.log_level().is_none());
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            timeout: None,
            fake: false,
            fake_model: None,
            fake_firmware: None,
            fake_files: None,
            command,
        }
    }

    /// Switches these arguments to the fake backend described by `fake`.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        self.fake = true;
        self.fake_model = fake.model;
        self.fake_firmware = fake.firmware;
        self.fake_files = fake.files;
        self
    }

    /// Returns the log-level override.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the explicitly requested output format.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Builds the session timing configuration from the global flags.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::builder()
            .maybe_command_timeout(self.timeout)
            .build()
    }

    /// Splits parsed CLI arguments into command and optional fake-recorder settings.
    #[must_use]
    pub fn into_command_and_fake_args(self) -> (Command, Option<FakeArgs>) {
        let Args {
            fake,
            fake_model,
            fake_firmware,
            fake_files,
            command,
            ..
        } = self;

        let fake_args = fake.then(|| FakeArgs {
            model: fake_model,
            firmware: fake_firmware,
            files: fake_files,
        });
        (command, fake_args)
    }
}

/// Fake recorder arguments for programmatic runs.
///
/// ```
/// use hidock::{DeviceModel, FakeArgs};
///
/// let fake = FakeArgs::builder()
///     .model(DeviceModel::P1)
///     .files("memo.hda:120000:5")?
///     .build();
/// let recorder = fake.into_recorder();
/// assert_eq!(DeviceModel::P1, recorder.model());
/// # Ok::<(), hidock::FixtureError>(())
/// ```
#[derive(Debug, Default, Builder)]
pub struct FakeArgs {
    model: Option<DeviceModel>,
    firmware: Option<u32>,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    files: Option<FakeFiles>,
}

impl FakeArgs {
    /// Builds the fake recorder these arguments describe.
    #[must_use]
    pub fn into_recorder(self) -> FakeRecorder {
        let Self {
            model,
            firmware,
            files,
        } = self;

        FakeRecorder::new(
            FakeRecorderConfig::builder()
                .maybe_model(model)
                .maybe_firmware_number(firmware)
                .maybe_files(files.map(Into::into))
                .build(),
        )
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List attached recorders.
    Devices,
    /// Connect to the first recorder and print its identity.
    Info,
    /// List stored recordings.
    Files,
    /// Download one recording.
    Download(DownloadArgs),
    /// Delete one recording.
    Delete(DeleteArgs),
    /// Read or set the recorder clock.
    #[command(subcommand)]
    Time(TimeAction),
    /// Read or change behaviour settings.
    #[command(subcommand)]
    Settings(SettingsAction),
    /// Inspect or format the storage card.
    #[command(subcommand)]
    Card(CardAction),
    /// Reset the recorder to its factory state.
    FactoryReset {
        /// Confirms the reset.
        #[arg(long)]
        yes: bool,
    },
    /// Pair headsets (P1 only).
    #[command(subcommand)]
    Bluetooth(BluetoothAction),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Devices => "devices",
            Self::Info => "info",
            Self::Files => "files",
            Self::Download(_) => "download",
            Self::Delete(_) => "delete",
            Self::Time(_) => "time",
            Self::Settings(_) => "settings",
            Self::Card(_) => "card",
            Self::FactoryReset { .. } => "factory-reset",
            Self::Bluetooth(_) => "bluetooth",
        }
    }
}

/// Arguments for `download`.
#[derive(Debug, clap::Args)]
pub struct DownloadArgs {
    /// Recording name as shown by `files`.
    name: String,
    /// Destination directory; defaults to the user's download directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

impl DownloadArgs {
    /// Creates download arguments.
    ///
    /// ```
    /// use hidock::DownloadArgs;
    ///
    /// let args = DownloadArgs::new("20250512114141REC01.wav", Some("/tmp".into()));
    /// assert_eq!("20250512114141REC01.wav", args.name());
    /// ```
    #[must_use]
    pub fn new(name: impl Into<String>, output_dir: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            output_dir,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn output_dir(&self) -> Option<&std::path::Path> {
        self.output_dir.as_deref()
    }
}

/// Arguments for `delete`.
#[derive(Debug, clap::Args)]
pub struct DeleteArgs {
    /// Recording name as shown by `files`.
    name: String,
}

impl DeleteArgs {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Actions of `time`.
#[derive(Debug, Subcommand)]
pub enum TimeAction {
    /// Print the recorder clock.
    Get,
    /// Set the recorder clock to the host's local time.
    Sync,
}

/// Actions of `settings`.
#[derive(Debug, Subcommand)]
pub enum SettingsAction {
    /// Print the behaviour flags.
    Get,
    /// Change one or more behaviour flags.
    Set(SettingsSetArgs),
    /// Restore the default behaviour flags.
    Reset {
        /// Confirms the reset.
        #[arg(long)]
        yes: bool,
    },
}

/// Flags accepted by `settings set`.
#[derive(Debug, Default, clap::Args)]
pub struct SettingsSetArgs {
    #[arg(long, value_enum)]
    pub auto_record: Option<Toggle>,
    #[arg(long, value_enum)]
    pub auto_play: Option<Toggle>,
    #[arg(long, value_enum)]
    pub notification: Option<Toggle>,
    #[arg(long, value_enum)]
    pub bluetooth_prompt: Option<Toggle>,
}

impl SettingsSetArgs {
    pub(crate) fn to_update(&self) -> SettingsUpdate {
        SettingsUpdate::builder()
            .maybe_auto_record(self.auto_record.map(Toggle::enabled))
            .maybe_auto_play(self.auto_play.map(Toggle::enabled))
            .maybe_notification(self.notification.map(Toggle::enabled))
            .maybe_bluetooth_prompt(self.bluetooth_prompt.map(Toggle::enabled))
            .build()
    }
}

/// An `on`/`off` switch.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub(crate) fn enabled(self) -> bool {
        self == Self::On
    }
}

/// Actions of `card`.
#[derive(Debug, Subcommand)]
pub enum CardAction {
    /// Print storage usage.
    Info,
    /// Erase every recording.
    Format {
        /// Confirms the format.
        #[arg(long)]
        yes: bool,
    },
}

/// Actions of `bluetooth`.
#[derive(Debug, Subcommand)]
pub enum BluetoothAction {
    /// Scan for nearby headsets.
    Scan {
        /// Scan duration in seconds.
        #[arg(long, default_value_t = 10)]
        seconds: u8,
    },
    /// Print the connected headset.
    Status,
    /// Connect to a headset found by `scan`.
    Connect {
        /// Headset address, e.g. `aa:bb:cc:dd:ee:ff`.
        mac: MacAddress,
    },
    /// Disconnect the current headset.
    Disconnect,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
