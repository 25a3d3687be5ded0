pub(crate) mod command;
pub(crate) mod device;
pub(crate) mod files;
pub(crate) mod report;
pub(crate) mod ui;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

pub use self::command::{
    Args, BluetoothAction, CardAction, Command, DeleteArgs, DownloadArgs, FakeArgs,
    SettingsAction, SettingsSetArgs, TimeAction, Toggle,
};

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// How command results are written to stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured text and tables.
    Pretty,
    /// One JSON document per result.
    Json,
}
