use std::io;

use anyhow::Result;
use bon::Builder;
use owo_colors::OwoColorize;
use tracing::{Span, instrument, trace};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::cli::report::Report;
use crate::cli::ui::Painter;
use crate::cli::{self, Command, LogLevel, OutputFormat};
use crate::hw::{DeviceSession, HardwareClient, SessionConfig, SessionHooks};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Session-level app helper for acquiring a recorder connection.
pub struct SessionHandler {
    hardware_client: Box<dyn HardwareClient>,
    config: SessionConfig,
    hooks: SessionHooks,
}

impl SessionHandler {
    /// Creates a session handler with default timing and no hooks.
    ///
    /// ```
    /// let handler = hidock::SessionHandler::new(hidock::real_hardware_client());
    /// let _ = handler;
    /// ```
    #[must_use]
    pub fn new(hardware_client: Box<dyn HardwareClient>) -> Self {
        Self {
            hardware_client,
            config: SessionConfig::default(),
            hooks: SessionHooks::new(),
        }
    }

    /// Overrides the session timing configuration.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs connect/disconnect callbacks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: SessionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Connects to the first attached recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery, USB setup, or the identity query fails.
    #[instrument(skip(self), level = "info")]
    pub async fn connect_first(self) -> Result<DeviceSession> {
        let span = Span::current();
        span.pb_set_message("Connecting to recorder");

        match self
            .hardware_client
            .connect_first_device(self.config, self.hooks)
            .await
        {
            Ok(session) => {
                let identity = session.identity();
                span.pb_set_finish_message(&format!(
                    "{} Connected to {} {}",
                    "✓".green(),
                    identity.model(),
                    identity.serial_number()
                ));
                Ok(session)
            }
            Err(error) => {
                span.pb_set_finish_message(&format!("{} Connection failed", "✗".red()));
                Err(error.into())
            }
        }
    }
}

/// Settings for one CLI run.
#[derive(Debug, Clone, Builder)]
pub struct RunOptions {
    /// Overrides `RUST_LOG`.
    log_level: Option<LogLevel>,
    #[builder(default = OutputFormat::Json)]
    output_format: OutputFormat,
    #[builder(default)]
    session_config: SessionConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Runs the CLI command with JSON output and default session timing.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = hidock::Args::try_parse_from(["hidock", "--fake", "info"])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args();
/// let hardware_client = match maybe_fake_args {
///     Some(fake_args) => hidock::fake_hardware_client(fake_args.into_recorder()),
///     None => hidock::real_hardware_client(),
/// };
/// let mut out = Vec::new();
/// hidock::run(command, &mut out, hardware_client).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the recorder interaction
/// fails, or output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    hardware_client: Box<dyn HardwareClient>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_options(command, out, hardware_client, RunOptions::default()).await
}

/// Runs the CLI command with explicit options.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = hidock::Args::try_parse_from([
///     "hidock",
///     "--log-level",
///     "debug",
///     "--timeout",
///     "2s",
///     "--fake",
///     "files",
/// ])?;
/// let options = hidock::RunOptions::builder()
///     .maybe_log_level(args.log_level())
///     .output_format(hidock::OutputFormat::Pretty)
///     .session_config(args.session_config())
///     .build();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args();
/// let recorder = maybe_fake_args.unwrap_or_default().into_recorder();
/// let mut out = Vec::new();
/// hidock::run_with_options(command, &mut out, hidock::fake_hardware_client(recorder), options)
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the recorder interaction
/// fails, or output writing fails.
pub async fn run_with_options<W>(
    command: Command,
    out: &mut W,
    hardware_client: Box<dyn HardwareClient>,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(command, out, &SystemTerminalClient, hardware_client, options).await
}

/// Runs the CLI command with injected terminal and hardware clients.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the recorder interaction
/// fails, or output writing fails.
#[instrument(
    skip(out, terminal_client, hardware_client, options),
    level = "info",
    fields(command = %command.name(), output_format = ?options.output_format)
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    hardware_client: Box<dyn HardwareClient>,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    let RunOptions {
        log_level,
        output_format,
        session_config,
    } = options;
    telemetry::initialise_tracing(
        "hidock",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let report = match command {
        Command::Devices => Report::Devices {
            devices: hardware_client.list_devices().await?,
        },
        Command::Info => with_session(hardware_client, session_config, cli::device::info).await?,
        Command::Files => with_session(hardware_client, session_config, cli::files::files).await?,
        Command::Download(args) => {
            with_session(hardware_client, session_config, async |session: &DeviceSession| {
                cli::files::download(session, &args).await
            })
            .await?
        }
        Command::Delete(args) => {
            with_session(hardware_client, session_config, async |session: &DeviceSession| {
                cli::files::delete(session, &args).await
            })
            .await?
        }
        Command::Time(action) => {
            with_session(hardware_client, session_config, async |session: &DeviceSession| {
                cli::device::time(session, &action).await
            })
            .await?
        }
        Command::Settings(action) => {
            with_session(hardware_client, session_config, async |session: &DeviceSession| {
                cli::device::settings(session, &action).await
            })
            .await?
        }
        Command::Card(action) => {
            with_session(hardware_client, session_config, async |session: &DeviceSession| {
                cli::device::card(session, &action).await
            })
            .await?
        }
        Command::FactoryReset { yes } => {
            with_session(hardware_client, session_config, async |session: &DeviceSession| {
                cli::device::factory_reset(session, yes).await
            })
            .await?
        }
        Command::Bluetooth(action) => {
            with_session(hardware_client, session_config, async |session: &DeviceSession| {
                cli::device::bluetooth(session, &action).await
            })
            .await?
        }
    };

    let painter = Painter::new(terminal_client.stdout_is_terminal());
    report.emit(out, output_format, &painter)?;
    Ok(())
}

/// Connects, runs one operation, and closes the session; an operation error
/// wins over a close error.
async fn with_session<F>(
    hardware_client: Box<dyn HardwareClient>,
    config: SessionConfig,
    operation: F,
) -> Result<Report>
where
    F: AsyncFnOnce(&DeviceSession) -> Result<Report>,
{
    let session = SessionHandler::new(hardware_client)
        .with_config(config)
        .connect_first()
        .await?;

    let operation_result = operation(&session).await;
    let close_result = session.close().await;

    if let Err(error) = close_result {
        if operation_result.is_ok() {
            return Err(error.into());
        }
        trace!(?error, "failed to close session cleanly");
    }

    operation_result
}
