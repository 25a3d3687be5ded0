use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bon::Builder;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::capability::{CapabilityGate, Feature};
use super::correlator::Reply;
use super::engine::{CommandStream, EngineHandle, PendingCommand, spawn_engine};
use super::model::DeviceIdentity;
use super::transport::Transport;
use crate::error::{InteractionError, ProtocolError};
use crate::handlers::{DeviceInfoHandler, Packet};
use crate::protocol::{CommandId, DeviceModel};

/// Distinguished non-error results of a device command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The device answered.
    Completed(T),
    /// The command was sent but not answered before its deadline.
    TimedOut,
    /// The deadline passed before the command left the queue.
    Expired,
    /// The model/firmware does not support the command; nothing was sent.
    Unsupported(Feature),
}

impl<T> Outcome<T> {
    /// Maps the completed value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Completed(value) => Outcome::Completed(f(value)),
            Self::TimedOut => Outcome::TimedOut,
            Self::Expired => Outcome::Expired,
            Self::Unsupported(feature) => Outcome::Unsupported(feature),
        }
    }

    /// Maps the completed value through a fallible decoder.
    ///
    /// # Errors
    ///
    /// Returns the decoder error.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Outcome<U>, E> {
        Ok(match self {
            Self::Completed(value) => Outcome::Completed(f(value)?),
            Self::TimedOut => Outcome::TimedOut,
            Self::Expired => Outcome::Expired,
            Self::Unsupported(feature) => Outcome::Unsupported(feature),
        })
    }

    /// Returns the completed value, if any.
    #[must_use]
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// Returns `true` when the device answered.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Converts the distinguished results into errors for `?`-style callers.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TimedOut`], [`ProtocolError::Expired`], or
    /// [`ProtocolError::Unsupported`].
    ///
    /// ```
    /// use hidock::{CommandId, Feature, Outcome, ProtocolError};
    ///
    /// let value = Outcome::Completed(7).into_result(CommandId::FileCount)?;
    /// assert_eq!(7, value);
    ///
    /// let unsupported: Outcome<u32> = Outcome::Unsupported(Feature::Settings);
    /// assert!(matches!(
    ///     unsupported.into_result(CommandId::GetSettings),
    ///     Err(ProtocolError::Unsupported { feature: Feature::Settings })
    /// ));
    /// # Ok::<(), ProtocolError>(())
    /// ```
    pub fn into_result(self, command: CommandId) -> Result<T, ProtocolError> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::TimedOut => Err(ProtocolError::TimedOut { command }),
            Self::Expired => Err(ProtocolError::Expired { command }),
            Self::Unsupported(feature) => Err(ProtocolError::Unsupported { feature }),
        }
    }
}

impl From<Reply> for Outcome<Packet> {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Response(packet) => Self::Completed(packet),
            Reply::TimedOut => Self::TimedOut,
            Reply::Expired => Self::Expired,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display)]
pub enum DisconnectReason {
    /// The host closed the session.
    #[display("session closed")]
    Closed,
    /// The transport failed.
    #[display("transport lost: {reason}")]
    TransportLost { reason: String },
}

type ConnectHook = Box<dyn Fn(&DeviceIdentity) + Send + Sync>;
type DisconnectHook = Box<dyn Fn(&DisconnectReason) + Send + Sync>;

/// Lifecycle callbacks for one session.
#[derive(Default)]
pub struct SessionHooks {
    on_connect: Option<ConnectHook>,
    on_disconnect: Option<DisconnectHook>,
    disconnected: AtomicBool,
}

impl SessionHooks {
    /// Creates hooks with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `hook` once the device identity is known.
    #[must_use]
    pub fn on_connect(mut self, hook: impl Fn(&DeviceIdentity) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Box::new(hook));
        self
    }

    /// Runs `hook` exactly once when the session ends.
    #[must_use]
    pub fn on_disconnect(
        mut self,
        hook: impl Fn(&DisconnectReason) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Box::new(hook));
        self
    }

    pub(crate) fn notify_connect(&self, identity: &DeviceIdentity) {
        if let Some(hook) = &self.on_connect {
            hook(identity);
        }
    }

    pub(crate) fn notify_disconnect(&self, reason: &DisconnectReason) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(hook) = &self.on_disconnect {
            hook(reason);
        }
    }
}

impl fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHooks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish_non_exhaustive()
    }
}

/// Timing knobs for one session.
#[derive(Debug, Clone, Builder)]
pub struct SessionConfig {
    /// Deadline for ordinary single-response commands.
    #[builder(default = Duration::from_secs(5))]
    command_timeout: Duration,
    /// Longest quiet gap tolerated inside a streaming exchange.
    #[builder(default = Duration::from_secs(10))]
    stream_idle_timeout: Duration,
    /// Wall-clock ceiling for a whole file download.
    #[builder(default = Duration::from_secs(180))]
    download_watchdog: Duration,
    /// Sequence id of the first command.
    #[builder(default)]
    first_sequence: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    /// Returns the default single-response deadline.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Returns the streaming idle timeout.
    #[must_use]
    pub fn stream_idle_timeout(&self) -> Duration {
        self.stream_idle_timeout
    }

    /// Returns the download wall-clock ceiling.
    #[must_use]
    pub fn download_watchdog(&self) -> Duration {
        self.download_watchdog
    }

    /// Returns the first sequence id.
    #[must_use]
    pub fn first_sequence(&self) -> u32 {
        self.first_sequence
    }
}

/// An open connection to one recorder.
#[derive(Debug)]
pub struct DeviceSession {
    identity: DeviceIdentity,
    config: SessionConfig,
    engine: EngineHandle,
    engine_task: JoinHandle<()>,
    transport: Arc<dyn Transport>,
}

impl DeviceSession {
    /// Starts the engine over an opened transport and identifies the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the product id is not a recorder, the device-info
    /// request fails, or the connection drops while identifying.
    ///
    /// ```no_run
    /// # async fn demo() -> anyhow::Result<()> {
    /// use hidock::{DeviceSession, FakeRecorder, SessionConfig, SessionHooks};
    ///
    /// let recorder = FakeRecorder::default();
    /// let hooks = SessionHooks::new().on_connect(|identity| println!("{}", identity.serial_number()));
    /// let session = DeviceSession::establish(
    ///     recorder.transport(),
    ///     recorder.product_id(),
    ///     SessionConfig::default(),
    ///     hooks,
    /// )
    /// .await?;
    /// session.close().await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip(transport, config, hooks), level = "info")]
    pub async fn establish(
        transport: Arc<dyn Transport>,
        product_id: u16,
        config: SessionConfig,
        hooks: SessionHooks,
    ) -> Result<Self, InteractionError> {
        let model = DeviceModel::from_product_id(product_id)
            .ok_or(InteractionError::UnsupportedProduct { product_id })?;
        let hooks = Arc::new(hooks);
        let (engine, engine_task) =
            spawn_engine(Arc::clone(&transport), Arc::clone(&hooks), config.first_sequence());

        let info = match identify(&engine, config.command_timeout()).await {
            Ok(info) => info,
            Err(error) => {
                engine.shutdown();
                let _join = engine_task.await;
                if let Err(close_error) = transport.close().await {
                    debug!(%close_error, "failed to close transport after identify failure");
                }
                return Err(error);
            }
        };

        let identity = DeviceIdentity::new(
            model,
            product_id,
            info.firmware().clone(),
            info.serial_number().to_string(),
        );
        info!(
            %model,
            firmware = %identity.firmware(),
            serial = identity.serial_number(),
            "recorder connected"
        );
        hooks.notify_connect(&identity);

        Ok(Self {
            identity,
            config,
            engine,
            engine_task,
            transport,
        })
    }

    /// Returns the identity read at connect time.
    #[must_use]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Returns the session timing configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns whether `feature` is available on this recorder.
    #[must_use]
    pub fn supports(&self, feature: Feature) -> bool {
        CapabilityGate::supports(
            self.identity.model(),
            self.identity.firmware().number(),
            feature,
        )
    }

    /// Queues a command and returns a handle that resolves with its reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be framed or the session is closed.
    pub async fn submit(
        &self,
        command: CommandId,
        body: &[u8],
        timeout: Option<Duration>,
    ) -> Result<PendingCommand, ProtocolError> {
        self.engine.submit(command, body, timeout).await
    }

    /// Sends a command with the default deadline and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be framed or the connection is lost.
    pub async fn send(
        &self,
        command: CommandId,
        body: &[u8],
    ) -> Result<Outcome<Packet>, ProtocolError> {
        self.send_with_timeout(command, body, Some(self.config.command_timeout))
            .await
    }

    /// Sends a command with an explicit deadline (`None` waits forever).
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be framed or the connection is lost.
    #[instrument(skip(self, body), level = "debug", fields(%command, bytes = body.len()))]
    pub async fn send_with_timeout(
        &self,
        command: CommandId,
        body: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Outcome<Packet>, ProtocolError> {
        let pending = self.engine.submit(command, body, timeout).await?;
        let reply = pending.wait().await?;
        Ok(reply.into())
    }

    /// Sends a command after checking the capability gate.
    ///
    /// Returns [`Outcome::Unsupported`] without writing anything when the gate
    /// rejects the feature.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be framed or the connection is lost.
    pub async fn send_gated(
        &self,
        feature: Feature,
        command: CommandId,
        body: &[u8],
    ) -> Result<Outcome<Packet>, ProtocolError> {
        if !self.supports(feature) {
            debug!(
                %feature,
                %command,
                model = %self.identity.model(),
                firmware = self.identity.firmware().number(),
                "capability gate rejected command"
            );
            return Ok(Outcome::Unsupported(feature));
        }
        self.send(command, body).await
    }

    /// Sends a command without waiting for any reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be framed or the session is closed.
    pub async fn send_detached(&self, command: CommandId, body: &[u8]) -> Result<(), ProtocolError> {
        self.engine.submit_detached(command, body).await.map(|_ticket| ())
    }

    pub(crate) async fn open_stream(
        &self,
        command: CommandId,
        body: &[u8],
        idle_timeout: Option<Duration>,
    ) -> Result<CommandStream, ProtocolError> {
        self.engine.open_stream(command, body, idle_timeout).await
    }

    /// Stops the engine, rejects pending commands, and releases the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to close.
    #[instrument(skip(self), level = "debug")]
    pub async fn close(self) -> Result<(), InteractionError> {
        let Self {
            engine,
            engine_task,
            transport,
            ..
        } = self;
        engine.shutdown();
        if let Err(error) = engine_task.await {
            warn!(%error, "engine task ended abnormally");
        }
        transport.close().await?;
        Ok(())
    }
}

async fn identify(
    engine: &EngineHandle,
    timeout: Duration,
) -> Result<crate::handlers::DeviceInfo, InteractionError> {
    let pending = engine
        .submit(CommandId::DeviceInfo, &[], Some(timeout))
        .await
        .map_err(|error| InteractionError::Identify {
            source: Box::new(error),
        })?;
    match pending.wait().await? {
        Reply::Response(packet) => Ok(DeviceInfoHandler::parse(packet.body())?),
        Reply::TimedOut | Reply::Expired => Err(InteractionError::DeviceInfoTimedOut),
    }
}
