use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use super::correlator::{
    CommandRequest, Correlator, Reply, StreamEvent, StreamSender, Ticket, Waiter,
};
use super::session::{DisconnectReason, SessionHooks};
use super::transport::{READ_CHUNK_LEN, Transport};
use crate::error::{ConnectionLost, ProtocolError, TransportError};
use crate::handlers::{FrameCodec, FrameDecoder};
use crate::protocol::CommandId;

const REQUEST_QUEUE_DEPTH: usize = 32;
const INBOUND_QUEUE_DEPTH: usize = 64;

#[derive(Debug)]
enum EngineRequest {
    Submit(CommandRequest),
    Cancel(Ticket),
}

#[derive(Debug)]
enum Inbound {
    Bytes(Vec<u8>),
    Lost(TransportError),
}

/// Cloneable handle used to talk to one running engine.
#[derive(Debug, Clone)]
pub(crate) struct EngineHandle {
    requests: mpsc::Sender<EngineRequest>,
    tickets: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

/// Spawns the engine actor and the transport receive loop.
pub(crate) fn spawn_engine(
    transport: Arc<dyn Transport>,
    hooks: Arc<SessionHooks>,
    first_sequence: u32,
) -> (EngineHandle, JoinHandle<()>) {
    let (request_sender, request_receiver) = mpsc::channel(REQUEST_QUEUE_DEPTH);
    let (inbound_sender, inbound_receiver) = mpsc::channel(INBOUND_QUEUE_DEPTH);
    let shutdown = CancellationToken::new();

    tokio::spawn(
        receive_loop(Arc::clone(&transport), inbound_sender, shutdown.child_token())
            .instrument(info_span!("receive_loop")),
    );

    let engine = Engine {
        transport,
        hooks,
        correlator: Correlator::new(first_sequence),
        decoder: FrameDecoder::new(),
        requests: request_receiver,
        inbound: inbound_receiver,
        shutdown: shutdown.clone(),
    };
    let task = tokio::spawn(engine.run().instrument(info_span!("engine")));

    let handle = EngineHandle {
        requests: request_sender,
        tickets: Arc::new(AtomicU64::new(1)),
        shutdown,
    };
    (handle, task)
}

impl EngineHandle {
    fn next_ticket(&self) -> Ticket {
        Ticket::new(self.tickets.fetch_add(1, Ordering::Relaxed))
    }

    async fn enqueue(
        &self,
        command: CommandId,
        body: &[u8],
        timeout: Option<Duration>,
        waiter: Waiter,
    ) -> Result<Ticket, ProtocolError> {
        let frame = FrameCodec::encode(command.code(), 0, body)?;
        let ticket = self.next_ticket();
        let request = CommandRequest::new(ticket, command, frame, timeout, Instant::now(), waiter);
        self.requests
            .send(EngineRequest::Submit(request))
            .await
            .map_err(|_closed| ConnectionLost::new("session is closed"))?;
        Ok(ticket)
    }

    /// Queues a single-response command.
    pub(crate) async fn submit(
        &self,
        command: CommandId,
        body: &[u8],
        timeout: Option<Duration>,
    ) -> Result<PendingCommand, ProtocolError> {
        let (sender, receiver) = oneshot::channel();
        let ticket = self
            .enqueue(command, body, timeout, Waiter::Reply(sender))
            .await?;
        Ok(PendingCommand {
            ticket,
            command,
            reply: receiver,
            engine: self.clone(),
        })
    }

    /// Queues a command nobody waits on.
    pub(crate) async fn submit_detached(
        &self,
        command: CommandId,
        body: &[u8],
    ) -> Result<Ticket, ProtocolError> {
        self.enqueue(command, body, None, Waiter::Detached).await
    }

    /// Queues a streaming command; the idle timeout restarts on every chunk.
    pub(crate) async fn open_stream(
        &self,
        command: CommandId,
        body: &[u8],
        idle_timeout: Option<Duration>,
    ) -> Result<CommandStream, ProtocolError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let ticket = self
            .enqueue(command, body, idle_timeout, Waiter::Stream(sender))
            .await?;
        Ok(CommandStream {
            ticket,
            command,
            events: UnboundedReceiverStream::new(receiver),
            engine: self.clone(),
        })
    }

    async fn cancel(&self, ticket: Ticket) -> Result<(), ConnectionLost> {
        self.requests
            .send(EngineRequest::Cancel(ticket))
            .await
            .map_err(|_closed| ConnectionLost::new("session is closed"))
    }

    /// Asks the engine to stop.
    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// A submitted single-response command.
#[derive(Debug)]
pub struct PendingCommand {
    ticket: Ticket,
    command: CommandId,
    reply: oneshot::Receiver<Result<Reply, ConnectionLost>>,
    engine: EngineHandle,
}

impl PendingCommand {
    /// Returns the request ticket.
    #[must_use]
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Returns the submitted command.
    #[must_use]
    pub fn command(&self) -> CommandId {
        self.command
    }

    /// Forces the timeout resolution of this request.
    ///
    /// An in-flight USB transfer is not interrupted; only matching stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is already closed.
    pub async fn cancel(&self) -> Result<(), ConnectionLost> {
        self.engine.cancel(self.ticket).await
    }

    /// Waits for the response, the deadline, or connection teardown.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is lost before the command resolves.
    pub async fn wait(self) -> Result<Reply, ConnectionLost> {
        self.reply
            .await
            .unwrap_or_else(|_dropped| Err(ConnectionLost::new("engine stopped")))
    }
}

/// Events of one streaming exchange; dropping it releases the command slot.
#[derive(Debug)]
pub(crate) struct CommandStream {
    ticket: Ticket,
    command: CommandId,
    events: UnboundedReceiverStream<StreamEvent>,
    engine: EngineHandle,
}

impl CommandStream {
    pub(crate) fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub(crate) fn command(&self) -> CommandId {
        self.command
    }

    /// Returns the next event, or `None` once the engine has dropped the exchange.
    pub(crate) async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.next().await
    }

    /// Ends the exchange early by forcing its timeout.
    pub(crate) async fn cancel(&self) -> Result<(), ConnectionLost> {
        self.engine.cancel(self.ticket).await
    }
}

struct Engine {
    transport: Arc<dyn Transport>,
    hooks: Arc<SessionHooks>,
    correlator: Correlator,
    decoder: FrameDecoder,
    requests: mpsc::Receiver<EngineRequest>,
    inbound: mpsc::Receiver<Inbound>,
    shutdown: CancellationToken,
}

impl Engine {
    async fn run(mut self) {
        info!("engine started");
        let reason = loop {
            if let Err(error) = self.flush_outbound().await {
                break DisconnectReason::TransportLost {
                    reason: error.to_string(),
                };
            }

            let deadline = self.correlator.next_deadline();
            let stream_watch = self.correlator.stream_watch();

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break DisconnectReason::Closed,
                inbound = self.inbound.recv() => match inbound {
                    Some(Inbound::Bytes(bytes)) => self.on_bytes(&bytes),
                    Some(Inbound::Lost(error)) => {
                        break DisconnectReason::TransportLost { reason: error.to_string() };
                    }
                    None => {
                        break DisconnectReason::TransportLost {
                            reason: "receive loop stopped".to_string(),
                        };
                    }
                },
                request = self.requests.recv() => match request {
                    Some(EngineRequest::Submit(request)) => self.correlator.enqueue(request),
                    Some(EngineRequest::Cancel(ticket)) => {
                        let known = self.correlator.cancel(ticket);
                        debug!(%ticket, known, "cancel requested");
                    }
                    None => break DisconnectReason::Closed,
                },
                () = wait_for_deadline(deadline) => self.correlator.expire_due(Instant::now()),
                () = wait_for_stream_close(stream_watch) => {
                    self.correlator.release_closed_stream();
                }
            }
        };

        self.teardown(&reason);
    }

    async fn flush_outbound(&mut self) -> Result<(), TransportError> {
        while let Some(outbound) = self.correlator.next_outbound(Instant::now()) {
            trace!(
                ticket = %outbound.ticket,
                command = %outbound.command,
                sequence = outbound.sequence,
                bytes = outbound.frame.len(),
                "writing command frame"
            );
            let written = self.transport.write(&outbound.frame).await?;
            if written != outbound.frame.len() {
                return Err(TransportError::ShortWrite {
                    written,
                    expected: outbound.frame.len(),
                });
            }
            self.correlator.mark_sent(Instant::now());
        }
        Ok(())
    }

    fn on_bytes(&mut self, bytes: &[u8]) {
        self.decoder.extend(bytes);
        while let Some(packet) = self.decoder.next_packet() {
            let command = packet.command_code();
            let sequence = packet.sequence();
            let delivery = self.correlator.on_packet(packet, Instant::now());
            trace!(command, sequence, ?delivery, slot = %self.correlator.state(), "inbound packet");
        }
    }

    fn teardown(&mut self, reason: &DisconnectReason) {
        match reason {
            DisconnectReason::Closed => info!("engine stopped"),
            DisconnectReason::TransportLost { reason } => warn!(reason, "connection lost"),
        }
        self.shutdown.cancel();

        let lost = ConnectionLost::new(reason.to_string());
        self.correlator.fail_all(&lost);
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            if let EngineRequest::Submit(request) = request {
                request.reject(lost.clone());
            }
        }
        self.decoder.clear();
        self.hooks.notify_disconnect(reason);
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn wait_for_stream_close(watch: Option<StreamSender>) {
    match watch {
        Some(sender) => sender.closed().await,
        None => std::future::pending().await,
    }
}

async fn receive_loop(
    transport: Arc<dyn Transport>,
    inbound: mpsc::Sender<Inbound>,
    shutdown: CancellationToken,
) {
    loop {
        let read = tokio::select! {
            () = shutdown.cancelled() => break,
            read = transport.read(READ_CHUNK_LEN) => read,
        };

        match read {
            Ok(bytes) if bytes.is_empty() => {}
            Ok(bytes) => {
                trace!(bytes = bytes.len(), "received transport bytes");
                if inbound.send(Inbound::Bytes(bytes)).await.is_err() {
                    break;
                }
            }
            Err(error) if error.is_retryable() => trace!(%error, "transport read will be retried"),
            Err(error) => {
                let _engine_gone = inbound.send(Inbound::Lost(error)).await;
                break;
            }
        }
    }
    debug!("receive loop stopped");
}
