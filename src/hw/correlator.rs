use std::collections::VecDeque;
use std::time::Duration;

use derive_more::Display;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::ConnectionLost;
use crate::handlers::{FrameCodec, Packet};
use crate::protocol::CommandId;

/// Caller-visible identifier of one submitted command.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
#[display("#{_0}")]
pub struct Ticket(u64);

impl Ticket {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }
}

/// Resolution of a single-response command.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Reply {
    /// The matching response packet.
    Response(Packet),
    /// The command was sent but nothing matched before its deadline.
    TimedOut,
    /// The deadline passed while the command was still queued.
    Expired,
}

/// One event of a streaming exchange.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StreamEvent {
    /// A packet carrying the streaming command identifier.
    Chunk(Packet),
    /// No chunk arrived within the idle timeout.
    TimedOut,
    /// The exchange never left the queue.
    Expired,
    /// The connection was torn down.
    Lost(ConnectionLost),
}

pub(crate) type ReplySender = oneshot::Sender<Result<Reply, ConnectionLost>>;
pub(crate) type StreamSender = mpsc::UnboundedSender<StreamEvent>;

/// Where the outcome of a command goes.
#[derive(Debug)]
pub(crate) enum Waiter {
    /// Nobody waits; the slot frees as soon as the frame is written.
    Detached,
    Reply(ReplySender),
    Stream(StreamSender),
}

impl Waiter {
    fn is_streaming(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    fn resolve(self, reply: Reply) {
        match self {
            Self::Detached => {}
            Self::Reply(sender) => {
                let _receiver_gone = sender.send(Ok(reply));
            }
            Self::Stream(sender) => {
                let event = match reply {
                    Reply::Response(packet) => StreamEvent::Chunk(packet),
                    Reply::TimedOut => StreamEvent::TimedOut,
                    Reply::Expired => StreamEvent::Expired,
                };
                let _receiver_gone = sender.send(event);
            }
        }
    }

    fn reject(self, lost: ConnectionLost) {
        match self {
            Self::Detached => {}
            Self::Reply(sender) => {
                let _receiver_gone = sender.send(Err(lost));
            }
            Self::Stream(sender) => {
                let _receiver_gone = sender.send(StreamEvent::Lost(lost));
            }
        }
    }
}

/// A command waiting in the send queue.
#[derive(Debug)]
pub(crate) struct CommandRequest {
    ticket: Ticket,
    command: CommandId,
    frame: Vec<u8>,
    timeout: Option<Duration>,
    /// Latest time the command may still leave the queue.
    queue_deadline: Option<Instant>,
    waiter: Waiter,
}

impl CommandRequest {
    /// Wraps an encoded frame; its sequence is restamped when sent.
    ///
    /// `timeout` bounds both the wait in the queue and, separately, the wait
    /// for a response once the frame is written.
    pub(crate) fn new(
        ticket: Ticket,
        command: CommandId,
        frame: Vec<u8>,
        timeout: Option<Duration>,
        now: Instant,
        waiter: Waiter,
    ) -> Self {
        Self {
            ticket,
            command,
            frame,
            timeout,
            queue_deadline: timeout.map(|timeout| now + timeout),
            waiter,
        }
    }

    pub(crate) fn reject(self, lost: ConnectionLost) {
        self.waiter.reject(lost);
    }
}

/// A frame ready to hand to the transport.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct Outbound {
    pub(crate) ticket: Ticket,
    pub(crate) command: CommandId,
    pub(crate) sequence: u32,
    pub(crate) frame: Vec<u8>,
}

/// Observable state of the single command slot.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub(crate) enum SlotState {
    #[display("idle")]
    Idle,
    #[display("sending")]
    Sending,
    #[display("awaiting_response")]
    AwaitingResponse,
}

/// What happened to one inbound packet.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Delivery {
    Resolved,
    Streamed,
    Discarded,
}

#[derive(Debug)]
struct InFlight {
    ticket: Ticket,
    command: CommandId,
    sequence: u32,
    timeout: Option<Duration>,
    expires_at: Option<Instant>,
    waiter: Waiter,
    sent: bool,
}

/// Half-duplex command queue with sequence-correlated response matching.
///
/// Holds at most one command in flight. Pure state: the engine feeds it
/// submissions, decoded packets, and the current time.
#[derive(Debug)]
pub(crate) struct Correlator {
    queue: VecDeque<CommandRequest>,
    current: Option<InFlight>,
    next_sequence: u32,
}

impl Correlator {
    pub(crate) fn new(first_sequence: u32) -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            next_sequence: first_sequence,
        }
    }

    pub(crate) fn state(&self) -> SlotState {
        match &self.current {
            None => SlotState::Idle,
            Some(in_flight) if in_flight.sent => SlotState::AwaitingResponse,
            Some(_) => SlotState::Sending,
        }
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn enqueue(&mut self, request: CommandRequest) {
        trace!(
            ticket = %request.ticket,
            command = %request.command,
            queued = self.queue.len(),
            "queued command"
        );
        self.queue.push_back(request);
    }

    /// Moves the queue head into the slot when the slot is idle.
    ///
    /// Entries whose deadline already passed resolve as expired and are skipped.
    pub(crate) fn next_outbound(&mut self, now: Instant) -> Option<Outbound> {
        if self.current.is_some() {
            return None;
        }

        while let Some(request) = self.queue.pop_front() {
            if request.queue_deadline.is_some_and(|deadline| deadline <= now) {
                debug!(
                    ticket = %request.ticket,
                    command = %request.command,
                    "command expired before it was sent"
                );
                request.waiter.resolve(Reply::Expired);
                continue;
            }

            let CommandRequest {
                ticket,
                command,
                mut frame,
                timeout,
                waiter,
                ..
            } = request;
            let sequence = self.next_sequence;
            if let Err(error) = FrameCodec::restamp_sequence(&mut frame, sequence) {
                warn!(%ticket, %command, %error, "dropping command with a malformed frame");
                waiter.resolve(Reply::Expired);
                continue;
            }
            self.next_sequence = self.next_sequence.wrapping_add(1);

            self.current = Some(InFlight {
                ticket,
                command,
                sequence,
                timeout,
                expires_at: None,
                waiter,
                sent: false,
            });
            return Some(Outbound {
                ticket,
                command,
                sequence,
                frame,
            });
        }

        None
    }

    /// Records that the slot's frame reached the transport.
    ///
    /// The response deadline starts here, not when the command was queued.
    pub(crate) fn mark_sent(&mut self, now: Instant) {
        let detached = match self.current.as_mut() {
            Some(in_flight) => {
                in_flight.sent = true;
                in_flight.expires_at = in_flight.timeout.map(|timeout| now + timeout);
                matches!(in_flight.waiter, Waiter::Detached)
            }
            None => false,
        };
        if detached {
            self.current = None;
        }
    }

    /// Matches one decoded packet against the command in flight.
    pub(crate) fn on_packet(&mut self, packet: Packet, now: Instant) -> Delivery {
        let Some(in_flight) = self.current.as_mut() else {
            warn!(
                command = packet.command_code(),
                sequence = packet.sequence(),
                "discarding packet with no command in flight"
            );
            return Delivery::Discarded;
        };

        if packet.command_code() != in_flight.command.code() {
            warn!(
                command = packet.command_code(),
                sequence = packet.sequence(),
                expected_command = %in_flight.command,
                "discarding packet for a different command"
            );
            return Delivery::Discarded;
        }

        if let Waiter::Stream(sender) = &in_flight.waiter {
            in_flight.expires_at = in_flight.timeout.map(|timeout| now + timeout);
            let bytes = packet.body().len();
            if sender.send(StreamEvent::Chunk(packet)).is_err() {
                debug!(ticket = %in_flight.ticket, "stream consumer went away; freeing slot");
                self.current = None;
                return Delivery::Discarded;
            }
            trace!(ticket = %in_flight.ticket, bytes, "forwarded stream chunk");
            return Delivery::Streamed;
        }

        if packet.sequence() != in_flight.sequence {
            warn!(
                command = packet.command_code(),
                sequence = packet.sequence(),
                expected_sequence = in_flight.sequence,
                "discarding packet with a stale sequence"
            );
            return Delivery::Discarded;
        }

        match self.current.take() {
            Some(in_flight) => {
                trace!(ticket = %in_flight.ticket, sequence = in_flight.sequence, "resolved command");
                in_flight.waiter.resolve(Reply::Response(packet));
                Delivery::Resolved
            }
            None => Delivery::Discarded,
        }
    }

    /// Returns the earliest deadline of the slot or the queue.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let current = self.current.as_ref().and_then(|in_flight| in_flight.expires_at);
        let queued = self.queue.iter().filter_map(|request| request.queue_deadline).min();
        match (current, queued) {
            (Some(current), Some(queued)) => Some(current.min(queued)),
            (current, queued) => current.or(queued),
        }
    }

    /// Resolves everything whose deadline is at or before `now`.
    ///
    /// The slot resolves as timed out; queued entries resolve as expired. When
    /// the slot times out, the queue head is next to send and no longer expires.
    pub(crate) fn expire_due(&mut self, now: Instant) {
        let slot_due = self
            .current
            .as_ref()
            .and_then(|in_flight| in_flight.expires_at)
            .is_some_and(|deadline| deadline <= now);
        if slot_due && let Some(in_flight) = self.current.take() {
            debug!(
                ticket = %in_flight.ticket,
                command = %in_flight.command,
                sequence = in_flight.sequence,
                "command timed out"
            );
            in_flight.waiter.resolve(Reply::TimedOut);
            if let Some(head) = self.queue.front_mut() {
                head.queue_deadline = None;
            }
        }

        let (expired, waiting): (VecDeque<_>, VecDeque<_>) = self
            .queue
            .drain(..)
            .partition(|request| request.queue_deadline.is_some_and(|deadline| deadline <= now));
        self.queue = waiting;
        for request in expired {
            debug!(ticket = %request.ticket, command = %request.command, "queued command expired");
            request.waiter.resolve(Reply::Expired);
        }
    }

    /// Forces the timeout resolution of one ticket.
    ///
    /// Returns `false` when the ticket is no longer known.
    pub(crate) fn cancel(&mut self, ticket: Ticket) -> bool {
        if self
            .current
            .as_ref()
            .is_some_and(|in_flight| in_flight.ticket == ticket)
            && let Some(in_flight) = self.current.take()
        {
            in_flight.waiter.resolve(Reply::TimedOut);
            return true;
        }

        match self.queue.iter().position(|request| request.ticket == ticket) {
            Some(index) => {
                if let Some(request) = self.queue.remove(index) {
                    request.waiter.resolve(Reply::Expired);
                }
                true
            }
            None => false,
        }
    }

    /// Returns the sender of the streaming exchange in flight, if any.
    pub(crate) fn stream_watch(&self) -> Option<StreamSender> {
        match self.current.as_ref().map(|in_flight| &in_flight.waiter) {
            Some(Waiter::Stream(sender)) => Some(sender.clone()),
            _ => None,
        }
    }

    /// Frees the slot when its streaming consumer has hung up.
    pub(crate) fn release_closed_stream(&mut self) -> bool {
        let closed = matches!(
            self.current.as_ref().map(|in_flight| &in_flight.waiter),
            Some(Waiter::Stream(sender)) if sender.is_closed()
        );
        if closed && let Some(in_flight) = self.current.take() {
            debug!(ticket = %in_flight.ticket, command = %in_flight.command, "streaming exchange finished");
        }
        closed
    }

    /// Rejects the slot and every queued command.
    pub(crate) fn fail_all(&mut self, lost: &ConnectionLost) {
        let in_flight = self.current.take();
        let rejected = usize::from(in_flight.is_some()) + self.queue.len();
        if let Some(in_flight) = in_flight {
            in_flight.waiter.reject(lost.clone());
        }
        for request in self.queue.drain(..) {
            request.reject(lost.clone());
        }
        if rejected > 0 {
            debug!(rejected, reason = lost.reason(), "rejected pending commands");
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio::sync::oneshot::error::TryRecvError;

    use super::*;

    type ReplyReceiver = oneshot::Receiver<Result<Reply, ConnectionLost>>;

    fn request(
        ticket: u64,
        command: CommandId,
        timeout: Option<Duration>,
        now: Instant,
    ) -> (CommandRequest, ReplyReceiver) {
        let (sender, receiver) = oneshot::channel();
        let frame = FrameCodec::encode(command.code(), 0, &[]).expect("empty body should encode");
        let request = CommandRequest::new(
            Ticket::new(ticket),
            command,
            frame,
            timeout,
            now,
            Waiter::Reply(sender),
        );
        (request, receiver)
    }

    fn stream_request(
        ticket: u64,
        command: CommandId,
        timeout: Duration,
        now: Instant,
    ) -> (CommandRequest, mpsc::UnboundedReceiver<StreamEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let frame = FrameCodec::encode(command.code(), 0, b"a.wav").expect("body should encode");
        let request = CommandRequest::new(
            Ticket::new(ticket),
            command,
            frame,
            Some(timeout),
            now,
            Waiter::Stream(sender),
        );
        (request, receiver)
    }

    fn send_next(correlator: &mut Correlator, now: Instant) -> Outbound {
        let outbound = correlator
            .next_outbound(now)
            .expect("a queued command should be sent");
        correlator.mark_sent(now);
        outbound
    }

    #[test]
    fn stale_sequence_never_resolves_the_current_command() {
        let now = Instant::now();
        let mut correlator = Correlator::new(10);
        let (first, mut first_reply) = request(1, CommandId::GetTime, None, now);
        let (second, mut second_reply) = request(2, CommandId::GetTime, None, now);
        correlator.enqueue(first);
        correlator.enqueue(second);

        let outbound = send_next(&mut correlator, now);
        assert_eq!(10, outbound.sequence);
        assert_eq!(SlotState::AwaitingResponse, correlator.state());

        let stray = Packet::new(CommandId::GetTime.code(), 11, vec![0; 7]);
        assert_eq!(Delivery::Discarded, correlator.on_packet(stray, now));
        assert_matches!(first_reply.try_recv(), Err(TryRecvError::Empty));
        assert_matches!(second_reply.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(None, correlator.next_outbound(now));

        let response = Packet::new(CommandId::GetTime.code(), 10, vec![0; 7]);
        assert_eq!(Delivery::Resolved, correlator.on_packet(response.clone(), now));
        assert_matches!(first_reply.try_recv(), Ok(Ok(Reply::Response(packet))) if packet == response);

        let outbound = send_next(&mut correlator, now);
        assert_eq!(Ticket::new(2), outbound.ticket);
        assert_eq!(11, outbound.sequence);
    }

    #[test]
    fn wrong_command_is_discarded() {
        let now = Instant::now();
        let mut correlator = Correlator::new(0);
        let (first, mut reply) = request(1, CommandId::FileCount, None, now);
        correlator.enqueue(first);
        send_next(&mut correlator, now);

        let packet = Packet::new(CommandId::DeviceInfo.code(), 0, vec![]);

        assert_eq!(Delivery::Discarded, correlator.on_packet(packet, now));
        assert_matches!(reply.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn timeout_frees_the_slot_for_the_next_command() {
        let now = Instant::now();
        let mut correlator = Correlator::new(0);
        let (first, mut first_reply) =
            request(1, CommandId::GetTime, Some(Duration::from_secs(1)), now);
        let (second, _second_reply) =
            request(2, CommandId::FileCount, Some(Duration::from_secs(10)), now);
        correlator.enqueue(first);
        correlator.enqueue(second);
        send_next(&mut correlator, now);

        assert_eq!(Some(now + Duration::from_secs(1)), correlator.next_deadline());
        correlator.expire_due(now + Duration::from_secs(1));

        assert_matches!(first_reply.try_recv(), Ok(Ok(Reply::TimedOut)));
        assert_eq!(SlotState::Idle, correlator.state());
        let outbound = send_next(&mut correlator, now + Duration::from_secs(1));
        assert_eq!(CommandId::FileCount, outbound.command);
    }

    #[test]
    fn equal_deadlines_still_let_the_next_command_go_out() {
        let now = Instant::now();
        let timeout = Duration::from_secs(5);
        let mut correlator = Correlator::new(0);
        let (silent, mut silent_reply) = request(1, CommandId::GetTime, Some(timeout), now);
        let (next, mut next_reply) = request(2, CommandId::FileCount, Some(timeout), now);
        let (behind, mut behind_reply) = request(3, CommandId::CardInfo, Some(timeout), now);
        correlator.enqueue(silent);
        correlator.enqueue(next);
        correlator.enqueue(behind);
        send_next(&mut correlator, now);

        correlator.expire_due(now + timeout);

        assert_matches!(silent_reply.try_recv(), Ok(Ok(Reply::TimedOut)));
        assert_matches!(behind_reply.try_recv(), Ok(Ok(Reply::Expired)));
        let outbound = send_next(&mut correlator, now + timeout);
        assert_eq!(Ticket::new(2), outbound.ticket);
        assert_eq!(Some(now + timeout + timeout), correlator.next_deadline());
        assert_matches!(next_reply.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn expired_queue_head_is_skipped_before_sending() {
        let now = Instant::now();
        let mut correlator = Correlator::new(0);
        let (stale, mut stale_reply) =
            request(1, CommandId::GetTime, Some(Duration::from_millis(5)), now);
        let (fresh, _fresh_reply) = request(2, CommandId::FileCount, None, now);
        correlator.enqueue(stale);
        correlator.enqueue(fresh);

        let outbound = send_next(&mut correlator, now + Duration::from_millis(5));

        assert_matches!(stale_reply.try_recv(), Ok(Ok(Reply::Expired)));
        assert_eq!(Ticket::new(2), outbound.ticket);
        assert_eq!(0, outbound.sequence);
    }

    #[test]
    fn queued_deadline_expires_while_another_command_is_in_flight() {
        let now = Instant::now();
        let mut correlator = Correlator::new(0);
        let (slow, _slow_reply) = request(1, CommandId::FileList, None, now);
        let (queued, mut queued_reply) =
            request(2, CommandId::GetTime, Some(Duration::from_secs(2)), now);
        correlator.enqueue(slow);
        send_next(&mut correlator, now);
        correlator.enqueue(queued);

        assert_eq!(Some(now + Duration::from_secs(2)), correlator.next_deadline());
        correlator.expire_due(now + Duration::from_secs(2));

        assert_matches!(queued_reply.try_recv(), Ok(Ok(Reply::Expired)));
        assert_eq!(0, correlator.queued_len());
        assert_eq!(SlotState::AwaitingResponse, correlator.state());
    }

    #[test]
    fn sequence_wraps_at_u32_max() {
        let now = Instant::now();
        let mut correlator = Correlator::new(u32::MAX);
        let (first, _first_reply) = request(1, CommandId::GetTime, None, now);
        let (second, _second_reply) = request(2, CommandId::GetTime, None, now);
        correlator.enqueue(first);
        correlator.enqueue(second);

        let first = send_next(&mut correlator, now);
        correlator.on_packet(Packet::new(CommandId::GetTime.code(), u32::MAX, vec![]), now);
        let second = send_next(&mut correlator, now);

        assert_eq!(u32::MAX, first.sequence);
        assert_eq!(0, second.sequence);
        assert_eq!(&[0x00, 0x00, 0x00, 0x00], &second.frame[4..8]);
    }

    #[test]
    fn streaming_matches_on_command_and_extends_the_deadline() {
        let now = Instant::now();
        let idle = Duration::from_secs(2);
        let mut correlator = Correlator::new(5);
        let (download, mut events) = stream_request(1, CommandId::TransferFile, idle, now);
        correlator.enqueue(download);
        send_next(&mut correlator, now);

        let later = now + Duration::from_secs(1);
        let chunk = Packet::new(CommandId::TransferFile.code(), 99, vec![1; 600]);
        assert_eq!(Delivery::Streamed, correlator.on_packet(chunk.clone(), later));

        assert_matches!(events.try_recv(), Ok(StreamEvent::Chunk(packet)) if packet == chunk);
        assert_eq!(Some(later + idle), correlator.next_deadline());
        assert_eq!(SlotState::AwaitingResponse, correlator.state());
    }

    #[test]
    fn closed_stream_consumer_releases_the_slot() {
        let now = Instant::now();
        let mut correlator = Correlator::new(0);
        let (download, events) =
            stream_request(1, CommandId::TransferFile, Duration::from_secs(2), now);
        correlator.enqueue(download);
        send_next(&mut correlator, now);
        assert!(correlator.stream_watch().is_some());

        drop(events);

        assert!(correlator.release_closed_stream());
        assert_eq!(SlotState::Idle, correlator.state());
        assert!(correlator.stream_watch().is_none());
    }

    #[test]
    fn detached_commands_free_the_slot_once_written() {
        let now = Instant::now();
        let mut correlator = Correlator::new(0);
        let frame = FrameCodec::encode(CommandId::SetTime.code(), 0, &[0; 7])
            .expect("body should encode");
        correlator.enqueue(CommandRequest::new(
            Ticket::new(1),
            CommandId::SetTime,
            frame,
            None,
            now,
            Waiter::Detached,
        ));

        correlator.next_outbound(now);
        assert_eq!(SlotState::Sending, correlator.state());
        correlator.mark_sent(now);

        assert_eq!(SlotState::Idle, correlator.state());
    }

    #[test]
    fn cancel_forces_timeout_for_current_and_expiry_for_queued() {
        let now = Instant::now();
        let mut correlator = Correlator::new(0);
        let (first, mut first_reply) = request(1, CommandId::GetTime, None, now);
        let (second, mut second_reply) = request(2, CommandId::FileCount, None, now);
        correlator.enqueue(first);
        correlator.enqueue(second);
        send_next(&mut correlator, now);

        assert!(correlator.cancel(Ticket::new(2)));
        assert!(correlator.cancel(Ticket::new(1)));
        assert!(!correlator.cancel(Ticket::new(3)));

        assert_matches!(first_reply.try_recv(), Ok(Ok(Reply::TimedOut)));
        assert_matches!(second_reply.try_recv(), Ok(Ok(Reply::Expired)));
        assert_eq!(SlotState::Idle, correlator.state());
    }

    #[test]
    fn fail_all_rejects_slot_and_queue() {
        let now = Instant::now();
        let mut correlator = Correlator::new(0);
        let (first, mut first_reply) = request(1, CommandId::GetTime, None, now);
        let (second, mut second_reply) = request(2, CommandId::FileCount, None, now);
        correlator.enqueue(first);
        correlator.enqueue(second);
        send_next(&mut correlator, now);

        let lost = ConnectionLost::new("unplugged");
        correlator.fail_all(&lost);

        assert_matches!(first_reply.try_recv(), Ok(Err(error)) if error == lost);
        assert_matches!(second_reply.try_recv(), Ok(Err(error)) if error == lost);
        assert_eq!(SlotState::Idle, correlator.state());
        assert_eq!(0, correlator.queued_len());
    }
}
