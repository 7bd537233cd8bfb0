//! Device session: transport ownership, command execution, bulk reads
//!
//! A [`DeviceSession`] owns one socket and the session state negotiated over
//! it. Exactly one exchange is in flight at a time, which `&mut self`
//! enforces.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use zklink_core::{checksum, Command, FrameAssembler, Framing, Header, Packet, Session, SessionState};
use zklink_core::{ChunkPlan, HEADER_SIZE};
use zklink_transport::Transport;

use crate::bulk::{BulkRead, ChunkedTransfer, Interruption};
use crate::config::{ChecksumPolicy, Endpoint, SessionOptions};
use crate::error::{Error, Result};

/// Real-time events kept while a command exchange is in progress
const MAX_QUEUED_EVENTS: usize = 64;

/// Offset of the session id in a stripped CONNECT reply
const SESSION_ID_OFFSET: usize = 4;

/// A real-time event frame: flags from the header and the raw payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    pub flags: u16,
    pub payload: Bytes,
}

/// How long a read may wait
#[derive(Debug, Clone, Copy)]
enum Wait {
    /// Fixed deadline for the whole exchange
    Until(Instant),
    /// Fresh budget for every socket read
    Idle(Duration),
}

impl Wait {
    fn budget(self) -> Option<Duration> {
        match self {
            Self::Until(deadline) => deadline
                .checked_duration_since(Instant::now())
                .filter(|left| !left.is_zero()),
            Self::Idle(budget) => Some(budget),
        }
    }
}

/// One device connection
pub struct DeviceSession {
    endpoint: Endpoint,
    options: SessionOptions,
    transport: Box<dyn Transport>,
    /// Transport built from the endpoint, rebuilt when the endpoint changes
    owns_transport: bool,
    session: Session,
    inbox: FrameAssembler,
    events: VecDeque<EventFrame>,
}

impl DeviceSession {
    pub fn new(endpoint: Endpoint, options: SessionOptions) -> Self {
        let transport = endpoint.build_transport(&options);
        Self {
            owns_transport: true,
            ..Self::with_transport(endpoint, options, transport)
        }
    }

    /// Use a caller-supplied transport
    pub fn with_transport(
        endpoint: Endpoint,
        options: SessionOptions,
        transport: Box<dyn Transport>,
    ) -> Self {
        let framing = transport.framing();

        Self {
            endpoint,
            options,
            transport,
            owns_transport: false,
            session: Session::new(),
            inbox: FrameAssembler::new(framing),
            events: VecDeque::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Reply timeout for ordinary commands
    ///
    /// The endpoint is fixed once the socket is open, so this fails unless
    /// the session is disconnected.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if self.session.state() != SessionState::Disconnected || self.transport.is_connected() {
            return Err(zklink_core::Error::InvalidSessionState(format!(
                "Cannot change the timeout of {} while {:?}",
                self.endpoint,
                self.session.state()
            ))
            .into());
        }

        self.endpoint.timeout = timeout;
        if self.owns_transport {
            self.transport = self.endpoint.build_transport(&self.options);
        }
        Ok(())
    }

    /// Read-only view of the session state
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session_id(&self) -> Option<u16> {
        self.session.session_id()
    }

    /// Sequence of the last command sent
    pub fn sequence(&self) -> u16 {
        self.session.sequence()
    }

    pub fn framing(&self) -> Framing {
        self.transport.framing()
    }

    /// CONNECT acknowledged and socket still open
    pub fn is_connected(&self) -> bool {
        self.session.is_connected() && self.transport.is_connected()
    }

    /// Open the socket (no protocol handshake)
    pub async fn open(&mut self) -> Result<()> {
        let addr = self.endpoint.addr();
        debug!("Opening {}", self.endpoint);

        self.transport.connect().await.map_err(|e| match e {
            zklink_transport::Error::ConnectTimeout => Error::ConnectTimeout { addr: addr.clone() },
            zklink_transport::Error::ConnectRefused => Error::ConnectRefused { addr: addr.clone() },
            other => Error::Transport(other),
        })?;

        self.inbox.clear();
        self.events.clear();
        self.session.open()?;

        Ok(())
    }

    /// Send CONNECT and adopt the session id from the reply
    pub async fn connect(&mut self) -> Result<()> {
        let reply = self.execute_cmd(Command::Connect, &[]).await?;

        if reply.is_empty() {
            return Err(Error::NoReplyOnConnect);
        }

        if let Ok(header) = Header::decode(&reply) {
            if header.command != u16::from(Command::AckOk) {
                warn!(
                    "CONNECT answered with {}",
                    zklink_core::command::describe(header.command)
                );
            }
        }

        info!(
            "Connected to {} (session_id=0x{:04X})",
            self.endpoint.addr(),
            self.session.wire_session_id()
        );

        Ok(())
    }

    /// Best-effort EXIT, then close the socket
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.transport.is_connected() {
            if self.session.is_connected() {
                if let Err(e) = self.execute_cmd(Command::Exit, &[]).await {
                    warn!("Failed to send EXIT command: {}", e);
                }
            }

            self.transport.disconnect().await?;
            info!("Disconnected from {}", self.endpoint.addr());
        }

        self.close_local();
        Ok(())
    }

    /// Drop the socket without EXIT (device restarting, powering off...)
    pub async fn close(&mut self) -> Result<()> {
        if self.transport.is_connected() {
            self.transport.disconnect().await?;
        }

        self.close_local();
        Ok(())
    }

    fn close_local(&mut self) {
        self.session.close();
        self.inbox.clear();
    }

    /// Run one command and return the stripped reply (header + payload)
    pub async fn execute_cmd(&mut self, command: Command, payload: &[u8]) -> Result<Bytes> {
        if !self.transport.is_connected() {
            return Err(Error::SocketNotConnected);
        }

        let sequence = if command == Command::Connect {
            self.session.reset_for_connect()?;
            0
        } else {
            self.session.next_sequence()
        };

        let packet = Packet::with_payload(
            command,
            self.session.wire_session_id(),
            sequence,
            Bytes::copy_from_slice(payload),
        );
        trace!("Sending: {:?}", packet);

        let frame = packet.encode(self.framing());
        let reply = self.write(&frame, command.is_handshake()).await?;
        let reply = self.strip(reply);

        if command == Command::Connect && !reply.is_empty() {
            if reply.len() < SESSION_ID_OFFSET + 2 {
                return Err(zklink_core::Error::PacketTooShort {
                    expected: SESSION_ID_OFFSET + 2,
                    actual: reply.len(),
                }
                .into());
            }

            let session_id =
                u16::from_le_bytes([reply[SESSION_ID_OFFSET], reply[SESSION_ID_OFFSET + 1]]);
            self.session.establish(session_id)?;
        }

        Ok(reply)
    }

    /// Send an encoded frame and wait for the reply carrying its sequence
    ///
    /// Returns the reply frame as received (transport wrapper included).
    pub async fn write(&mut self, frame: &[u8], handshake: bool) -> Result<BytesMut> {
        if !self.transport.is_connected() {
            return Err(Error::SocketNotConnected);
        }

        let request = Header::decode(self.framing().strip(frame))?;
        self.discard_stale_frames();

        if let Err(e) = self.transport.send(frame).await {
            return Err(self.on_transport_error(e));
        }

        let wait = if handshake {
            self.options.handshake_timeout
        } else {
            self.endpoint.timeout
        };
        let deadline = Instant::now() + wait;

        loop {
            let reply = match self.read_frame(Wait::Until(deadline)).await {
                Ok(reply) => reply,
                Err(Error::Transport(zklink_transport::Error::ReadTimeout)) => {
                    return Err(Error::WriteTimeout {
                        command: request.command,
                        timeout: wait,
                    });
                }
                Err(e) => return Err(e),
            };

            let inner = self.framing().strip(&reply);
            let Ok(header) = Header::decode(inner) else {
                debug!(len = inner.len(), "Reply too short to correlate");
                return Ok(reply);
            };

            if header.command == u16::from(Command::RegEvent) {
                self.queue_event(header, inner);
                continue;
            }

            if header.sequence != request.sequence {
                debug!(
                    expected = request.sequence,
                    got = header.sequence,
                    "Skipping uncorrelated reply"
                );
                continue;
            }

            self.check_checksum(inner)?;
            trace!("Received: {}", zklink_core::command::describe(header.command));

            return Ok(reply);
        }
    }

    /// Pull a prepared buffer from the device
    ///
    /// `request` is the DATA_WRRQ payload (see [`crate::bulk::bulk_request`]).
    /// `progress` gets `(bytes_so_far, total)` after every completed chunk.
    pub async fn read_with_buffer<F>(&mut self, request: &[u8], mut progress: F) -> Result<BulkRead>
    where
        F: FnMut(usize, usize),
    {
        let reply = self.execute_cmd(Command::DataWrrq, request).await?;
        let header = Header::decode(&reply)?;

        match Command::try_from(header.command) {
            Ok(Command::Data) => {
                debug!(len = reply.len() - HEADER_SIZE, "Data returned inline");
                return Ok(BulkRead::complete(reply.slice(HEADER_SIZE..)));
            }
            Ok(Command::AckOk) | Ok(Command::PrepareData) => {}
            _ => return Err(Error::UnhandledCommand(header.command)),
        }

        if reply.len() < HEADER_SIZE + 5 {
            return Err(Error::InvalidResponse(format!(
                "prepared-data reply too short: {} bytes",
                reply.len()
            )));
        }

        let size = u32::from_le_bytes([
            reply[HEADER_SIZE + 1],
            reply[HEADER_SIZE + 2],
            reply[HEADER_SIZE + 3],
            reply[HEADER_SIZE + 4],
        ]);

        if size == 0 {
            return Ok(BulkRead::complete(Bytes::new()));
        }

        let plan = ChunkPlan::new(size, self.options.chunk_size_for(self.framing()));
        debug!(
            size,
            chunks = plan.packet_count(),
            chunk_size = plan.chunk_size(),
            "Starting chunked transfer"
        );

        for chunk in plan.chunks() {
            self.send_command(Command::DataRdy, &chunk.request_payload())
                .await?;
        }

        let mut transfer = ChunkedTransfer::new(plan);
        let total = transfer.total() as usize;
        let wait = Wait::Idle(self.options.stall_timeout);

        while !transfer.is_complete() {
            let frame = match self.read_frame(wait).await {
                Ok(frame) => frame,
                Err(Error::Transport(zklink_transport::Error::ReadTimeout)) => {
                    let remaining_chunks = transfer.remaining_chunks();
                    warn!(remaining_chunks, "Transfer stalled");
                    return Ok(transfer.finish(Some(Interruption::Stalled { remaining_chunks })));
                }
                Err(Error::Transport(zklink_transport::Error::ConnectionClosed)) => {
                    warn!("Connection closed during transfer");
                    return Ok(transfer.finish(Some(Interruption::ConnectionClosed)));
                }
                Err(e) => return Ok(Self::abort_transfer(transfer, e)),
            };

            match self.absorb_chunk_frame(&mut transfer, &frame) {
                Ok(Some(received)) => progress(received, total),
                Ok(None) => {}
                Err(e) => return Ok(Self::abort_transfer(transfer, e)),
            }
        }

        Ok(transfer.finish(None))
    }

    /// Wait for the next real-time event frame
    ///
    /// Events that arrived during earlier exchanges are returned first.
    /// `Ok(None)` when nothing arrives in time.
    pub async fn next_event(&mut self, timeout: Duration) -> Result<Option<EventFrame>> {
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }

        let wait = Wait::Until(Instant::now() + timeout);

        loop {
            let frame = match self.read_frame(wait).await {
                Ok(frame) => frame,
                Err(Error::Transport(zklink_transport::Error::ReadTimeout)) => return Ok(None),
                Err(e) => return Err(e),
            };

            let inner = self.framing().strip(&frame);
            let header = Header::decode(inner)?;

            if header.command == u16::from(Command::RegEvent) {
                return Ok(Some(EventFrame {
                    flags: header.session_id,
                    payload: Bytes::copy_from_slice(&inner[HEADER_SIZE..]),
                }));
            }

            debug!(
                "Ignoring {} while waiting for events",
                zklink_core::command::describe(header.command)
            );
        }
    }

    /// Feed one frame of a chunked transfer; bytes so far when a chunk completes
    fn absorb_chunk_frame(
        &mut self,
        transfer: &mut ChunkedTransfer,
        frame: &[u8],
    ) -> Result<Option<usize>> {
        let inner = self.framing().strip(frame);
        let header = Header::decode(inner)?;

        if header.command == u16::from(Command::RegEvent) {
            self.queue_event(header, inner);
            return Ok(None);
        }

        self.check_checksum(inner)?;
        transfer.push(&inner[HEADER_SIZE..])
    }

    /// End a transfer on a broken stream, keeping what was assembled
    fn abort_transfer(transfer: ChunkedTransfer, e: Error) -> BulkRead {
        warn!(
            remaining_chunks = transfer.remaining_chunks(),
            "Transfer aborted: {}", e
        );
        transfer.finish(Some(Interruption::Failed {
            reason: e.to_string(),
        }))
    }

    /// Send a command without waiting for its reply
    async fn send_command(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        let packet = Packet::with_payload(
            command,
            self.session.wire_session_id(),
            self.session.next_sequence(),
            Bytes::copy_from_slice(payload),
        );
        trace!("Sending: {:?}", packet);

        let frame = packet.encode(self.framing());
        if let Err(e) = self.transport.send(&frame).await {
            return Err(self.on_transport_error(e));
        }

        Ok(())
    }

    /// Next complete frame from the inbox, reading the socket as needed
    async fn read_frame(&mut self, wait: Wait) -> Result<BytesMut> {
        loop {
            match self.inbox.next_frame() {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(e) => {
                    warn!("Inbound stream out of sync: {}", e);
                    self.inbox.clear();
                    return Err(e.into());
                }
            }

            let budget = wait
                .budget()
                .ok_or(Error::Transport(zklink_transport::Error::ReadTimeout))?;

            match self.transport.receive(budget).await {
                Ok(data) => self.inbox.push(&data),
                Err(e) => return Err(self.on_transport_error(e)),
            }
        }
    }

    /// Throw away complete frames left over from earlier exchanges
    fn discard_stale_frames(&mut self) {
        let framing = self.framing();

        loop {
            let frame = match self.inbox.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    debug!("Discarding unsynchronised input: {}", e);
                    self.inbox.clear();
                    break;
                }
            };

            let inner = framing.strip(&frame);
            match Header::decode(inner) {
                Ok(header) if header.command == u16::from(Command::RegEvent) => {
                    self.queue_event(header, inner);
                }
                Ok(header) => debug!(
                    "Discarding stale {} (seq {})",
                    zklink_core::command::describe(header.command),
                    header.sequence
                ),
                Err(_) => debug!(len = inner.len(), "Discarding stale fragment"),
            }
        }
    }

    fn queue_event(&mut self, header: Header, inner: &[u8]) {
        if self.events.len() == MAX_QUEUED_EVENTS {
            debug!("Event queue full, dropping oldest event");
            self.events.pop_front();
        }

        debug!(flags = header.session_id, "Queued real-time event");
        self.events.push_back(EventFrame {
            flags: header.session_id,
            payload: Bytes::copy_from_slice(inner.get(HEADER_SIZE..).unwrap_or_default()),
        });
    }

    fn check_checksum(&self, inner: &[u8]) -> Result<()> {
        if self.options.checksum_policy == ChecksumPolicy::Ignore || checksum::verify(inner) {
            return Ok(());
        }

        let header = Header::decode(inner)?;
        let expected = checksum::compute(inner);

        match self.options.checksum_policy {
            ChecksumPolicy::Reject => Err(zklink_core::Error::ChecksumMismatch {
                expected,
                received: header.checksum,
            }
            .into()),
            _ => {
                warn!(
                    "Checksum mismatch on {}: expected 0x{:04X}, received 0x{:04X}",
                    zklink_core::command::describe(header.command),
                    expected,
                    header.checksum
                );
                Ok(())
            }
        }
    }

    /// Keep the session state in line with a transport failure
    fn on_transport_error(&mut self, e: zklink_transport::Error) -> Error {
        if e.is_disconnect() && !self.transport.is_connected() {
            debug!("Socket to {} is gone", self.endpoint.addr());
            self.close_local();
        }

        Error::Transport(e)
    }

    /// Remove the transport wrapper from a received frame
    fn strip(&self, frame: BytesMut) -> Bytes {
        let inner_len = self.framing().strip(&frame).len();
        let frame = frame.freeze();
        frame.slice(frame.len() - inner_len..)
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("endpoint", &self.endpoint)
            .field("state", &self.session.state())
            .field("session_id", &self.session.session_id())
            .field("sequence", &self.session.sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bulk::{attendance_request, users_request};
    use crate::testing::{chunk_replies, Reply, SimDevice, SESSION_ID};

    fn options() -> SessionOptions {
        SessionOptions::default()
            .with_handshake_timeout(Duration::from_millis(500))
            .with_stall_timeout(Duration::from_millis(300))
    }

    async fn connected(device: &SimDevice, options: SessionOptions) -> DeviceSession {
        let endpoint = device.endpoint().with_timeout(Duration::from_millis(500));
        let mut session = DeviceSession::new(endpoint, options);
        session.open().await.unwrap();
        session.connect().await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_connect_assigns_session_id() {
        let device = SimDevice::tcp(|req, _| vec![Reply::ack(req)]).await;
        let mut session = connected(&device, options()).await;

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.session_id(), Some(SESSION_ID));
        assert!(session.is_connected());

        // CONNECT went out with session 0, sequence 0
        let connect = &device.received()[0];
        assert_eq!(connect.command, u16::from(Command::Connect));
        assert_eq!(connect.session_id, 0);
        assert_eq!(connect.sequence, 0);

        // Later commands carry the assigned id and an advancing sequence
        session.execute_cmd(Command::GetTime, &[]).await.unwrap();
        session.execute_cmd(Command::GetTime, &[]).await.unwrap();
        let received = device.received();
        assert_eq!(received[1].session_id, SESSION_ID);
        assert_eq!(received[1].sequence, 1);
        assert_eq!(received[2].sequence, 2);

        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(device.commands().last(), Some(&u16::from(Command::Exit)));
    }

    #[tokio::test]
    async fn test_session_view_is_read_only() {
        let device = SimDevice::tcp(|req, _| vec![Reply::ack(req)]).await;
        let mut session = connected(&device, options()).await;

        let view = session.session();
        assert_eq!(view.session_id(), Some(SESSION_ID));
        assert_eq!(view.sequence(), 0);

        for _ in 0..3 {
            session.execute_cmd(Command::GetTime, &[]).await.unwrap();
        }
        assert_eq!(session.sequence(), 3);
        assert_eq!(session.session().wire_session_id(), SESSION_ID);

        let wire: Vec<_> = device
            .received()
            .iter()
            .skip(1)
            .map(|p| (p.session_id, p.sequence))
            .collect();
        assert_eq!(
            wire,
            vec![(SESSION_ID, 1), (SESSION_ID, 2), (SESSION_ID, 3)]
        );
    }

    #[tokio::test]
    async fn test_timeout_fixed_while_open() {
        let device = SimDevice::tcp(|req, _| vec![Reply::ack(req)]).await;
        let mut session = DeviceSession::new(device.endpoint(), options());

        session.set_timeout(Duration::from_millis(750)).unwrap();
        assert_eq!(session.endpoint().timeout, Duration::from_millis(750));

        session.open().await.unwrap();
        session.connect().await.unwrap();
        assert!(session.set_timeout(Duration::from_secs(9)).is_err());
        assert_eq!(session.endpoint().timeout, Duration::from_millis(750));

        session.disconnect().await.unwrap();
        session.set_timeout(Duration::from_secs(9)).unwrap();
    }

    #[tokio::test]
    async fn test_execute_on_closed_socket() {
        let device = SimDevice::tcp(|req, _| vec![Reply::ack(req)]).await;
        let mut session = DeviceSession::new(device.endpoint(), options());

        assert!(matches!(
            session.execute_cmd(Command::GetTime, &[]).await,
            Err(Error::SocketNotConnected)
        ));
    }

    #[tokio::test]
    async fn test_no_reply_on_connect() {
        let device = SimDevice::tcp(|_, _| vec![Reply::Raw(vec![0x50, 0x50, 0x82, 0x7D, 0, 0, 0, 0])]).await;
        let mut session = DeviceSession::new(device.endpoint(), options());
        session.open().await.unwrap();

        assert!(matches!(session.connect().await, Err(Error::NoReplyOnConnect)));
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_write_timeout() {
        let device = SimDevice::tcp(|req, _| match req.command() {
            Ok(Command::GetTime) => vec![],
            _ => vec![Reply::ack(req)],
        })
        .await;
        let mut session = connected(&device, options()).await;

        let err = session.execute_cmd(Command::GetTime, &[]).await.unwrap_err();
        assert!(
            matches!(err, Error::WriteTimeout { command: 201, .. }),
            "got {err:?}"
        );
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_stale_and_event_frames_are_skipped() {
        let device = SimDevice::tcp(|req, _| match req.command() {
            Ok(Command::GetTime) => vec![
                // Late reply to an earlier exchange
                Reply::packet(Command::AckOk, SESSION_ID, req.sequence.wrapping_sub(1), vec![]),
                Reply::packet(Command::RegEvent, 1, 0, vec![0xAB; 52]),
                Reply::ack_with(req, 42u32.to_le_bytes().to_vec()),
            ],
            _ => vec![Reply::ack(req)],
        })
        .await;
        let mut session = connected(&device, options()).await;

        let reply = session.execute_cmd(Command::GetTime, &[]).await.unwrap();
        assert_eq!(&reply[8..], &42u32.to_le_bytes());

        let event = session.next_event(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(event.flags, 1);
        assert_eq!(event.payload.len(), 52);
        assert!(session.next_event(Duration::from_millis(50)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checksum_reject() {
        let device = SimDevice::tcp(|req, framing| match req.command() {
            Ok(Command::GetTime) => {
                let mut frame = Packet::new(Command::AckOk, SESSION_ID, req.sequence).encode(framing);
                let at = framing.wrapper_len() + 2;
                frame[at] ^= 0xFF;
                vec![Reply::Raw(frame.to_vec())]
            }
            _ => vec![Reply::ack(req)],
        })
        .await;

        let mut session = connected(
            &device,
            options().with_checksum_policy(ChecksumPolicy::Reject),
        )
        .await;

        assert!(matches!(
            session.execute_cmd(Command::GetTime, &[]).await,
            Err(Error::Core(zklink_core::Error::ChecksumMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_data_reply_short_circuits() {
        let device = SimDevice::tcp(|req, _| match req.command() {
            Ok(Command::DataWrrq) => vec![Reply::reply(req, Command::Data, b"inline".to_vec())],
            _ => vec![Reply::ack(req)],
        })
        .await;
        let mut session = connected(&device, options()).await;

        let read = session
            .read_with_buffer(&attendance_request(), |_, _| {})
            .await
            .unwrap();

        assert!(read.is_complete());
        assert_eq!(read.payload, Bytes::from_static(b"inline"));
        assert!(!device.commands().contains(&u16::from(Command::DataRdy)));

        // The request was the byte-exact attendance request
        let wrrq = device
            .received()
            .into_iter()
            .find(|p| p.command == u16::from(Command::DataWrrq))
            .unwrap();
        assert_eq!(&wrrq.payload[..], &attendance_request());
    }

    #[tokio::test]
    async fn test_multi_chunk_reassembly_with_split_reads() {
        let data: Vec<u8> = (0..40u8).collect();
        let served = data.clone();

        let device = SimDevice::tcp(move |req, framing| match req.command() {
            Ok(Command::DataWrrq) => vec![Reply::prepared(req, served.len() as u32)],
            Ok(Command::DataRdy) => {
                // Dribble every chunk out a few bytes at a time
                let bytes = chunk_replies(req, &served, framing);
                bytes
                    .chunks(5)
                    .flat_map(|piece| [Reply::Raw(piece.to_vec()), Reply::Pause(Duration::from_millis(2))])
                    .collect()
            }
            _ => vec![Reply::ack(req)],
        })
        .await;

        let mut session = connected(&device, options().with_chunk_size(16)).await;

        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = progress.clone();
        let read = session
            .read_with_buffer(&users_request(), move |done, total| seen.lock().push((done, total)))
            .await
            .unwrap();

        assert!(read.is_complete());
        assert_eq!(read.total_size, 40);
        assert_eq!(&read.payload[..], &data[..]);
        assert_eq!(*progress.lock(), vec![(16, 40), (32, 40), (40, 40)]);

        // Requests: [0,16] [16,16] [32,8]
        let requests: Vec<_> = device
            .received()
            .into_iter()
            .filter(|p| p.command == u16::from(Command::DataRdy))
            .map(|p| p.payload.to_vec())
            .collect();
        assert_eq!(
            requests,
            vec![
                [0u32.to_le_bytes(), 16u32.to_le_bytes()].concat(),
                [16u32.to_le_bytes(), 16u32.to_le_bytes()].concat(),
                [32u32.to_le_bytes(), 8u32.to_le_bytes()].concat(),
            ]
        );
    }

    #[tokio::test]
    async fn test_chunks_are_placed_in_arrival_order() {
        let served: Vec<u8> = [[1u8; 8], [2u8; 8], [3u8; 8]].concat();
        let pending = Arc::new(Mutex::new(Vec::new()));

        let device = SimDevice::tcp(move |req, framing| match req.command() {
            Ok(Command::DataWrrq) => vec![Reply::prepared_as(req, Command::PrepareData, served.len() as u32)],
            Ok(Command::DataRdy) => {
                // Hold every chunk until the last request, then answer backwards
                let mut held = pending.lock();
                held.push(chunk_replies(req, &served, framing));
                if held.len() < 3 {
                    return vec![];
                }
                held.drain(..).rev().map(Reply::Raw).collect()
            }
            _ => vec![Reply::ack(req)],
        })
        .await;

        let mut session = connected(&device, options().with_chunk_size(8)).await;
        let read = session
            .read_with_buffer(&attendance_request(), |_, _| {})
            .await
            .unwrap();

        assert!(read.is_complete());
        assert_eq!(&read.payload[..], &[[3u8; 8], [2u8; 8], [1u8; 8]].concat()[..]);
    }

    #[tokio::test]
    async fn test_stall_returns_partial_payload() {
        let served: Vec<u8> = (0..24u8).collect();

        let device = SimDevice::tcp(move |req, framing| match req.command() {
            Ok(Command::DataWrrq) => vec![Reply::prepared(req, served.len() as u32)],
            Ok(Command::DataRdy) if chunk_offset(req) == 0 => {
                vec![Reply::Raw(chunk_replies(req, &served, framing))]
            }
            Ok(Command::DataRdy) => vec![],
            _ => vec![Reply::ack(req)],
        })
        .await;

        let mut session = connected(&device, options().with_chunk_size(8)).await;

        let started = Instant::now();
        let read = session
            .read_with_buffer(&attendance_request(), |_, _| {})
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(read.interruption, Some(Interruption::Stalled { remaining_chunks: 2 }));
        assert_eq!(&read.payload[..], &(0..8u8).collect::<Vec<_>>()[..]);
        assert!(matches!(
            read.into_result(),
            Err(Error::TransferStalled { remaining_chunks: 2, .. })
        ));

        // The session survives a stall
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_overrun_returns_partial_payload() {
        let served: Vec<u8> = (0..24u8).collect();

        let device = SimDevice::tcp(move |req, framing| match req.command() {
            Ok(Command::DataWrrq) => vec![Reply::prepared(req, served.len() as u32)],
            Ok(Command::DataRdy) if chunk_offset(req) == 0 => {
                vec![Reply::Raw(chunk_replies(req, &served, framing))]
            }
            Ok(Command::DataRdy) if chunk_offset(req) == 8 => {
                let mut announcement = 8u32.to_le_bytes().to_vec();
                announcement.extend_from_slice(&[0; 4]);
                vec![
                    Reply::reply(req, Command::PrepareData, announcement),
                    // Four bytes more than announced
                    Reply::reply(req, Command::Data, vec![0xEE; 12]),
                ]
            }
            Ok(Command::DataRdy) => vec![],
            _ => vec![Reply::ack(req)],
        })
        .await;

        let mut session = connected(&device, options().with_chunk_size(8)).await;

        let mut progress = Vec::new();
        let read = session
            .read_with_buffer(&attendance_request(), |done, total| progress.push((done, total)))
            .await
            .unwrap();

        assert_eq!(progress, vec![(8, 24)]);
        assert_eq!(&read.payload[..], &(0..8u8).collect::<Vec<_>>()[..]);
        assert!(matches!(
            &read.interruption,
            Some(Interruption::Failed { reason }) if reason.contains("overrun")
        ));

        let err = read.into_result().unwrap_err();
        assert!(matches!(&err, Error::TransferFailed { partial, .. } if partial.len() == 8));
        assert!(err.requires_reconnect());
    }

    #[tokio::test]
    async fn test_peer_close_returns_partial_payload() {
        let served: Vec<u8> = (0..24u8).collect();

        let device = SimDevice::tcp(move |req, framing| match req.command() {
            Ok(Command::DataWrrq) => vec![Reply::prepared(req, served.len() as u32)],
            Ok(Command::DataRdy) if chunk_offset(req) == 0 => vec![
                Reply::Raw(chunk_replies(req, &served, framing)),
                Reply::Pause(Duration::from_millis(20)),
                Reply::Close,
            ],
            Ok(Command::DataRdy) => vec![],
            _ => vec![Reply::ack(req)],
        })
        .await;

        let mut session = connected(&device, options().with_chunk_size(8)).await;
        let read = session
            .read_with_buffer(&attendance_request(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(read.interruption, Some(Interruption::ConnectionClosed));
        assert_eq!(read.payload.len(), 8);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.execute_cmd(Command::GetTime, &[]).await,
            Err(Error::SocketNotConnected)
        ));
    }

    #[tokio::test]
    async fn test_unhandled_reply_command() {
        for code in [2001u16, 4242] {
            let device = SimDevice::tcp(move |req, _| match req.command() {
                Ok(Command::DataWrrq) => vec![Reply::packet(code, SESSION_ID, req.sequence, vec![])],
                _ => vec![Reply::ack(req)],
            })
            .await;

            let mut session = connected(&device, options()).await;
            let err = session
                .read_with_buffer(&users_request(), |_, _| {})
                .await
                .unwrap_err();

            assert!(
                matches!(err, Error::UnhandledCommand(c) if c == code),
                "got {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_empty_prepared_buffer() {
        let device = SimDevice::tcp(|req, _| match req.command() {
            Ok(Command::DataWrrq) => vec![Reply::prepared(req, 0)],
            _ => vec![Reply::ack(req)],
        })
        .await;

        let mut session = connected(&device, options()).await;
        let read = session
            .read_with_buffer(&users_request(), |_, _| {})
            .await
            .unwrap();

        assert!(read.is_complete());
        assert!(read.payload.is_empty());
        assert!(!device.commands().contains(&u16::from(Command::DataRdy)));
    }

    #[tokio::test]
    async fn test_udp_bulk_read() {
        let served: Vec<u8> = (0..20u8).collect();
        let expected = served.clone();

        let device = SimDevice::udp(move |req, _| match req.command() {
            Ok(Command::DataWrrq) => vec![Reply::prepared(req, served.len() as u32)],
            Ok(Command::DataRdy) => {
                let (offset, len) = chunk_request(req);
                vec![
                    Reply::reply(req, Command::PrepareData, [len.to_le_bytes(), [0; 4]].concat()),
                    Reply::reply(
                        req,
                        Command::Data,
                        served[offset as usize..(offset + len) as usize].to_vec(),
                    ),
                    Reply::ack(req),
                ]
            }
            _ => vec![Reply::ack(req)],
        })
        .await;

        let mut session = connected(&device, options().with_chunk_size(8)).await;
        assert_eq!(session.framing(), Framing::Datagram);

        let read = session
            .read_with_buffer(&users_request(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(&read.payload[..], &expected[..]);

        session.disconnect().await.unwrap();
    }

    fn chunk_request(req: &Packet) -> (u32, u32) {
        let offset = u32::from_le_bytes([req.payload[0], req.payload[1], req.payload[2], req.payload[3]]);
        let len = u32::from_le_bytes([req.payload[4], req.payload[5], req.payload[6], req.payload[7]]);
        (offset, len)
    }

    fn chunk_offset(req: &Packet) -> u32 {
        chunk_request(req).0
    }
}
