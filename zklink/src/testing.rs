//! Simulated device for tests
//!
//! Listens on loopback, decodes every inbound frame with the real codec,
//! records it, and lets a handler decide what goes back on the wire.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use zklink_core::{Command, FrameAssembler, Framing, Packet};

use crate::config::Endpoint;

/// Session id the simulated device hands out
pub(crate) const SESSION_ID: u16 = 0x1234;

/// One step of a simulated response
pub(crate) enum Reply {
    /// Encoded with the connection's framing
    Packet(Packet),
    /// Written verbatim (one datagram on UDP)
    Raw(Vec<u8>),
    /// Wait before the next step, forcing separate reads
    Pause(Duration),
    /// Drop the connection
    Close,
}

impl Reply {
    pub(crate) fn packet(
        command: impl Into<u16>,
        session_id: u16,
        sequence: u16,
        payload: Vec<u8>,
    ) -> Self {
        Self::Packet(Packet::with_payload(command, session_id, sequence, payload))
    }

    /// Reply with `command`, echoing the request's sequence
    pub(crate) fn reply(req: &Packet, command: Command, payload: Vec<u8>) -> Self {
        Self::packet(command, SESSION_ID, req.sequence, payload)
    }

    pub(crate) fn ack(req: &Packet) -> Self {
        Self::ack_with(req, Vec::new())
    }

    pub(crate) fn ack_with(req: &Packet, payload: Vec<u8>) -> Self {
        Self::reply(req, Command::AckOk, payload)
    }

    /// Prepared-data announcement: size at payload offset 1
    pub(crate) fn prepared_as(req: &Packet, command: Command, size: u32) -> Self {
        let mut payload = vec![0u8];
        payload.extend_from_slice(&size.to_le_bytes());
        payload.extend_from_slice(&[0; 3]);
        Self::reply(req, command, payload)
    }

    pub(crate) fn prepared(req: &Packet, size: u32) -> Self {
        Self::prepared_as(req, Command::AckOk, size)
    }
}

/// Wire bytes answering one DATA_RDY: announcement, data, ACK_OK
pub(crate) fn chunk_replies(req: &Packet, buffer: &[u8], framing: Framing) -> Vec<u8> {
    let word = |at: usize| {
        u32::from_le_bytes([req.payload[at], req.payload[at + 1], req.payload[at + 2], req.payload[at + 3]])
            as usize
    };
    let (offset, len) = (word(0), word(4));

    let mut announcement = (len as u32).to_le_bytes().to_vec();
    announcement.extend_from_slice(&[0; 4]);

    let mut out = Vec::new();
    for packet in [
        Packet::with_payload(Command::PrepareData, SESSION_ID, req.sequence, announcement),
        Packet::with_payload(Command::Data, SESSION_ID, req.sequence, buffer[offset..offset + len].to_vec()),
        Packet::new(Command::AckOk, SESSION_ID, req.sequence),
    ] {
        out.extend_from_slice(&packet.encode(framing));
    }
    out
}

type Handler = Box<dyn FnMut(&Packet, Framing) -> Vec<Reply> + Send>;

/// A device on a loopback socket
pub(crate) struct SimDevice {
    addr: SocketAddr,
    framing: Framing,
    received: Arc<Mutex<Vec<Packet>>>,
    task: JoinHandle<()>,
}

impl SimDevice {
    /// TCP device; accepts connections one after another
    pub(crate) async fn tcp<H>(handler: H) -> Self
    where
        H: FnMut(&Packet, Framing) -> Vec<Reply> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        let mut handler: Handler = Box::new(handler);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                serve_stream(stream, &mut handler, &log).await;
            }
        });

        Self {
            addr,
            framing: Framing::Stream,
            received,
            task,
        }
    }

    /// UDP device answering whoever sent the last datagram
    pub(crate) async fn udp<H>(handler: H) -> Self
    where
        H: FnMut(&Packet, Framing) -> Vec<Reply> + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        let mut handler: Handler = Box::new(handler);
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 65535];
            'serve: while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
                let Ok(request) = Packet::decode(&buf[..n]) else {
                    continue;
                };
                log.lock().push(request.clone());

                for reply in handler(&request, Framing::Datagram) {
                    let sent = match reply {
                        Reply::Packet(packet) => socket.send_to(&packet.encode(Framing::Datagram), peer).await,
                        Reply::Raw(bytes) => socket.send_to(&bytes, peer).await,
                        Reply::Pause(pause) => {
                            tokio::time::sleep(pause).await;
                            continue;
                        }
                        Reply::Close => break 'serve,
                    };
                    if sent.is_err() {
                        break 'serve;
                    }
                }
            }
        });

        Self {
            addr,
            framing: Framing::Datagram,
            received,
            task,
        }
    }

    pub(crate) fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Endpoint pointing at this device
    pub(crate) fn endpoint(&self) -> Endpoint {
        match self.framing {
            Framing::Stream => Endpoint::new("127.0.0.1", self.port()),
            Framing::Datagram => Endpoint::udp("127.0.0.1", self.port()),
        }
    }

    /// Every packet received so far
    pub(crate) fn received(&self) -> Vec<Packet> {
        self.received.lock().clone()
    }

    pub(crate) fn commands(&self) -> Vec<u16> {
        self.received.lock().iter().map(|p| p.command).collect()
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_stream(mut stream: TcpStream, handler: &mut Handler, log: &Mutex<Vec<Packet>>) {
    let mut inbox = FrameAssembler::new(Framing::Stream);
    let mut buf = vec![0u8; 65535];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        inbox.push(&buf[..n]);

        while let Ok(Some(frame)) = inbox.next_frame() {
            let Ok(request) = Packet::decode(Framing::Stream.strip(&frame)) else {
                continue;
            };
            log.lock().push(request.clone());

            for reply in handler(&request, Framing::Stream) {
                let written = match reply {
                    Reply::Packet(packet) => stream.write_all(&packet.encode(Framing::Stream)).await,
                    Reply::Raw(bytes) => stream.write_all(&bytes).await,
                    Reply::Pause(pause) => {
                        tokio::time::sleep(pause).await;
                        continue;
                    }
                    Reply::Close => return,
                };
                if written.is_err() {
                    return;
                }
            }
        }
    }
}
