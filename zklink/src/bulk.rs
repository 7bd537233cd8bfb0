//! Chunked bulk transfers
//!
//! A bulk read starts with CMD_DATA_WRRQ. Small results come back at once
//! in a CMD_DATA reply. Otherwise the device announces the prepared size
//! and the client requests every chunk with CMD_DATA_RDY. Per chunk the
//! device answers with a PREPARE_DATA announcement (8 payload bytes), the
//! chunk data in one or more DATA frames, then an ACK_OK.
//!
//! Frame payloads are accumulated per chunk; a chunk is complete once the
//! accumulator holds the announcement plus exactly the expected data length.
//! Replies carry no offset, so chunks are appended in arrival order.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;
use zklink_core::constants::{data_types, CHUNK_PREAMBLE_SIZE};
use zklink_core::{ChunkPlan, Command};

use crate::error::{Error, Result};

/// Size of a DATA_WRRQ request payload
pub const REQUEST_SIZE: usize = 11;

/// Upper bound on the buffer reserved up front for an announced size
const MAX_PREALLOC: usize = 16 * 1024 * 1024;

/// Build a DATA_WRRQ payload: `[0x01][command u16][fct u32][ext u32]`
pub fn bulk_request(command: Command, fct: u32) -> [u8; REQUEST_SIZE] {
    let mut buf = [0u8; REQUEST_SIZE];
    buf[0] = 1;
    buf[1..3].copy_from_slice(&u16::from(command).to_le_bytes());
    buf[3..7].copy_from_slice(&fct.to_le_bytes());
    buf
}

/// Request for the user table
pub fn users_request() -> [u8; REQUEST_SIZE] {
    bulk_request(Command::UserTempRrq, data_types::FCT_USER)
}

/// Request for the attendance log
pub fn attendance_request() -> [u8; REQUEST_SIZE] {
    bulk_request(Command::AttLogRrq, 0)
}

/// Why a transfer ended before every chunk arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interruption {
    /// Nothing arrived within the stall timeout
    Stalled { remaining_chunks: u32 },

    /// The device closed the connection
    ConnectionClosed,

    /// The stream broke: desync, overrun, rejected checksum or I/O error
    Failed { reason: String },
}

/// Outcome of a bulk read
///
/// An interrupted transfer still hands back the bytes that did arrive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRead {
    pub payload: Bytes,
    /// Size announced by the device
    pub total_size: u32,
    pub interruption: Option<Interruption>,
}

impl BulkRead {
    pub(crate) fn complete(payload: Bytes) -> Self {
        Self {
            total_size: payload.len() as u32,
            payload,
            interruption: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.interruption.is_none()
    }

    /// Turn an interrupted transfer into an error carrying the partial bytes
    pub fn into_result(self) -> Result<Bytes> {
        match self.interruption {
            None => Ok(self.payload),
            Some(Interruption::Stalled { remaining_chunks }) => Err(Error::TransferStalled {
                partial: self.payload,
                remaining_chunks,
            }),
            Some(Interruption::ConnectionClosed) => Err(Error::ConnectionClosedDuringTransfer {
                partial: self.payload,
            }),
            Some(Interruption::Failed { reason }) => Err(Error::TransferFailed {
                partial: self.payload,
                reason,
            }),
        }
    }
}

/// Reassembly state of one chunked transfer
#[derive(Debug)]
pub(crate) struct ChunkedTransfer {
    plan: ChunkPlan,
    next_chunk: u32,
    accumulator: BytesMut,
    payload: BytesMut,
}

impl ChunkedTransfer {
    pub(crate) fn new(plan: ChunkPlan) -> Self {
        Self {
            plan,
            next_chunk: 0,
            accumulator: BytesMut::new(),
            payload: BytesMut::with_capacity((plan.total() as usize).min(MAX_PREALLOC)),
        }
    }

    pub(crate) fn total(&self) -> u32 {
        self.plan.total()
    }

    pub(crate) fn remaining_chunks(&self) -> u32 {
        self.plan.packet_count() - self.next_chunk
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.remaining_chunks() == 0
    }

    /// Feed one frame payload; returns the bytes collected so far whenever
    /// a chunk completes
    pub(crate) fn push(&mut self, data: &[u8]) -> Result<Option<usize>> {
        let Some(chunk_len) = self.plan.chunk_len(self.next_chunk) else {
            if !data.is_empty() {
                debug!(len = data.len(), "Ignoring data after the last chunk");
            }
            return Ok(None);
        };

        let expected = chunk_len as usize + CHUNK_PREAMBLE_SIZE;
        self.accumulator.put_slice(data);

        if self.accumulator.len() > expected {
            return Err(Error::ChunkOverrun {
                expected,
                actual: self.accumulator.len(),
            });
        }

        if self.accumulator.len() < expected {
            return Ok(None);
        }

        self.payload.put_slice(&self.accumulator[CHUNK_PREAMBLE_SIZE..]);
        self.accumulator.clear();
        self.next_chunk += 1;

        debug!(
            chunk = self.next_chunk,
            of = self.plan.packet_count(),
            received = self.payload.len(),
            "Chunk complete"
        );

        Ok(Some(self.payload.len()))
    }

    pub(crate) fn finish(self, interruption: Option<Interruption>) -> BulkRead {
        BulkRead {
            payload: self.payload.freeze(),
            total_size: self.plan.total(),
            interruption,
        }
    }
}
