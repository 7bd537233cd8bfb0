//! Reassembly of wire frames from partial reads
//!
//! A TCP read can return half a frame, exactly one frame, or several frames
//! glued together. [`FrameAssembler`] buffers whatever arrives and hands out
//! complete frames (wrapper included) in arrival order. On UDP every
//! datagram already is one frame.

use std::collections::VecDeque;

use bytes::BytesMut;
use tracing::trace;

use crate::{
    constants::{MAX_FRAME_LEN, STREAM_WRAPPER_SIZE},
    error::{Error, Result},
    packet::{stream_length, Framing},
};

/// Buffers inbound bytes and yields complete frames
#[derive(Debug)]
pub struct FrameAssembler {
    framing: Framing,
    buffer: BytesMut,
    datagrams: VecDeque<BytesMut>,
}

impl FrameAssembler {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: BytesMut::new(),
            datagrams: VecDeque::new(),
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Feed the bytes of one read (or one datagram)
    pub fn push(&mut self, data: &[u8]) {
        match self.framing {
            Framing::Stream => self.buffer.extend_from_slice(data),
            Framing::Datagram => self.datagrams.push_back(BytesMut::from(data)),
        }
    }

    /// Take the next complete frame, if one is buffered
    ///
    /// Errors mean the stream is out of sync; the buffer is left untouched
    /// and should be discarded with [`FrameAssembler::clear`].
    pub fn next_frame(&mut self) -> Result<Option<BytesMut>> {
        match self.framing {
            Framing::Datagram => Ok(self.datagrams.pop_front()),
            Framing::Stream => {
                if self.buffer.len() < STREAM_WRAPPER_SIZE {
                    return Ok(None);
                }

                let length = stream_length(&self.buffer)?;
                if length > MAX_FRAME_LEN {
                    return Err(Error::FrameTooLarge {
                        size: length,
                        max: MAX_FRAME_LEN,
                    });
                }

                let total = STREAM_WRAPPER_SIZE + length;
                if self.buffer.len() < total {
                    trace!(have = self.buffer.len(), need = total, "Partial frame buffered");
                    return Ok(None);
                }

                Ok(Some(self.buffer.split_to(total)))
            }
        }
    }

    /// Bytes (or datagrams' bytes) still waiting to form frames
    pub fn pending(&self) -> usize {
        self.buffer.len() + self.datagrams.iter().map(|d| d.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.datagrams.clear();
    }
}
