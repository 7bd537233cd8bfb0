//! Chunk planning for prepared-data transfers
//!
//! Once the device has prepared `total` bytes, the client pulls them with
//! one CMD_DATA_RDY per chunk: `total / chunk_size` full chunks followed by
//! one short chunk for the remainder, if any.

use byteorder::{ByteOrder, LittleEndian};

/// A single `[offset, length)` slice of a prepared buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u32,
    pub length: u32,
}

impl Chunk {
    /// CMD_DATA_RDY payload: `[offset u32 LE][length u32 LE]`
    pub fn request_payload(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        LittleEndian::write_u32(&mut buf[0..4], self.offset);
        LittleEndian::write_u32(&mut buf[4..8], self.length);
        buf
    }
}

/// Partition of a prepared buffer into chunk requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total: u32,
    chunk_size: u32,
}

impl ChunkPlan {
    /// A zero chunk size is bumped to 1 so the plan is always finite
    pub fn new(total: u32, chunk_size: u32) -> Self {
        Self {
            total,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Number of chunks of exactly `chunk_size` bytes
    pub fn full_chunks(&self) -> u32 {
        self.total / self.chunk_size
    }

    /// Size of the trailing short chunk (0 when there is none)
    pub fn remainder(&self) -> u32 {
        self.total % self.chunk_size
    }

    /// Total number of chunk requests
    pub fn packet_count(&self) -> u32 {
        self.full_chunks() + u32::from(self.remainder() > 0)
    }

    /// Chunks in offset order
    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        let full = (0..self.full_chunks()).map(move |i| Chunk {
            offset: i * self.chunk_size,
            length: self.chunk_size,
        });

        let tail = (self.remainder() > 0).then(|| Chunk {
            offset: self.full_chunks() * self.chunk_size,
            length: self.remainder(),
        });

        full.chain(tail)
    }

    /// Expected data length of the `index`-th chunk
    pub fn chunk_len(&self, index: u32) -> Option<u32> {
        if index < self.full_chunks() {
            Some(self.chunk_size)
        } else if index == self.full_chunks() && self.remainder() > 0 {
            Some(self.remainder())
        } else {
            None
        }
    }
}
