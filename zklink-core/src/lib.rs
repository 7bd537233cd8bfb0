//! # zklink-core
//!
//! Core protocol implementation for ZKTeco-class terminals.
//!
//! This crate provides the low-level protocol primitives:
//! - Packet structure and encoding/decoding
//! - Checksum calculation
//! - Command definitions
//! - Frame reassembly for stream transports
//! - Chunk planning for bulk transfers
//! - Session state and sequence numbering

pub mod checksum;
pub mod chunk;
pub mod command;
pub mod constants;
pub mod error;
pub mod frame;
pub mod packet;
pub mod session;

pub use chunk::{Chunk, ChunkPlan};
pub use command::Command;
pub use constants::EventFlags;
pub use error::{Error, Result};
pub use frame::FrameAssembler;
pub use packet::{Framing, Header, Packet};
pub use session::{Session, SessionState};

/// Default device port
pub const DEFAULT_PORT: u16 = 4370;

/// Packet header size
pub const HEADER_SIZE: usize = 8;
