//! Fixed-stride record buffers
//!
//! A bulk read returns `[total size u32 LE][record][record]...`. Records are
//! sliced at a fixed stride; a trailing partial record is ignored.

use crate::error::Result;

/// Bytes of the size prefix at the start of every bulk buffer
pub const SIZE_PREFIX_LEN: usize = 4;

/// A record with a fixed on-device layout
pub trait Record: Sized {
    /// Record stride in bytes
    const SIZE: usize;

    /// Decode one record from the first `SIZE` bytes of `bytes`
    fn decode(bytes: &[u8]) -> Result<Self>;
}

/// Whole records of `stride` bytes, after the size prefix
pub fn split(buffer: &[u8], stride: usize) -> impl Iterator<Item = &[u8]> {
    buffer
        .get(SIZE_PREFIX_LEN..)
        .unwrap_or_default()
        .chunks_exact(stride.max(1))
}

/// Decode every whole record in a bulk buffer
pub fn decode_all<R: Record>(buffer: &[u8]) -> Result<Vec<R>> {
    split(buffer, R::SIZE).map(R::decode).collect()
}

/// ASCII field: cut at the first NUL, lossy UTF-8, trimmed
pub(crate) fn read_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}

/// Copy `value` into a NUL-padded field, truncating to the field width
pub(crate) fn write_str(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
    field[len..].fill(0);
}
