//! Record decoding errors

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{record} record too short: expected {expected} bytes, got {actual}")]
    RecordTooShort {
        record: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl Error {
    pub(crate) fn too_short(record: &'static str, expected: usize, actual: usize) -> Self {
        Self::RecordTooShort {
            record,
            expected,
            actual,
        }
    }
}
