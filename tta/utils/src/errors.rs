//! Errors shared by the scheduler crates.
use thiserror::Error;

/// A type alias for a result with an [Error] as the error type.
pub type TtaResult<T> = Result<T, Error>;

/// Errors raised by the resource model and the scheduler core.
///
/// Running out of candidate resources during a search is *not* an error; the
/// brokers and the assignment plan report that through ordinary return
/// values. The variants here cover malformed input data and violations of
/// the assign/unassign bookkeeping contract, which must abort a scheduling
/// run instead of being retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The request or the program state it refers to is malformed.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The assign/unassign pairing contract or the broker sequencing
    /// contract was violated by the caller. Indicates a scheduler bug, not
    /// a property of the input program.
    #[error("internal scheduling error: {0}")]
    Internal(String),

    /// A named operation, resource or machine part does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An index or cycle is outside the valid range.
    #[error("out of range: {0}")]
    OutOfRange(String),
}

impl Error {
    pub fn invalid_data<S: ToString>(msg: S) -> Self {
        Self::InvalidData(msg.to_string())
    }

    pub fn internal<S: ToString>(msg: S) -> Self {
        Self::Internal(msg.to_string())
    }

    pub fn not_found<S: ToString>(msg: S) -> Self {
        Self::NotFound(msg.to_string())
    }

    pub fn out_of_range<S: ToString>(msg: S) -> Self {
        Self::OutOfRange(msg.to_string())
    }
}
