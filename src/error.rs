/*!
error module defines the error types used by the view-store service.
*/
use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::{error::Error, fmt, io};

/// Error kinds surfaced by the view store, registry, and wire protocol.
///
/// Follows the teacher crate's `ParserError` pattern: a flat enum with a
/// manual `Display`/`Error` implementation rather than `thiserror`, plus
/// targeted `From` conversions for the underlying library errors the codec
/// and FSM need.
#[derive(Debug)]
pub enum ViewStoreError {
    /// Parse error: malformed address, prefix, or wire frame. The offending
    /// frame is dropped; see [`ViewStoreErrorWithContext`] to recover it.
    Malformed(String),
    /// A message addressed a bgp-time older than the window head. Silently
    /// discarded by the store; a timeout sweep still runs.
    OutOfWindow { bgp_time: u32, head_time: u32 },
    /// A `set(id, signature)` call would rebind an id to a different
    /// signature. Fatal for deserialization.
    IdConflict { id: u16 },
    /// Network send/receive failure. Triggers reconnect with backoff on the
    /// broker side.
    TransientIo(io::Error),
    /// A view exceeded its configured max wall-clock age.
    Timeout,
    /// Allocation or bounded-queue failure. Fatal; logged and propagated.
    ResourceExhausted(String),
}

impl Error for ViewStoreError {}

impl Display for ViewStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ViewStoreError::Malformed(s) => write!(f, "malformed input: {s}"),
            ViewStoreError::OutOfWindow { bgp_time, head_time } => write!(
                f,
                "bgp-time {bgp_time} is out of window (head-time {head_time})"
            ),
            ViewStoreError::IdConflict { id } => {
                write!(f, "peer id {id} is already bound to a different signature")
            }
            ViewStoreError::TransientIo(e) => write!(f, "transient I/O error: {e}"),
            ViewStoreError::Timeout => write!(f, "view exceeded its maximum age"),
            ViewStoreError::ResourceExhausted(s) => write!(f, "resource exhausted: {s}"),
        }
    }
}

impl From<io::Error> for ViewStoreError {
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            ErrorKind::UnexpectedEof => ViewStoreError::Malformed("unexpected eof".to_string()),
            _ => ViewStoreError::TransientIo(io_error),
        }
    }
}

/// Carries the raw frame bytes alongside a malformed-input error, mirroring
/// the teacher's `ParserErrorWithBytes` -- lets callers log the offending
/// bytes before dropping the frame.
#[derive(Debug)]
pub struct ViewStoreErrorWithContext {
    pub error: ViewStoreError,
    pub bytes: Option<Vec<u8>>,
}

impl Display for ViewStoreErrorWithContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for ViewStoreErrorWithContext {}

impl From<ViewStoreError> for ViewStoreErrorWithContext {
    fn from(error: ViewStoreError) -> Self {
        ViewStoreErrorWithContext { error, bytes: None }
    }
}

impl ViewStoreErrorWithContext {
    pub fn with_bytes(error: ViewStoreError, bytes: Vec<u8>) -> Self {
        ViewStoreErrorWithContext {
            error,
            bytes: Some(bytes),
        }
    }
}

impl From<io::Error> for ViewStoreErrorWithContext {
    fn from(io_error: io::Error) -> Self {
        ViewStoreError::from(io_error).into()
    }
}

pub type ViewStoreResult<T> = Result<T, ViewStoreError>;
