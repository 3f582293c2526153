//! Shared error and status vocabulary for the zorp runtime crates.
//!
//! Every layer in the stream stack, the blob store, and the codec pipeline
//! returns results built from [`GIoStatus`] and [`ZorpError`] rather than
//! throwing, so a layer that notices a child-side failure can cache it and
//! keep returning the same error on every subsequent call (see
//! [`Sticky`]).

use derive_more::{Display, Error, From};

/// Outcome of a non-blocking read or write, mirroring the historical
/// `G_IO_STATUS_*` values this runtime is modeled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GIoStatus {
    Normal,
    Eof,
    Again,
    Error,
}

/// The kinds of errors this runtime surfaces. `Again` and `Eof` are normally
/// represented as [`GIoStatus`] rather than as an error value; this enum is
/// for conditions that are genuinely exceptional.
#[derive(Debug, Display, Error, From)]
pub enum ZorpError {
    #[display("I/O error: {_0}")]
    Io(std::io::Error),

    #[display("protocol error: {_0}")]
    #[from(ignore)]
    Protocol(String),

    #[display("blob could not be allocated: {_0} bytes requested")]
    ResourceDenied(usize),

    #[display("invalid configuration: {_0}")]
    #[from(ignore)]
    Config(String),

    #[display("operation timed out after {_0:?}")]
    #[from(ignore)]
    Timeout(std::time::Duration),
}

impl ZorpError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        ZorpError::Protocol(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ZorpError::Config(msg.into())
    }

    /// True if retrying the same call later, once the condition clears, is
    /// meaningful (as opposed to the stream being permanently wedged).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ZorpError::Timeout(_))
    }
}

impl From<ZorpError> for std::io::Error {
    fn from(err: ZorpError) -> Self {
        match err {
            ZorpError::Io(e) => e,
            ZorpError::Timeout(_) => std::io::Error::new(std::io::ErrorKind::TimedOut, err),
            other => std::io::Error::other(other),
        }
    }
}

pub type ZorpResult<T> = Result<T, ZorpError>;

/// A slot that remembers the first error seen so subsequent operations
/// return it instead of silently succeeding. Used by every stream layer
/// that buffers (`buf`, `line`, `gzip`) to implement the "sticky error"
/// propagation policy.
#[derive(Debug, Default)]
pub struct Sticky {
    err: Option<String>,
}

impl Sticky {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` if nothing has been recorded yet, and return a status
    /// representing it.
    pub fn set(&mut self, err: &ZorpError) {
        if self.err.is_none() {
            self.err = Some(err.to_string());
        }
    }

    pub fn check(&self) -> Result<(), std::io::Error> {
        match &self.err {
            Some(msg) => Err(std::io::Error::other(msg.clone())),
            None => Ok(()),
        }
    }

    pub fn is_set(&self) -> bool {
        self.err.is_some()
    }
}
