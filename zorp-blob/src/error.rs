use derive_more::{Display, Error, From};

/// Errors a blob client can observe. Catastrophic I/O during swap-out is
/// deliberately NOT one of these: per the store's design, a write or seek
/// failure mid-swap aborts the process rather than surfacing here, since
/// the blob's bytes are lost mid-flight and there is no coherent way to
/// keep the owning session running.
#[derive(Debug, Display, Error, From)]
pub enum BlobError {
    #[display("blob could not be allocated: {requested} bytes requested, system has no room")]
    ResourceDenied { requested: u64 },

    #[display("blob operation timed out")]
    Timeout,

    #[display("position {pos} out of range for blob of size {size}")]
    #[from(ignore)]
    OutOfRange { pos: u64, size: u64 },

    #[display("I/O error: {_0}")]
    Io(std::io::Error),

    #[display("blob system is shutting down")]
    SystemGone,
}

pub type BlobResult<T> = Result<T, BlobError>;

impl From<BlobError> for zorp_errors::ZorpError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::ResourceDenied { requested } => {
                zorp_errors::ZorpError::ResourceDenied(requested as usize)
            }
            BlobError::Timeout => zorp_errors::ZorpError::Timeout(std::time::Duration::ZERO),
            BlobError::Io(e) => zorp_errors::ZorpError::Io(e),
            other => zorp_errors::ZorpError::protocol(other.to_string()),
        }
    }
}
