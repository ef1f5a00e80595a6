//! Error taxonomy for the fallible surface.
//!
//! Only the unmanaged memory manager reports errors; raw access and the RMW
//! engine define no error conditions at all. Out-of-bounds access, stale
//! addresses and double frees are undefined behavior by contract, not
//! detected failures.

/// Errors raised synchronously by the unmanaged memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed size, region or endpoint. Validation is best-effort and
    /// callers must not rely on it catching anything.
    InvalidArgument(&'static str),
    /// The platform allocator refused a nonzero-size request.
    OutOfMemory { bytes: u64 },
    /// Cache-line writeback requested on a platform without flush support.
    UnsupportedOperation(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::OutOfMemory { bytes } => {
                write!(f, "unable to allocate {} bytes", bytes)
            }
            Self::UnsupportedOperation(msg) => write!(f, "unsupported operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
