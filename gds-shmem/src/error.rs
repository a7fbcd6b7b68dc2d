//! Uniform error type for this crate's entry points. Wraps
//! [`gds_shmem_core::Error`] for failures that originate in the arena/segment
//! layer and adds the protocol-level violations this crate's codec and
//! module-glue surface on their own.

use std::fmt;

use gds_shmem_core::Error as CoreError;

/// Errors raised by the Publisher, Attacher, ModexStore, and `Registry`.
#[derive(Debug)]
pub enum Error {
  /// Propagated from the arena/segment layer (resource exhaustion, I/O,
  /// address mismatch, arena overflow, and so on).
  Core(CoreError),
  /// A connection-info blob was missing a field, had an unparseable field,
  /// or carried an unrecognized key.
  ProtocolViolation(String),
  /// The host-supplied `KeyFetcher` failed.
  FetchFailed(String),
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Core(e) => write!(f, "{e}"),
      Self::ProtocolViolation(detail) => write!(f, "protocol violation: {detail}"),
      Self::FetchFailed(detail) => write!(f, "key fetch failed: {detail}"),
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Core(e) => Some(e),
      _ => None,
    }
  }
}

impl From<CoreError> for Error {
  fn from(e: CoreError) -> Self {
    Self::Core(e)
  }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
