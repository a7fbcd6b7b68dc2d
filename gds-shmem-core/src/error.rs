use std::fmt;
use std::io;

/// Errors raised by the arena allocator and segment lifecycle.
///
/// Every public entry point in this crate returns `Result<T, Error>`. None of
/// the paths below panic in non-test code; a bug that would otherwise be a
/// panic is instead surfaced as [`Error::ArenaOverflow`] or
/// [`Error::Unsupported`], since those two are the ones a buggy caller (or a
/// buggy size estimate) can actually trigger.
#[derive(Debug)]
pub enum Error {
  /// No virtual memory hole large enough was found, or an estimate implied
  /// an allocation too large to be practical.
  ResourceExhaustion {
    /// Bytes requested.
    requested: usize,
  },
  /// A backing-file `create`/`open`/`mmap`/`munmap`/`unlink` syscall failed.
  IoFailure(io::Error),
  /// The kernel did not honor the requested fixed mapping address.
  AddressMismatch {
    /// Address we asked the kernel to map at.
    requested: usize,
    /// Address the kernel actually mapped at, if it mapped at all.
    actual: Option<usize>,
  },
  /// A connection-info blob was missing a field, had an unparseable field,
  /// or carried an unrecognized key.
  ProtocolViolation(String),
  /// `realloc` was called on the arena, or a server-only entrypoint was
  /// invoked against a read-only (client) view.
  Unsupported(&'static str),
  /// A store would have advanced the arena cursor past `base + size`. The
  /// [`SizingEstimator`](https://docs.rs/gds-shmem) is responsible for making
  /// this impossible; reaching this path means the estimate was wrong.
  ArenaOverflow {
    /// Bytes the failed allocation wanted.
    requested: usize,
    /// Bytes actually left in the arena.
    remaining: usize,
  },
  /// A mutation was attempted against a read-only arena or segment.
  ReadOnly,
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::ResourceExhaustion { requested } => {
        write!(f, "no virtual memory hole of at least {requested} bytes was available")
      }
      Self::IoFailure(e) => write!(f, "shared-memory backing file operation failed: {e}"),
      Self::AddressMismatch { requested, actual } => match actual {
        Some(actual) => write!(
          f,
          "segment attach address mismatch: requested=0x{requested:x} actual=0x{actual:x}"
        ),
        None => write!(f, "segment attach at 0x{requested:x} failed outright"),
      },
      Self::ProtocolViolation(detail) => write!(f, "protocol violation: {detail}"),
      Self::Unsupported(what) => write!(f, "unsupported operation: {what}"),
      Self::ArenaOverflow { requested, remaining } => write!(
        f,
        "arena overflow: requested {requested} bytes but only {remaining} remain"
      ),
      Self::ReadOnly => write!(f, "attempted to mutate a read-only arena or segment"),
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::IoFailure(e) => Some(e),
      _ => None,
    }
  }
}

impl From<io::Error> for Error {
  fn from(e: io::Error) -> Self {
    Self::IoFailure(e)
  }
}

impl From<nix::Error> for Error {
  fn from(e: nix::Error) -> Self {
    Self::IoFailure(io::Error::from(e))
  }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
