//! Error type for `sift-engine`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] sift_core::Error),

  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),

  /// A snapshot file whose name parsed but whose body did not. The merge
  /// loop logs and skips these; it only surfaces as an error when the file
  /// was requested directly.
  #[error("cannot decode snapshot {path:?}: {source}")]
  UnreadableSnapshot {
    path:   PathBuf,
    source: sift_core::Error,
  },

  /// The merge lock for a person is held by another process.
  #[error("merge already in progress for person {0}")]
  MergeLocked(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
