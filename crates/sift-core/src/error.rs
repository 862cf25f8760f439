//! Error types for `sift-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A source event is missing a field the engine cannot proceed without.
  /// Callers are expected to skip the event and continue the batch.
  #[error("event is missing required field: {0}")]
  MalformedEvent(&'static str),

  #[error("not a snapshot filename: {0:?}")]
  InvalidSnapshotName(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
