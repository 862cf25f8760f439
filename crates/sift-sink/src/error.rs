//! Error type for `sift-sink`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] sift_core::Error),

  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  /// Non-success status after the rate-limit retry was already spent.
  #[error("remote sink returned {0}")]
  RemoteStatus(reqwest::StatusCode),

  #[error("presence store error: {0}")]
  Store(#[from] sift_store_sqlite::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
