//! The `PresenceStore` trait — the key-value sink contract.
//!
//! The store holds a minimal existence record per person (first and last
//! time they were seen), used for cheap "have we ever seen this person"
//! lookups. Full profiles never go through this interface.
//!
//! All methods return `Send` futures so the trait can be used from
//! multi-threaded async runtimes.

use std::future::Future;

use chrono::{DateTime, Utc};

/// A minimal existence record, upserted on every ingestion pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceRecord {
  pub person_id:  i64,
  pub first_seen: DateTime<Utc>,
  pub last_seen:  DateTime<Utc>,
}

/// Abstraction over a presence-record backend (e.g. `sift-store-sqlite`).
pub trait PresenceStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Upsert one person: a new id gets `first_seen = last_seen = seen_at`,
  /// an existing one keeps `first_seen` and advances `last_seen`.
  fn mark_seen(
    &self,
    person_id: i64,
    seen_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Bulk form of [`mark_seen`](Self::mark_seen): one write for a mixed
  /// batch of new and known ids. Returns the number of records touched.
  fn mark_seen_many<'a>(
    &'a self,
    person_ids: &'a [i64],
    seen_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// Fetch one record. `None` means the person has never been seen.
  fn get(
    &self,
    person_id: i64,
  ) -> impl Future<Output = Result<Option<PresenceRecord>, Self::Error>> + Send + '_;

  /// Total number of tracked people.
  fn count(
    &self,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Ids seen at or after `since`, most recent first.
  fn recent(
    &self,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<i64>, Self::Error>> + Send + '_;
}
