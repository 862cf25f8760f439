//! Best-effort fan-out over the configured sinks.
//!
//! Every sink gets every snapshot; a failure is logged, recorded in the
//! report, and never stops the remaining sinks. The callers decide whether
//! a partial failure fails the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sift_core::{presence::PresenceStore as _, snapshot::Snapshot};
use sift_store_sqlite::SqliteStore;
use tracing::{info, warn};

use crate::{Error, FileSink, RemoteSink, Result};

// ─── Run summary ─────────────────────────────────────────────────────────────

/// Totals reported (and persisted) at the end of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
  pub started_at:       DateTime<Utc>,
  pub finished_at:      DateTime<Utc>,
  pub people:           usize,
  pub groups:           usize,
  pub messages:         usize,
  pub skipped_events:   u64,
  /// (person, group) profiles the file sink successfully wrote.
  pub profiles_written: usize,
  pub sink_failures:    usize,
}

// ─── Sink ────────────────────────────────────────────────────────────────────

/// One configured persistence destination.
///
/// An enum rather than a trait object: the destinations have nothing
/// structurally in common (paths vs HTTP vs SQL), only the fan-out cares
/// about them uniformly.
pub enum Sink {
  File(FileSink),
  Remote(RemoteSink),
  Presence(SqliteStore),
}

impl Sink {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::File(_) => "file",
      Self::Remote(_) => "remote",
      Self::Presence(_) => "presence",
    }
  }

  /// Persist one person snapshot to this destination.
  async fn persist_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
    match self {
      Self::File(sink) => {
        for &group_id in snapshot.groups.keys() {
          sink.write_profile(snapshot, group_id)?;
        }
        Ok(())
      }
      Self::Remote(sink) => {
        for &group_id in snapshot.groups.keys() {
          sink.upload_profile(snapshot, group_id).await?;
        }
        Ok(())
      }
      Self::Presence(store) => {
        store
          .mark_seen(snapshot.person_id(), snapshot.captured_at)
          .await
          .map_err(Error::Store)
      }
    }
  }
}

// ─── Fan-out ─────────────────────────────────────────────────────────────────

/// Per-sink results of one [`persist`] call.
#[derive(Debug, Default)]
pub struct PersistReport {
  pub successes: usize,
  /// Sink kind and the error it produced.
  pub failures:  Vec<(&'static str, Error)>,
}

impl PersistReport {
  pub fn all_ok(&self) -> bool { self.failures.is_empty() }
}

/// Offer `snapshot` to every sink in turn.
pub async fn persist(sinks: &[Sink], snapshot: &Snapshot) -> PersistReport {
  let mut report = PersistReport::default();
  for sink in sinks {
    match sink.persist_snapshot(snapshot).await {
      Ok(()) => report.successes += 1,
      Err(err) => {
        warn!(
          sink = sink.kind(),
          person_id = snapshot.person_id(),
          %err,
          "sink failed, continuing"
        );
        report.failures.push((sink.kind(), err));
      }
    }
  }
  info!(
    person_id = snapshot.person_id(),
    successes = report.successes,
    failures = report.failures.len(),
    "persisted snapshot"
  );
  report
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use std::fs;

  use chrono::TimeZone;
  use sift_core::person::Person;

  use super::*;

  fn snapshot() -> Snapshot {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let mut person = Person::new(5);
    person.observe_identity(Some("alice"), None, at);
    Snapshot {
      person,
      memberships:  Default::default(),
      groups:       [(10, Vec::new())].into(),
      captured_at:  at,
      merged_files: 0,
    }
  }

  #[tokio::test]
  async fn one_failing_sink_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    // A sink rooted at a plain file cannot create its directory.
    let blocked = dir.path().join("blocked");
    fs::write(&blocked, "in the way").unwrap();

    let store = SqliteStore::open_in_memory().await.unwrap();
    let sinks = vec![
      Sink::File(FileSink::new(dir.path().join("out"))),
      Sink::File(FileSink::new(&blocked)),
      Sink::Presence(store.clone()),
    ];

    let report = persist(&sinks, &snapshot()).await;
    assert_eq!(report.successes, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "file");
    assert!(!report.all_ok());

    // The healthy sinks really did their work.
    assert!(dir.path().join("out").read_dir().unwrap().count() > 0);
    use sift_core::presence::PresenceStore as _;
    assert!(store.get(5).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn all_sinks_succeeding_reports_clean() {
    let dir = tempfile::tempdir().unwrap();
    let sinks = vec![Sink::File(FileSink::new(dir.path()))];

    let report = persist(&sinks, &snapshot()).await;
    assert!(report.all_ok());
    assert_eq!(report.successes, 1);
  }
}
