//! [`SqliteStore`] — the SQLite implementation of [`PresenceStore`].

use std::{future::Future, path::Path};

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use sift_core::presence::{PresenceRecord, PresenceStore};

use crate::{Error, Result, schema::SCHEMA};

/// Upsert that widens the observation window: a known id keeps its earlier
/// `first_seen` and its later `last_seen`, whichever side the new
/// observation falls on.
const UPSERT_SQL: &str = "
INSERT INTO presence (person_id, first_seen, last_seen)
VALUES (?1, ?2, ?2)
ON CONFLICT(person_id) DO UPDATE SET
    first_seen = MIN(first_seen, excluded.first_seen),
    last_seen  = MAX(last_seen,  excluded.last_seen)
";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A presence store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── PresenceStore ───────────────────────────────────────────────────────────

impl PresenceStore for SqliteStore {
  type Error = Error;

  fn mark_seen(
    &self,
    person_id: i64,
    seen_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<()>> + Send + '_ {
    async move {
      let at = encode_dt(seen_at);
      self
        .conn
        .call(move |conn| {
          conn.execute(UPSERT_SQL, rusqlite::params![person_id, at])?;
          Ok(())
        })
        .await?;
      Ok(())
    }
  }

  fn mark_seen_many<'a>(
    &'a self,
    person_ids: &'a [i64],
    seen_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<usize>> + Send + 'a {
    async move {
      let ids = person_ids.to_vec();
      let at = encode_dt(seen_at);
      let touched = self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;
          let mut touched = 0;
          {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for id in &ids {
              touched += stmt.execute(rusqlite::params![id, at])?;
            }
          }
          tx.commit()?;
          Ok(touched)
        })
        .await?;
      Ok(touched)
    }
  }

  fn get(
    &self,
    person_id: i64,
  ) -> impl Future<Output = Result<Option<PresenceRecord>>> + Send + '_ {
    async move {
      let row: Option<(String, String)> = self
        .conn
        .call(move |conn| {
          Ok(
            conn
              .query_row(
                "SELECT first_seen, last_seen FROM presence
                 WHERE person_id = ?1",
                rusqlite::params![person_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
              )
              .optional()?,
          )
        })
        .await?;

      row
        .map(|(first, last)| {
          Ok(PresenceRecord {
            person_id,
            first_seen: decode_dt(&first)?,
            last_seen: decode_dt(&last)?,
          })
        })
        .transpose()
    }
  }

  fn count(&self) -> impl Future<Output = Result<usize>> + Send + '_ {
    async move {
      let n: i64 = self
        .conn
        .call(|conn| {
          Ok(conn.query_row("SELECT COUNT(*) FROM presence", [], |r| r.get(0))?)
        })
        .await?;
      Ok(n as usize)
    }
  }

  fn recent(
    &self,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<i64>>> + Send + '_ {
    async move {
      let at = encode_dt(since);
      let ids = self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(
            "SELECT person_id FROM presence
             WHERE last_seen >= ?1
             ORDER BY last_seen DESC, person_id ASC",
          )?;
          let ids = stmt
            .query_map(rusqlite::params![at], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
          Ok(ids)
        })
        .await?;
      Ok(ids)
    }
  }
}

// ─── Timestamp encoding ──────────────────────────────────────────────────────

fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}
