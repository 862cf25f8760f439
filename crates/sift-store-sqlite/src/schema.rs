//! SQL schema for the sift presence store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Timestamps are RFC 3339 UTC strings, which order chronologically under
/// SQLite's text comparison, so MIN/MAX and range scans work unmodified.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS presence (
    person_id  INTEGER PRIMARY KEY,
    first_seen TEXT NOT NULL,
    last_seen  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS presence_last_seen_idx ON presence(last_seen);

PRAGMA user_version = 1;
";
