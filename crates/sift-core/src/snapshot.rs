//! Snapshots — the serialized export unit for one person.
//!
//! A snapshot bundles the person record with their membership ledger and
//! per-group message logs. Snapshots are immutable once written; the merge
//! engine reads many of them and emits a fresh canonical one.
//!
//! # Filename grammar
//!
//! Capture files are named `{person_id}_{group_id}_{YYYYMMDD_HHMMSS}_{8 hex}
//! .json` (the group id may be negative); a canonical snapshot replaces the
//! leading person/group pair with the `final_{person_id}` prefix. The hex
//! tail is a random disambiguator so two captures in the same second never
//! collide.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result, membership::MembershipLedger, message::MessageRecord,
  person::Person,
};

/// Timestamp layout embedded in snapshot filenames (second precision).
const NAME_TS_FORMAT: &str = "%Y%m%d_%H%M%S";

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// One person's exported profile: identity, memberships, and message logs
/// keyed by group id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  pub person:      Person,
  #[serde(default)]
  pub memberships: MembershipLedger,
  /// Per-group message logs, keyed by group id.
  #[serde(default)]
  pub groups:      BTreeMap<i64, Vec<MessageRecord>>,
  pub captured_at: DateTime<Utc>,
  /// For canonical snapshots: how many source files the merge folded in.
  #[serde(default)]
  pub merged_files: u32,
}

impl Snapshot {
  pub fn person_id(&self) -> i64 { self.person.person_id }

  pub fn message_count(&self) -> usize {
    self.groups.values().map(Vec::len).sum()
  }

  pub fn to_json_string(&self) -> Result<String> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  pub fn from_json_str(raw: &str) -> Result<Self> {
    Ok(serde_json::from_str(raw)?)
  }

  /// The slice of this snapshot belonging to one group: the full person
  /// record, plus only that group's membership and message log. This is
  /// what capture files and uploads carry.
  pub fn scoped_to_group(&self, group_id: i64) -> Self {
    let mut memberships = MembershipLedger::new();
    if let Some(m) = self.memberships.get(group_id) {
      memberships.absorb(m.clone());
    }
    let messages =
      self.groups.get(&group_id).cloned().unwrap_or_default();
    Self {
      person: self.person.clone(),
      memberships,
      groups: BTreeMap::from([(group_id, messages)]),
      captured_at: self.captured_at,
      merged_files: 0,
    }
  }
}

// ─── Snapshot names ──────────────────────────────────────────────────────────

/// Parsed form of a snapshot filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotName {
  pub canonical:     bool,
  pub person_id:     i64,
  /// Present on capture files (one group per capture); absent on canonical
  /// snapshots, which span all groups.
  pub group_id:      Option<i64>,
  /// Second precision — the filename cannot carry more.
  pub captured_at:   DateTime<Utc>,
  pub disambiguator: String,
}

impl SnapshotName {
  /// Name for a fresh per-group capture file.
  pub fn capture(person_id: i64, group_id: i64, at: DateTime<Utc>) -> Self {
    Self {
      canonical: false,
      person_id,
      group_id: Some(group_id),
      captured_at: truncate_to_second(at),
      disambiguator: disambiguator(),
    }
  }

  /// Name for a fresh canonical snapshot.
  pub fn canonical(person_id: i64, at: DateTime<Utc>) -> Self {
    Self {
      canonical: true,
      person_id,
      group_id: None,
      captured_at: truncate_to_second(at),
      disambiguator: disambiguator(),
    }
  }

  pub fn render(&self) -> String {
    let ts = self.captured_at.format(NAME_TS_FORMAT);
    match (self.canonical, self.group_id) {
      (true, _) => {
        format!("final_{}_{ts}_{}.json", self.person_id, self.disambiguator)
      }
      (false, Some(gid)) => {
        format!("{}_{gid}_{ts}_{}.json", self.person_id, self.disambiguator)
      }
      // A non-canonical name without a group id should not be constructed,
      // but render it losslessly rather than panic.
      (false, None) => {
        format!("{}_0_{ts}_{}.json", self.person_id, self.disambiguator)
      }
    }
  }

  /// Parse a filename, returning `Err` for anything that is not a snapshot
  /// file (callers typically skip those silently).
  pub fn parse(filename: &str) -> Result<Self> {
    let invalid = || Error::InvalidSnapshotName(filename.to_owned());

    let stem = filename.strip_suffix(".json").ok_or_else(invalid)?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() != 5 {
      return Err(invalid());
    }

    let canonical = parts[0] == "final";
    let (person_str, group_str) = if canonical {
      (parts[1], None)
    } else {
      (parts[0], Some(parts[1]))
    };

    let person_id: i64 = person_str.parse().map_err(|_| invalid())?;
    if person_id < 0 {
      return Err(invalid());
    }
    let group_id = match group_str {
      Some(s) => Some(s.parse::<i64>().map_err(|_| invalid())?),
      None => None,
    };

    let disambiguator = parts[4];
    if disambiguator.len() != 8
      || !disambiguator.bytes().all(|b| b.is_ascii_hexdigit())
    {
      return Err(invalid());
    }

    let ts = format!("{}_{}", parts[2], parts[3]);
    let captured_at = NaiveDateTime::parse_from_str(&ts, NAME_TS_FORMAT)
      .map_err(|_| invalid())?
      .and_utc();

    Ok(Self {
      canonical,
      person_id,
      group_id,
      captured_at,
      disambiguator: disambiguator.to_owned(),
    })
  }
}

/// 8 random lowercase hex chars.
fn disambiguator() -> String {
  Uuid::new_v4().simple().to_string()[..8].to_owned()
}

fn truncate_to_second(at: DateTime<Utc>) -> DateTime<Utc> {
  DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap()
  }

  #[test]
  fn capture_name_round_trips() {
    let name = SnapshotName::capture(42, -1001234, at());
    let parsed = SnapshotName::parse(&name.render()).unwrap();
    assert_eq!(parsed, name);
    assert!(!parsed.canonical);
    assert_eq!(parsed.group_id, Some(-1001234));
  }

  #[test]
  fn canonical_name_round_trips() {
    let name = SnapshotName::canonical(42, at());
    let rendered = name.render();
    assert!(rendered.starts_with("final_42_20240301_123045_"));

    let parsed = SnapshotName::parse(&rendered).unwrap();
    assert_eq!(parsed, name);
    assert!(parsed.canonical);
    assert_eq!(parsed.group_id, None);
  }

  #[test]
  fn disambiguators_differ_between_calls() {
    let a = SnapshotName::capture(1, 2, at());
    let b = SnapshotName::capture(1, 2, at());
    assert_ne!(a.disambiguator, b.disambiguator);
  }

  #[test]
  fn non_snapshot_filenames_are_rejected() {
    for bad in [
      "notes.txt",
      "profile.json",
      "final_abc_20240301_123045_deadbeef.json",
      "42_10_20240301_123045_nothex!!.json",
      "42_10_2024_1230_deadbeef.json",
      "42_10_20240301_123045_deadbeef.json.bak",
    ] {
      assert!(SnapshotName::parse(bad).is_err(), "accepted {bad:?}");
    }
  }

  #[test]
  fn snapshot_json_round_trips() {
    let mut snapshot = Snapshot {
      person:       Person::new(7),
      memberships:  MembershipLedger::new(),
      groups:       BTreeMap::new(),
      captured_at:  at(),
      merged_files: 3,
    };
    snapshot.person.observe_identity(Some("alice"), None, at());

    let json = snapshot.to_json_string().unwrap();
    let back = Snapshot::from_json_str(&json).unwrap();
    assert_eq!(back, snapshot);
  }
}
