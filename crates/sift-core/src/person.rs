//! Person — the profile root tracked across groups.
//!
//! A person is keyed by a platform-assigned numeric id. Current handle and
//! display name are scalars; every observed change pushes the *previous*
//! value onto an append-only history list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── History ─────────────────────────────────────────────────────────────────

/// One superseded handle or display-name value.
///
/// `changed_at` is the time the value was observed to have been replaced,
/// not the (unknowable) time the person actually changed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub value:      String,
  pub changed_at: DateTime<Utc>,
}

// ─── Flags ───────────────────────────────────────────────────────────────────

/// Platform-reported account flags, carried verbatim from source events.
/// Last observation wins.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct PersonFlags {
  #[serde(default)]
  pub is_bot:      bool,
  #[serde(default)]
  pub is_deleted:  bool,
  #[serde(default)]
  pub is_verified: bool,
  #[serde(default)]
  pub is_scam:     bool,
  #[serde(default)]
  pub is_fake:     bool,
  #[serde(default)]
  pub is_premium:  bool,
}

// ─── Person ──────────────────────────────────────────────────────────────────

/// A uniquely identified participant and their identity history.
///
/// Group memberships and message logs live alongside this in
/// [`crate::snapshot::Snapshot`]; the person record itself is identity only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
  pub person_id:      i64,
  pub handle:         Option<String>,
  pub display_name:   Option<String>,
  /// Superseded handles, oldest first. Never contains two consecutive
  /// equal values.
  #[serde(default)]
  pub handle_history: Vec<HistoryEntry>,
  /// Superseded display names, same shape as `handle_history`.
  #[serde(default)]
  pub name_history:   Vec<HistoryEntry>,
  #[serde(default)]
  pub flags:          PersonFlags,
  pub first_seen:     Option<DateTime<Utc>>,
  pub last_seen:      Option<DateTime<Utc>>,
}

impl Person {
  pub fn new(person_id: i64) -> Self {
    Self {
      person_id,
      handle: None,
      display_name: None,
      handle_history: Vec::new(),
      name_history: Vec::new(),
      flags: PersonFlags::default(),
      first_seen: None,
      last_seen: None,
    }
  }

  /// Record an identity observation.
  ///
  /// An incoming handle or display name that is non-empty and differs from
  /// the stored current value pushes the previous current value (if any)
  /// onto the matching history with `observed_at`, then replaces it. Empty
  /// or identical values are a no-op for that field. Always advances
  /// `last_seen` (and backfills `first_seen`).
  pub fn observe_identity(
    &mut self,
    handle: Option<&str>,
    display_name: Option<&str>,
    observed_at: DateTime<Utc>,
  ) {
    if let Some(h) = handle.filter(|h| !h.is_empty()) {
      Self::shift(&mut self.handle, &mut self.handle_history, h, observed_at);
    }
    if let Some(n) = display_name.filter(|n| !n.is_empty()) {
      Self::shift(&mut self.display_name, &mut self.name_history, n, observed_at);
    }
    self.touch(observed_at);
  }

  /// Overwrite account flags with the latest observation.
  pub fn observe_flags(&mut self, flags: PersonFlags) { self.flags = flags; }

  /// Widen the observation window to include `observed_at`.
  pub fn touch(&mut self, observed_at: DateTime<Utc>) {
    match self.first_seen {
      Some(first) if first <= observed_at => {}
      _ => self.first_seen = Some(observed_at),
    }
    match self.last_seen {
      Some(last) if last >= observed_at => {}
      _ => self.last_seen = Some(observed_at),
    }
  }

  fn shift(
    current: &mut Option<String>,
    history: &mut Vec<HistoryEntry>,
    incoming: &str,
    observed_at: DateTime<Utc>,
  ) {
    if current.as_deref() == Some(incoming) {
      return;
    }
    if let Some(previous) = current.replace(incoming.to_owned()) {
      history.push(HistoryEntry { value: previous, changed_at: observed_at });
    }
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
  }

  #[test]
  fn first_observation_sets_current_without_history() {
    let mut p = Person::new(5);
    p.observe_identity(Some("alice"), Some("Alice"), at(0));

    assert_eq!(p.handle.as_deref(), Some("alice"));
    assert_eq!(p.display_name.as_deref(), Some("Alice"));
    assert!(p.handle_history.is_empty());
    assert!(p.name_history.is_empty());
  }

  #[test]
  fn change_pushes_previous_value() {
    let mut p = Person::new(5);
    p.observe_identity(Some("alice"), None, at(0));
    p.observe_identity(Some("alice2"), None, at(1));

    assert_eq!(p.handle.as_deref(), Some("alice2"));
    assert_eq!(p.handle_history.len(), 1);
    assert_eq!(p.handle_history[0].value, "alice");
    assert_eq!(p.handle_history[0].changed_at, at(1));
  }

  #[test]
  fn history_length_counts_changes_not_calls() {
    let mut p = Person::new(5);
    p.observe_identity(Some("a"), None, at(0));
    p.observe_identity(Some("a"), None, at(1));
    p.observe_identity(Some("b"), None, at(2));
    p.observe_identity(Some("b"), None, at(3));
    p.observe_identity(Some("c"), None, at(4));

    assert_eq!(p.handle.as_deref(), Some("c"));
    assert_eq!(p.handle_history.len(), 2);
    // No two consecutive equal entries.
    for pair in p.handle_history.windows(2) {
      assert_ne!(pair[0].value, pair[1].value);
    }
  }

  #[test]
  fn empty_value_is_a_no_op() {
    let mut p = Person::new(5);
    p.observe_identity(Some("alice"), Some("Alice"), at(0));
    p.observe_identity(Some(""), Some(""), at(1));

    assert_eq!(p.handle.as_deref(), Some("alice"));
    assert_eq!(p.display_name.as_deref(), Some("Alice"));
    assert!(p.handle_history.is_empty());
  }

  #[test]
  fn touch_widens_observation_window() {
    let mut p = Person::new(5);
    p.touch(at(5));
    p.touch(at(2));
    p.touch(at(9));

    assert_eq!(p.first_seen, Some(at(2)));
    assert_eq!(p.last_seen, Some(at(9)));
  }
}
