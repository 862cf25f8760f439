//! Group membership ledger.
//!
//! One record per (person, group) pair. The record captures the group's
//! title/handle as seen at observation time and the person's role; role and
//! title updates overwrite in place, while the first-joined timestamp is
//! written once and never changes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::GroupRef;

// ─── Role ────────────────────────────────────────────────────────────────────

/// A person's role within a group.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  #[default]
  Member,
  Admin,
  Owner,
}

impl Role {
  pub fn is_admin(self) -> bool { matches!(self, Self::Admin | Self::Owner) }
}

// ─── Membership ──────────────────────────────────────────────────────────────

/// Observed membership of one person in one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
  pub group_id:     i64,
  pub group_title:  String,
  pub group_handle: Option<String>,
  pub role:         Role,
  pub is_admin:     bool,
  /// When this person was first *observed* in the group — not when they
  /// actually joined, which the engine cannot know.
  pub joined_at:    DateTime<Utc>,
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

/// Per-person membership records, keyed by group id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MembershipLedger {
  records: BTreeMap<i64, Membership>,
}

impl MembershipLedger {
  pub fn new() -> Self { Self::default() }

  /// Record a membership observation.
  ///
  /// Creates the record on first sight with `joined_at = observed_at`.
  /// On later observations the title/handle snapshot refreshes in place and
  /// `joined_at` is left alone. `role` semantics: `Some(r)` is an
  /// authoritative signal (member listing) and overwrites, last write wins;
  /// `None` is a message-derived observation that defaults new records to
  /// `Member` and never touches an existing record's role.
  pub fn observe(
    &mut self,
    group: &GroupRef,
    role: Option<Role>,
    observed_at: DateTime<Utc>,
  ) {
    let record = self.records.entry(group.id).or_insert_with(|| Membership {
      group_id:     group.id,
      group_title:  String::new(),
      group_handle: None,
      role:         role.unwrap_or_default(),
      is_admin:     role.unwrap_or_default().is_admin(),
      joined_at:    observed_at,
    });

    if let Some(title) = group.title.as_deref().filter(|t| !t.is_empty()) {
      record.group_title = title.to_owned();
    }
    if group.handle.is_some() {
      record.group_handle = group.handle.clone();
    }
    if let Some(role) = role {
      record.role = role;
      record.is_admin = role.is_admin();
    }
  }

  /// Insert or overwrite a full record, keeping the older `joined_at` when
  /// the group is already present. Used by the snapshot merge engine.
  pub fn absorb(&mut self, incoming: Membership) {
    match self.records.get_mut(&incoming.group_id) {
      Some(existing) => {
        let joined_at = existing.joined_at.min(incoming.joined_at);
        *existing = incoming;
        existing.joined_at = joined_at;
      }
      None => {
        self.records.insert(incoming.group_id, incoming);
      }
    }
  }

  pub fn get(&self, group_id: i64) -> Option<&Membership> {
    self.records.get(&group_id)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Membership> {
    self.records.values()
  }

  pub fn len(&self) -> usize { self.records.len() }

  pub fn is_empty(&self) -> bool { self.records.is_empty() }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn group(id: i64, title: &str) -> GroupRef {
    GroupRef {
      id,
      title:  Some(title.to_owned()),
      handle: None,
    }
  }

  fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
  }

  #[test]
  fn first_observation_creates_record() {
    let mut ledger = MembershipLedger::new();
    ledger.observe(&group(10, "Rust Chat"), None, at(0));

    let m = ledger.get(10).unwrap();
    assert_eq!(m.role, Role::Member);
    assert_eq!(m.group_title, "Rust Chat");
    assert_eq!(m.joined_at, at(0));
  }

  #[test]
  fn joined_at_is_never_overwritten() {
    let mut ledger = MembershipLedger::new();
    ledger.observe(&group(10, "Rust Chat"), None, at(0));
    ledger.observe(&group(10, "Rust Chat (renamed)"), Some(Role::Admin), at(5));

    let m = ledger.get(10).unwrap();
    assert_eq!(m.joined_at, at(0));
    assert_eq!(m.group_title, "Rust Chat (renamed)");
    assert_eq!(m.role, Role::Admin);
    assert!(m.is_admin);
  }

  #[test]
  fn message_derived_observation_does_not_downgrade_role() {
    let mut ledger = MembershipLedger::new();
    ledger.observe(&group(10, "Rust Chat"), Some(Role::Owner), at(0));
    ledger.observe(&group(10, "Rust Chat"), None, at(1));

    assert_eq!(ledger.get(10).unwrap().role, Role::Owner);
  }

  #[test]
  fn one_record_per_group() {
    let mut ledger = MembershipLedger::new();
    ledger.observe(&group(10, "A"), None, at(0));
    ledger.observe(&group(10, "A"), None, at(1));
    ledger.observe(&group(11, "B"), None, at(2));

    assert_eq!(ledger.len(), 2);
  }

  #[test]
  fn absorb_keeps_earliest_joined_at() {
    let mut ledger = MembershipLedger::new();
    ledger.observe(&group(10, "A"), None, at(5));

    ledger.absorb(Membership {
      group_id:     10,
      group_title:  "A (fresh title)".into(),
      group_handle: Some("a_chat".into()),
      role:         Role::Admin,
      is_admin:     true,
      joined_at:    at(2),
    });

    let m = ledger.get(10).unwrap();
    assert_eq!(m.joined_at, at(2));
    assert_eq!(m.group_title, "A (fresh title)");
  }
}
