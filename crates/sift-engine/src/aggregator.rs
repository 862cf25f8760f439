//! The event aggregator: folds capture events into per-person profiles.
//!
//! One [`Aggregator`] accumulates a whole ingestion run in memory and is
//! drained into [`Snapshot`]s at the end. Malformed events are counted and
//! skipped, never fatal, so one bad line cannot sink a batch.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sift_core::{
  event::{Event, MemberEvent, MessageEvent},
  membership::MembershipLedger,
  message::MessageRecord,
  person::Person,
  snapshot::Snapshot,
};
use tracing::warn;

use crate::reply;

// ─── Group log ───────────────────────────────────────────────────────────────

/// One person's messages in one group, in ingestion order.
///
/// Message ids are unique within the log. Re-ingesting an id replaces the
/// stored record in place, keeping its original position.
#[derive(Debug, Clone, Default)]
pub struct GroupLog {
  records:   Vec<MessageRecord>,
  positions: HashMap<i64, usize>,
}

impl GroupLog {
  pub fn upsert(&mut self, record: MessageRecord) {
    match self.positions.get(&record.message_id) {
      Some(&idx) => self.records[idx] = record,
      None => {
        self.positions.insert(record.message_id, self.records.len());
        self.records.push(record);
      }
    }
  }

  pub fn messages(&self) -> &[MessageRecord] { &self.records }

  pub fn len(&self) -> usize { self.records.len() }

  pub fn is_empty(&self) -> bool { self.records.is_empty() }
}

// ─── Profile ─────────────────────────────────────────────────────────────────

/// Everything accumulated for one person during a run.
#[derive(Debug, Clone)]
pub struct Profile {
  pub person:      Person,
  pub memberships: MembershipLedger,
  groups:          BTreeMap<i64, GroupLog>,
}

impl Profile {
  fn new(person_id: i64) -> Self {
    Self {
      person:      Person::new(person_id),
      memberships: MembershipLedger::new(),
      groups:      BTreeMap::new(),
    }
  }

  pub fn group_log(&self, group_id: i64) -> Option<&GroupLog> {
    self.groups.get(&group_id)
  }

  pub fn message_count(&self) -> usize {
    self.groups.values().map(GroupLog::len).sum()
  }
}

// ─── Stats ───────────────────────────────────────────────────────────────────

/// Run-level counters, reported at the end of an ingestion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
  pub people:         usize,
  pub messages:       usize,
  pub groups:         usize,
  pub bots:           usize,
  pub deleted:        usize,
  pub skipped_events: u64,
}

// ─── Aggregator ──────────────────────────────────────────────────────────────

/// In-memory accumulator for one ingestion run.
#[derive(Debug, Default)]
pub struct Aggregator {
  profiles: HashMap<i64, Profile>,
  skipped:  u64,
}

impl Aggregator {
  pub fn new() -> Self { Self::default() }

  /// Fold in one event of either kind.
  pub fn ingest(&mut self, event: &Event, observed_at: DateTime<Utc>) {
    match event {
      Event::Message(m) => self.ingest_message(m, observed_at),
      Event::Member(m) => self.ingest_member(m, observed_at),
    }
  }

  /// Fold in one message. `observed_at` is processing time, used as the
  /// identity-observation time when the event carries no timestamp.
  pub fn ingest_message(
    &mut self,
    event: &MessageEvent,
    observed_at: DateTime<Utc>,
  ) {
    let author_id = match event.author_id() {
      Ok(id) => id,
      Err(err) => {
        warn!(
          group = event.group.id,
          message = event.message_id,
          %err,
          "skipping message event"
        );
        self.skipped += 1;
        return;
      }
    };
    let seen_at = event.timestamp.unwrap_or(observed_at);

    let profile = self
      .profiles
      .entry(author_id)
      .or_insert_with(|| Profile::new(author_id));

    if let Some(author) = &event.author {
      profile.person.observe_identity(
        author.handle.as_deref(),
        author.display_name.as_deref(),
        seen_at,
      );
      profile.person.observe_flags(author.flags);
    } else {
      profile.person.touch(seen_at);
    }

    // Sending a message implies membership; role stays untouched.
    profile.memberships.observe(&event.group, None, seen_at);

    profile
      .groups
      .entry(event.group.id)
      .or_default()
      .upsert(event.to_record(author_id, observed_at));
  }

  /// Fold in one member-listing entry. Roles here are authoritative.
  pub fn ingest_member(
    &mut self,
    event: &MemberEvent,
    observed_at: DateTime<Utc>,
  ) {
    let user_id = match event.user_id() {
      Ok(id) => id,
      Err(err) => {
        warn!(group = event.group.id, %err, "skipping member event");
        self.skipped += 1;
        return;
      }
    };

    let profile = self
      .profiles
      .entry(user_id)
      .or_insert_with(|| Profile::new(user_id));

    profile.person.observe_identity(
      event.user.handle.as_deref(),
      event.user.display_name.as_deref(),
      observed_at,
    );
    profile.person.observe_flags(event.user.flags);
    profile
      .memberships
      .observe(&event.group, Some(event.role), observed_at);
  }

  pub fn profile(&self, person_id: i64) -> Option<&Profile> {
    self.profiles.get(&person_id)
  }

  /// Ids of every person touched this run, ascending.
  pub fn person_ids(&self) -> Vec<i64> {
    let mut ids: Vec<i64> = self.profiles.keys().copied().collect();
    ids.sort_unstable();
    ids
  }

  pub fn len(&self) -> usize { self.profiles.len() }

  pub fn is_empty(&self) -> bool { self.profiles.is_empty() }

  pub fn skipped_events(&self) -> u64 { self.skipped }

  /// Export one person's accumulated state as a snapshot. Thread linking
  /// runs here, once per group log, so positions reflect the full run.
  pub fn snapshot(
    &self,
    person_id: i64,
    captured_at: DateTime<Utc>,
  ) -> Option<Snapshot> {
    let profile = self.profiles.get(&person_id)?;

    let mut groups: BTreeMap<i64, Vec<MessageRecord>> = BTreeMap::new();
    for (&group_id, log) in &profile.groups {
      let mut messages = log.records.clone();
      reply::link_threads(&mut messages);
      groups.insert(group_id, messages);
    }

    Some(Snapshot {
      person: profile.person.clone(),
      memberships: profile.memberships.clone(),
      groups,
      captured_at,
      merged_files: 0,
    })
  }

  pub fn stats(&self) -> AggregateStats {
    let mut stats = AggregateStats {
      people: self.profiles.len(),
      skipped_events: self.skipped,
      ..AggregateStats::default()
    };
    let mut group_ids = std::collections::HashSet::new();
    for profile in self.profiles.values() {
      stats.messages += profile.message_count();
      if profile.person.flags.is_bot {
        stats.bots += 1;
      }
      if profile.person.flags.is_deleted {
        stats.deleted += 1;
      }
      for m in profile.memberships.iter() {
        group_ids.insert(m.group_id);
      }
    }
    stats.groups = group_ids.len();
    stats
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use sift_core::{
    event::{Author, GroupRef},
    membership::Role,
    person::PersonFlags,
  };

  use super::*;

  fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
  }

  fn author(id: i64, handle: &str) -> Author {
    Author {
      id:           Some(id),
      handle:       Some(handle.to_owned()),
      display_name: None,
      flags:        PersonFlags::default(),
    }
  }

  fn group(id: i64) -> GroupRef {
    GroupRef { id, title: Some(format!("g{id}")), handle: None }
  }

  fn message(
    author: Option<Author>,
    message_id: i64,
    reply_to: Option<i64>,
    minute: u32,
  ) -> MessageEvent {
    MessageEvent {
      group: group(10),
      message_id,
      author,
      text: format!("m{message_id}"),
      timestamp: Some(at(minute)),
      media_kind: None,
      reply_to_id: reply_to,
      edited_at: None,
      forwarded_at: None,
      reactions: Vec::new(),
    }
  }

  #[test]
  fn handle_change_and_reply_threading_accumulate() {
    let mut agg = Aggregator::new();
    agg.ingest_message(&message(Some(author(5, "alice")), 100, None, 0), at(0));
    agg.ingest_message(
      &message(Some(author(5, "alice2")), 101, Some(100), 1),
      at(1),
    );

    let snap = agg.snapshot(5, at(2)).unwrap();
    assert_eq!(snap.person.handle.as_deref(), Some("alice2"));
    assert_eq!(snap.person.handle_history.len(), 1);
    assert_eq!(snap.person.handle_history[0].value, "alice");

    let log = &snap.groups[&10];
    assert_eq!(log.len(), 2);
    let reply = &log[1].reply;
    assert_eq!(reply.thread_root_id, 100);
    assert_eq!(reply.position_in_thread, Some(2));
  }

  #[test]
  fn reingesting_a_message_id_replaces_in_place() {
    let mut agg = Aggregator::new();
    agg.ingest_message(&message(Some(author(5, "alice")), 100, None, 0), at(0));
    agg.ingest_message(&message(Some(author(5, "alice")), 101, None, 1), at(1));

    let mut edited = message(Some(author(5, "alice")), 100, None, 0);
    edited.text = "corrected".into();
    edited.edited_at = Some(at(2));
    agg.ingest_message(&edited, at(2));

    let snap = agg.snapshot(5, at(3)).unwrap();
    let log = &snap.groups[&10];
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].message_id, 100);
    assert_eq!(log[0].text, "corrected");
    assert!(log[0].edited);
  }

  #[test]
  fn authorless_messages_are_skipped_not_fatal() {
    let mut agg = Aggregator::new();
    agg.ingest_message(&message(None, 100, None, 0), at(0));
    agg.ingest_message(&message(Some(author(5, "alice")), 101, None, 1), at(1));

    assert_eq!(agg.len(), 1);
    assert_eq!(agg.skipped_events(), 1);
  }

  #[test]
  fn member_events_set_roles_authoritatively() {
    let mut agg = Aggregator::new();
    agg.ingest_message(&message(Some(author(5, "alice")), 100, None, 0), at(0));
    agg.ingest_member(
      &MemberEvent {
        group: group(10),
        user:  author(5, "alice"),
        role:  Role::Admin,
      },
      at(1),
    );

    let profile = agg.profile(5).unwrap();
    let m = profile.memberships.get(10).unwrap();
    assert_eq!(m.role, Role::Admin);
    assert!(m.is_admin);
    assert_eq!(m.joined_at, at(0));
  }

  #[test]
  fn stats_count_people_messages_and_groups() {
    let mut agg = Aggregator::new();
    agg.ingest_message(&message(Some(author(5, "alice")), 100, None, 0), at(0));
    agg.ingest_message(&message(Some(author(6, "bob")), 101, None, 1), at(1));

    let mut bot = author(7, "helper_bot");
    bot.flags.is_bot = true;
    agg.ingest_member(
      &MemberEvent { group: group(11), user: bot, role: Role::Member },
      at(2),
    );

    let stats = agg.stats();
    assert_eq!(stats.people, 3);
    assert_eq!(stats.messages, 2);
    assert_eq!(stats.groups, 2);
    assert_eq!(stats.bots, 1);
  }
}
