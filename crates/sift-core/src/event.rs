//! Raw events supplied by capture collaborators.
//!
//! Source data is loosely typed: almost every field can be absent. The
//! shapes here make that explicit with `Option` fields; the aggregator is
//! responsible for presence checks and fallbacks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  membership::Role,
  message::{MediaKind, MessageRecord, ReplyInfo},
  person::PersonFlags,
};

// ─── Shared refs ─────────────────────────────────────────────────────────────

/// The author attached to a message, or the user of a member event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
  pub id:           Option<i64>,
  pub handle:       Option<String>,
  pub display_name: Option<String>,
  #[serde(default)]
  pub flags:        PersonFlags,
}

/// The group a message or membership was observed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRef {
  pub id:     i64,
  pub title:  Option<String>,
  pub handle: Option<String>,
}

// ─── Message event ───────────────────────────────────────────────────────────

/// One captured chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
  pub group:        GroupRef,
  pub message_id:   i64,
  pub author:       Option<Author>,
  #[serde(default)]
  pub text:         String,
  pub timestamp:    Option<DateTime<Utc>>,
  pub media_kind:   Option<MediaKind>,
  pub reply_to_id:  Option<i64>,
  pub edited_at:    Option<DateTime<Utc>>,
  pub forwarded_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub reactions:    Vec<String>,
}

impl MessageEvent {
  /// The author's id, or [`Error::MalformedEvent`] when the event carries no
  /// usable author. Such events are skipped, never fatal.
  pub fn author_id(&self) -> Result<i64> {
    self
      .author
      .as_ref()
      .and_then(|a| a.id)
      .ok_or(Error::MalformedEvent("author id"))
  }

  /// Build the stored record. `observed_at` is the processing-time fallback
  /// used when the event has no timestamp.
  pub fn to_record(&self, author_id: i64, observed_at: DateTime<Utc>) -> MessageRecord {
    MessageRecord {
      group_id:   self.group.id,
      message_id: self.message_id,
      author_id,
      text:       self.text.clone(),
      timestamp:  self.timestamp.unwrap_or(observed_at),
      media_kind: self.media_kind,
      reactions:  self.reactions.clone(),
      edited:     self.edited_at.is_some(),
      forwarded:  self.forwarded_at.is_some(),
      reply:      ReplyInfo::seed(self.message_id, self.reply_to_id),
    }
  }
}

// ─── Member event ────────────────────────────────────────────────────────────

/// One entry from a group membership listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberEvent {
  pub group: GroupRef,
  pub user:  Author,
  #[serde(default)]
  pub role:  Role,
}

impl MemberEvent {
  pub fn user_id(&self) -> Result<i64> {
    self.user.id.ok_or(Error::MalformedEvent("user id"))
  }
}

// ─── Tagged envelope ─────────────────────────────────────────────────────────

/// Either event kind, as read from a capture batch (one JSON object per
/// line, discriminated by the `kind` tag).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
  Message(MessageEvent),
  Member(MemberEvent),
}
