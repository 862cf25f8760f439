//! Message records and derived reply-thread information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Media ───────────────────────────────────────────────────────────────────

/// The kind of media attached to a message. Absent for text-only messages.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
  Photo,
  Video,
  Audio,
  Document,
  Sticker,
  Animation,
  Voice,
  VideoNote,
}

impl MediaKind {
  /// The serde tag, for histogram keys and text output.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Photo => "photo",
      Self::Video => "video",
      Self::Audio => "audio",
      Self::Document => "document",
      Self::Sticker => "sticker",
      Self::Animation => "animation",
      Self::Voice => "voice",
      Self::VideoNote => "video_note",
    }
  }
}

// ─── Reply info ──────────────────────────────────────────────────────────────

/// Derived reply-thread placement for a message.
///
/// Computed from *this person's own* messages in a group, so it is a
/// best-effort approximation: replies to other authors resolve no further
/// than the reply target id, and `position_in_thread` ranks the person's
/// messages within a thread, not the whole group's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyInfo {
  /// True whenever the raw event carried a reply-target id, whether or not
  /// the parent message itself was retrievable.
  pub has_parent:         bool,
  pub reply_to_id:        Option<i64>,
  /// The furthest known ancestor reachable by following reply links, or the
  /// message's own id when it has no known parent.
  pub thread_root_id:     i64,
  /// Reply hops followed from this message toward the root (0 for roots).
  pub depth:              u32,
  /// 1-based rank by timestamp among the person's messages sharing this
  /// thread root. Filled only once all of a thread's messages are known.
  pub position_in_thread: Option<u32>,
}

impl ReplyInfo {
  /// Initial state straight from an event, before thread linking.
  pub fn seed(message_id: i64, reply_to_id: Option<i64>) -> Self {
    Self {
      has_parent: reply_to_id.is_some(),
      reply_to_id,
      thread_root_id: message_id,
      depth: 0,
      position_in_thread: None,
    }
  }
}

// ─── Message record ──────────────────────────────────────────────────────────

/// One message in a person's per-group log.
///
/// Message id is unique within a group; re-ingesting an id replaces the
/// stored record (last write wins, which is how edits propagate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
  pub group_id:   i64,
  pub message_id: i64,
  pub author_id:  i64,
  pub text:       String,
  pub timestamp:  DateTime<Utc>,
  pub media_kind: Option<MediaKind>,
  #[serde(default)]
  pub reactions:  Vec<String>,
  #[serde(default)]
  pub edited:     bool,
  #[serde(default)]
  pub forwarded:  bool,
  pub reply:      ReplyInfo,
}
