//! Reply-thread reconstruction over one person's group log.
//!
//! The log only contains the person's own messages, so linking is
//! best-effort: a reply to someone else's message still gets a thread root
//! (the reply target id) even though that message is not in the log.
//! Root chasing is bounded so malformed reply cycles cannot loop.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sift_core::message::MessageRecord;

/// Maximum reply hops followed from a message toward its thread root.
pub const MAX_REPLY_HOPS: u32 = 5;

// ─── Linking ─────────────────────────────────────────────────────────────────

/// Fill in `thread_root_id`, `depth`, and `position_in_thread` for every
/// record in one group log. Idempotent; safe to re-run after new messages
/// arrive.
pub fn link_threads(messages: &mut [MessageRecord]) {
  let by_id: HashMap<i64, usize> = messages
    .iter()
    .enumerate()
    .map(|(idx, m)| (m.message_id, idx))
    .collect();

  // Pass 1: chase each message's reply chain to its furthest known
  // ancestor. The reply target id counts as an ancestor even when the
  // target record itself is absent from the log.
  let placements: Vec<(i64, u32)> = messages
    .iter()
    .map(|m| {
      let mut root = m.message_id;
      let mut depth = 0;
      let mut cursor = m.reply.reply_to_id;
      while let Some(parent_id) = cursor {
        if depth == MAX_REPLY_HOPS {
          break;
        }
        depth += 1;
        root = parent_id;
        cursor = by_id
          .get(&parent_id)
          .and_then(|&idx| messages[idx].reply.reply_to_id);
      }
      (root, depth)
    })
    .collect();

  for (m, (root, depth)) in messages.iter_mut().zip(&placements) {
    m.reply.has_parent = m.reply.reply_to_id.is_some();
    m.reply.thread_root_id = *root;
    m.reply.depth = *depth;
  }

  // Pass 2: rank each thread's messages by timestamp. Indices are pushed
  // in log (ingestion) order and the sort is stable, so equal timestamps
  // keep ingestion order.
  let mut threads: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
  for (idx, m) in messages.iter().enumerate() {
    threads.entry(m.reply.thread_root_id).or_default().push(idx);
  }

  let stamps: Vec<DateTime<Utc>> = messages.iter().map(|m| m.timestamp).collect();
  for indices in threads.values_mut() {
    indices.sort_by_key(|&idx| stamps[idx]);
    for (rank, &idx) in indices.iter().enumerate() {
      messages[idx].reply.position_in_thread = Some(rank as u32 + 1);
    }
  }
}

// ─── Summaries ───────────────────────────────────────────────────────────────

/// Aggregate view of one reply thread, for stats output and run logs.
/// Derived data; never persisted as ground truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadSummary {
  pub root_id:       i64,
  pub messages:      usize,
  pub first:         DateTime<Utc>,
  pub last:          DateTime<Utc>,
  pub max_depth:     u32,
  /// Mean seconds between consecutive messages; 0 for single-message
  /// threads.
  pub mean_gap_secs: f64,
  /// Media kind tag to occurrence count within the thread.
  pub media:         BTreeMap<&'static str, usize>,
}

/// Summarize the threads of an already-linked group log, ordered by root id.
pub fn summarize_threads(messages: &[MessageRecord]) -> Vec<ThreadSummary> {
  let mut threads: BTreeMap<i64, ThreadSummary> = BTreeMap::new();
  for m in messages {
    let t = threads.entry(m.reply.thread_root_id).or_insert(ThreadSummary {
      root_id:       m.reply.thread_root_id,
      messages:      0,
      first:         m.timestamp,
      last:          m.timestamp,
      max_depth:     0,
      mean_gap_secs: 0.0,
      media:         BTreeMap::new(),
    });
    t.messages += 1;
    t.first = t.first.min(m.timestamp);
    t.last = t.last.max(m.timestamp);
    t.max_depth = t.max_depth.max(m.reply.depth);
    if let Some(kind) = m.media_kind {
      *t.media.entry(kind.as_str()).or_insert(0) += 1;
    }
  }

  let mut summaries: Vec<ThreadSummary> = threads.into_values().collect();
  for t in &mut summaries {
    if t.messages > 1 {
      t.mean_gap_secs =
        (t.last - t.first).num_seconds() as f64 / (t.messages - 1) as f64;
    }
  }
  summaries
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use sift_core::message::ReplyInfo;

  use super::*;

  fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
  }

  fn msg(id: i64, reply_to: Option<i64>, minute: u32) -> MessageRecord {
    MessageRecord {
      group_id:   10,
      message_id: id,
      author_id:  5,
      text:       format!("m{id}"),
      timestamp:  at(minute),
      media_kind: None,
      reactions:  Vec::new(),
      edited:     false,
      forwarded:  false,
      reply:      ReplyInfo::seed(id, reply_to),
    }
  }

  #[test]
  fn standalone_message_is_its_own_root() {
    let mut log = vec![msg(100, None, 0)];
    link_threads(&mut log);

    let r = &log[0].reply;
    assert!(!r.has_parent);
    assert_eq!(r.thread_root_id, 100);
    assert_eq!(r.depth, 0);
    assert_eq!(r.position_in_thread, Some(1));
  }

  #[test]
  fn chain_resolves_to_shared_root_with_positions() {
    let mut log = vec![
      msg(100, None, 0),
      msg(101, Some(100), 1),
      msg(102, Some(101), 2),
    ];
    link_threads(&mut log);

    for m in &log {
      assert_eq!(m.reply.thread_root_id, 100);
    }
    assert_eq!(log[0].reply.depth, 0);
    assert_eq!(log[1].reply.depth, 1);
    assert_eq!(log[2].reply.depth, 2);
    assert_eq!(log[0].reply.position_in_thread, Some(1));
    assert_eq!(log[1].reply.position_in_thread, Some(2));
    assert_eq!(log[2].reply.position_in_thread, Some(3));
  }

  #[test]
  fn reply_to_unknown_message_roots_at_the_target_id() {
    // The person replied to someone else's message 90, which is not in
    // their own log.
    let mut log = vec![msg(101, Some(90), 1)];
    link_threads(&mut log);

    let r = &log[0].reply;
    assert!(r.has_parent);
    assert_eq!(r.thread_root_id, 90);
    assert_eq!(r.depth, 1);
  }

  #[test]
  fn root_chase_is_bounded() {
    // 100 <- 101 <- ... <- 107, deeper than the hop cap.
    let mut log: Vec<MessageRecord> = (0..8)
      .map(|i| msg(100 + i, (i > 0).then(|| 99 + i), i as u32))
      .collect();
    link_threads(&mut log);

    let deepest = log.last().unwrap();
    assert_eq!(deepest.reply.depth, MAX_REPLY_HOPS);
    // 5 hops up from 107 lands on 102.
    assert_eq!(deepest.reply.thread_root_id, 102);
  }

  #[test]
  fn reply_cycle_terminates() {
    let mut log = vec![msg(100, Some(101), 0), msg(101, Some(100), 1)];
    link_threads(&mut log);

    assert_eq!(log[0].reply.depth, MAX_REPLY_HOPS);
    assert_eq!(log[1].reply.depth, MAX_REPLY_HOPS);
  }

  #[test]
  fn equal_timestamps_keep_ingestion_order() {
    let mut log = vec![
      msg(100, None, 0),
      msg(102, Some(100), 1),
      msg(101, Some(100), 1),
    ];
    link_threads(&mut log);

    assert_eq!(log[1].reply.position_in_thread, Some(2));
    assert_eq!(log[2].reply.position_in_thread, Some(3));
  }

  #[test]
  fn summaries_cover_each_thread_once() {
    let mut log = vec![
      msg(100, None, 0),
      msg(101, Some(100), 3),
      msg(200, None, 1),
    ];
    log[1].media_kind = Some(sift_core::message::MediaKind::Photo);
    link_threads(&mut log);
    let summaries = summarize_threads(&log);

    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].root_id, 100);
    assert_eq!(summaries[0].messages, 2);
    assert_eq!(summaries[0].first, at(0));
    assert_eq!(summaries[0].last, at(3));
    assert_eq!(summaries[0].max_depth, 1);
    // Two messages three minutes apart.
    assert_eq!(summaries[0].mean_gap_secs, 180.0);
    assert_eq!(summaries[0].media.get("photo"), Some(&1));
    assert_eq!(summaries[1].root_id, 200);
    assert_eq!(summaries[1].messages, 1);
    assert_eq!(summaries[1].mean_gap_secs, 0.0);
  }
}
