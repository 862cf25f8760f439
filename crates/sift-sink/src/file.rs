//! The file sink: per-(person, group) profile exports.
//!
//! Each write leaves three files: a deterministically named profile JSON
//! (overwritten on re-persist), a capture file in the snapshot filename
//! grammar the merge engine folds later, and a human-oriented `.txt`
//! digest of the same content.

use std::{
  fmt::Write as _,
  fs,
  path::{Path, PathBuf},
};

use sift_core::{
  membership::Membership,
  message::MessageRecord,
  person::Person,
  snapshot::{Snapshot, SnapshotName},
};
use tracing::debug;

use crate::{Result, sink::RunSummary};

/// Characters that are not portable in filenames across filesystems.
const INVALID_FILENAME_CHARS: &[char] =
  &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const MAX_NAME_LEN: usize = 50;

const SUMMARY_TS_FORMAT: &str = "%Y%m%d_%H%M%S";

// ─── Sink ────────────────────────────────────────────────────────────────────

/// Writes snapshots and summaries under one output directory.
#[derive(Debug, Clone)]
pub struct FileSink {
  root: PathBuf,
}

/// Paths produced by one [`FileSink::write_profile`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePaths {
  /// `{person}_{group}_{sanitized title}_profile.json`; stable, so a
  /// re-persist overwrites in place.
  pub profile: PathBuf,
  /// Capture-named snapshot file, input to the merge engine.
  pub capture: PathBuf,
  pub digest:  PathBuf,
}

impl FileSink {
  /// The directory is created lazily on first write.
  pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

  pub fn root(&self) -> &Path { &self.root }

  /// Write one group's slice of a person snapshot.
  pub fn write_profile(
    &self,
    snapshot: &Snapshot,
    group_id: i64,
  ) -> Result<ProfilePaths> {
    fs::create_dir_all(&self.root)?;

    let person_id = snapshot.person_id();
    let scoped = snapshot.scoped_to_group(group_id);
    let body = scoped.to_json_string()?;

    let group_title = scoped
      .memberships
      .get(group_id)
      .map(|m| m.group_title.as_str())
      .filter(|t| !t.is_empty())
      .unwrap_or("");
    let slug = sanitize_group_name(group_title);

    let profile = self
      .root
      .join(format!("{person_id}_{group_id}_{slug}_profile.json"));
    fs::write(&profile, &body)?;

    let name = SnapshotName::capture(person_id, group_id, snapshot.captured_at);
    let capture = self.root.join(name.render());
    fs::write(&capture, &body)?;

    let digest = self
      .root
      .join(format!("{person_id}_{group_id}_{slug}_profile.txt"));
    fs::write(&digest, render_digest(&scoped, group_id))?;

    debug!(person_id, group_id, path = %profile.display(), "wrote profile");
    Ok(ProfilePaths { profile, capture, digest })
  }

  /// Write the end-of-run summary JSON.
  pub fn write_summary(&self, summary: &RunSummary) -> Result<PathBuf> {
    fs::create_dir_all(&self.root)?;
    let path = self.root.join(format!(
      "summary_{}.json",
      summary.finished_at.format(SUMMARY_TS_FORMAT)
    ));
    fs::write(&path, serde_json::to_string_pretty(summary).map_err(sift_core::Error::from)?)?;
    Ok(path)
  }
}

// ─── Sanitiser ───────────────────────────────────────────────────────────────

/// Make a group title safe for use inside a filename.
///
/// Invalid filesystem characters, whitespace, and control characters become
/// `_`; runs collapse to a single `_`; leading/trailing `_` and `.` are
/// trimmed; output is capped at 50 characters. An empty result falls back
/// to `unnamed_group`.
pub fn sanitize_group_name(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  let mut previous_was_sep = false;
  for c in raw.chars() {
    let sep = INVALID_FILENAME_CHARS.contains(&c)
      || c.is_whitespace()
      || c.is_control();
    if sep {
      if !previous_was_sep {
        out.push('_');
      }
    } else {
      out.push(c);
    }
    previous_was_sep = sep;
  }

  let capped: String = out
    .trim_matches(|c| c == '_' || c == '.')
    .chars()
    .take(MAX_NAME_LEN)
    .collect();
  let trimmed = capped.trim_end_matches(['_', '.']);
  if trimmed.is_empty() {
    "unnamed_group".to_owned()
  } else {
    trimmed.to_owned()
  }
}

// ─── Digest rendering ────────────────────────────────────────────────────────

fn render_digest(snapshot: &Snapshot, group_id: i64) -> String {
  let mut out = String::new();
  render_person(&mut out, &snapshot.person);
  if let Some(m) = snapshot.memberships.get(group_id) {
    render_membership(&mut out, m);
  }
  if let Some(messages) = snapshot.groups.get(&group_id) {
    render_messages(&mut out, messages);
  }
  out
}

fn render_person(out: &mut String, person: &Person) {
  let _ = writeln!(
    out,
    "person {} (@{}, {:?})",
    person.person_id,
    person.handle.as_deref().unwrap_or("-"),
    person.display_name.as_deref().unwrap_or("-"),
  );
  let mut flags = Vec::new();
  for (set, label) in [
    (person.flags.is_bot, "bot"),
    (person.flags.is_deleted, "deleted"),
    (person.flags.is_verified, "verified"),
    (person.flags.is_scam, "scam"),
    (person.flags.is_fake, "fake"),
    (person.flags.is_premium, "premium"),
  ] {
    if set {
      flags.push(label);
    }
  }
  if !flags.is_empty() {
    let _ = writeln!(out, "flags: {}", flags.join(", "));
  }
  if let (Some(first), Some(last)) = (person.first_seen, person.last_seen) {
    let _ = writeln!(out, "seen: {first} .. {last}");
  }
  for entry in &person.handle_history {
    let _ = writeln!(out, "former handle: {} (until {})", entry.value, entry.changed_at);
  }
  for entry in &person.name_history {
    let _ = writeln!(out, "former name: {} (until {})", entry.value, entry.changed_at);
  }
}

fn render_membership(out: &mut String, m: &Membership) {
  let _ = writeln!(
    out,
    "group: {} ({}), role {:?}, joined {}",
    if m.group_title.is_empty() { "?" } else { &m.group_title },
    m.group_id,
    m.role,
    m.joined_at,
  );
}

fn render_messages(out: &mut String, messages: &[MessageRecord]) {
  let _ = writeln!(out, "messages: {}", messages.len());
  for m in messages {
    let _ = write!(out, "[{}] #{}", m.timestamp, m.message_id);
    if let Some(target) = m.reply.reply_to_id {
      let _ = write!(
        out,
        " (reply -> {target}, thread {} pos {})",
        m.reply.thread_root_id,
        m.reply
          .position_in_thread
          .map(|p| p.to_string())
          .unwrap_or_else(|| "?".into()),
      );
    }
    if let Some(kind) = m.media_kind {
      let _ = write!(out, " [{}]", kind.as_str());
    }
    if m.edited {
      let _ = write!(out, " (edited)");
    }
    let _ = writeln!(out, " {}", m.text);
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
