//! Snapshot merging.
//!
//! Capture runs leave one snapshot file per (person, group) pair on disk;
//! merging folds all of a person's files into one canonical `final_*`
//! snapshot. The fold is a pure union over the same data model, so merging
//! is idempotent and insensitive to how inputs are batched. Directory scans
//! use the canonical snapshot as a fast path: capture files from before the
//! second the canonical covers are skipped, anything at or past it refolds.

use std::{
  collections::BTreeMap,
  fs::{self, File},
  path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use sift_core::{
  membership::MembershipLedger,
  message::MessageRecord,
  person::{HistoryEntry, Person},
  snapshot::{Snapshot, SnapshotName},
};
use tracing::{debug, warn};

use crate::{Error, Result, reply};

// ─── Pure fold ───────────────────────────────────────────────────────────────

/// Union-merge a person's snapshots. The base (previous canonical, if any)
/// and the candidates are folded uniformly in capture-time order, so for
/// last-write-wins fields (current handle, flags, message bodies) the
/// newest capture prevails no matter how inputs were batched across merge
/// runs. Returns `None` when there is nothing to fold at all.
///
/// The result's `captured_at` is the newest input's capture time, which is
/// what later merges compare capture files against.
pub fn merge_snapshots(
  person_id: i64,
  base: Option<Snapshot>,
  candidates: Vec<Snapshot>,
) -> Option<Snapshot> {
  let mut inputs: Vec<Snapshot> = base.into_iter().chain(candidates).collect();
  if inputs.is_empty() {
    return None;
  }
  let folded = inputs.len() as u32;
  // Stable: the base sorts ahead of a same-second candidate, so refolding
  // an already-covered capture file changes nothing.
  inputs.sort_by_key(|s| s.captured_at);

  let mut acc = Snapshot {
    person:       Person::new(person_id),
    memberships:  MembershipLedger::new(),
    groups:       BTreeMap::new(),
    captured_at:  DateTime::<Utc>::MIN_UTC,
    merged_files: folded,
  };

  for input in inputs {
    acc.captured_at = acc.captured_at.max(input.captured_at);
    fold_person(&mut acc.person, input.person);
    for membership in input.memberships.iter() {
      acc.memberships.absorb(membership.clone());
    }
    for (group_id, messages) in input.groups {
      let log = acc.groups.entry(group_id).or_default();
      for record in messages {
        upsert_message(log, record);
      }
    }
  }

  // Thread placement depends on the union, not on any one input file.
  for messages in acc.groups.values_mut() {
    reply::link_threads(messages);
  }

  Some(acc)
}

/// Fold one person record into the accumulator.
///
/// Histories union by value (keeping each value's latest `changed_at`);
/// scalar identity fields take the incoming value when present; the
/// observation window widens to cover both records.
fn fold_person(acc: &mut Person, incoming: Person) {
  union_history(&mut acc.handle_history, incoming.handle_history);
  union_history(&mut acc.name_history, incoming.name_history);

  if incoming.handle.is_some() {
    acc.handle = incoming.handle;
  }
  if incoming.display_name.is_some() {
    acc.display_name = incoming.display_name;
  }
  acc.flags = incoming.flags;

  if let Some(first) = incoming.first_seen {
    acc.touch(first);
  }
  if let Some(last) = incoming.last_seen {
    acc.touch(last);
  }
}

/// Union two history lists by value. Duplicate values keep their latest
/// `changed_at`; the result is ordered by `(changed_at, value)` so the
/// outcome never depends on input order.
fn union_history(into: &mut Vec<HistoryEntry>, other: Vec<HistoryEntry>) {
  let mut latest: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
  for entry in into.drain(..).chain(other) {
    latest
      .entry(entry.value)
      .and_modify(|at| *at = (*at).max(entry.changed_at))
      .or_insert(entry.changed_at);
  }

  let mut merged: Vec<HistoryEntry> = latest
    .into_iter()
    .map(|(value, changed_at)| HistoryEntry { value, changed_at })
    .collect();
  merged.sort_by(|a, b| {
    a.changed_at.cmp(&b.changed_at).then_with(|| a.value.cmp(&b.value))
  });
  *into = merged;
}

fn upsert_message(log: &mut Vec<MessageRecord>, record: MessageRecord) {
  match log.iter_mut().find(|m| m.message_id == record.message_id) {
    Some(existing) => *existing = record,
    None => log.push(record),
  }
}

// ─── Directory merge ─────────────────────────────────────────────────────────

/// Result of a directory merge pass for one person.
#[derive(Debug)]
pub enum MergeOutcome {
  /// A new canonical snapshot was written to `path`.
  Merged {
    name:     SnapshotName,
    snapshot: Snapshot,
    path:     PathBuf,
    /// Source files folded in, the pre-existing canonical included.
    folded:   usize,
  },
  /// The newest canonical snapshot already covers every file on disk.
  Unchanged { name: SnapshotName, path: PathBuf },
  /// No snapshot files for this person were found. A legitimate state,
  /// not an error.
  NothingToMerge,
}

/// Merge every snapshot file for `person_id` under `dir` into a fresh
/// canonical snapshot.
///
/// Filenames that do not parse as snapshot names are ignored (the directory
/// may hold unrelated files); files whose *name* parses but whose body does
/// not are logged and skipped, so one corrupt capture cannot block the
/// merge. An exclusive per-person lock file serialises concurrent merges.
pub fn merge_dir(
  dir: &Path,
  person_id: i64,
  merged_at: DateTime<Utc>,
) -> Result<MergeOutcome> {
  let _lock = MergeLock::acquire(dir, person_id)?;

  let mut canonicals: Vec<(SnapshotName, PathBuf)> = Vec::new();
  let mut captures: Vec<(SnapshotName, PathBuf)> = Vec::new();
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    let Some(filename) = entry.file_name().to_str().map(str::to_owned) else {
      continue;
    };
    let Ok(name) = SnapshotName::parse(&filename) else { continue };
    if name.person_id != person_id {
      continue;
    }
    if name.canonical {
      canonicals.push((name, entry.path()));
    } else {
      captures.push((name, entry.path()));
    }
  }

  // Newest canonical wins; the disambiguator breaks same-second ties
  // deterministically.
  canonicals.sort_by(|a, b| {
    (a.0.captured_at, &a.0.disambiguator)
      .cmp(&(b.0.captured_at, &b.0.disambiguator))
  });
  let canonical = canonicals.pop();

  let base = match &canonical {
    Some((_, path)) => match load_snapshot(path) {
      Ok(snapshot) => Some(snapshot),
      Err(err) => {
        warn!(%err, "canonical snapshot unreadable, remerging from captures");
        None
      }
    },
    None => None,
  };

  // With a usable canonical, captures from before its coverage are already
  // folded in. Filename timestamps carry only second precision, so the cut
  // is inclusive at second granularity: a capture from the same second as
  // the canonical's coverage refolds (a no-op for already-covered data)
  // instead of being dropped.
  if let (Some(base), Some((name, path))) = (&base, &canonical) {
    let covered_until = base.captured_at.timestamp();
    captures.retain(|(n, _)| n.captured_at.timestamp() >= covered_until);
    if captures.is_empty() {
      debug!(person_id, "canonical already up to date");
      return Ok(MergeOutcome::Unchanged {
        name: name.clone(),
        path: path.clone(),
      });
    }
  }

  let mut candidates = Vec::with_capacity(captures.len());
  for (name, path) in captures {
    match load_snapshot(&path) {
      Ok(snapshot) if snapshot.person_id() == person_id => {
        candidates.push(snapshot);
      }
      Ok(snapshot) => {
        warn!(
          filename = name.render(),
          body_person = snapshot.person_id(),
          "snapshot body disagrees with filename, skipping"
        );
      }
      Err(err) => warn!(%err, "skipping unreadable capture"),
    }
  }

  let folded = candidates.len() + usize::from(base.is_some());
  let Some(snapshot) = merge_snapshots(person_id, base, candidates) else {
    return Ok(MergeOutcome::NothingToMerge);
  };

  let name = SnapshotName::canonical(person_id, merged_at);
  let path = dir.join(name.render());
  fs::write(&path, snapshot.to_json_string().map_err(Error::Core)?)?;
  debug!(person_id, folded, path = %path.display(), "wrote canonical snapshot");

  Ok(MergeOutcome::Merged { name, snapshot, path, folded })
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
  let raw = fs::read_to_string(path)?;
  Snapshot::from_json_str(&raw).map_err(|source| Error::UnreadableSnapshot {
    path: path.to_owned(),
    source,
  })
}

/// Exclusive advisory lock, one per (directory, person). Released on drop.
struct MergeLock {
  _file: File,
}

impl MergeLock {
  fn acquire(dir: &Path, person_id: i64) -> Result<Self> {
    let file = File::create(dir.join(format!(".merge_{person_id}.lock")))?;
    file
      .try_lock_exclusive()
      .map_err(|_| Error::MergeLocked(person_id))?;
    Ok(Self { _file: file })
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
