//! `sift` — aggregate chat capture events into per-person activity profiles.
//!
//! # Usage
//!
//! ```
//! sift ingest batch1.jsonl batch2.jsonl
//! sift merge 42
//! sift stats --days 7
//! ```
//!
//! Reads `sift.toml` (or the path given with `--config`); every setting can
//! also come from a `SIFT_`-prefixed environment variable.

use std::{
  fs::File,
  io::{BufRead as _, BufReader},
  path::PathBuf,
};

use anyhow::{Context as _, Result, bail};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use sift_core::{event::Event, presence::PresenceStore as _};
use sift_engine::{aggregator::Aggregator, merge};
use sift_sink::{
  FileSink, PersistReport, RemoteConfig, RemoteSink, RunSummary, Sink,
};
use sift_store_sqlite::SqliteStore;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "sift", about = "Identity and activity aggregation engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "sift.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Aggregate JSONL event batches and persist the resulting snapshots.
  Ingest {
    /// Event files, one JSON event object per line.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Also upload profiles to the configured remote channel.
    #[arg(long)]
    upload: bool,
  },

  /// Fold one person's snapshot files into a canonical snapshot.
  Merge {
    person_id: i64,

    /// Directory holding the snapshot files (defaults to `output_dir`).
    #[arg(long)]
    dir: Option<PathBuf>,
  },

  /// Presence-store statistics.
  Stats {
    /// Window, in days, for the recently-seen count.
    #[arg(long, default_value_t = 7)]
    days: u32,
  },
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Runtime configuration, layered from `sift.toml` and `SIFT_*` variables.
#[derive(Debug, Clone, Deserialize)]
struct Settings {
  /// Where capture files, digests, and summaries are written, and where
  /// `merge` looks for snapshot files.
  #[serde(default = "default_output_dir")]
  output_dir: PathBuf,

  /// Presence database path. The presence sink and `stats` need this.
  presence_db: Option<PathBuf>,

  /// Remote channel sink; uploads are skipped when absent.
  remote: Option<RemoteSettings>,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteSettings {
  base_url:   String,
  channel_id: String,
  token:      Option<String>,
}

fn default_output_dir() -> PathBuf { PathBuf::from("profiles") }

fn load_settings(path: &PathBuf) -> Result<Settings> {
  let settings = config::Config::builder()
    .add_source(config::File::from(path.clone()).required(false))
    .add_source(config::Environment::with_prefix("SIFT"))
    .build()
    .context("failed to read configuration")?;
  settings
    .try_deserialize()
    .context("failed to deserialise settings")
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = load_settings(&cli.config)?;

  match cli.command {
    Command::Ingest { inputs, upload } => ingest(settings, inputs, upload).await,
    Command::Merge { person_id, dir } => merge_command(settings, person_id, dir),
    Command::Stats { days } => stats(settings, days).await,
  }
}

// ─── ingest ──────────────────────────────────────────────────────────────────

async fn ingest(
  settings: Settings,
  inputs: Vec<PathBuf>,
  upload: bool,
) -> Result<()> {
  let started_at = Utc::now();

  let mut aggregator = Aggregator::new();
  for path in &inputs {
    let read = read_events(path, &mut aggregator)
      .with_context(|| format!("failed to read {path:?}"))?;
    info!(path = %path.display(), events = read, "ingested batch");
  }
  if aggregator.is_empty() {
    info!("no usable events; nothing to persist");
    return Ok(());
  }

  let sinks = build_sinks(&settings, upload).await?;
  let file_sink = FileSink::new(&settings.output_dir);

  let mut profiles_written = 0;
  let mut sink_failures = 0;
  for person_id in aggregator.person_ids() {
    let Some(snapshot) = aggregator.snapshot(person_id, Utc::now()) else {
      continue;
    };
    for (group_id, log) in &snapshot.groups {
      for thread in sift_engine::reply::summarize_threads(log) {
        if thread.messages > 1 {
          tracing::debug!(
            person_id,
            group_id,
            root = thread.root_id,
            messages = thread.messages,
            mean_gap_secs = thread.mean_gap_secs,
            "reply thread"
          );
        }
      }
    }
    let report = sift_sink::persist(&sinks, &snapshot).await;
    profiles_written += written_profiles(&report, snapshot.groups.len());
    sink_failures += report.failures.len();
  }

  let stats = aggregator.stats();
  let summary = RunSummary {
    started_at,
    finished_at: Utc::now(),
    people: stats.people,
    groups: stats.groups,
    messages: stats.messages,
    skipped_events: stats.skipped_events,
    profiles_written,
    sink_failures,
  };
  let summary_path = file_sink.write_summary(&summary)?;
  info!(path = %summary_path.display(), "wrote run summary");

  if upload {
    if let Some(remote) = &settings.remote {
      let sink = RemoteSink::new(remote_config(remote))?;
      if let Err(err) = sink.upload_summary(&summary).await {
        warn!(%err, "summary upload failed");
      }
    }
  }

  println!("{}", serde_json::to_string_pretty(&summary)?);
  Ok(())
}

/// Parse one JSONL batch into the aggregator. Undecodable lines are logged
/// and skipped. Returns the number of events folded in.
fn read_events(path: &PathBuf, aggregator: &mut Aggregator) -> Result<usize> {
  let file = File::open(path)?;
  let mut read = 0;
  for (lineno, line) in BufReader::new(file).lines().enumerate() {
    let line = line?;
    if line.trim().is_empty() {
      continue;
    }
    match serde_json::from_str::<Event>(&line) {
      Ok(event) => {
        aggregator.ingest(&event, Utc::now());
        read += 1;
      }
      Err(err) => {
        warn!(path = %path.display(), line = lineno + 1, %err, "skipping bad line");
      }
    }
  }
  Ok(read)
}

/// Profiles the file sink wrote for one snapshot: one per group when it
/// succeeded, none when it reported a failure.
fn written_profiles(report: &PersistReport, groups: usize) -> usize {
  if report.failures.iter().any(|(kind, _)| *kind == "file") {
    0
  } else {
    groups
  }
}

async fn build_sinks(settings: &Settings, upload: bool) -> Result<Vec<Sink>> {
  let mut sinks = vec![Sink::File(FileSink::new(&settings.output_dir))];

  if let Some(db) = &settings.presence_db {
    let store = SqliteStore::open(db)
      .await
      .with_context(|| format!("failed to open presence store at {db:?}"))?;
    sinks.push(Sink::Presence(store));
  }

  if upload {
    let Some(remote) = &settings.remote else {
      bail!("--upload requires a [remote] section in the configuration");
    };
    sinks.push(Sink::Remote(RemoteSink::new(remote_config(remote))?));
  }

  Ok(sinks)
}

fn remote_config(remote: &RemoteSettings) -> RemoteConfig {
  RemoteConfig {
    base_url:   remote.base_url.clone(),
    channel_id: remote.channel_id.clone(),
    token:      remote.token.clone(),
  }
}

// ─── merge ───────────────────────────────────────────────────────────────────

fn merge_command(
  settings: Settings,
  person_id: i64,
  dir: Option<PathBuf>,
) -> Result<()> {
  let dir = dir.unwrap_or(settings.output_dir);
  let outcome = merge::merge_dir(&dir, person_id, Utc::now())
    .with_context(|| format!("merge failed for person {person_id}"))?;

  match outcome {
    merge::MergeOutcome::Merged { snapshot, path, folded, .. } => {
      info!(
        person_id,
        folded,
        messages = snapshot.message_count(),
        path = %path.display(),
        "merged"
      );
      println!("{}", path.display());
    }
    merge::MergeOutcome::Unchanged { path, .. } => {
      info!(person_id, path = %path.display(), "already up to date");
      println!("{}", path.display());
    }
    merge::MergeOutcome::NothingToMerge => {
      info!(person_id, dir = %dir.display(), "no snapshot files found");
    }
  }
  Ok(())
}

// ─── stats ───────────────────────────────────────────────────────────────────

async fn stats(settings: Settings, days: u32) -> Result<()> {
  let Some(db) = &settings.presence_db else {
    bail!("stats requires `presence_db` in the configuration");
  };
  let store = SqliteStore::open(db)
    .await
    .with_context(|| format!("failed to open presence store at {db:?}"))?;

  let since: DateTime<Utc> = Utc::now() - Duration::days(i64::from(days));
  let total = store.count().await?;
  let recent = store.recent(since).await?;

  println!("tracked people: {total}");
  println!("seen in the last {days} days: {}", recent.len());
  Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
