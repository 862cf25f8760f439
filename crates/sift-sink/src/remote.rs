//! The remote channel sink: captioned document uploads over HTTP.
//!
//! Documents go to `POST {base}/channels/{channel}/documents` as JSON. The
//! receiving service rate-limits aggressively; a 429 is retried exactly
//! once after honouring `Retry-After`, then surfaces as an error.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use sift_core::snapshot::{Snapshot, SnapshotName};
use tracing::{debug, warn};

use crate::{Error, Result, sink::RunSummary};

/// Fallback pause when a 429 carries no usable `Retry-After` header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Connection settings for the remote channel.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
  pub base_url:   String,
  pub channel_id: String,
  /// Bearer token; uploads go unauthenticated when absent.
  pub token:      Option<String>,
}

#[derive(Serialize)]
struct DocumentUpload<'a> {
  filename: &'a str,
  caption:  &'a str,
  content:  &'a str,
}

/// Async HTTP client for the channel document API.
///
/// Cheap to clone — the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct RemoteSink {
  client: Client,
  config: RemoteConfig,
}

impl RemoteSink {
  pub fn new(config: RemoteConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()?;
    Ok(Self { client, config })
  }

  fn url(&self) -> String {
    format!(
      "{}/channels/{}/documents",
      self.config.base_url.trim_end_matches('/'),
      self.config.channel_id,
    )
  }

  /// Upload one group's slice of a person snapshot, captioned with the
  /// person's identity and the group's message count.
  pub async fn upload_profile(
    &self,
    snapshot: &Snapshot,
    group_id: i64,
  ) -> Result<()> {
    let person = &snapshot.person;
    let caption = profile_caption(snapshot, group_id);
    let name =
      SnapshotName::capture(person.person_id, group_id, snapshot.captured_at);
    let scoped = snapshot.scoped_to_group(group_id);
    self
      .upload(&name.render(), &caption, &scoped.to_json_string()?)
      .await
  }

  /// Upload the end-of-run summary.
  pub async fn upload_summary(&self, summary: &RunSummary) -> Result<()> {
    let caption = format!(
      "run summary: {} people, {} groups, {} messages",
      summary.people, summary.groups, summary.messages,
    );
    let content = serde_json::to_string_pretty(summary)
      .map_err(sift_core::Error::from)?;
    let filename =
      format!("summary_{}.json", summary.finished_at.format("%Y%m%d_%H%M%S"));
    self.upload(&filename, &caption, &content).await
  }

  async fn upload(
    &self,
    filename: &str,
    caption: &str,
    content: &str,
  ) -> Result<()> {
    let body = DocumentUpload { filename, caption, content };

    let mut resp = self.send(&body).await?;
    if resp.status() == StatusCode::TOO_MANY_REQUESTS {
      // One retry after the server-suggested pause.
      let pause = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(retry_after)
        .unwrap_or(DEFAULT_RETRY_AFTER);
      warn!(filename, pause_secs = pause.as_secs(), "rate limited, retrying");
      tokio::time::sleep(pause).await;
      resp = self.send(&body).await?;
    }
    if !resp.status().is_success() {
      return Err(Error::RemoteStatus(resp.status()));
    }

    debug!(filename, "uploaded document");
    Ok(())
  }

  async fn send(&self, body: &DocumentUpload<'_>) -> Result<reqwest::Response> {
    let mut req = self.client.post(self.url()).json(body);
    if let Some(token) = &self.config.token {
      req = req.bearer_auth(token);
    }
    Ok(req.send().await?)
  }
}

/// Caption for a profile document: who, where, and how much.
fn profile_caption(snapshot: &Snapshot, group_id: i64) -> String {
  let person = &snapshot.person;
  let who = match (person.display_name.as_deref(), person.handle.as_deref()) {
    (Some(name), Some(handle)) => format!("{name} (@{handle})"),
    (Some(name), None) => name.to_owned(),
    (None, Some(handle)) => format!("@{handle}"),
    (None, None) => format!("person {}", person.person_id),
  };
  let group = snapshot
    .memberships
    .get(group_id)
    .map(|m| m.group_title.clone())
    .filter(|t| !t.is_empty())
    .unwrap_or_else(|| group_id.to_string());
  let count = snapshot.groups.get(&group_id).map_or(0, Vec::len);
  format!("{who} in {group}: {count} messages")
}

/// Parse a `Retry-After` header carrying a delay in whole seconds. The
/// HTTP-date form is not handled; callers fall back to a fixed pause.
fn retry_after(value: &reqwest::header::HeaderValue) -> Option<Duration> {
  value.to_str().ok()?.parse::<u64>().ok().map(Duration::from_secs)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use chrono::{TimeZone, Utc};
  use reqwest::header::HeaderValue;
  use sift_core::{
    event::GroupRef, membership::MembershipLedger, person::Person,
  };
  use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpListener,
  };

  use super::*;
  use crate::Error;

  #[test]
  fn retry_after_parses_whole_seconds_only() {
    assert_eq!(
      retry_after(&HeaderValue::from_static("5")),
      Some(Duration::from_secs(5))
    );
    assert_eq!(
      retry_after(&HeaderValue::from_static("0")),
      Some(Duration::ZERO)
    );
    assert_eq!(retry_after(&HeaderValue::from_static("")), None);
    assert_eq!(retry_after(&HeaderValue::from_static("-3")), None);
    assert_eq!(
      retry_after(&HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT")),
      None
    );
  }

  fn caption_snapshot(
    display_name: Option<&str>,
    handle: Option<&str>,
  ) -> Snapshot {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let mut person = Person::new(5);
    person.display_name = display_name.map(str::to_owned);
    person.handle = handle.map(str::to_owned);

    let mut memberships = MembershipLedger::new();
    memberships.observe(
      &GroupRef { id: 10, title: Some("Rust Chat".into()), handle: None },
      None,
      at,
    );
    Snapshot {
      person,
      memberships,
      groups: BTreeMap::from([(10, Vec::new())]),
      captured_at: at,
      merged_files: 0,
    }
  }

  #[test]
  fn captions_fall_back_through_identity_fields() {
    let full = caption_snapshot(Some("Alice"), Some("alice"));
    assert_eq!(
      profile_caption(&full, 10),
      "Alice (@alice) in Rust Chat: 0 messages"
    );

    let handle_only = caption_snapshot(None, Some("alice"));
    assert_eq!(
      profile_caption(&handle_only, 10),
      "@alice in Rust Chat: 0 messages"
    );

    let anonymous = caption_snapshot(None, None);
    assert_eq!(
      profile_caption(&anonymous, 10),
      "person 5 in Rust Chat: 0 messages"
    );
    // Unknown group: the id stands in for a title.
    assert_eq!(
      profile_caption(&anonymous, 99),
      "person 5 in 99: 0 messages"
    );
  }

  fn summary() -> RunSummary {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    RunSummary {
      started_at:       at,
      finished_at:      at,
      people:           1,
      groups:           1,
      messages:         2,
      skipped_events:   0,
      profiles_written: 1,
      sink_failures:    0,
    }
  }

  fn sink_for(base_url: String) -> RemoteSink {
    RemoteSink::new(RemoteConfig {
      base_url,
      channel_id: "c1".into(),
      token:      None,
    })
    .unwrap()
  }

  /// Answer one connection with a canned response, without keep-alive so
  /// the client's next request opens a fresh connection.
  async fn respond(listener: &TcpListener, status: &str, headers: &str) {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = [0u8; 8192];
    let _ = socket.read(&mut buf).await.unwrap();
    let resp = format!(
      "HTTP/1.1 {status}\r\n{headers}content-length: 0\r\nconnection: close\r\n\r\n"
    );
    socket.write_all(resp.as_bytes()).await.unwrap();
  }

  #[tokio::test]
  async fn rate_limited_upload_retries_once_and_succeeds() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
      respond(&listener, "429 Too Many Requests", "retry-after: 0\r\n").await;
      respond(&listener, "200 OK", "").await;
    });

    sink_for(base_url).upload_summary(&summary()).await.unwrap();
    server.await.unwrap();
  }

  #[tokio::test]
  async fn persistent_rate_limiting_surfaces_after_one_retry() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
      respond(&listener, "429 Too Many Requests", "retry-after: 0\r\n").await;
      respond(&listener, "429 Too Many Requests", "retry-after: 0\r\n").await;
    });

    let err = sink_for(base_url).upload_summary(&summary()).await.unwrap_err();
    assert!(matches!(
      err,
      Error::RemoteStatus(StatusCode::TOO_MANY_REQUESTS)
    ));
    server.await.unwrap();
  }
}
