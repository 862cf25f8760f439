//! Persistence sinks for sift snapshots.
//!
//! Three destinations share one fan-out: JSON capture files on disk (plus a
//! human-readable digest), a remote channel reached over HTTP, and the
//! SQLite presence store. Persistence is best-effort per sink; one failing
//! destination never blocks the others.

pub mod error;
pub mod file;
pub mod remote;
pub mod sink;

pub use error::{Error, Result};
pub use file::FileSink;
pub use remote::{RemoteConfig, RemoteSink};
pub use sink::{PersistReport, RunSummary, Sink, persist};
