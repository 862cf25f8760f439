//! Aggregation and merge engine for sift activity profiles.
//!
//! [`aggregator::Aggregator`] folds raw capture events into per-person
//! profiles; [`reply`] reconstructs reply threads inside each group log;
//! [`merge`] folds many snapshot files of the same person into one
//! canonical snapshot.

pub mod aggregator;
pub mod error;
pub mod merge;
pub mod reply;

pub use error::{Error, Result};
