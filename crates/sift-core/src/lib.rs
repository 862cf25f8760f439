//! Core types and trait definitions for the sift activity-profile engine.
//!
//! Domain types only: no HTTP, no database, no filesystem. Every other
//! crate in the workspace depends on this one.

pub mod error;
pub mod event;
pub mod membership;
pub mod message;
pub mod person;
pub mod presence;
pub mod snapshot;

pub use error::{Error, Result};
