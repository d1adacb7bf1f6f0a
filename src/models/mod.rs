//! Domain models for Notekeeper.
//!
//! # Core Concepts
//!
//! - [`Notebook`]: Top-level grouping entity. Has no parent and owns zero or more notes.
//! - [`Note`]: A titled unit of rich-text content belonging to exactly one notebook.
//!   The content is an opaque serialized document; the storage layer only ever
//!   treats it as a string (and as raw text for substring search).
//! - [`ImageUpload`]: Image bytes handed to a backend for storage, resolved to a URL.
//!
//! Identity and timestamps are always assigned by the storage layer, never by callers.

mod image;
mod note;
mod notebook;

pub use image::*;
pub use note::*;
pub use notebook::*;

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};

use crate::error::{StoreError, StoreResult};

/// Current instant at the precision every backend persists (microseconds).
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamp for a write to an entity last stamped at `previous`.
///
/// `updated_at` must advance on every mutation, even when two writes land within
/// the same clock tick.
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

/// Fixed-width text encoding so that string order equals chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Notebook names are required on every backend.
pub fn validate_notebook_name(name: &str) -> StoreResult<()> {
    if name.trim().is_empty() {
        return Err(StoreError::validation("name", "notebook name must not be empty"));
    }
    Ok(())
}
