//! Utility functions for identifier generation and timestamp handling.

pub mod timestamps;

pub use timestamps::{format_iso8601, iso_timestamp, monotonic_now, now_utc, Timestamp};

use uuid::Uuid;

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}
