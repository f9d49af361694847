//! Durable booking persistence
//!
//! Bookings live in a single JSON document (`{"bookings": [...]}`) with a
//! shadow copy holding the previous snapshot. See [`booking_store`] for the
//! write and recovery protocol.

pub mod booking_store;

pub use booking_store::{BookingStore, BookingUpdate};

use std::path::PathBuf;
use thiserror::Error;

/// Primary file name inside the data directory
pub const PRIMARY_FILE: &str = "scheduled_bookings.json";

/// Shadow file name inside the data directory
pub const SHADOW_FILE: &str = "scheduled_bookings.backup.json";

/// Booking store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing a store file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File content is not a valid booking document
    #[error("Corrupted store file {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    /// Record set could not be serialized
    #[error("Failed to serialize bookings: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// I/O hiccups and corruption are retried or recovered from the shadow
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Corrupted { .. })
    }
}
