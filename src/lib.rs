//! tabtrigger - Time-triggered booking coordinator
//!
//! Coordinates a staged booking sequence between browser automation agents and
//! the web clients that schedule bookings, and durably records every attempt.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Bookings, slots, statuses and event-log entries
//! - [`scheduler`] - Trigger parsing, quantity splitting and staged timelines
//! - [`coordinator`] - Session registry, broadcast hub, engine and server
//! - [`storage`] - JSON booking store with shadow-copy recovery
//! - [`error`] - Unified error type
//!
//! # Example
//!
//! ```no_run
//! use tabtrigger::config::Config;
//! use tabtrigger::coordinator::CoordinatorServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = CoordinatorServer::new(config)?;
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{BookingEngine, CoordinatorServer};
    pub use crate::error::{Error, ErrorCategory, Result, TriggerErrorTrait};
    pub use crate::models::{Booking, BookingStatus, LogEntry, TimeSlot};
    pub use crate::storage::BookingStore;
}

// Direct re-exports for convenience
pub use models::{Booking, BookingStatus, TimeSlot};
