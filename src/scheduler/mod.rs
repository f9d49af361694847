//! Booking trigger scheduling
//!
//! Turns a schedule request into a validated trigger time and a staged
//! timeline of agent messages.
//!
//! # Timeline
//!
//! ```text
//!   T-10m          T-2m           T-1m            T
//!     │              │              │             │
//!  store_url   pre_login_trigger  trigger   execute_booking
//!  (always)    (credentials)              (time slots)
//! ```
//!
//! Short windows drop the stages whose lead time no longer fits and fire the
//! trigger at `T`. Offsets are measured from a single monotonic start instant,
//! so stage delays never accumulate.
//!
//! # Modules
//!
//! - [`parse`] - Trigger time, booking date, URL and timezone parsing
//! - [`splitter`] - Capacity-bounded quantity splitting
//! - [`trigger`] - Timeline planning and the per-booking timeline task
//! - [`error`] - Validation errors

pub mod error;
pub mod parse;
pub mod splitter;
pub mod trigger;

// Re-export main types
pub use error::{SchedulerError, SchedulerResult};
pub use parse::{normalize_url, parse_booking_date, parse_trigger_datetime, parse_trigger_time};
pub use splitter::{describe_split, split_quantities, DEFAULT_MAX_PER_UNIT};
pub use trigger::{
    StageKind, TimelineKind, TimelineOutcome, TimelinePlan, TimelineRequest, TriggerTimeline,
};
