//! Error types for the scheduler module
//!
//! Every variant describes a malformed schedule request. These are rejected
//! before any state is touched and reported back to the requesting client.

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Schedule request validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A required field was absent or empty
    MissingField {
        field: String,
    },

    /// The trigger time could not be parsed with any supported format
    InvalidDateTime {
        input: String,
        reason: String,
    },

    /// The trigger time is not in the future
    NotInFuture {
        requested: String,
        now: String,
    },

    /// A slot quantity was zero or negative
    InvalidQuantity {
        slot: String,
        quantity: i64,
    },

    /// The booking date is not `YYYY-MM-DD`
    InvalidDate {
        input: String,
    },

    /// The destination URL is unusable
    InvalidUrl {
        url: String,
        reason: String,
    },

    /// Unknown timezone name
    InvalidTimezone {
        tz: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field } => {
                write!(f, "Missing required field: {}", field)
            }
            Self::InvalidDateTime { input, reason } => {
                write!(f, "Could not parse trigger time '{}': {}", input, reason)
            }
            Self::NotInFuture { requested, now } => {
                write!(
                    f,
                    "Trigger datetime must be in the future. Provided: {}, Current: {}",
                    requested, now
                )
            }
            Self::InvalidQuantity { slot, quantity } => {
                write!(
                    f,
                    "Slot '{}': quantity must be a positive integer, got {}",
                    slot, quantity
                )
            }
            Self::InvalidDate { input } => {
                write!(f, "Invalid booking_date '{}'. Expected YYYY-MM-DD", input)
            }
            Self::InvalidUrl { url, reason } => {
                write!(f, "Invalid URL '{}': {}", url, reason)
            }
            Self::InvalidTimezone { tz } => {
                write!(f, "Invalid timezone: {}", tz)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create an unparseable datetime error
    pub fn invalid_datetime(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDateTime {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid quantity error
    pub fn invalid_quantity(slot: impl Into<String>, quantity: i64) -> Self {
        Self::InvalidQuantity {
            slot: slot.into(),
            quantity,
        }
    }

    /// Create an invalid URL error
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Field name the client should fix, when one applies
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingField { field } => Some(field),
            Self::InvalidDateTime { .. } | Self::NotInFuture { .. } => Some("trigger_datetime"),
            Self::InvalidQuantity { .. } => Some("time_slots"),
            Self::InvalidDate { .. } => Some("booking_date"),
            Self::InvalidUrl { .. } => Some("url"),
            Self::InvalidTimezone { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_error() {
        let err = SchedulerError::missing_field("url");
        assert_eq!(err.to_string(), "Missing required field: url");
        assert_eq!(err.field(), Some("url"));
    }

    #[test]
    fn test_invalid_quantity_error() {
        let err = SchedulerError::invalid_quantity("9:00 AM", 0);
        assert!(err.to_string().contains("9:00 AM"));
        assert!(err.to_string().contains("positive"));
        assert_eq!(err.field(), Some("time_slots"));
    }

    #[test]
    fn test_not_in_future_names_both_times() {
        let err = SchedulerError::NotInFuture {
            requested: "2020-01-01 10:00".into(),
            now: "2025-01-01 10:00".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2020-01-01 10:00"));
        assert!(msg.contains("2025-01-01 10:00"));
    }
}
