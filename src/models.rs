// Core data structures for the booking coordinator

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A named time option and how many tickets to request for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Slot label as shown on the booking page (e.g., "9:00 AM")
    #[serde(rename = "time")]
    pub label: String,

    /// Requested quantity, always >= 1
    pub quantity: u32,
}

impl TimeSlot {
    pub fn new(label: impl Into<String>, quantity: u32) -> Self {
        Self {
            label: label.into(),
            quantity,
        }
    }
}

/// Lifecycle of a booking
///
/// ```text
/// Scheduled ──► LoginCheck ──► LoggingIn ──► LoggedIn ──► Running ──► Completed
///     │              │             │            │          │    ├───► Partial
///     └──────────────┴─────────────┴────────────┴──────────┘    └───► Failed
/// ```
///
/// Any non-terminal state may also move to `Cancelled` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Scheduled,
    LoginCheck,
    LoggingIn,
    LoggedIn,
    Running,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl BookingStatus {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::LoginCheck => "login_check",
            Self::LoggingIn => "logging_in",
            Self::LoggedIn => "logged_in",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states end the booking's timeline
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Partial | Self::Failed | Self::Cancelled
        )
    }

    /// Whether an agent outcome may still move the booking
    fn is_outcome(&self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }

    /// Check whether moving from `self` to `next` is allowed.
    ///
    /// Re-asserting the current state is allowed so a status message can be
    /// refreshed. Outcomes may be revised by later per-slot results.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;

        if *self == next {
            return true;
        }

        match (self, next) {
            (Cancelled, _) => false,
            (from, to) if from.is_outcome() => to.is_outcome(),
            (_, Cancelled) | (_, Failed) => true,
            (Scheduled, LoginCheck | Running) => true,
            (LoginCheck, LoggingIn | LoggedIn | Running) => true,
            (LoggingIn, LoggedIn | Running) => true,
            (LoggedIn, Running) => true,
            (Running, Completed | Partial) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to log lines shown in the web UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// Kind of event recorded in a booking's log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[default]
    General,
    AgentAck,
    LoginCheck,
    Login,
    BookingStart,
    ExecuteBooking,
    BookingResult,
    QuantityAdjustment,
    StepDetail,
    Timing,
}

/// Requested / available / actual ticket counts for one slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityReport {
    pub requested: Option<u32>,
    pub available: Option<u32>,
    pub actual: Option<u32>,
}

impl QuantityReport {
    /// True when the agent booked a different amount than requested
    pub fn is_adjusted(&self) -> bool {
        match (self.requested, self.actual) {
            (Some(requested), Some(actual)) => requested != actual,
            _ => false,
        }
    }
}

/// Structured outcome of one slot, as reported by the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub steps: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub timings: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantities: Option<QuantityReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SlotEvent {
    /// True when the agent reported nothing beyond a bare status line
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One entry in a booking's append-only log
///
/// Slot details are flattened so the wire shape is
/// `{timestamp, message, level, event_type, slot?, status?, steps?, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(flatten)]
    pub details: SlotEvent,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, level: LogLevel, event_type: EventType) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            event_type,
            details: SlotEvent::default(),
        }
    }

    /// Attach structured slot details
    pub fn with_details(mut self, details: SlotEvent) -> Self {
        self.details = details;
        self
    }
}

/// A scheduled booking, the unit of work persisted by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Opaque unique identifier
    pub id: String,

    /// Destination page
    pub url: String,

    /// Calendar date to book on the destination page
    #[serde(default)]
    pub booking_date: Option<NaiveDate>,

    /// Absolute time of the final action
    pub trigger_time: DateTime<FixedOffset>,

    /// Requested slots, before quantity splitting
    #[serde(default)]
    pub time_slots: Vec<TimeSlot>,

    pub status: BookingStatus,

    /// Last human-readable status message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl Booking {
    /// Create a booking in the `Scheduled` state
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        booking_date: Option<NaiveDate>,
        trigger_time: DateTime<FixedOffset>,
        time_slots: Vec<TimeSlot>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            url: url.into(),
            booking_date,
            trigger_time,
            time_slots,
            status: BookingStatus::Scheduled,
            message: None,
            created_at: now,
            updated_at: now,
            logs: Vec::new(),
        }
    }

    /// Generate a short booking id
    pub fn generate_id() -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        id[..8].to_string()
    }

    /// Refresh `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Total tickets requested across all slots
    pub fn total_quantity(&self) -> u64 {
        self.time_slots.iter().map(|s| u64::from(s.quantity)).sum()
    }
}

/// Login credentials forwarded to the agent, never persisted
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    /// Both parts must be non-empty for auto-login
    pub fn from_parts(email: Option<String>, password: Option<String>) -> Option<Self> {
        match (email, password) {
            (Some(email), Some(password)) if !email.trim().is_empty() && !password.is_empty() => {
                Some(Self {
                    email: email.trim().to_string(),
                    password,
                })
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"********")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_booking() -> Booking {
        let trigger = DateTime::parse_from_rfc3339("2025-12-15T10:00:00+05:30").unwrap();
        Booking::new(
            "abc12345",
            "https://example.com",
            NaiveDate::from_ymd_opt(2025, 12, 15),
            trigger,
            vec![TimeSlot::new("9:00 AM", 120), TimeSlot::new("9:30 AM", 2)],
        )
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&BookingStatus::LoginCheck).unwrap(),
            "\"login_check\""
        );
        assert_eq!(BookingStatus::LoggedIn.to_string(), "logged_in");
    }

    #[test]
    fn test_status_transitions() {
        use BookingStatus::*;
        assert!(Scheduled.can_transition_to(LoginCheck));
        assert!(Scheduled.can_transition_to(Running));
        assert!(LoginCheck.can_transition_to(LoggedIn));
        assert!(LoggedIn.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(Completed.can_transition_to(Partial));

        assert!(!Running.can_transition_to(LoginCheck));
        assert!(!Scheduled.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Cancelled));
    }

    #[test]
    fn test_time_slot_uses_time_key() {
        let slot: TimeSlot = serde_json::from_str(r#"{"time":"8:15 AM","quantity":2}"#).unwrap();
        assert_eq!(slot.label, "8:15 AM");
        assert_eq!(slot.quantity, 2);
        let json = serde_json::to_value(&slot).unwrap();
        assert_eq!(json["time"], "8:15 AM");
    }

    #[test]
    fn test_booking_round_trip_keeps_logs() {
        let mut booking = sample_booking();
        booking
            .logs
            .push(LogEntry::new("hello", LogLevel::Info, EventType::General));
        booking.logs.push(
            LogEntry::new("9:00 AM done", LogLevel::Success, EventType::BookingResult)
                .with_details(SlotEvent {
                    slot: Some("9:00 AM".into()),
                    status: Some("success".into()),
                    ..Default::default()
                }),
        );
        let json = serde_json::to_string(&booking).unwrap();
        let back: Booking = serde_json::from_str(&json).unwrap();
        assert_eq!(back, booking);
        assert_eq!(back.total_quantity(), 122);
    }

    #[test]
    fn test_log_entry_details_are_flat() {
        let entry = LogEntry::new("x", LogLevel::Warning, EventType::QuantityAdjustment)
            .with_details(SlotEvent {
                slot: Some("9:00 AM".into()),
                ..Default::default()
            });
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["slot"], "9:00 AM");
        assert_eq!(json["event_type"], "quantity_adjustment");
        assert!(json.get("steps").is_none());
    }

    #[test]
    fn test_generate_id_is_short() {
        let a = Booking::generate_id();
        let b = Booking::generate_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_quantity_report_adjusted() {
        let report = QuantityReport {
            requested: Some(4),
            available: Some(2),
            actual: Some(2),
        };
        assert!(report.is_adjusted());
        assert!(!QuantityReport::default().is_adjusted());
    }

    #[test]
    fn test_credentials_require_both_parts() {
        assert!(Credentials::from_parts(Some("a@b.c".into()), None).is_none());
        assert!(Credentials::from_parts(Some(" ".into()), Some("pw".into())).is_none());
        let creds = Credentials::from_parts(Some("a@b.c".into()), Some("pw".into())).unwrap();
        assert!(!format!("{creds:?}").contains("pw\""));
    }
}
