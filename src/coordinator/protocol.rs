//! Wire protocol between the coordinator, web clients and automation agents
//!
//! Every frame is a JSON object with a `type` tag. Inbound frames are decoded
//! exactly once, at the session boundary, into one of two closed catalogs:
//!
//! ```text
//!   web client ──► WebRequest    ──┐
//!                                  ├──► BookingEngine
//!   agent      ──► AgentMessage  ──┘
//!
//!   BookingEngine ──► AgentCommand ──► agents
//!                 └─► WebEvent     ──► web clients (+ booking store)
//! ```
//!
//! A tag outside the catalog is a [`ProtocolError::UnknownType`], never a
//! silent fallthrough.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::models::{Booking, BookingStatus, LogEntry, LogLevel, TimeSlot};

// ============================================================================
// Errors
// ============================================================================

/// Failures at the decode/encode boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame is not a JSON object
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// JSON object without a string `type`
    #[error("Message has no type tag")]
    MissingType,

    /// Tag not part of the catalog
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Known tag with an unusable payload
    #[error("Invalid '{message_type}' payload: {reason}")]
    InvalidPayload {
        message_type: String,
        reason: String,
    },

    /// Outbound message could not be serialized
    #[error("Failed to encode message: {0}")]
    Encode(String),
}

// ============================================================================
// Web client catalog (inbound)
// ============================================================================

/// Requests accepted from web clients and unclassified sessions
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebRequest {
    /// Agent handshake; reclassifies the session
    Hello {
        #[serde(default)]
        version: Option<String>,
    },
    /// Web client handshake
    WebHello,
    ScheduleBooking(ScheduleRequest),
    CancelBooking {
        booking_id: String,
    },
    Ping,
}

impl WebRequest {
    const TAGS: &'static [&'static str] = &[
        "hello",
        "web_hello",
        "schedule_booking",
        "cancel_booking",
        "ping",
    ];
}

/// Raw `schedule_booking` payload, validated by the engine
#[derive(Clone, Default, Deserialize)]
pub struct ScheduleRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub booking_date: Option<String>,
    #[serde(default)]
    pub trigger_datetime: Option<String>,
    #[serde(default)]
    pub trigger_time: Option<String>,
    #[serde(default)]
    pub time_format: Option<String>,
    #[serde(default)]
    pub time_slots: Vec<RequestedSlot>,
}

impl fmt::Debug for ScheduleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleRequest")
            .field("url", &self.url)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("booking_date", &self.booking_date)
            .field("trigger_datetime", &self.trigger_datetime)
            .field("trigger_time", &self.trigger_time)
            .field("time_format", &self.time_format)
            .field("time_slots", &self.time_slots)
            .finish()
    }
}

/// A slot as sent by the UI: `{"time", "quantity"}` or a bare label
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RequestedSlot {
    Detailed {
        time: String,
        #[serde(default)]
        quantity: Option<QuantityInput>,
    },
    Label(String),
}

/// Quantities arrive as numbers or numeric strings depending on the form
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum QuantityInput {
    Number(i64),
    Text(String),
}

impl RequestedSlot {
    pub fn label(&self) -> &str {
        match self {
            Self::Detailed { time, .. } => time,
            Self::Label(label) => label,
        }
    }

    /// Requested quantity; a missing quantity means one ticket.
    ///
    /// Returns `None` for text that is not an integer.
    pub fn quantity(&self) -> Option<i64> {
        match self {
            Self::Detailed { quantity: None, .. } | Self::Label(_) => Some(1),
            Self::Detailed {
                quantity: Some(QuantityInput::Number(n)),
                ..
            } => Some(*n),
            Self::Detailed {
                quantity: Some(QuantityInput::Text(text)),
                ..
            } => text.trim().parse().ok(),
        }
    }
}

// ============================================================================
// Agent catalog (inbound)
// ============================================================================

/// Messages accepted from classified automation agents
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Hello {
        #[serde(default)]
        version: Option<String>,
    },
    Ack(AckReport),
    SessionStatus(SessionStatusReport),
    LoginResult(LoginReport),
    PreLoginResult(PreLoginReport),
    Result(RunReport),
    BookingResult(SlotReport),
    Ping,
    Pong,
}

impl AgentMessage {
    const TAGS: &'static [&'static str] = &[
        "hello",
        "ack",
        "session_status",
        "login_result",
        "pre_login_result",
        "result",
        "booking_result",
        "ping",
        "pong",
    ];

    /// Wire tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Ack(_) => "ack",
            Self::SessionStatus(_) => "session_status",
            Self::LoginResult(_) => "login_result",
            Self::PreLoginResult(_) => "pre_login_result",
            Self::Result(_) => "result",
            Self::BookingResult(_) => "booking_result",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }

    /// Booking reference carried by the message: explicit id and page URL
    pub fn booking_ref(&self) -> (Option<&str>, Option<&str>) {
        let (id, url) = match self {
            Self::Ack(m) => (&m.booking_id, &m.url),
            Self::SessionStatus(m) => (&m.booking_id, &m.url),
            Self::LoginResult(m) => (&m.booking_id, &m.url),
            Self::PreLoginResult(m) => (&m.booking_id, &m.url),
            Self::Result(m) => (&m.booking_id, &m.url),
            Self::BookingResult(m) => (&m.booking_id, &m.url),
            Self::Hello { .. } | Self::Ping | Self::Pong => return (None, None),
        };
        (id.as_deref(), url.as_deref())
    }
}

/// `ack{status, url, error?}` after `store_url`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AckReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub booking_id: Option<String>,
}

/// `session_status{status, username?, url}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionStatusReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub booking_id: Option<String>,
}

/// `login_result{status, username?, error?, url}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub booking_id: Option<String>,
}

/// `pre_login_result{status, alreadyLoggedIn?, loggedIn?, noLogin?, error?, url}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreLoginReport {
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "alreadyLoggedIn")]
    pub already_logged_in: bool,
    #[serde(default, rename = "loggedIn")]
    pub logged_in: bool,
    #[serde(default, rename = "noLogin")]
    pub no_login: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub booking_id: Option<String>,
}

/// `result{status, message?, error?, multiSlot?, slots?}` after `trigger`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, rename = "multiSlot")]
    pub multi_slot: bool,
    #[serde(default)]
    pub slots: Vec<TabReport>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub booking_id: Option<String>,
}

/// Per-tab line of a multi-slot `result`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TabReport {
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(default, rename = "tabId")]
    pub tab_id: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `booking_result` for one slot
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlotReport {
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub steps: BTreeMap<String, Value>,
    #[serde(default)]
    pub timings: BTreeMap<String, Value>,
    #[serde(default, rename = "requestedQuantity")]
    pub requested_quantity: Option<u32>,
    #[serde(default, rename = "availableQuantity")]
    pub available_quantity: Option<u32>,
    #[serde(default, rename = "actualQuantity")]
    pub actual_quantity: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub booking_id: Option<String>,
}

/// Map an agent outcome string onto a terminal booking status
pub fn outcome_status(status: &str) -> Option<BookingStatus> {
    match status.trim().to_ascii_lowercase().as_str() {
        "success" | "completed" => Some(BookingStatus::Completed),
        "partial" | "partial_success" => Some(BookingStatus::Partial),
        "error" | "failed" | "failure" => Some(BookingStatus::Failed),
        _ => None,
    }
}

// ============================================================================
// Outbound messages
// ============================================================================

/// Commands sent to automation agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    StoreUrl(StoreUrl),
    PreLoginTrigger {
        url: String,
        booking_id: String,
    },
    Trigger {
        url: String,
        booking_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_slots: Option<Vec<String>>,
    },
    ExecuteBooking {
        booking_id: String,
        booking_date: Option<NaiveDate>,
        slots_with_quantities: Vec<TimeSlot>,
    },
    Welcome {
        message: String,
    },
    ConfigUpdate {
        config: AgentSettings,
    },
    Pong {
        timestamp: f64,
    },
}

impl AgentCommand {
    /// Wire tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StoreUrl(_) => "store_url",
            Self::PreLoginTrigger { .. } => "pre_login_trigger",
            Self::Trigger { .. } => "trigger",
            Self::ExecuteBooking { .. } => "execute_booking",
            Self::Welcome { .. } => "welcome",
            Self::ConfigUpdate { .. } => "config_update",
            Self::Pong { .. } => "pong",
        }
    }

    /// Booking the command belongs to, if any
    pub fn booking_id(&self) -> Option<&str> {
        match self {
            Self::StoreUrl(s) => Some(&s.booking_id),
            Self::PreLoginTrigger { booking_id, .. }
            | Self::Trigger { booking_id, .. }
            | Self::ExecuteBooking { booking_id, .. } => Some(booking_id),
            _ => None,
        }
    }
}

/// `store_url` payload; the first message of every timeline
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreUrl {
    pub url: String,
    pub scheduled_time: String,
    pub booking_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_slots: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots_with_quantities: Option<Vec<TimeSlot>>,
    pub auto_login: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl fmt::Debug for StoreUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreUrl")
            .field("url", &self.url)
            .field("scheduled_time", &self.scheduled_time)
            .field("booking_id", &self.booking_id)
            .field("time_slots", &self.time_slots)
            .field("booking_date", &self.booking_date)
            .field("slots_with_quantities", &self.slots_with_quantities)
            .field("auto_login", &self.auto_login)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .finish()
    }
}

/// Snapshot pushed to an agent right after its handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Minutes to keep monitoring a slot page
    pub monitoring_time: u64,
    /// Polling interval in milliseconds
    pub monitoring_interval: u64,
}

/// Events sent to web clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebEvent {
    Welcome {
        message: String,
    },
    BookingScheduled {
        booking_id: String,
        booking: Booking,
    },
    BookingUpdate {
        booking_id: String,
        status: BookingStatus,
        message: String,
    },
    BookingEventLog {
        booking_id: String,
        event: LogEntry,
    },
    Log {
        message: String,
        level: LogLevel,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    Pong {
        timestamp: f64,
    },
}

impl WebEvent {
    pub fn log(message: impl Into<String>, level: LogLevel) -> Self {
        Self::Log {
            message: message.into(),
            level,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            field: None,
        }
    }

    /// Wire tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::BookingScheduled { .. } => "booking_scheduled",
            Self::BookingUpdate { .. } => "booking_update",
            Self::BookingEventLog { .. } => "booking_event_log",
            Self::Log { .. } => "log",
            Self::Error { .. } => "error",
            Self::Pong { .. } => "pong",
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Decode a frame from a web client or unclassified session
pub fn decode_web(text: &str) -> Result<WebRequest, ProtocolError> {
    decode(text, WebRequest::TAGS)
}

/// Decode a frame from a classified agent
pub fn decode_agent(text: &str) -> Result<AgentMessage, ProtocolError> {
    decode(text, AgentMessage::TAGS)
}

/// Serialize an outbound message
pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(text: &str, known: &[&str]) -> Result<T, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(ProtocolError::Malformed("expected a JSON object".to_string()));
    }

    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();
    if !known.contains(&tag.as_str()) {
        return Err(ProtocolError::UnknownType(tag));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
        message_type: tag,
        reason: e.to_string(),
    })
}

/// Seconds since the epoch as a float, the keep-alive timestamp format
pub fn unix_timestamp() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_schedule_booking() {
        let text = r#"{
            "type": "schedule_booking",
            "url": "example.com",
            "trigger_datetime": "2030-01-01T10:00",
            "time_slots": [{"time": "9:00 AM", "quantity": 120}, {"time": "9:30 AM", "quantity": "2"}, "10:00 AM"]
        }"#;
        let WebRequest::ScheduleBooking(req) = decode_web(text).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(req.url.as_deref(), Some("example.com"));
        let quantities: Vec<_> = req.time_slots.iter().map(|s| s.quantity()).collect();
        assert_eq!(quantities, vec![Some(120), Some(2), Some(1)]);
        assert_eq!(req.time_slots[2].label(), "10:00 AM");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = decode_web(r#"{"type":"teleport"}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType("teleport".into()));

        // Agent-only tags are not part of the web catalog
        let err = decode_web(r#"{"type":"booking_result"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(_)));
    }

    #[test]
    fn test_malformed_and_untagged() {
        assert!(matches!(decode_agent("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode_agent("[1,2]"), Err(ProtocolError::Malformed(_))));
        assert_eq!(decode_agent(r#"{"status":"ok"}"#).unwrap_err(), ProtocolError::MissingType);
    }

    #[test]
    fn test_invalid_payload() {
        let err = decode_web(r#"{"type":"cancel_booking"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { ref message_type, .. } if message_type == "cancel_booking"));
    }

    #[test]
    fn test_decode_booking_result() {
        let text = r#"{
            "type": "booking_result",
            "booking_id": "abcd1234",
            "slot": "9:00 AM",
            "status": "success",
            "steps": {"dateSelection": "ok"},
            "timings": {"totalBookingTime": 1834},
            "requestedQuantity": 4,
            "availableQuantity": 2,
            "actualQuantity": 2
        }"#;
        let msg = decode_agent(text).unwrap();
        assert_eq!(msg.booking_ref(), (Some("abcd1234"), None));
        let AgentMessage::BookingResult(report) = msg else {
            panic!("wrong variant");
        };
        assert_eq!(report.requested_quantity, Some(4));
        assert_eq!(report.actual_quantity, Some(2));
        assert_eq!(report.timings["totalBookingTime"], 1834);
    }

    #[test]
    fn test_decode_pre_login_flags() {
        let msg =
            decode_agent(r#"{"type":"pre_login_result","status":"success","alreadyLoggedIn":true,"url":"https://x.test"}"#)
                .unwrap();
        let AgentMessage::PreLoginResult(report) = msg else {
            panic!("wrong variant");
        };
        assert!(report.already_logged_in);
        assert!(!report.no_login);
        assert_eq!(report.url.as_deref(), Some("https://x.test"));
    }

    #[test]
    fn test_outcome_status() {
        assert_eq!(outcome_status("success"), Some(BookingStatus::Completed));
        assert_eq!(outcome_status("partial_success"), Some(BookingStatus::Partial));
        assert_eq!(outcome_status("FAILED"), Some(BookingStatus::Failed));
        assert_eq!(outcome_status("loaded"), None);
    }

    #[test]
    fn test_encode_store_url_omits_missing_credentials() {
        let cmd = AgentCommand::StoreUrl(StoreUrl {
            url: "https://example.com".into(),
            scheduled_time: "2030-01-01T10:00:00+05:30".into(),
            booking_id: "abcd1234".into(),
            time_slots: None,
            booking_date: None,
            slots_with_quantities: None,
            auto_login: false,
            email: None,
            password: None,
        });
        let json: Value = serde_json::from_str(&encode(&cmd).unwrap()).unwrap();
        assert_eq!(json["type"], "store_url");
        assert_eq!(json["auto_login"], false);
        assert!(json.get("password").is_none());
    }

    #[test]
    fn test_store_url_debug_redacts_password() {
        let store = StoreUrl {
            url: "https://example.com".into(),
            scheduled_time: String::new(),
            booking_id: "abcd1234".into(),
            time_slots: None,
            booking_date: None,
            slots_with_quantities: None,
            auto_login: true,
            email: Some("a@b.c".into()),
            password: Some("hunter2".into()),
        };
        assert!(!format!("{store:?}").contains("hunter2"));
    }

    #[test]
    fn test_encode_booking_update() {
        let event = WebEvent::BookingUpdate {
            booking_id: "abcd1234".into(),
            status: BookingStatus::Running,
            message: "Opening 3 tab(s)".into(),
        };
        let json: Value = serde_json::from_str(&encode(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "booking_update");
        assert_eq!(json["status"], "running");
    }
}
