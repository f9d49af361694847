//! Booking coordination engine
//!
//! Owns the active-booking mirror and is the only place inbound messages are
//! interpreted. Web clients schedule and cancel bookings; agents report
//! progress, which is projected onto booking status and event logs through
//! the [`BroadcastHub`].

use chrono::Utc;
use chrono_tz::Tz;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::broadcast::BroadcastHub;
use super::protocol::{
    decode_agent, decode_web, outcome_status, unix_timestamp, AckReport, AgentCommand,
    AgentMessage, AgentSettings, LoginReport, PreLoginReport, RequestedSlot, RunReport,
    ScheduleRequest, SessionStatusReport, SlotReport, WebEvent, WebRequest,
};
use super::registry::{Frame, SessionId, SessionRegistry, SessionRole};
use crate::error::{Error, Result};
use crate::models::{
    Booking, BookingStatus, Credentials, EventType, LogEntry, LogLevel, QuantityReport, SlotEvent,
    TimeSlot,
};
use crate::scheduler::error::{SchedulerError, SchedulerResult};
use crate::scheduler::parse::{
    normalize_url, parse_booking_date, parse_trigger_datetime, parse_trigger_time,
};
use crate::scheduler::splitter::{describe_split, split_quantities};
use crate::scheduler::trigger::{TimelineRequest, TriggerTimeline};
use crate::storage::BookingStore;

/// Reply to a web client handshake
pub const WEB_WELCOME: &str = "Bot is ready";

/// Reply to an agent handshake
pub const AGENT_WELCOME: &str = "Connected to booking coordinator";

/// Engine tuning taken from configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub timezone: Tz,
    pub max_per_unit: u32,
    pub agent: AgentSettings,
}

/// Coordination engine shared by every connection
pub struct BookingEngine {
    hub: Arc<BroadcastHub>,
    settings: EngineSettings,
    /// Bookings still waiting for an outcome
    active: Mutex<HashMap<String, Booking>>,
    /// Tokens of timelines that have not ended; an outcome does not stop them
    timelines: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl BookingEngine {
    pub fn new(hub: Arc<BroadcastHub>, settings: EngineSettings) -> Self {
        Self {
            hub,
            settings,
            active: Mutex::new(HashMap::new()),
            timelines: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.hub.registry()
    }

    pub fn store(&self) -> &Arc<BookingStore> {
        self.hub.store()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Number of bookings still waiting for an outcome
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_active(&self, booking_id: &str) -> bool {
        self.active.lock().contains_key(booking_id)
    }

    /// Whether the booking's timeline still has stages to emit
    pub fn has_timeline(&self, booking_id: &str) -> bool {
        self.timelines.lock().contains_key(booking_id)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Register a new connection
    pub fn connect(&self) -> (SessionId, mpsc::Receiver<Frame>) {
        self.registry().register()
    }

    /// Forget a closed connection
    pub fn disconnect(&self, session: SessionId) {
        let role = self.registry().role(session);
        if self.registry().remove(session) && role == Some(SessionRole::AutomationAgent) {
            tracing::info!(
                session = %session,
                agents = self.registry().agent_count(),
                "Automation agent disconnected"
            );
            self.hub.broadcast_to_web(&WebEvent::log(
                "Automation agent disconnected",
                LogLevel::Warning,
            ));
        }
    }

    /// Decode and dispatch one inbound text frame
    pub fn handle_text(&self, session: SessionId, text: &str) {
        let Some(role) = self.registry().role(session) else {
            tracing::debug!(session = %session, "Frame from unregistered session dropped");
            return;
        };

        if role.is_agent() {
            match decode_agent(text) {
                Ok(message) => self.handle_agent(session, message),
                Err(e) => {
                    tracing::warn!(session = %session, error = %e, "Ignoring agent message");
                }
            }
        } else {
            match decode_web(text) {
                Ok(request) => self.handle_web(session, role, request),
                Err(e) => {
                    tracing::warn!(session = %session, error = %e, "Ignoring web message");
                    self.hub.send_to(session, &WebEvent::error(e.to_string()), "error");
                }
            }
        }
    }

    // ========================================================================
    // Web catalog
    // ========================================================================

    fn handle_web(&self, session: SessionId, role: SessionRole, request: WebRequest) {
        match request {
            WebRequest::Hello { version } => self.agent_handshake(session, role, version),
            WebRequest::WebHello => {
                if role == SessionRole::Unclassified {
                    if let Err(e) = self.registry().classify(session, SessionRole::WebClient) {
                        tracing::warn!(session = %session, error = %e, "Web handshake rejected");
                    }
                }
                self.hub.send_to(
                    session,
                    &WebEvent::Welcome {
                        message: WEB_WELCOME.to_string(),
                    },
                    "welcome",
                );
            }
            WebRequest::ScheduleBooking(request) => match self.schedule(request) {
                Ok(booking) => {
                    self.hub.send_to(
                        session,
                        &WebEvent::BookingScheduled {
                            booking_id: booking.id.clone(),
                            booking,
                        },
                        "booking_scheduled",
                    );
                }
                Err(e) => {
                    tracing::warn!(session = %session, error = %e, "Schedule request rejected");
                    let (message, field) = match &e {
                        Error::Validation(v) => (v.to_string(), v.field().map(str::to_string)),
                        other => (other.to_string(), None),
                    };
                    self.hub.send_to(
                        session,
                        &WebEvent::Error {
                            message: format!("Failed to schedule booking: {message}"),
                            field,
                        },
                        "error",
                    );
                }
            },
            WebRequest::CancelBooking { booking_id } => {
                if !self.cancel(&booking_id) {
                    self.hub.send_to(
                        session,
                        &WebEvent::error(format!("Booking {booking_id} not found")),
                        "error",
                    );
                }
            }
            WebRequest::Ping => {
                self.hub.send_to(
                    session,
                    &WebEvent::Pong {
                        timestamp: unix_timestamp(),
                    },
                    "pong",
                );
            }
        }
    }

    fn agent_handshake(&self, session: SessionId, role: SessionRole, version: Option<String>) {
        if role != SessionRole::AutomationAgent {
            if let Err(e) = self.registry().classify(session, SessionRole::AutomationAgent) {
                tracing::warn!(session = %session, error = %e, "Agent handshake rejected");
                return;
            }
            tracing::info!(
                session = %session,
                version = version.as_deref().unwrap_or("unknown"),
                agents = self.registry().agent_count(),
                "Automation agent connected"
            );
            self.hub.broadcast_to_web(&WebEvent::log(
                "Automation agent connected",
                LogLevel::Success,
            ));
        }

        self.hub.send_to(
            session,
            &AgentCommand::Welcome {
                message: AGENT_WELCOME.to_string(),
            },
            "welcome",
        );
        self.hub.send_to(
            session,
            &AgentCommand::ConfigUpdate {
                config: self.settings.agent,
            },
            "config_update",
        );
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Validate a request, persist the booking and start its timeline.
    ///
    /// Nothing is stored when validation fails.
    pub fn schedule(&self, request: ScheduleRequest) -> Result<Booking> {
        let now = Utc::now().with_timezone(&self.settings.timezone);

        let url = normalize_url(request.url.as_deref().unwrap_or_default())?;
        let trigger_at = match (&request.trigger_datetime, &request.trigger_time) {
            (Some(datetime), _) if !datetime.trim().is_empty() => {
                parse_trigger_datetime(datetime, now)?
            }
            (_, Some(time)) if !time.trim().is_empty() => {
                parse_trigger_time(time, request.time_format.as_deref(), now)?
            }
            _ => return Err(SchedulerError::missing_field("trigger_datetime").into()),
        };
        let booking_date = parse_booking_date(request.booking_date.as_deref())?;
        let slots = validate_slots(&request.time_slots)?;
        let credentials = Credentials::from_parts(request.email, request.password);

        let booking = Booking::new(
            Booking::generate_id(),
            url.clone(),
            booking_date,
            trigger_at.fixed_offset(),
            slots.clone(),
        );
        if !self.store().create(booking.clone()) {
            return Err(Error::other(format!(
                "Booking {} could not be saved",
                booking.id
            )));
        }

        let max = self.settings.max_per_unit;
        let units = split_quantities(&slots, max);
        if units.len() > slots.len() {
            for summary in slots.iter().filter_map(|s| describe_split(s, max)) {
                tracing::info!(booking_id = %booking.id, "{}", summary);
            }
            self.hub.broadcast_to_web(&WebEvent::log(
                format!("Splitting booking into {} tabs", units.len()),
                LogLevel::Info,
            ));
        }

        let token = CancellationToken::new();
        self.active.lock().insert(booking.id.clone(), booking.clone());
        self.timelines.lock().insert(booking.id.clone(), token.clone());

        let timeline = TriggerTimeline::new(
            TimelineRequest {
                booking_id: booking.id.clone(),
                url,
                booking_date,
                trigger_at,
                units,
                credentials,
            },
            now,
            Arc::clone(&self.hub),
            token,
        );
        tracing::info!(
            booking_id = %booking.id,
            trigger_at = %timeline.plan().trigger_at,
            kind = ?timeline.plan().kind,
            slots = booking.time_slots.len(),
            tickets = booking.total_quantity(),
            "Booking scheduled"
        );

        let timelines = Arc::clone(&self.timelines);
        let booking_id = booking.id.clone();
        tokio::spawn(async move {
            let outcome = timeline.run().await;
            timelines.lock().remove(&booking_id);
            tracing::debug!(booking_id = %booking_id, outcome = ?outcome, "Timeline ended");
        });

        Ok(booking)
    }

    /// Stop a booking's timeline and remove it; false if it was unknown
    pub fn cancel(&self, booking_id: &str) -> bool {
        let was_active = self.active.lock().remove(booking_id).is_some();
        if let Some(token) = self.timelines.lock().remove(booking_id) {
            token.cancel();
        }

        let stored = self.store().get(booking_id).is_some();
        if !was_active && !stored {
            tracing::debug!(booking_id = %booking_id, "Cancel for unknown booking");
            return false;
        }

        self.hub
            .publish_status(booking_id, BookingStatus::Cancelled, "Booking cancelled");
        self.store().delete(booking_id);

        tracing::info!(booking_id = %booking_id, "Booking cancelled");
        true
    }

    // ========================================================================
    // Agent catalog
    // ========================================================================

    fn handle_agent(&self, session: SessionId, message: AgentMessage) {
        tracing::debug!(session = %session, message_type = message.kind(), "Agent message");

        let booking_id = {
            let (id, url) = message.booking_ref();
            self.resolve_booking(id, url)
        };

        match message {
            AgentMessage::Hello { version } => {
                self.agent_handshake(session, SessionRole::AutomationAgent, version)
            }
            AgentMessage::Ping => {
                self.hub.send_to(
                    session,
                    &AgentCommand::Pong {
                        timestamp: unix_timestamp(),
                    },
                    "pong",
                );
            }
            AgentMessage::Pong => {
                tracing::debug!(session = %session, "Pong from agent");
            }
            AgentMessage::Ack(report) => self.on_ack(booking_id, report),
            AgentMessage::SessionStatus(report) => self.on_session_status(booking_id, report),
            AgentMessage::LoginResult(report) => self.on_login_result(booking_id, report),
            AgentMessage::PreLoginResult(report) => self.on_pre_login_result(booking_id, report),
            AgentMessage::Result(report) => self.on_result(booking_id, report),
            AgentMessage::BookingResult(report) => self.on_booking_result(booking_id, report),
        }
    }

    /// Explicit id, else the earliest created active booking for the URL,
    /// else the most recently created stored booking for the URL
    fn resolve_booking(&self, id: Option<&str>, url: Option<&str>) -> Option<String> {
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            return Some(id.to_string());
        }

        let url = url.filter(|u| !u.trim().is_empty())?;
        let wanted = normalize_url(url).unwrap_or_else(|_| url.to_string());

        let active = self
            .active
            .lock()
            .values()
            .filter(|b| b.url == wanted)
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .map(|b| b.id.clone());
        if active.is_some() {
            return active;
        }

        self.store()
            .list()
            .into_iter()
            .filter(|b| b.url == wanted && b.status != BookingStatus::Cancelled)
            .max_by_key(|b| b.created_at)
            .map(|b| b.id)
    }

    fn on_ack(&self, booking_id: Option<String>, report: AckReport) {
        let (message, level) = match report.status.as_str() {
            "stored" => ("Agent stored booking URL".to_string(), LogLevel::Success),
            "error" => (
                format!(
                    "Agent failed to store booking URL: {}",
                    report.error.as_deref().unwrap_or("unknown error")
                ),
                LogLevel::Error,
            ),
            other => (format!("Agent acknowledged: {other}"), LogLevel::Info),
        };
        self.record(booking_id, message, level, EventType::AgentAck);
    }

    fn on_session_status(&self, booking_id: Option<String>, report: SessionStatusReport) {
        let who = report.username.as_deref().unwrap_or("user");
        match (report.status.as_str(), booking_id) {
            ("already_logged_in", Some(id)) => {
                self.status_update(&id, BookingStatus::LoggedIn, format!("Already logged in as {who}"))
            }
            ("not_logged_in", Some(id)) => {
                self.status_update(&id, BookingStatus::LoggingIn, "Not logged in, logging in...")
            }
            (status, id) => {
                self.record(id, format!("Agent session status: {status}"), LogLevel::Info, EventType::Login)
            }
        }
    }

    fn on_login_result(&self, booking_id: Option<String>, report: LoginReport) {
        match (report.status.as_str(), booking_id) {
            ("success", Some(id)) => {
                let who = report.username.as_deref().unwrap_or("user");
                self.status_update(&id, BookingStatus::LoggedIn, format!("Logged in as {who}"));
                self.event_log(&id, LogEntry::new("Login successful", LogLevel::Success, EventType::Login));
            }
            (status, id) => {
                let level = if status == "success" { LogLevel::Success } else { LogLevel::Error };
                let message = match &report.error {
                    Some(error) => format!("Login {status}: {error}"),
                    None => format!("Login {status}"),
                };
                self.record(id, message, level, EventType::Login);
            }
        }
    }

    fn on_pre_login_result(&self, booking_id: Option<String>, report: PreLoginReport) {
        if report.status != "success" {
            let message = format!(
                "Pre-login check failed: {}",
                report.error.as_deref().unwrap_or("unknown error")
            );
            self.record(booking_id, message, LogLevel::Error, EventType::LoginCheck);
            return;
        }

        if report.no_login {
            self.record(booking_id, "No login required", LogLevel::Info, EventType::LoginCheck);
            return;
        }

        let message = if report.already_logged_in {
            "Already logged in"
        } else if report.logged_in {
            "Logged in"
        } else {
            "Pre-login check passed"
        };
        match booking_id {
            Some(id) if report.already_logged_in || report.logged_in => {
                self.status_update(&id, BookingStatus::LoggedIn, message);
                self.event_log(&id, LogEntry::new(message, LogLevel::Success, EventType::LoginCheck));
            }
            id => self.record(id, message, LogLevel::Success, EventType::LoginCheck),
        }
    }

    fn on_result(&self, booking_id: Option<String>, report: RunReport) {
        if report.multi_slot {
            for tab in &report.slots {
                let slot = tab.slot.as_deref().unwrap_or("?");
                let tab_id = tab
                    .tab_id
                    .as_ref()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let status = tab.status.as_deref().unwrap_or("unknown");
                let (message, level) = match &tab.error {
                    Some(error) => (format!("Slot {slot} (tab {tab_id}): {status}, {error}"), LogLevel::Error),
                    None => (format!("Slot {slot} (tab {tab_id}): {status}"), LogLevel::Success),
                };
                self.record(booking_id.clone(), message, level, EventType::StepDetail);
            }
        }

        let Some(status) = outcome_status(&report.status) else {
            let message = report
                .message
                .unwrap_or_else(|| format!("Agent reported: {}", report.status));
            self.record(booking_id, message, LogLevel::Info, EventType::General);
            return;
        };

        let message = report
            .message
            .or(report.error)
            .unwrap_or_else(|| format!("Booking {}", status));
        match booking_id {
            Some(id) => self.status_update(&id, status, message),
            None => {
                tracing::warn!(status = %status, "Agent result without a booking reference");
                self.hub.broadcast_to_web(&WebEvent::log(message, level_for(status)));
            }
        }
    }

    fn on_booking_result(&self, booking_id: Option<String>, report: SlotReport) {
        let slot = report.slot.clone().unwrap_or_else(|| "?".to_string());
        let Some(id) = booking_id else {
            tracing::warn!(slot = %slot, "Booking result without a booking reference");
            self.hub.broadcast_to_web(&WebEvent::log(
                format!("Slot {slot}: {}", report.status),
                LogLevel::Warning,
            ));
            return;
        };

        let reported = outcome_status(&report.status);
        let quantities = QuantityReport {
            requested: report.requested_quantity,
            available: report.available_quantity,
            actual: report.actual_quantity,
        };
        let has_quantities = quantities != QuantityReport::default();
        let total_time = report.timings.get("totalBookingTime").cloned();

        let details = SlotEvent {
            slot: report.slot.clone(),
            status: Some(report.status.clone()),
            steps: report.steps,
            timings: report.timings,
            quantities: has_quantities.then_some(quantities),
            error: report.error.clone(),
        };
        let level = reported.map(level_for).unwrap_or(LogLevel::Info);
        let mut headline = format!("Slot {slot}: {}", report.status);
        if let Some(error) = &report.error {
            headline.push_str(&format!(" ({error})"));
        }
        self.event_log(
            &id,
            LogEntry::new(headline, level, EventType::BookingResult).with_details(details),
        );

        if quantities.is_adjusted() {
            let message = format!(
                "Slot {slot}: requested {}, {} available, booked {}",
                fmt_count(quantities.requested),
                fmt_count(quantities.available),
                fmt_count(quantities.actual),
            );
            self.event_log(&id, LogEntry::new(message, LogLevel::Warning, EventType::QuantityAdjustment));
        }

        if let Some(total) = total_time {
            self.event_log(
                &id,
                LogEntry::new(
                    format!("Slot {slot}: total booking time {total} ms"),
                    LogLevel::Info,
                    EventType::Timing,
                ),
            );
        }

        if let Some(reported) = reported {
            let status = self.merge_outcome(&id, reported);
            self.status_update(&id, status, format!("Slot {slot}: {}", report.status));
        }
    }

    /// Mixed per-slot outcomes on one booking make it partial
    fn merge_outcome(&self, booking_id: &str, reported: BookingStatus) -> BookingStatus {
        match self.store().get(booking_id).map(|b| b.status) {
            Some(current @ (BookingStatus::Completed | BookingStatus::Partial | BookingStatus::Failed))
                if current != reported =>
            {
                BookingStatus::Partial
            }
            _ => reported,
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Persist and announce a status; a rejected transition changes nothing
    fn status_update(&self, booking_id: &str, status: BookingStatus, message: impl Into<String>) {
        if !self.hub.publish_status(booking_id, status, message) {
            return;
        }

        if status.is_terminal() {
            self.finish(booking_id, status);
        }
    }

    /// Drop a booking from the active mirror; its timeline keeps running
    fn finish(&self, booking_id: &str, status: BookingStatus) {
        if self.active.lock().remove(booking_id).is_some() {
            tracing::info!(booking_id = %booking_id, status = %status, "Booking outcome recorded");
        }
    }

    fn event_log(&self, booking_id: &str, entry: LogEntry) {
        self.hub.broadcast_to_web(&WebEvent::BookingEventLog {
            booking_id: booking_id.to_string(),
            event: entry,
        });
    }

    /// Event-log entry when the booking is known, plain web log otherwise
    fn record(
        &self,
        booking_id: Option<String>,
        message: impl Into<String>,
        level: LogLevel,
        event_type: EventType,
    ) {
        let message = message.into();
        match booking_id {
            Some(id) => self.event_log(&id, LogEntry::new(message, level, event_type)),
            None => {
                self.hub.broadcast_to_web(&WebEvent::log(message, level));
            }
        }
    }
}

/// Convert UI slots into validated [`TimeSlot`]s
fn validate_slots(requested: &[RequestedSlot]) -> SchedulerResult<Vec<TimeSlot>> {
    requested
        .iter()
        .map(|slot| {
            let label = slot.label().trim();
            if label.is_empty() {
                return Err(SchedulerError::missing_field("time_slots.time"));
            }
            let quantity = slot.quantity().unwrap_or(0);
            match u32::try_from(quantity) {
                Ok(q) if q >= 1 => Ok(TimeSlot::new(label, q)),
                _ => Err(SchedulerError::invalid_quantity(label, quantity)),
            }
        })
        .collect()
}

fn level_for(status: BookingStatus) -> LogLevel {
    match status {
        BookingStatus::Completed => LogLevel::Success,
        BookingStatus::Partial => LogLevel::Warning,
        BookingStatus::Failed => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

fn fmt_count(count: Option<u32>) -> String {
    count.map_or_else(|| "?".to_string(), |c| c.to_string())
}
