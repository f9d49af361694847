//! Staged trigger timelines
//!
//! A timeline turns one trigger time `T` into a short sequence of agent
//! messages. The plan is computed once, up front, as offsets from the moment
//! the timeline starts:
//!
//! ```text
//!  full staged     store_url ─── T-120s pre_login_trigger ── T-60s trigger ── T execute_booking
//!  booking only    store_url ─────────────────────────────── T-60s trigger ── T execute_booking
//!  immediate       store_url ─────────────────────────────────────────── T trigger + execute_booking
//! ```
//!
//! `execute_booking` is only sent when the booking has slots. The cancellation
//! token is checked before every message, so a cancelled timeline goes quiet
//! even in the middle of a sleep.

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::parse::normalize_url;
use crate::coordinator::broadcast::BroadcastHub;
use crate::coordinator::protocol::{AgentCommand, StoreUrl, WebEvent};
use crate::models::{BookingStatus, Credentials, EventType, LogEntry, LogLevel, TimeSlot};

/// Lead time of the login check before `T`
pub const PRE_LOGIN_LEAD: Duration = Duration::from_secs(120);

/// Lead time of tab opening before `T`
pub const TRIGGER_LEAD: Duration = Duration::from_secs(60);

// ============================================================================
// Plan
// ============================================================================

/// Which staging rule produced the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineKind {
    /// Credentials present and more than two minutes to go
    FullStaged,
    /// Slots present and more than one minute to go
    BookingOnly,
    /// Everything else
    Immediate,
}

/// One message of a timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    StoreUrl,
    PreLogin,
    Trigger,
    Execute,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoreUrl => "store_url",
            Self::PreLogin => "pre_login_trigger",
            Self::Trigger => "trigger",
            Self::Execute => "execute_booking",
        }
    }
}

/// A stage and when it fires, relative to the timeline start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub kind: StageKind,
    pub offset: Duration,
}

/// Computed timeline for one booking
#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePlan {
    pub kind: TimelineKind,

    /// Effective trigger time, after any deferral
    pub trigger_at: DateTime<Tz>,

    /// True when the requested time had passed and was moved a day ahead
    pub deferred: bool,

    /// Time from start to `trigger_at`
    pub wait: Duration,

    pub stages: Vec<Stage>,
}

impl TimelinePlan {
    /// Compute the plan for a trigger time as seen from `now`
    pub fn compute(
        trigger_at: DateTime<Tz>,
        now: DateTime<Tz>,
        has_credentials: bool,
        has_slots: bool,
    ) -> Self {
        let mut trigger_at = trigger_at;
        let mut deferred = false;
        if trigger_at < now {
            trigger_at += chrono::Duration::days(1);
            deferred = true;
        }
        let wait = (trigger_at - now).to_std().unwrap_or(Duration::ZERO);

        let stage = |kind, offset| Stage { kind, offset };
        let mut stages = vec![stage(StageKind::StoreUrl, Duration::ZERO)];

        let kind = if has_credentials && wait > PRE_LOGIN_LEAD {
            stages.push(stage(StageKind::PreLogin, wait - PRE_LOGIN_LEAD));
            stages.push(stage(StageKind::Trigger, wait - TRIGGER_LEAD));
            TimelineKind::FullStaged
        } else if has_slots && wait > TRIGGER_LEAD {
            stages.push(stage(StageKind::Trigger, wait - TRIGGER_LEAD));
            TimelineKind::BookingOnly
        } else {
            stages.push(stage(StageKind::Trigger, wait));
            TimelineKind::Immediate
        };

        if has_slots {
            stages.push(stage(StageKind::Execute, wait));
        }

        Self {
            kind,
            trigger_at,
            deferred,
            wait,
            stages,
        }
    }

    /// Stage kinds in firing order
    pub fn sequence(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind).collect()
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Everything a timeline needs to know about its booking
#[derive(Debug, Clone)]
pub struct TimelineRequest {
    pub booking_id: String,
    pub url: String,
    pub booking_date: Option<NaiveDate>,
    pub trigger_at: DateTime<Tz>,

    /// Slots after quantity splitting, one per tab
    pub units: Vec<TimeSlot>,

    pub credentials: Option<Credentials>,
}

/// How a timeline ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineOutcome {
    /// Every stage was emitted
    Finished,
    /// Cancelled before this stage was emitted
    Cancelled { before: StageKind },
}

/// A booking's timeline, bound to a cancellation token
pub struct TriggerTimeline {
    request: TimelineRequest,
    plan: TimelinePlan,
    hub: Arc<BroadcastHub>,
    token: CancellationToken,
}

impl TriggerTimeline {
    pub fn new(
        request: TimelineRequest,
        now: DateTime<Tz>,
        hub: Arc<BroadcastHub>,
        token: CancellationToken,
    ) -> Self {
        let plan = TimelinePlan::compute(
            request.trigger_at,
            now,
            request.credentials.is_some(),
            !request.units.is_empty(),
        );
        Self {
            request,
            plan,
            hub,
            token,
        }
    }

    pub fn plan(&self) -> &TimelinePlan {
        &self.plan
    }

    /// Run on its own task
    pub fn spawn(self) -> JoinHandle<TimelineOutcome> {
        tokio::spawn(self.run())
    }

    /// Sleep to each stage deadline and emit it, unless cancelled
    pub async fn run(self) -> TimelineOutcome {
        let id = self.request.booking_id.as_str();

        if self.plan.deferred {
            tracing::warn!(
                booking_id = %id,
                trigger_at = %self.plan.trigger_at,
                "Trigger time already passed, deferred by one day"
            );
        }
        tracing::info!(
            booking_id = %id,
            kind = ?self.plan.kind,
            wait_secs = self.plan.wait.as_secs(),
            "Starting booking timeline"
        );

        let start = Instant::now();
        for stage in &self.plan.stages {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    return self.cancelled(stage.kind);
                }
                _ = sleep_until(start + stage.offset) => {}
            }

            if self.token.is_cancelled() {
                return self.cancelled(stage.kind);
            }
            self.emit(stage.kind);
        }

        tracing::info!(booking_id = %id, "Booking timeline finished");
        TimelineOutcome::Finished
    }

    fn cancelled(&self, before: StageKind) -> TimelineOutcome {
        tracing::info!(
            booking_id = %self.request.booking_id,
            next_stage = before.as_str(),
            "Booking timeline cancelled"
        );
        TimelineOutcome::Cancelled { before }
    }

    fn emit(&self, kind: StageKind) {
        match kind {
            StageKind::StoreUrl => self.emit_store_url(),
            StageKind::PreLogin => self.emit_pre_login(),
            StageKind::Trigger => self.emit_trigger(),
            StageKind::Execute => self.emit_execute(),
        }
    }

    fn emit_store_url(&self) {
        let request = &self.request;
        let has_units = !request.units.is_empty();

        let command = AgentCommand::StoreUrl(StoreUrl {
            url: self.url(),
            scheduled_time: self.plan.trigger_at.to_rfc3339(),
            booking_id: request.booking_id.clone(),
            time_slots: has_units.then(|| self.labels()),
            booking_date: request.booking_date,
            slots_with_quantities: has_units.then(|| request.units.clone()),
            auto_login: request.credentials.is_some(),
            email: request.credentials.as_ref().map(|c| c.email.clone()),
            password: request.credentials.as_ref().map(|c| c.password.clone()),
        });

        if self.hub.broadcast_to_agents(&command) == 0 {
            self.hub.broadcast_to_web(&WebEvent::log(
                format!(
                    "Booking {} scheduled, but no automation agent is connected",
                    request.booking_id
                ),
                LogLevel::Warning,
            ));
        }
    }

    fn emit_pre_login(&self) {
        let id = &self.request.booking_id;

        self.hub.broadcast_to_agents(&AgentCommand::PreLoginTrigger {
            url: self.url(),
            booking_id: id.clone(),
        });

        let message = "Performing login check...";
        self.hub.broadcast_to_web(&WebEvent::BookingUpdate {
            booking_id: id.clone(),
            status: BookingStatus::LoginCheck,
            message: message.to_string(),
        });
        self.event_log(LogEntry::new(message, LogLevel::Info, EventType::LoginCheck));
    }

    fn emit_trigger(&self) {
        let id = &self.request.booking_id;
        let tabs = self.request.units.len().max(1);

        self.hub.broadcast_to_agents(&AgentCommand::Trigger {
            url: self.url(),
            booking_id: id.clone(),
            time_slots: (!self.request.units.is_empty()).then(|| self.labels()),
        });

        let message = format!("Opening {} tab(s)", tabs);
        self.hub.broadcast_to_web(&WebEvent::BookingUpdate {
            booking_id: id.clone(),
            status: BookingStatus::Running,
            message: message.clone(),
        });
        self.event_log(LogEntry::new(message, LogLevel::Info, EventType::BookingStart));
    }

    fn emit_execute(&self) {
        let id = &self.request.booking_id;

        self.hub.broadcast_to_agents(&AgentCommand::ExecuteBooking {
            booking_id: id.clone(),
            booking_date: self.request.booking_date,
            slots_with_quantities: self.request.units.clone(),
        });

        self.event_log(LogEntry::new(
            format!("Executing booking for {} slot(s)", self.request.units.len()),
            LogLevel::Info,
            EventType::ExecuteBooking,
        ));
    }

    fn event_log(&self, entry: LogEntry) {
        self.hub.broadcast_to_web(&WebEvent::BookingEventLog {
            booking_id: self.request.booking_id.clone(),
            event: entry,
        });
    }

    fn labels(&self) -> Vec<String> {
        self.request.units.iter().map(|u| u.label.clone()).collect()
    }

    /// URL as sent to the agent
    fn url(&self) -> String {
        normalize_url(&self.request.url).unwrap_or_else(|_| self.request.url.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
