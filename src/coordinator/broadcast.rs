//! Fan-out delivery to registered sessions
//!
//! Agent broadcasts are plain best-effort fan-out. Web broadcasts also
//! persist booking progress: a `booking_update` moves the stored status and a
//! `booking_event_log` is appended to the booking's log. Persistence does not
//! depend on anyone being connected. A status change the store rejects is
//! never announced.

use serde::Serialize;
use std::sync::Arc;

use super::protocol::{encode, AgentCommand, WebEvent};
use super::registry::{Frame, SessionId, SessionRegistry, SessionRole};
use crate::models::BookingStatus;
use crate::storage::BookingStore;

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Broadcast hub shared by the engine and every timeline
pub struct BroadcastHub {
    registry: Arc<SessionRegistry>,
    store: Arc<BookingStore>,
}

impl BroadcastHub {
    pub fn new(registry: Arc<SessionRegistry>, store: Arc<BookingStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<BookingStore> {
        &self.store
    }

    /// Deliver to every automation agent; returns successful deliveries
    pub fn broadcast_to_agents(&self, command: &AgentCommand) -> usize {
        let Some(frame) = self.serialize(command, command.kind()) else {
            return 0;
        };

        let report = self.fan_out(SessionRole::is_agent, frame, command.kind());
        if report.delivered == 0 {
            tracing::warn!(
                message_type = command.kind(),
                booking_id = command.booking_id().unwrap_or("-"),
                "No automation agent received the message"
            );
        } else {
            tracing::info!(
                message_type = command.kind(),
                booking_id = command.booking_id().unwrap_or("-"),
                recipients = report.delivered,
                "Sent to agents"
            );
        }
        report.delivered
    }

    /// Persist booking progress, then deliver to every web session
    ///
    /// Returns 0 without delivering when the store rejects a status change.
    pub fn broadcast_to_web(&self, event: &WebEvent) -> usize {
        if !self.persist(event) {
            return 0;
        }
        self.announce(event)
    }

    /// Move a booking's stored status and announce it to web sessions
    ///
    /// Returns `false` when the store refused the transition; nothing is sent.
    pub fn publish_status(
        &self,
        booking_id: &str,
        status: BookingStatus,
        message: impl Into<String>,
    ) -> bool {
        let event = WebEvent::BookingUpdate {
            booking_id: booking_id.to_string(),
            status,
            message: message.into(),
        };
        if !self.persist(&event) {
            return false;
        }
        self.announce(&event);
        true
    }

    /// Reply to a single session; a failed send evicts it
    pub fn send_to<T: Serialize>(&self, session: SessionId, message: &T, label: &str) -> bool {
        let Some(frame) = self.serialize(message, label) else {
            return false;
        };

        match self.registry.send_to(session, frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session = %session, message_type = label, error = %e, "Reply not delivered");
                false
            }
        }
    }

    fn announce(&self, event: &WebEvent) -> usize {
        match self.serialize(event, event.kind()) {
            Some(frame) => self.fan_out(SessionRole::in_web_bucket, frame, event.kind()).delivered,
            None => 0,
        }
    }

    fn serialize<T: Serialize>(&self, message: &T, label: &str) -> Option<Frame> {
        match encode(message) {
            Ok(text) => Some(Arc::from(text)),
            Err(e) => {
                tracing::error!(message_type = label, error = %e, "Failed to serialize message");
                None
            }
        }
    }

    /// Send `frame` to matching sessions, evicting the ones that fail
    fn fan_out(&self, filter: fn(&SessionRole) -> bool, frame: Frame, label: &str) -> DeliveryReport {
        let recipients = self.registry.senders(|role| filter(&role));

        let mut report = DeliveryReport::default();
        let mut to_remove = Vec::new();
        for (id, sender) in recipients {
            match sender.try_send(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(session = %id, message_type = label, error = %e, "Delivery failed, evicting session");
                    to_remove.push(id);
                }
            }
        }

        report.evicted = self.registry.evict(&to_remove);
        tracing::debug!(message_type = label, delivered = report.delivered, evicted = report.evicted, "Broadcast");
        report
    }

    /// Returns `false` only for a status change the store refused
    fn persist(&self, event: &WebEvent) -> bool {
        match event {
            WebEvent::BookingUpdate {
                booking_id,
                status,
                message,
            } => {
                let accepted = self.store.transition(booking_id, *status, message.clone());
                if !accepted {
                    tracing::warn!(booking_id = %booking_id, status = %status, "Status change rejected, not announced");
                }
                accepted
            }
            WebEvent::BookingEventLog { booking_id, event } => {
                if !self.store.append_log(booking_id, event.clone()) {
                    tracing::debug!(booking_id = %booking_id, "Event log not persisted");
                }
                true
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Booking, BookingStatus, EventType, LogEntry, LogLevel, TimeSlot};
    use chrono::DateTime;
    use tempfile::TempDir;

    fn hub() -> (TempDir, BroadcastHub) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BookingStore::open(dir.path()).unwrap());
        let registry = Arc::new(SessionRegistry::new(4));
        (dir, BroadcastHub::new(registry, store))
    }

    fn seed(hub: &BroadcastHub, id: &str) {
        let trigger = DateTime::parse_from_rfc3339("2030-01-01T10:00:00+05:30").unwrap();
        hub.store().create(Booking::new(
            id,
            "https://example.com",
            None,
            trigger,
            vec![TimeSlot::new("9:00 AM", 1)],
        ));
    }

    fn pong() -> AgentCommand {
        AgentCommand::Pong { timestamp: 1.0 }
    }

    #[test]
    fn test_agents_only_receive_agent_broadcasts() {
        let (_dir, hub) = hub();
        let (agent, mut agent_rx) = hub.registry().register();
        let (_web, mut web_rx) = hub.registry().register();
        hub.registry().classify(agent, SessionRole::AutomationAgent).unwrap();

        assert_eq!(hub.broadcast_to_agents(&pong()), 1);
        assert!(agent_rx.try_recv().is_ok());
        assert!(web_rx.try_recv().is_err());
    }

    #[test]
    fn test_zero_agents_returns_zero() {
        let (_dir, hub) = hub();
        let (_web, _rx) = hub.registry().register();
        assert_eq!(hub.broadcast_to_agents(&pong()), 0);
    }

    #[test]
    fn test_failed_send_evicts_only_that_session() {
        let (_dir, hub) = hub();
        let (dead, dead_rx) = hub.registry().register();
        let (alive, mut alive_rx) = hub.registry().register();
        hub.registry().classify(dead, SessionRole::AutomationAgent).unwrap();
        hub.registry().classify(alive, SessionRole::AutomationAgent).unwrap();
        drop(dead_rx);

        assert_eq!(hub.broadcast_to_agents(&pong()), 1);
        assert!(hub.registry().role(dead).is_none());
        assert_eq!(hub.registry().role(alive), Some(SessionRole::AutomationAgent));
        assert!(alive_rx.try_recv().is_ok());
    }

    #[test]
    fn test_web_broadcast_persists_without_recipients() {
        let (_dir, hub) = hub();
        seed(&hub, "a1");

        let delivered = hub.broadcast_to_web(&WebEvent::BookingUpdate {
            booking_id: "a1".into(),
            status: BookingStatus::Running,
            message: "Opening 1 tab(s)".into(),
        });
        assert_eq!(delivered, 0);

        hub.broadcast_to_web(&WebEvent::BookingEventLog {
            booking_id: "a1".into(),
            event: LogEntry::new("Opening tabs", LogLevel::Info, EventType::BookingStart),
        });

        let stored = hub.store().get("a1").unwrap();
        assert_eq!(stored.status, BookingStatus::Running);
        assert_eq!(stored.message.as_deref(), Some("Opening 1 tab(s)"));
        assert_eq!(stored.logs.len(), 1);
        assert_eq!(stored.logs[0].event_type, EventType::BookingStart);
    }

    #[test]
    fn test_rejected_status_change_is_not_announced() {
        let (_dir, hub) = hub();
        seed(&hub, "a1");
        let (_web, mut rx) = hub.registry().register();

        assert!(hub.publish_status("a1", BookingStatus::Cancelled, "Booking cancelled"));
        assert!(rx.try_recv().is_ok());

        assert!(!hub.publish_status("a1", BookingStatus::Running, "Opening 1 tab(s)"));
        assert_eq!(
            hub.broadcast_to_web(&WebEvent::BookingUpdate {
                booking_id: "a1".into(),
                status: BookingStatus::Completed,
                message: "Booking completed".into(),
            }),
            0
        );
        assert!(rx.try_recv().is_err());

        let stored = hub.store().get("a1").unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.message.as_deref(), Some("Booking cancelled"));
    }

    #[test]
    fn test_status_for_unknown_booking_is_not_announced() {
        let (_dir, hub) = hub();
        let (_web, mut rx) = hub.registry().register();

        assert!(!hub.publish_status("missing", BookingStatus::Running, "Opening 1 tab(s)"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_plain_log_is_not_persisted() {
        let (_dir, hub) = hub();
        seed(&hub, "a1");
        let (_web, mut rx) = hub.registry().register();

        assert_eq!(hub.broadcast_to_web(&WebEvent::log("hello", LogLevel::Info)), 1);
        assert!(rx.try_recv().is_ok());
        assert!(hub.store().get("a1").unwrap().logs.is_empty());
    }

    #[test]
    fn test_send_to_single_session() {
        let (_dir, hub) = hub();
        let (id, mut rx) = hub.registry().register();
        assert!(hub.send_to(id, &WebEvent::error("nope"), "error"));
        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("\"type\":\"error\""));
    }
}
