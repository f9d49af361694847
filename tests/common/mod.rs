//! Common test utilities

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::{Asia::Kolkata, Tz};
use serde_json::Value;
use tokio::sync::mpsc;

use tabtrigger::coordinator::registry::Frame;
use tabtrigger::coordinator::{BroadcastHub, SessionId, SessionRegistry, SessionRole};
use tabtrigger::models::{Booking, TimeSlot};
use tabtrigger::storage::BookingStore;

/// Current time in the default booking timezone
pub fn kolkata_now() -> DateTime<Tz> {
    Utc::now().with_timezone(&Kolkata)
}

/// Hub over a fresh store in `dir`
#[allow(dead_code)]
pub fn create_hub(dir: &Path) -> Arc<BroadcastHub> {
    let store = Arc::new(BookingStore::open(dir).unwrap());
    let registry = Arc::new(SessionRegistry::new(64));
    Arc::new(BroadcastHub::new(registry, store))
}

/// Register a session already classified as an automation agent
#[allow(dead_code)]
pub fn connect_agent(hub: &BroadcastHub) -> (SessionId, mpsc::Receiver<Frame>) {
    let (id, rx) = hub.registry().register();
    hub.registry()
        .classify(id, SessionRole::AutomationAgent)
        .unwrap();
    (id, rx)
}

/// Create a booking with the given id and slots
#[allow(dead_code)]
pub fn create_test_booking(id: &str, trigger_at: DateTime<Tz>, slots: Vec<TimeSlot>) -> Booking {
    Booking::new(
        id,
        "https://tickets.example.com/event",
        None,
        trigger_at.fixed_offset(),
        slots,
    )
}

/// Next frame as JSON
#[allow(dead_code)]
pub async fn next_json(rx: &mut mpsc::Receiver<Frame>) -> Value {
    let frame = rx.recv().await.expect("session queue closed");
    serde_json::from_str(&frame).unwrap()
}
