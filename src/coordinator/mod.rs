//! Booking coordinator
//!
//! Sessions connect over a single WebSocket endpoint. The engine classifies
//! each one, turns schedule requests into trigger timelines, and maps agent
//! progress back onto the stored bookings.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Coordinator Server            │
//! │                                         │
//! │  GET /ws ──► Session Registry           │
//! │               - Unclassified            │
//! │               - WebClient               │
//! │               - AutomationAgent         │
//! │                     │                   │
//! │               Booking Engine ──► Trigger│
//! │                     │          Timelines│
//! │               Broadcast Hub             │
//! │                     │                   │
//! │               Booking Store (JSON)      │
//! │                                         │
//! │  GET /api/health                        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tabtrigger::config::Config;
//! use tabtrigger::coordinator::CoordinatorServer;
//!
//! let server = CoordinatorServer::new(Config::from_env()?)?;
//! server.start().await?;
//! ```

pub mod api;
pub mod broadcast;
pub mod engine;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod ws;

// Re-export main types
pub use broadcast::BroadcastHub;
pub use engine::{BookingEngine, EngineSettings};
pub use protocol::{AgentCommand, AgentMessage, WebEvent, WebRequest};
pub use registry::{SessionId, SessionRegistry, SessionRole};
pub use server::{AppState, CoordinatorServer, ServerError};
