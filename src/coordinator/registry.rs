//! Session registry for live WebSocket connections
//!
//! Every connection is registered on upgrade and owns a bounded outbound
//! queue. Sessions start `Unclassified` and are bucketed with web clients
//! until a handshake classifies them. Classification happens at most once.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Serialized frame shared by every recipient of a broadcast
pub type Frame = Arc<str>;

// ============================================================================
// Session Role
// ============================================================================

/// Role of a connected session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    /// Connected, no handshake yet
    Unclassified,

    /// Human-facing UI
    WebClient,

    /// Browser-side automation agent
    AutomationAgent,
}

impl SessionRole {
    /// Sessions that receive web broadcasts
    pub fn in_web_bucket(&self) -> bool {
        matches!(self, Self::Unclassified | Self::WebClient)
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, Self::AutomationAgent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unclassified => "unclassified",
            Self::WebClient => "web_client",
            Self::AutomationAgent => "automation_agent",
        }
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

// ============================================================================
// Session Registry
// ============================================================================

struct SessionEntry {
    role: SessionRole,
    sender: mpsc::Sender<Frame>,
    connected_at: DateTime<Utc>,
}

/// Registry of connected sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,

    /// Outbound queue capacity per session
    buffer: usize,
}

impl SessionRegistry {
    /// Create a registry whose sessions buffer up to `buffer` frames
    pub fn new(buffer: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Register a new connection; the receiver feeds its writer task
    pub fn register(&self) -> (SessionId, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = SessionId::new();

        self.sessions.write().insert(
            id,
            SessionEntry {
                role: SessionRole::Unclassified,
                sender,
                connected_at: Utc::now(),
            },
        );
        tracing::debug!(session = %id, "Session registered");

        (id, receiver)
    }

    /// Classify an unclassified session
    pub fn classify(&self, id: SessionId, role: SessionRole) -> Result<(), RegistryError> {
        if role == SessionRole::Unclassified {
            return Err(RegistryError::InvalidRole(role));
        }

        let mut sessions = self.sessions.write();
        let entry = sessions
            .get_mut(&id)
            .ok_or(RegistryError::SessionNotFound(id))?;

        if entry.role != SessionRole::Unclassified {
            return Err(RegistryError::AlreadyClassified {
                id,
                current: entry.role,
            });
        }

        entry.role = role;
        tracing::info!(session = %id, role = %role, "Session classified");
        Ok(())
    }

    /// Current role of a session
    pub fn role(&self, id: SessionId) -> Option<SessionRole> {
        self.sessions.read().get(&id).map(|e| e.role)
    }

    /// Remove a session; returns false if it was already gone
    pub fn remove(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().remove(&id);
        if let Some(entry) = &removed {
            let connected_secs = (Utc::now() - entry.connected_at).num_seconds();
            tracing::debug!(session = %id, role = %entry.role, connected_secs, "Session removed");
        }
        removed.is_some()
    }

    /// Remove several sessions at once
    pub fn evict(&self, ids: &[SessionId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut sessions = self.sessions.write();
        ids.iter().filter(|id| sessions.remove(*id).is_some()).count()
    }

    /// Queue a frame for a single session.
    ///
    /// A full or closed queue evicts the session.
    pub fn send_to(&self, id: SessionId, frame: Frame) -> Result<(), RegistryError> {
        let sender = self
            .sessions
            .read()
            .get(&id)
            .map(|e| e.sender.clone())
            .ok_or(RegistryError::SessionNotFound(id))?;

        if let Err(e) = sender.try_send(frame) {
            self.remove(id);
            return Err(RegistryError::DeliveryFailed {
                id,
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Senders of every session whose role matches `filter`.
    ///
    /// The lock is released before the caller sends anything.
    pub fn senders<F>(&self, filter: F) -> Vec<(SessionId, mpsc::Sender<Frame>)>
    where
        F: Fn(SessionRole) -> bool,
    {
        self.sessions
            .read()
            .iter()
            .filter(|(_, entry)| filter(entry.role))
            .map(|(id, entry)| (*id, entry.sender.clone()))
            .collect()
    }

    /// Number of classified agents
    pub fn agent_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|e| e.role.is_agent())
            .count()
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStats {
        let sessions = self.sessions.read();

        let mut stats = RegistryStats {
            total_sessions: sessions.len(),
            ..Default::default()
        };
        for entry in sessions.values() {
            match entry.role {
                SessionRole::Unclassified => stats.unclassified += 1,
                SessionRole::WebClient => stats.web_clients += 1,
                SessionRole::AutomationAgent => stats.agents += 1,
            }
        }
        stats
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_sessions: usize,
    pub web_clients: usize,
    pub agents: usize,
    pub unclassified: usize,
}

impl RegistryStats {
    /// Sessions that receive web broadcasts
    pub fn web_bucket(&self) -> usize {
        self.web_clients + self.unclassified
    }

    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Session Stats\n\
             {:-<30}\n\
             Total Sessions: {}\n\
             - Web Clients: {}\n\
             - Agents: {}\n\
             - Unclassified: {}",
            "", self.total_sessions, self.web_clients, self.agents, self.unclassified
        )
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Session not registered (or already evicted)
    SessionNotFound(SessionId),

    /// Session was classified before
    AlreadyClassified { id: SessionId, current: SessionRole },

    /// Target role is not a classification
    InvalidRole(SessionRole),

    /// Outbound queue was full or closed
    DeliveryFailed { id: SessionId, reason: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            Self::AlreadyClassified { id, current } => {
                write!(f, "Session {} is already classified as {}", id, current)
            }
            Self::InvalidRole(role) => write!(f, "Cannot classify a session as {}", role),
            Self::DeliveryFailed { id, reason } => {
                write!(f, "Delivery to session {} failed: {}", id, reason)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sessions_are_unclassified() {
        let registry = SessionRegistry::new(8);
        let (id, _rx) = registry.register();

        assert_eq!(registry.role(id), Some(SessionRole::Unclassified));
        assert!(SessionRole::Unclassified.in_web_bucket());
        assert_eq!(registry.stats().web_bucket(), 1);
    }

    #[test]
    fn test_classify_once() {
        let registry = SessionRegistry::new(8);
        let (id, _rx) = registry.register();

        registry.classify(id, SessionRole::AutomationAgent).unwrap();
        assert_eq!(registry.agent_count(), 1);

        let err = registry.classify(id, SessionRole::WebClient).unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyClassified {
                id,
                current: SessionRole::AutomationAgent
            }
        );
        assert!(registry
            .classify(id, SessionRole::Unclassified)
            .is_err());
    }

    #[tokio::test]
    async fn test_send_to_delivers_in_order() {
        let registry = SessionRegistry::new(8);
        let (id, mut rx) = registry.register();

        registry.send_to(id, Arc::from("one")).unwrap();
        registry.send_to(id, Arc::from("two")).unwrap();

        assert_eq!(&*rx.recv().await.unwrap(), "one");
        assert_eq!(&*rx.recv().await.unwrap(), "two");
    }

    #[test]
    fn test_full_queue_evicts() {
        let registry = SessionRegistry::new(1);
        let (id, _rx) = registry.register();

        registry.send_to(id, Arc::from("one")).unwrap();
        let err = registry.send_to(id, Arc::from("two")).unwrap_err();
        assert!(matches!(err, RegistryError::DeliveryFailed { .. }));
        assert_eq!(registry.role(id), None);
    }

    #[test]
    fn test_closed_receiver_evicts() {
        let registry = SessionRegistry::new(4);
        let (id, rx) = registry.register();
        drop(rx);

        assert!(registry.send_to(id, Arc::from("x")).is_err());
        assert_eq!(registry.stats().total_sessions, 0);
    }

    #[test]
    fn test_stats_and_senders() {
        let registry = SessionRegistry::new(4);
        let (agent, _a) = registry.register();
        let (web, _w) = registry.register();
        let (_loose, _l) = registry.register();
        registry.classify(agent, SessionRole::AutomationAgent).unwrap();
        registry.classify(web, SessionRole::WebClient).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.agents, 1);
        assert_eq!(stats.web_bucket(), 2);
        assert!(stats.display().contains("Agents: 1"));

        assert_eq!(registry.senders(|r| r.is_agent()).len(), 1);
        assert_eq!(registry.senders(|r| r.in_web_bucket()).len(), 2);

        assert_eq!(registry.evict(&[agent, web]), 2);
        assert!(!registry.remove(agent));
    }
}
