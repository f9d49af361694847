//! Coordinator server implementation
//!
//! This module wires the booking store, session registry, broadcast hub and
//! engine together and serves them over HTTP/WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::storage::BookingStore;

use super::api::create_router;
use super::broadcast::BroadcastHub;
use super::engine::{BookingEngine, EngineSettings};
use super::registry::SessionRegistry;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Booking engine
    pub engine: Arc<BookingEngine>,

    /// Server start time
    pub start_time: Instant,

    /// Configuration
    pub config: Arc<Config>,
}

// ============================================================================
// Coordinator Server
// ============================================================================

/// Main coordinator server
pub struct CoordinatorServer {
    config: Arc<Config>,
    bind_address: SocketAddr,
    state: AppState,
}

impl CoordinatorServer {
    /// Create a new coordinator server
    pub fn new(config: Config) -> Result<Self, ServerError> {
        config.validate().map_err(|e| ServerError::Config(e.to_string()))?;
        let bind_address = config
            .bind_address()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let store = BookingStore::open(&config.storage.data_dir)
            .map_err(|e| ServerError::Init(e.to_string()))?;

        let registry = Arc::new(SessionRegistry::new(config.server.session_buffer));
        let hub = Arc::new(BroadcastHub::new(registry, Arc::new(store)));
        let engine = Arc::new(BookingEngine::new(
            hub,
            EngineSettings {
                timezone: config.timezone(),
                max_per_unit: config.scheduler.max_quantity_per_unit,
                agent: config.agent_settings(),
            },
        ));

        let config = Arc::new(config);
        let state = AppState {
            engine,
            start_time: Instant::now(),
            config: Arc::clone(&config),
        };

        Ok(Self {
            config,
            bind_address,
            state,
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.server.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.server.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start the server
    pub async fn start(&self) -> Result<(), ServerError> {
        self.start_with_shutdown(std::future::pending()).await
    }

    /// Start with graceful shutdown
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.bind_address;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{addr}: {e}")))?;

        tracing::info!(
            address = %addr,
            bookings = self.state.engine.store().count(),
            timezone = %self.config.scheduler.timezone,
            "Coordinator listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Coordinator shutdown complete");
        Ok(())
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.bind_address,
            timezone: self.config.scheduler.timezone.clone(),
            max_quantity_per_unit: self.config.scheduler.max_quantity_per_unit,
            data_dir: self.config.storage.data_dir.display().to_string(),
            cors_enabled: self.config.server.enable_cors,
            request_logging_enabled: self.config.server.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub timezone: String,
    pub max_quantity_per_unit: u32,
    pub data_dir: String,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Booking Coordinator\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Timezone: {}\n\
             Max Tickets per Tab: {}\n\
             Data Directory: {}\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.timezone,
            self.max_quantity_per_unit,
            self.data_dir,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Configuration error
    Config(String),

    /// Initialization error
    Init(String),

    /// Failed to bind to address
    Bind(String),

    /// Server error
    Serve(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Init(msg) => write!(f, "Initialization error: {}", msg),
            Self::Bind(msg) => write!(f, "Failed to bind: {}", msg),
            Self::Serve(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().join("data");
        config
    }

    #[test]
    fn test_server_creation_creates_data_dir() {
        let dir = TempDir::new().unwrap();
        let server = CoordinatorServer::new(config_in(&dir));
        assert!(server.is_ok());
        assert!(dir.path().join("data/scheduled_bookings.json").exists());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.server.session_buffer = 0;

        let err = CoordinatorServer::new(config).err().unwrap();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn test_server_info() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.server.enable_cors = false;
        config.server.port = 8123;

        let info = CoordinatorServer::new(config).unwrap().info();
        assert_eq!(info.bind_address.port(), 8123);
        assert_eq!(info.max_quantity_per_unit, 50);
        assert!(!info.cors_enabled);
        assert!(info.display().contains("Asia/Kolkata"));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let dir = TempDir::new().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = config_in(&dir);
        config.server.host = "127.0.0.1".into();
        config.server.port = taken.local_addr().unwrap().port();

        let server = CoordinatorServer::new(config).unwrap();
        let err = server.start_with_shutdown(async {}).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind(_)));
    }
}
