//! Gateway server implementation
//!
//! Wraps the router in the configured middleware and runs the accept loop.

use std::net::SocketAddr;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::api::create_router;
use super::error::ServerError;
use crate::config::ServerConfig;
use crate::session::SessionManager;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Session factory for this instance
    pub sessions: SessionManager,

    /// Per-connection outbound queue length
    pub outbound_buffer: usize,

    /// Server start time
    pub start_time: Instant,
}

// ============================================================================
// Gateway Server
// ============================================================================

/// Client-facing server of one instance
pub struct GatewayServer {
    config: ServerConfig,
    state: AppState,
}

impl GatewayServer {
    /// Create a new gateway server
    pub fn new(config: ServerConfig, sessions: SessionManager) -> Self {
        let state = AppState {
            sessions,
            outbound_buffer: config.outbound_buffer.max(1),
            start_time: Instant::now(),
        };

        Self { config, state }
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Address the server listens on
    pub fn bind_address(&self) -> Result<SocketAddr, ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        addr.parse().map_err(|e: std::net::AddrParseError| ServerError::InvalidAddress {
            addr,
            reason: e.to_string(),
        })
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        // Add CORS layer if enabled
        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        // Add tracing layer if enabled
        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Bind the listening socket
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.bind_address()?;
        TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
    }

    /// Serve on an already bound listener until `shutdown_signal` resolves
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let local = listener.local_addr().map_err(ServerError::Serve)?;

        tracing::info!(
            addr = %local,
            instance = %self.state.sessions.instance_id(),
            "Gateway listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(ServerError::Serve)?;

        tracing::info!(instance = %self.state.sessions.instance_id(), "Gateway shutdown complete");
        Ok(())
    }

    /// Bind and serve with graceful shutdown
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown_signal).await
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: format!("{}:{}", self.config.host, self.config.port),
            instance_id: self.state.sessions.instance_id().to_string(),
            bus: self.state.sessions.coordinator().bus_name(),
            outbound_buffer: self.state.outbound_buffer,
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: String,
    pub instance_id: String,
    pub bus: &'static str,
    pub outbound_buffer: usize,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Gateway Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Instance: {}\n\
             Bus: {}\n\
             Outbound Buffer: {}\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.instance_id,
            self.bus,
            self.outbound_buffer,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
