//! Application state shared across handlers.

use std::sync::Arc;

use crate::gateway::TextGateway;

/// Relay state. Each request is independent; the gateway handle is the
/// only thing shared, and it is immutable.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn TextGateway>,
    /// Allowed CORS origins from config.
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(gateway: Arc<dyn TextGateway>) -> Self {
        Self {
            gateway,
            cors_origins: Vec::new(),
        }
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}
