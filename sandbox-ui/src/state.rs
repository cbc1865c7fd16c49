//! Shared application state for the UI server.

use std::sync::Arc;

use sandbox::host::SandboxHost;

/// Shared state accessible from all request handlers.
///
/// The host is constructed once and lives for the whole server process;
/// its inbound listener is registered at startup and deregistered when the
/// process exits.
#[derive(Clone)]
pub struct AppState {
    pub host: Arc<SandboxHost>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            host: Arc::new(SandboxHost::new()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
