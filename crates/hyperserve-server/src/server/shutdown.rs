//! Graceful shutdown coordination.

use crate::server::Server;

/// Handle for triggering graceful server shutdown
///
/// Cloneable and thread-safe; signal handlers, orchestration glue and tests
/// can all hold one and coordinate teardown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    server: Server,
}

impl ShutdownHandle {
    pub(crate) fn new(server: Server) -> Self {
        Self { server }
    }

    /// Trigger graceful shutdown and wait for teardown
    pub async fn shutdown(&self) {
        self.server.stop().await;
    }

    /// Whether the server is still accepting traffic
    pub fn is_running(&self) -> bool {
        self.server.running()
    }
}
