//! Server configuration.

use crate::error::ServerError;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Worker pool size. Must be at least 1.
    pub threads: usize,
    /// Maximum events returned by a single epoll wait.
    pub max_events: usize,
    /// Registry cap; accepts beyond it are closed immediately.
    pub max_connections: usize,
    /// Per-connection inactivity timeout.
    pub idle_timeout: Duration,
    /// Listen backlog.
    pub backlog: i32,
    /// Extra info-level logging for connection lifecycle.
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            max_events: 64,
            max_connections: 4096,
            idle_timeout: Duration::from_secs(60),
            backlog: wirecall_protocol::DEFAULT_BACKLOG,
            verbose: false,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration with an explicit worker count.
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            ..Default::default()
        }
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Applies environment variable overrides (`WIRECALL_THREADS`,
    /// `WIRECALL_MAX_CONNECTIONS`, `WIRECALL_IDLE_TIMEOUT_SECS`,
    /// `WIRECALL_BACKLOG`, `WIRECALL_VERBOSE`).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(threads) = std::env::var("WIRECALL_THREADS") {
            if let Ok(n) = threads.parse() {
                self.threads = n;
            }
        }
        if let Ok(max) = std::env::var("WIRECALL_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
        if let Ok(timeout) = std::env::var("WIRECALL_IDLE_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                self.idle_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(backlog) = std::env::var("WIRECALL_BACKLOG") {
            if let Ok(n) = backlog.parse() {
                self.backlog = n;
            }
        }
        if let Ok(verbose) = std::env::var("WIRECALL_VERBOSE") {
            self.verbose = verbose == "1" || verbose.eq_ignore_ascii_case("true");
        }
    }

    /// Validates the configuration before the server starts.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.threads == 0 {
            return Err(ServerError::InvalidConfig(
                "threads must be at least 1".to_string(),
            ));
        }
        if self.max_events == 0 {
            return Err(ServerError::InvalidConfig(
                "max_events must be at least 1".to_string(),
            ));
        }
        if self.backlog <= 0 {
            return Err(ServerError::InvalidConfig(
                "backlog must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
