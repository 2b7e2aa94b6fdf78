//! Server configuration.
//!
//! Port and manager username come from the command line. Everything else has
//! a default that can be overridden through the environment:
//! - `WHITEBOARD_BIND`: listen address (default `0.0.0.0`)
//! - `WHITEBOARD_MAX_SESSIONS`: worker pool size (default 32)
//! - `WHITEBOARD_DRAIN_TIMEOUT_SECS`: shutdown grace period (default 60)
//! - `WHITEBOARD_APPROVAL_TIMEOUT_SECS`: join approval wait (default 60)
//! - `WHITEBOARD_AUTH_TIMEOUT_SECS`: wait for the first `Join` (default 30)
//! - `WHITEBOARD_OUTBOUND_CAPACITY`: per-session queue length (default 256)
//!
//! Unparseable values fall back to the default.

use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_MAX_SESSIONS: usize = 32;
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Username of the privileged session. Only it may kick or quit, and it
    /// is the one session spared the shutdown notice.
    pub manager: String,
    pub max_sessions: usize,
    pub drain_timeout: Duration,
    pub approval_timeout: Duration,
    pub auth_timeout: Duration,
    pub outbound_capacity: usize,
}

impl ServerConfig {
    /// Defaults only, no environment lookup.
    pub fn new(port: u16, manager: impl Into<String>) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_owned(),
            port,
            manager: manager.into(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
            approval_timeout: Duration::from_secs(DEFAULT_APPROVAL_TIMEOUT_SECS),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    /// Defaults overlaid with `WHITEBOARD_*` environment variables.
    pub fn from_env(port: u16, manager: impl Into<String>) -> Self {
        Self::from_lookup(port, manager, |key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(port: u16, manager: impl Into<String>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::new(port, manager);
        let secs = |key: &str, default: Duration| {
            Duration::from_secs(env_parse(lookup(key), default.as_secs()))
        };

        Self {
            bind_addr: lookup("WHITEBOARD_BIND")
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.bind_addr),
            max_sessions: env_parse(lookup("WHITEBOARD_MAX_SESSIONS"), defaults.max_sessions).max(1),
            drain_timeout: secs("WHITEBOARD_DRAIN_TIMEOUT_SECS", defaults.drain_timeout),
            approval_timeout: secs("WHITEBOARD_APPROVAL_TIMEOUT_SECS", defaults.approval_timeout),
            auth_timeout: secs("WHITEBOARD_AUTH_TIMEOUT_SECS", defaults.auth_timeout),
            outbound_capacity: env_parse(lookup("WHITEBOARD_OUTBOUND_CAPACITY"), defaults.outbound_capacity).max(1),
            ..defaults
        }
    }

    /// `host:port` string handed to the listener.
    #[must_use]
    pub fn bind_target(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    #[must_use]
    pub fn with_bind_addr(mut self, bind_addr: impl Into<String>) -> Self {
        self.bind_addr = bind_addr.into();
        self
    }

    #[must_use]
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }
}

fn env_parse<T>(raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr,
{
    raw.and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
