//! Configuration surface
//!
//! Plain values handed in by the environment; nothing here reads files or
//! prompts. The binary assembles these from CLI flags.

use std::collections::HashSet;
use std::time::Duration;

/// Configuration for one protocol session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Logical peer identity (path-derived on the wire)
    pub identity: String,

    /// Allow-listed authorization tokens
    pub allowed_tokens: HashSet<String>,

    /// Heartbeat interval advertised in BootNotification responses
    pub heartbeat_interval: u32,

    /// Per-call response timeout
    pub call_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity: "CP_1".to_string(),
            allowed_tokens: ["RFID_123".to_string(), "RFID_456".to_string()]
                .into_iter()
                .collect(),
            heartbeat_interval: 10,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Default::default()
        }
    }

    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_heartbeat_interval(mut self, seconds: u32) -> Self {
        self.heartbeat_interval = seconds;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}
