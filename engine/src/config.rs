use anyhow::Context;
use std::env;
use std::time::Duration;

use crate::typing::DEFAULT_IDLE_TIMEOUT;

const TYPING_IDLE_VAR: &str = "CHATSYNC_TYPING_IDLE_MS";
const COMMAND_BUFFER_VAR: &str = "CHATSYNC_COMMAND_BUFFER";

/// Runtime configuration for the conversation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Quiet period after the last keystroke before "stop typing" is sent.
    pub typing_idle_timeout: Duration,
    /// Capacity of the session runtime's command channel.
    pub command_buffer: usize,
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(TYPING_IDLE_VAR) {
            let millis: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{TYPING_IDLE_VAR} must be milliseconds, got {raw:?}"))?;
            config.typing_idle_timeout = Duration::from_millis(millis);
        }
        if let Some(raw) = lookup(COMMAND_BUFFER_VAR) {
            let buffer: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("{COMMAND_BUFFER_VAR} must be a count, got {raw:?}"))?;
            anyhow::ensure!(buffer > 0, "{COMMAND_BUFFER_VAR} must be greater than zero");
            config.command_buffer = buffer;
        }
        Ok(config)
    }

    pub fn with_typing_idle_timeout(mut self, timeout: Duration) -> Self {
        self.typing_idle_timeout = timeout;
        self
    }

    pub fn with_command_buffer(mut self, buffer: usize) -> Self {
        self.command_buffer = buffer.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            typing_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            command_buffer: 64,
        }
    }
}
