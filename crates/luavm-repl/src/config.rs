//! Configuration for the REPL front end.
//!
//! Orchestrator settings come from `OrchestratorConfig::from_env`; this
//! only covers what the front end itself needs.

use std::time::Duration;

/// Front-end settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplConfig {
    /// Id of the interactive VM to create (default: `repl`).
    pub session_id: String,

    /// Whether the interactive VM preloads networking (default: false).
    pub networked: bool,

    /// How long each output poll waits (default: 50ms).
    pub poll_interval: Duration,

    /// Timeout for `:exec` one-shot runs (default: 30s).
    pub exec_timeout: Duration,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            session_id: "repl".to_string(),
            networked: false,
            poll_interval: Duration::from_millis(50),
            exec_timeout: Duration::from_secs(30),
        }
    }
}

impl ReplConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `LUAVM_REPL_SESSION` | `repl` |
    /// | `LUAVM_REPL_NETWORKED` | `false` |
    /// | `LUAVM_REPL_POLL_MS` | `50` |
    /// | `LUAVM_REPL_EXEC_TIMEOUT_SECS` | `30` |
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            session_id: std::env::var("LUAVM_REPL_SESSION")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.session_id),
            networked: std::env::var("LUAVM_REPL_NETWORKED")
                .map(|v| parse_bool(&v))
                .unwrap_or(default.networked),
            poll_interval: std::env::var("LUAVM_REPL_POLL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(default.poll_interval),
            exec_timeout: std::env::var("LUAVM_REPL_EXEC_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.exec_timeout),
        }
    }

    /// Id of the side VM used for `:exec`.
    pub fn exec_vm_id(&self) -> String {
        format!("{}-exec", self.session_id)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
