//! Orchestrator and session configuration types.

use crate::error::CoreError;
use luavm_process::{InterpreterConfig, NetworkConfig, PtySize};
use std::time::Duration;

/// Settings applied to every interactive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long `stop` waits after requesting exit before force-killing
    /// (default: 2 seconds).
    pub stop_grace: Duration,
    /// Maximum buffered output chunks per session. `None` (the default)
    /// buffers without limit; when set, the oldest chunk is dropped to make
    /// room and the drop is counted.
    pub output_buffer_limit: Option<usize>,
    /// Bytes requested per terminal read (default: 1024).
    pub read_chunk_size: usize,
    /// Terminal size for new sessions.
    pub pty_size: PtySize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(2),
            output_buffer_limit: None,
            read_chunk_size: 1024,
            pty_size: PtySize::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `LUAVM_STOP_GRACE_MS` | `2000` |
    /// | `LUAVM_OUTPUT_BUFFER_LIMIT` | unbounded |
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            stop_grace: std::env::var("LUAVM_STOP_GRACE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.stop_grace),
            output_buffer_limit: std::env::var("LUAVM_OUTPUT_BUFFER_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(default.output_buffer_limit),
            ..default
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.read_chunk_size == 0 {
            return Err(CoreError::InvalidConfig("read_chunk_size must be > 0".into()));
        }
        if self.output_buffer_limit == Some(0) {
            return Err(CoreError::InvalidConfig(
                "output_buffer_limit must be > 0 when set".into(),
            ));
        }
        if self.pty_size.rows == 0 || self.pty_size.cols == 0 {
            return Err(CoreError::InvalidConfig("pty size must be non-zero".into()));
        }
        Ok(())
    }
}

/// Configuration for an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Interpreter used by every VM.
    pub interpreter: InterpreterConfig,
    /// Extra settings for networked VMs.
    pub network: NetworkConfig,
    /// Interactive session settings.
    pub session: SessionConfig,
    /// Upper bound on concurrently running one-shot executions
    /// (default: 10).
    pub max_workers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            interpreter: InterpreterConfig::default(),
            network: NetworkConfig::default(),
            session: SessionConfig::default(),
            max_workers: Self::DEFAULT_MAX_WORKERS,
        }
    }
}

impl OrchestratorConfig {
    /// Default worker pool bound.
    pub const DEFAULT_MAX_WORKERS: usize = 10;

    /// Create a new config builder.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// `LUAVM_MAX_WORKERS` sets the pool bound; see
    /// [`InterpreterConfig::from_env`], [`NetworkConfig::from_env`] and
    /// [`SessionConfig::from_env`] for the rest.
    pub fn from_env() -> Self {
        Self {
            interpreter: InterpreterConfig::from_env(),
            network: NetworkConfig::from_env(),
            session: SessionConfig::from_env(),
            max_workers: std::env::var("LUAVM_MAX_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Self::DEFAULT_MAX_WORKERS),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_workers == 0 {
            return Err(CoreError::InvalidConfig("max_workers must be > 0".into()));
        }
        self.interpreter.validate()?;
        self.session.validate()
    }
}

/// Builder for OrchestratorConfig.
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Set the interpreter configuration.
    pub fn interpreter(mut self, interpreter: InterpreterConfig) -> Self {
        self.config.interpreter = interpreter;
        self
    }

    /// Set the networked VM configuration.
    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.config.network = network;
        self
    }

    /// Set the session configuration.
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    /// Set the worker pool bound.
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers;
        self
    }

    /// Set the stop grace period for sessions.
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.config.session.stop_grace = grace;
        self
    }

    /// Cap buffered output per session, dropping the oldest chunks.
    pub fn output_buffer_limit(mut self, chunks: usize) -> Self {
        self.config.session.output_buffer_limit = Some(chunks);
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<OrchestratorConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
