//! Interpreter configuration types.

use crate::error::ProcessError;
use std::path::PathBuf;
use std::time::Duration;

/// How to launch the interpreter, both for one-shot and interactive use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Interpreter executable (default: `lua`, resolved through `PATH`).
    pub program: PathBuf,
    /// Arguments that make the interpreter read a script from stdin
    /// (default: `["-"]`).
    pub exec_args: Vec<String>,
    /// Arguments for an interactive session (default: `["-i"]`).
    pub interactive_args: Vec<String>,
    /// Extra environment variables for every spawned process.
    pub env: Vec<(String, String)>,
    /// Working directory for spawned processes (default: inherited).
    pub working_dir: Option<PathBuf>,
    /// Timeout applied to one-shot executions that do not pass their own.
    pub default_timeout: Option<Duration>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("lua"),
            exec_args: vec!["-".into()],
            interactive_args: vec!["-i".into()],
            env: Vec::new(),
            working_dir: None,
            default_timeout: None,
        }
    }
}

impl InterpreterConfig {
    /// Create a new config builder.
    pub fn builder() -> InterpreterConfigBuilder {
        InterpreterConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `LUAVM_EXECUTABLE` | `lua` |
    /// | `LUAVM_DEFAULT_TIMEOUT_SECS` | none |
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            program: std::env::var("LUAVM_EXECUTABLE")
                .map(PathBuf::from)
                .unwrap_or(default.program),
            default_timeout: std::env::var("LUAVM_DEFAULT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .or(default.default_timeout),
            ..default
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ProcessError> {
        if self.program.as_os_str().is_empty() {
            return Err(ProcessError::InvalidConfig("program is required".into()));
        }
        if self.default_timeout == Some(Duration::ZERO) {
            return Err(ProcessError::InvalidConfig(
                "default_timeout must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Human-readable program name for logs and errors.
    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

/// Builder for InterpreterConfig.
#[derive(Debug, Default)]
pub struct InterpreterConfigBuilder {
    config: InterpreterConfig,
}

impl InterpreterConfigBuilder {
    /// Set the interpreter executable.
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.program = program.into();
        self
    }

    /// Set the arguments used for one-shot execution from stdin.
    pub fn exec_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.exec_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the arguments used for interactive sessions.
    pub fn interactive_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.interactive_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.working_dir = Some(dir.into());
        self
    }

    /// Set the default one-shot timeout.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    /// Build the configuration, validating all required fields.
    pub fn build(self) -> Result<InterpreterConfig, ProcessError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Extra settings for networked VMs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Modules preloaded with `-l` before any code runs (default: `socket`).
    pub preload: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            preload: vec!["socket".into()],
        }
    }
}

impl NetworkConfig {
    /// Load configuration from environment variables.
    ///
    /// `LUAVM_NETWORK_PRELOAD` is a comma separated module list; an empty
    /// value disables preloading.
    pub fn from_env() -> Self {
        match std::env::var("LUAVM_NETWORK_PRELOAD") {
            Ok(v) => Self {
                preload: v
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Config with no preloaded modules.
    pub fn without_preload() -> Self {
        Self {
            preload: Vec::new(),
        }
    }

    /// Interpreter arguments that load the configured modules.
    pub(crate) fn preload_args(&self) -> Vec<String> {
        self.preload
            .iter()
            .flat_map(|m| ["-l".to_string(), m.clone()])
            .collect()
    }
}

/// A fully resolved command line, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Build the interactive command for an interpreter config, with extra
    /// arguments placed before the interactive ones.
    pub(crate) fn interactive(config: &InterpreterConfig, leading: Vec<String>) -> Self {
        let mut args = leading;
        args.extend(config.interactive_args.iter().cloned());
        Self {
            program: config.program.clone(),
            args,
            env: config.env.clone(),
            cwd: config.working_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = InterpreterConfig::default();
        assert_eq!(config.program, PathBuf::from("lua"));
        assert_eq!(config.exec_args, vec!["-"]);
        assert_eq!(config.interactive_args, vec!["-i"]);
        assert!(config.default_timeout.is_none());
    }

    #[test]
    fn test_builder_rejects_empty_program() {
        let result = InterpreterConfig::builder().program("").build();
        assert!(matches!(result, Err(ProcessError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_rejects_zero_timeout() {
        let result = InterpreterConfig::builder()
            .default_timeout(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_success() {
        let config = InterpreterConfig::builder()
            .program("/usr/bin/lua5.4")
            .exec_args(["-"])
            .interactive_args(["-i", "-W"])
            .env("LUA_PATH", "/opt/lua/?.lua")
            .default_timeout(Duration::from_secs(30))
            .build()
            .expect("should build successfully");

        assert_eq!(config.program, PathBuf::from("/usr/bin/lua5.4"));
        assert_eq!(config.interactive_args, vec!["-i", "-W"]);
        assert_eq!(config.env, vec![("LUA_PATH".into(), "/opt/lua/?.lua".into())]);
        assert_eq!(config.default_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_preload_args() {
        let net = NetworkConfig {
            preload: vec!["socket".into(), "ltn12".into()],
        };
        assert_eq!(net.preload_args(), vec!["-l", "socket", "-l", "ltn12"]);
        assert!(NetworkConfig::without_preload().preload_args().is_empty());
    }

    #[test]
    fn test_interactive_command_puts_leading_args_first() {
        let config = InterpreterConfig::default();
        let spec = CommandSpec::interactive(&config, vec!["-l".into(), "socket".into()]);
        assert_eq!(spec.args, vec!["-l", "socket", "-i"]);
    }
}
