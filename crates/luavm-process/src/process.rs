//! One-shot interpreter execution.

use crate::config::{CommandSpec, InterpreterConfig, NetworkConfig};
use crate::error::{ProcessError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum captured size per stream in bytes (1 MB).
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Structured result of a one-shot execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    /// True iff the interpreter exited with status 0 before the timeout.
    pub success: bool,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Short description of the failure, if any.
    pub error: Option<String>,
    /// Exit code, absent on timeout or signal termination.
    pub exit_code: Option<i32>,
    /// Wall-clock duration of the execution.
    pub duration_ms: u64,
}

impl ExecOutcome {
    fn timed_out(timeout: Duration, elapsed: Duration) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(format!("execution timed out after {timeout:?}")),
            exit_code: None,
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

/// One-shot execution contract shared by basic and networked VMs.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Name of this interpreter instance (the VM id).
    fn name(&self) -> &str;

    /// Run `code` to completion and return its outcome.
    ///
    /// `timeout` falls back to the configured default; `None` waits forever.
    /// A timeout is reported in the outcome, not as an error.
    async fn execute(&self, code: &str, timeout: Option<Duration>) -> Result<ExecOutcome>;

    /// The command line an interactive session should spawn.
    fn interactive_command(&self) -> CommandSpec;

    /// Whether this interpreter preloads networking support.
    fn is_networked(&self) -> bool {
        false
    }
}

/// A basic interpreter process.
#[derive(Debug, Clone)]
pub struct LuaProcess {
    name: String,
    config: InterpreterConfig,
}

impl LuaProcess {
    /// Create a new process handle. Nothing is spawned until used.
    pub fn new(name: impl Into<String>, config: InterpreterConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    async fn run(
        &self,
        leading: &[String],
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutcome> {
        let timeout = timeout.or(self.config.default_timeout);
        tracing::debug!(
            vm_id = %self.name,
            program = %self.config.program_name(),
            code_len = code.len(),
            timeout_ms = timeout.map(|t| t.as_millis() as u64),
            "Executing code"
        );
        tracing::trace!(vm_id = %self.name, code = %code, "Code to execute");

        let mut cmd = Command::new(&self.config.program);
        cmd.args(leading)
            .args(&self.config.exec_args)
            .envs(self.config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            tracing::warn!(vm_id = %self.name, error = %e, "Interpreter spawn failed");
            ProcessError::Spawn {
                program: self.config.program_name(),
                message: e.to_string(),
            }
        })?;

        let stdin = child.stdin.take();
        let script = code.as_bytes().to_vec();
        let run = async move {
            if let Some(mut stdin) = stdin {
                // The interpreter may exit before consuming all input.
                if let Err(e) = stdin.write_all(&script).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(ProcessError::Io(e));
                    }
                }
                drop(stdin);
            }
            Ok(child.wait_with_output().await?)
        };

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result?,
                Err(_) => {
                    // Dropping the future kills the child.
                    tracing::warn!(
                        vm_id = %self.name,
                        timeout_ms = limit.as_millis() as u64,
                        "Execution timed out"
                    );
                    return Ok(ExecOutcome::timed_out(limit, start.elapsed()));
                }
            },
            None => run.await?,
        };

        let stdout = truncate_output(String::from_utf8_lossy(&output.stdout).into_owned());
        let stderr = truncate_output(String::from_utf8_lossy(&output.stderr).into_owned());
        let exit_code = output.status.code();
        let success = output.status.success();
        let error = if success {
            None
        } else {
            Some(describe_failure(&stderr, exit_code))
        };

        tracing::debug!(
            vm_id = %self.name,
            success,
            exit_code,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Execution completed"
        );

        Ok(ExecOutcome {
            success,
            stdout,
            stderr,
            error,
            exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl Interpreter for LuaProcess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, code: &str, timeout: Option<Duration>) -> Result<ExecOutcome> {
        self.run(&[], code, timeout).await
    }

    fn interactive_command(&self) -> CommandSpec {
        CommandSpec::interactive(&self.config, Vec::new())
    }
}

/// An interpreter process with networking modules preloaded.
#[derive(Debug, Clone)]
pub struct NetworkedLuaProcess {
    inner: LuaProcess,
    network: NetworkConfig,
}

impl NetworkedLuaProcess {
    /// Create a new networked process handle.
    pub fn new(name: impl Into<String>, config: InterpreterConfig, network: NetworkConfig) -> Self {
        Self {
            inner: LuaProcess::new(name, config),
            network,
        }
    }
}

#[async_trait]
impl Interpreter for NetworkedLuaProcess {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn execute(&self, code: &str, timeout: Option<Duration>) -> Result<ExecOutcome> {
        self.inner
            .run(&self.network.preload_args(), code, timeout)
            .await
    }

    fn interactive_command(&self) -> CommandSpec {
        CommandSpec::interactive(&self.inner.config, self.network.preload_args())
    }

    fn is_networked(&self) -> bool {
        true
    }
}

/// Truncate a string to [`MAX_OUTPUT_SIZE`], preserving UTF-8 boundaries.
fn truncate_output(s: String) -> String {
    if s.len() <= MAX_OUTPUT_SIZE {
        return s;
    }
    let mut end = MAX_OUTPUT_SIZE;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_string();
    truncated.push_str("\n... [output truncated]");
    truncated
}

fn describe_failure(stderr: &str, exit_code: Option<i32>) -> String {
    match stderr.lines().find(|l| !l.trim().is_empty()) {
        Some(line) => line.trim().to_string(),
        None => match exit_code {
            Some(code) => format!("interpreter exited with status {code}"),
            None => "interpreter terminated by signal".into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(name: &str) -> LuaProcess {
        let config = InterpreterConfig::builder()
            .program("sh")
            .exec_args(["-s"])
            .build()
            .expect("valid config");
        LuaProcess::new(name, config)
    }

    #[test]
    fn test_truncate_output_short() {
        assert_eq!(truncate_output("hello".into()), "hello");
    }

    #[test]
    fn test_truncate_output_long() {
        let long = "é".repeat(MAX_OUTPUT_SIZE);
        let out = truncate_output(long);
        assert!(out.ends_with("[output truncated]"));
        assert!(out.len() < MAX_OUTPUT_SIZE + 64);
    }

    #[test]
    fn test_describe_failure_prefers_first_stderr_line() {
        let msg = describe_failure("lua: stdin:1: boom\nstack traceback:\n\t[C]: in ?\n", Some(1));
        assert_eq!(msg, "lua: stdin:1: boom");
        assert_eq!(
            describe_failure("", Some(3)),
            "interpreter exited with status 3"
        );
        assert_eq!(describe_failure("  \n", None), "interpreter terminated by signal");
    }

    #[tokio::test]
    async fn test_execute_success() {
        let outcome = shell("ok").execute("echo hello", None).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.stdout.trim(), "hello");
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_execute_failure_reports_error() {
        let outcome = shell("fail")
            .execute("echo broken >&2; exit 4", None)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(4));
        assert_eq!(outcome.error.as_deref(), Some("broken"));
    }

    #[tokio::test]
    async fn test_execute_timeout_is_an_outcome() {
        let outcome = shell("slow")
            .execute("sleep 5", Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.exit_code.is_none());
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_execute_missing_program() {
        let config = InterpreterConfig::builder()
            .program("/nonexistent/luavm-interpreter")
            .build()
            .unwrap();
        let result = LuaProcess::new("missing", config).execute("print(1)", None).await;
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }

    #[test]
    fn test_networked_interactive_command() {
        let proc = NetworkedLuaProcess::new("net", InterpreterConfig::default(), NetworkConfig::default());
        assert!(proc.is_networked());
        assert_eq!(proc.interactive_command().args, vec!["-l", "socket", "-i"]);
        assert!(!LuaProcess::new("basic", InterpreterConfig::default()).is_networked());
    }

    #[test]
    fn test_outcome_serializes() {
        let outcome = ExecOutcome::timed_out(Duration::from_secs(1), Duration::from_secs(1));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["exit_code"], serde_json::Value::Null);
    }
}
