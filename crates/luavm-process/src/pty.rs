//! Interpreter processes bound to a pseudo-terminal.

use crate::config::CommandSpec;
use crate::error::{ProcessError, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty};
use std::io::{Read, Write};

/// End-of-transmission byte; an interpreter reading a terminal treats it as EOF.
const EOT: u8 = 0x04;

/// Terminal dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows.
    pub rows: u16,
    /// Number of columns.
    pub cols: u16,
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl From<PtySize> for portable_pty::PtySize {
    fn from(size: PtySize) -> Self {
        Self {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Blocking reader over the controlling end of the terminal.
pub type PtyReader = Box<dyn Read + Send>;

/// A running interpreter whose standard streams are bound to a terminal.
///
/// The subordinate end is closed in this process right after spawning, so
/// reads on the controlling end fail once the interpreter exits.
pub struct PtyProcess {
    program: String,
    child: Box<dyn Child + Send + Sync>,
    // Held so the controlling end stays open for the process lifetime.
    _master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
}

impl PtyProcess {
    /// Allocate a terminal pair and spawn `spec` on its subordinate end.
    ///
    /// Returns the process handle and an independent reader for the
    /// controlling end, intended for a dedicated reader thread.
    pub fn start(spec: &CommandSpec, size: PtySize) -> Result<(Self, PtyReader)> {
        let program = spec.program.display().to_string();

        let pair = native_pty_system()
            .openpty(size.into())
            .map_err(|e| ProcessError::Pty(format!("openpty failed: {e}")))?;

        let mut command = CommandBuilder::new(&spec.program);
        command.args(&spec.args);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(cwd) = &spec.cwd {
            command.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(command)
            .map_err(|e| ProcessError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ProcessError::Pty(format!("reader clone failed: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ProcessError::Pty(format!("writer unavailable: {e}")))?;

        tracing::debug!(
            program = %program,
            args = ?spec.args,
            pid = child.process_id(),
            "Spawned PTY process"
        );

        Ok((
            Self {
                program,
                child,
                _master: pair.master,
                writer,
            },
            reader,
        ))
    }

    /// OS process id, if still known.
    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Write raw bytes to the controlling end.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Check whether the process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the interpreter to exit by sending EOF through the terminal.
    pub fn terminate(&mut self) -> Result<()> {
        tracing::debug!(program = %self.program, pid = self.pid(), "Requesting interpreter exit");
        self.write(&[EOT])
    }

    /// Force kill the process.
    pub fn kill(&mut self) -> Result<()> {
        tracing::warn!(program = %self.program, pid = self.pid(), "Force killing PTY process");
        self.child.kill()?;
        // Reap so the child does not linger as a zombie.
        let _ = self.child.try_wait();
        Ok(())
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = self.child.kill();
        }
    }
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("program", &self.program)
            .field("pid", &self.pid())
            .finish()
    }
}
