//! Interactive sessions: a persistent interpreter bound to a terminal.
//!
//! Each started session owns one dedicated reader thread for its whole
//! lifetime. The thread drains the terminal continuously, attached or not,
//! so nothing the interpreter prints is lost while nobody is listening.

use crate::config::SessionConfig;
use crate::error::{CoreError, Result};
use crate::output::{OutputBuffer, Utf8Decoder};
use chrono::{DateTime, Utc};
use luavm_process::{CommandSpec, PtyProcess, PtyReader};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Consecutive transient read errors tolerated before the reader gives up.
const MAX_TRANSIENT_ERRORS: u32 = 50;

/// Back-off between transient read errors.
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(10);

/// Poll interval while waiting for the interpreter to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Read-only snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session id (same as the backing VM id).
    pub id: String,
    /// Started, not stopped, and the interpreter is alive.
    pub running: bool,
    /// A foreground subscriber is attached.
    pub attached: bool,
    /// Chunks waiting to be read.
    pub buffered_chunks: usize,
    /// Chunks evicted because the buffer limit was reached.
    pub dropped_chunks: u64,
    /// Interpreter process id.
    pub pid: Option<u32>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

/// A persistent interpreter process bound to a pseudo-terminal.
pub struct InteractiveSession {
    id: String,
    command: CommandSpec,
    config: SessionConfig,
    created_at: DateTime<Utc>,
    running: Arc<AtomicBool>,
    attached: AtomicBool,
    output: Arc<OutputBuffer>,
    process: Mutex<Option<PtyProcess>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl InteractiveSession {
    /// Create a session. Nothing is spawned until [`start`](Self::start).
    pub fn new(id: impl Into<String>, command: CommandSpec, config: SessionConfig) -> Self {
        Self {
            id: id.into(),
            command,
            output: Arc::new(OutputBuffer::new(config.output_buffer_limit)),
            config,
            created_at: Utc::now(),
            running: Arc::new(AtomicBool::new(false)),
            attached: AtomicBool::new(false),
            process: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Get the session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    fn process(&self) -> MutexGuard<'_, Option<PtyProcess>> {
        self.process.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reader(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reader.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a terminal, spawn the interpreter on it and start the
    /// background reader.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if the session is running; a process or I/O error
    /// if the terminal or interpreter cannot be set up.
    pub fn start(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CoreError::AlreadyRunning(self.id.clone()));
        }

        tracing::info!(
            session_id = %self.id,
            program = %self.command.program.display(),
            "Starting interactive session"
        );

        let (process, pty_reader) = match PtyProcess::start(&self.command, self.config.pty_size) {
            Ok(pair) => pair,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                tracing::error!(session_id = %self.id, error = %e, "Session start failed");
                return Err(e.into());
            }
        };
        let pid = process.pid();
        *self.process() = Some(process);

        let spawned = std::thread::Builder::new()
            .name(format!("luavm-reader-{}", self.id))
            .spawn({
                let session_id = self.id.clone();
                let running = Arc::clone(&self.running);
                let output = Arc::clone(&self.output);
                let chunk_size = self.config.read_chunk_size;
                move || read_loop(&session_id, pty_reader, &running, &output, chunk_size)
            });

        match spawned {
            Ok(handle) => {
                *self.reader() = Some(handle);
                tracing::info!(session_id = %self.id, pid, "Session started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                if let Some(mut process) = self.process().take() {
                    let _ = process.kill();
                }
                tracing::error!(session_id = %self.id, error = %e, "Failed to spawn reader thread");
                Err(e.into())
            }
        }
    }

    /// Write raw text to the interpreter's terminal.
    ///
    /// Returns once the bytes are written; there is no acknowledgement that
    /// the interpreter has processed them.
    ///
    /// # Errors
    ///
    /// `NotRunning` if the session was never started or has been stopped.
    pub fn send_input(&self, text: &str) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(CoreError::NotRunning(self.id.clone()));
        }
        let mut guard = self.process();
        let process = guard
            .as_mut()
            .ok_or_else(|| CoreError::NotRunning(self.id.clone()))?;
        process.write(text.as_bytes())?;
        tracing::debug!(session_id = %self.id, bytes = text.len(), "Input sent");
        Ok(())
    }

    /// Pop one buffered output chunk, waiting up to `timeout`.
    ///
    /// Returns `None` when nothing arrived in time. Chunks are arbitrary
    /// fragments of terminal output: they may split lines and include
    /// prompts and echoed input.
    pub async fn read_output(&self, timeout: Duration) -> Option<String> {
        self.output.pop(timeout).await
    }

    /// Wait up to `timeout` for output, then return everything buffered.
    pub async fn drain_output(&self, timeout: Duration) -> Option<String> {
        self.output.drain(timeout).await
    }

    /// Stop the interpreter and release the terminal.
    ///
    /// Sends EOF, waits up to the configured grace period, then force-kills.
    /// Safe to call more than once.
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        let process = self.process().take();

        let Some(mut process) = process else {
            tracing::trace!(session_id = %self.id, "Stop on inactive session");
            return;
        };

        let start = Instant::now();
        tracing::info!(session_id = %self.id, was_running, "Stopping session");

        if process.is_alive() {
            if let Err(e) = process.terminate() {
                tracing::debug!(session_id = %self.id, error = %e, "Exit request failed");
            }
            while process.is_alive() && start.elapsed() < self.config.stop_grace {
                tokio::time::sleep(EXIT_POLL_INTERVAL).await;
            }
            if process.is_alive() {
                tracing::warn!(
                    session_id = %self.id,
                    grace_ms = self.config.stop_grace.as_millis() as u64,
                    "Interpreter did not exit within grace period, killing"
                );
                if let Err(e) = process.kill() {
                    tracing::error!(session_id = %self.id, error = %e, "Failed to kill interpreter");
                }
            }
        }
        // Closes the controlling end; the reader sees EOF or EIO.
        drop(process);

        if let Some(handle) = self.reader().take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::debug!(session_id = %self.id, "Reader still draining, detaching");
            }
        }

        tracing::info!(
            session_id = %self.id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Session stopped"
        );
    }

    /// True iff started, not stopped, and the interpreter is still alive.
    pub fn is_running(&self) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        self.process().as_mut().is_some_and(PtyProcess::is_alive)
    }

    /// Whether a foreground subscriber is attached.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Mark attached. Returns whether it already was.
    pub(crate) fn attach(&self) -> bool {
        self.attached.swap(true, Ordering::AcqRel)
    }

    /// Mark detached. The interpreter and reader keep running.
    pub(crate) fn detach(&self) -> Result<()> {
        if self.attached.swap(false, Ordering::AcqRel) {
            Ok(())
        } else {
            Err(CoreError::NotAttached(self.id.clone()))
        }
    }

    /// Snapshot the session state.
    pub fn info(&self) -> SessionInfo {
        let pid = self.process().as_ref().and_then(PtyProcess::pid);
        SessionInfo {
            id: self.id.clone(),
            running: self.is_running(),
            attached: self.is_attached(),
            buffered_chunks: self.output.len(),
            dropped_chunks: self.output.dropped(),
            pid,
            created_at: self.created_at,
        }
    }
}

impl Drop for InteractiveSession {
    fn drop(&mut self) {
        // The process handle kills the interpreter on drop.
        self.running.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for InteractiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveSession")
            .field("id", &self.id)
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Background reader: runs until the session stops or the terminal closes.
/// Never reports failures to callers.
fn read_loop(
    session_id: &str,
    mut reader: PtyReader,
    running: &AtomicBool,
    output: &OutputBuffer,
    chunk_size: usize,
) {
    tracing::debug!(session_id, "Reader started");
    let mut buf = vec![0u8; chunk_size];
    let mut decoder = Utf8Decoder::default();
    let mut transient_errors = 0u32;

    while running.load(Ordering::Acquire) {
        match reader.read(&mut buf) {
            Ok(0) => {
                tracing::debug!(session_id, "Terminal closed");
                break;
            }
            Ok(n) => {
                transient_errors = 0;
                let text = decoder.decode(&buf[..n]);
                tracing::trace!(session_id, bytes = n, text = %text, "Output chunk");
                output.push(text);
            }
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                transient_errors += 1;
                if transient_errors >= MAX_TRANSIENT_ERRORS {
                    tracing::debug!(session_id, error = %e, "Too many transient read errors");
                    break;
                }
                std::thread::sleep(TRANSIENT_BACKOFF);
            }
            Err(e) => {
                // EIO once the interpreter exits and the terminal hangs up.
                tracing::debug!(session_id, error = %e, "Terminal read ended");
                break;
            }
        }
    }

    output.push(decoder.finish());
    tracing::debug!(session_id, "Reader exited");
}
