//! Registry of interactive sessions keyed by VM id.
//!
//! The map lock is held only while the map itself changes. Process
//! startup, termination and output waits all happen outside it, so one
//! slow session never stalls lookups on another.

use crate::config::SessionConfig;
use crate::error::{CoreError, Resource, Result};
use crate::session::{InteractiveSession, SessionInfo};
use crate::vm::VmInstance;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Thread-safe map from id to [`InteractiveSession`].
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<InteractiveSession>>>,
    config: SessionConfig,
}

impl SessionRegistry {
    /// Create an empty registry whose sessions use `config`.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<InteractiveSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup(&self, id: &str) -> Result<Arc<InteractiveSession>> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(Resource::Session, id))
    }

    /// Start a session for `vm` and register it under `id`.
    ///
    /// The session is only visible once its interpreter is running.
    pub fn create_session(&self, id: &str, vm: &VmInstance) -> Result<SessionInfo> {
        if self.lock().contains_key(id) {
            return Err(CoreError::already_exists(Resource::Session, id));
        }

        let session = Arc::new(InteractiveSession::new(
            id,
            vm.interactive_command(),
            self.config.clone(),
        ));
        session.start()?;

        {
            let mut sessions = self.lock();
            if !sessions.contains_key(id) {
                sessions.insert(id.to_string(), Arc::clone(&session));
                drop(sessions);
                tracing::info!(session_id = %id, kind = %vm.kind(), "Session registered");
                return Ok(session.info());
            }
        }

        // Lost a creation race for the same id; dropping kills the interpreter.
        tracing::warn!(session_id = %id, "Concurrent session creation, discarding duplicate");
        drop(session);
        Err(CoreError::already_exists(Resource::Session, id))
    }

    /// Snapshot one session.
    pub fn get_session(&self, id: &str) -> Option<SessionInfo> {
        let session = self.lock().get(id).cloned()?;
        Some(session.info())
    }

    /// Whether a session is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Snapshot every session, ordered by id.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions: Vec<_> = self.lock().values().cloned().collect();
        let mut infos: Vec<SessionInfo> = sessions.iter().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    /// Mark a session attached. Attaching twice is allowed.
    pub fn attach(&self, id: &str) -> Result<()> {
        let session = self.lookup(id)?;
        if session.attach() {
            tracing::debug!(session_id = %id, "Session already attached");
        } else {
            tracing::info!(session_id = %id, "Attached to session");
        }
        Ok(())
    }

    /// Mark a session detached. The interpreter keeps running and output
    /// keeps accumulating.
    pub fn detach(&self, id: &str) -> Result<()> {
        self.lookup(id)?.detach()?;
        tracing::info!(session_id = %id, "Detached from session");
        Ok(())
    }

    /// Forward input to a session.
    pub fn send_input(&self, id: &str, text: &str) -> Result<()> {
        self.lookup(id)?.send_input(text)
    }

    /// Pop one output chunk from a session.
    pub async fn read_output(&self, id: &str, timeout: Duration) -> Result<Option<String>> {
        let session = self.lookup(id)?;
        Ok(session.read_output(timeout).await)
    }

    /// Take all buffered output from a session.
    pub async fn drain_output(&self, id: &str, timeout: Duration) -> Result<Option<String>> {
        let session = self.lookup(id)?;
        Ok(session.drain_output(timeout).await)
    }

    /// Unregister and stop a session.
    ///
    /// The entry is removed first, so once this returns no lookup can
    /// observe the session.
    pub async fn terminate_session(&self, id: &str) -> Result<()> {
        let session = self
            .lock()
            .remove(id)
            .ok_or_else(|| CoreError::not_found(Resource::Session, id))?;
        session.stop().await;
        tracing::info!(session_id = %id, "Session terminated");
        Ok(())
    }

    /// Stop and unregister every session. Returns how many were stopped.
    pub async fn terminate_all(&self) -> usize {
        let sessions: Vec<_> = self.lock().drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        futures::future::join_all(sessions.iter().map(|s| s.stop())).await;
        if count > 0 {
            tracing::info!(count, "All sessions terminated");
        }
        count
    }
}
