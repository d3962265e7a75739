//! Error types for luavm-core.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for luavm-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// The kind of thing an id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// A VM instance.
    Vm,
    /// An interactive session.
    Session,
    /// A tracked asynchronous operation.
    Operation,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vm => write!(f, "VM"),
            Self::Session => write!(f, "session"),
            Self::Operation => write!(f, "operation"),
        }
    }
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Referenced id is not tracked.
    NotFound,
    /// Id is already in use.
    AlreadyExists,
    /// Operation is illegal in the current lifecycle state.
    State,
    /// Terminal, descriptor or process I/O failed.
    Io,
    /// Invalid configuration.
    Config,
}

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Id not present in the relevant registry
    #[error("{resource} not found: {id}")]
    NotFound {
        /// What was looked up
        resource: Resource,
        /// The missing id
        id: String,
    },

    /// Id already in use
    #[error("{resource} already exists: {id}")]
    AlreadyExists {
        /// What was being created
        resource: Resource,
        /// The duplicate id
        id: String,
    },

    /// Session was started twice
    #[error("session already running: {0}")]
    AlreadyRunning(String),

    /// Session was never started or has been stopped
    #[error("session not running: {0}")]
    NotRunning(String),

    /// Detach requested for a session with no attached subscriber
    #[error("session is not attached: {0}")]
    NotAttached(String),

    /// Waited on an operation that was cancelled before completing
    #[error("operation for VM {0} was cancelled")]
    OperationCancelled(String),

    /// No Tokio runtime to run the operation on
    #[error("no Tokio runtime available")]
    NoRuntime,

    /// A captured error from an asynchronous operation
    #[error("operation for VM {vm_id} failed: {source}")]
    OperationFailed {
        /// VM the operation ran on
        vm_id: String,
        /// The captured error, shared between all waiters
        #[source]
        source: Arc<CoreError>,
    },

    /// Cluster creation stopped at the first failure
    #[error("cluster creation failed at {failed_id} after creating {created:?}: {source}")]
    ClusterIncomplete {
        /// Id whose creation failed
        failed_id: String,
        /// Ids created before the failure, still tracked
        created: Vec<String>,
        /// Why `failed_id` could not be created
        #[source]
        source: Box<CoreError>,
    },

    /// Error from the interpreter process layer
    #[error("process error: {0}")]
    Process(#[from] luavm_process::ProcessError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl CoreError {
    pub(crate) fn not_found(resource: Resource, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub(crate) fn already_exists(resource: Resource, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource,
            id: id.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::AlreadyRunning(_)
            | Self::NotRunning(_)
            | Self::NotAttached(_)
            | Self::OperationCancelled(_)
            | Self::NoRuntime => ErrorKind::State,
            Self::OperationFailed { source, .. } => source.kind(),
            Self::ClusterIncomplete { source, .. } => source.kind(),
            Self::Process(luavm_process::ProcessError::InvalidConfig(_)) => ErrorKind::Config,
            Self::Process(_) | Self::Io(_) => ErrorKind::Io,
            Self::InvalidConfig(_) => ErrorKind::Config,
        }
    }

    /// Shorthand for `self.kind() == ErrorKind::NotFound`.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
