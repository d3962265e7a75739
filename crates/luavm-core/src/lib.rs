//! # luavm-core
//!
//! Orchestration layer for concurrent interpreter VMs.
//!
//! A VM is a configured interpreter. It can run one-shot executions, either
//! directly or through a bounded worker pool, and it can back a persistent
//! interactive session on a pseudo-terminal that survives detach and
//! re-attach.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Orchestrator                        │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │  VM registry    │────▶│  HashMap<id, VmInstance> │   │
//! │  │  - create_vm()  │     └──────────────────────────┘   │
//! │  │  - remove_vm()  │                                    │
//! │  └─────────────────┘                                    │
//! │           │                                              │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │   WorkerPool    │────▶│  OperationHandle per VM  │   │
//! │  │  - submit()     │     │  (wait / cancel / status)│   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ SessionRegistry │────▶│  InteractiveSession      │   │
//! │  │  - attach()     │     │  - PTY + interpreter     │   │
//! │  │  - detach()     │     │  - reader thread         │   │
//! │  └─────────────────┘     │  - output buffer         │   │
//! │                          └──────────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │              luavm-process (interpreter I/O)             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use luavm_core::{Orchestrator, OrchestratorConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> luavm_core::Result<()> {
//! let orchestrator = Orchestrator::new(OrchestratorConfig::from_env())?;
//!
//! // One-shot execution through the worker pool
//! orchestrator.create_vm("job", false)?;
//! orchestrator.execute_vm_async("job", "print('hello')", None)?;
//! let outcome = orchestrator.wait_for_vm("job", Some(Duration::from_secs(5))).await?;
//!
//! // Persistent interactive session
//! orchestrator.create_interactive_vm("repl", false, true)?;
//! orchestrator.send_input("repl", "x = 42\n")?;
//! orchestrator.detach_from_vm("repl")?;
//! orchestrator.attach_to_vm("repl")?;
//! orchestrator.send_input("repl", "print(x)\n")?;
//! let output = orchestrator.drain_output("repl", Duration::from_secs(1)).await?;
//!
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod orchestrator;
mod output;
mod pool;
mod registry;
mod session;
mod vm;

pub use config::{OrchestratorConfig, OrchestratorConfigBuilder, SessionConfig};
pub use error::{CoreError, ErrorKind, Resource, Result};
pub use orchestrator::Orchestrator;
pub use pool::{
    OperationHandle, OperationId, OperationStatus, PoolSnapshot, WorkerPool,
};
pub use registry::SessionRegistry;
pub use session::{InteractiveSession, SessionInfo};
pub use vm::{VmInfo, VmInstance, VmKind};

// Re-export process types callers need to configure and read results.
pub use luavm_process::{ExecOutcome, InterpreterConfig, NetworkConfig, PtySize};
