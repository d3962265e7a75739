//! # luavm-process
//!
//! Interpreter process handles for the luavm orchestrator.
//!
//! Two kinds of process are provided:
//!
//! - **One-shot** ([`LuaProcess`], [`NetworkedLuaProcess`]): spawn the
//!   interpreter, feed it a complete chunk of code on stdin, wait for it to
//!   exit and return a structured [`ExecOutcome`].
//! - **Interactive** ([`PtyProcess`]): spawn the interpreter with its
//!   standard streams bound to a pseudo-terminal and hand back the
//!   controlling end for reading and writing.
//!
//! ## Quick Start
//!
//! ```no_run
//! use luavm_process::{Interpreter, InterpreterConfig, LuaProcess};
//! use std::time::Duration;
//!
//! # async fn example() -> luavm_process::Result<()> {
//! let lua = LuaProcess::new("demo", InterpreterConfig::default());
//! let outcome = lua
//!     .execute("print(1 + 1)", Some(Duration::from_secs(5)))
//!     .await?;
//! assert!(outcome.success);
//! assert_eq!(outcome.stdout.trim(), "2");
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod process;
mod pty;

pub use config::{CommandSpec, InterpreterConfig, InterpreterConfigBuilder, NetworkConfig};
pub use error::{ProcessError, Result};
pub use process::{ExecOutcome, Interpreter, LuaProcess, NetworkedLuaProcess};
pub use pty::{PtyProcess, PtyReader, PtySize};
