//! VM instances: basic or networked interpreter handles.

use crate::error::Result;
use chrono::{DateTime, Utc};
use luavm_process::{
    CommandSpec, ExecOutcome, Interpreter, InterpreterConfig, LuaProcess, NetworkConfig,
    NetworkedLuaProcess,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which flavour of VM an instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmKind {
    /// Plain interpreter.
    Basic,
    /// Interpreter with networking modules preloaded.
    Networked,
}

impl fmt::Display for VmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Networked => write!(f, "networked"),
        }
    }
}

/// A tracked VM. Carries no session state of its own.
#[derive(Debug)]
pub enum VmInstance {
    /// Basic VM.
    Basic(LuaProcess),
    /// Networked VM.
    Networked(NetworkedLuaProcess),
}

impl VmInstance {
    /// Construct a VM of the requested flavour.
    pub fn new(
        id: &str,
        networked: bool,
        interpreter: &InterpreterConfig,
        network: &NetworkConfig,
    ) -> Self {
        if networked {
            Self::Networked(NetworkedLuaProcess::new(
                id,
                interpreter.clone(),
                network.clone(),
            ))
        } else {
            Self::Basic(LuaProcess::new(id, interpreter.clone()))
        }
    }

    fn interpreter(&self) -> &dyn Interpreter {
        match self {
            Self::Basic(p) => p,
            Self::Networked(p) => p,
        }
    }

    /// The VM id.
    pub fn id(&self) -> &str {
        self.interpreter().name()
    }

    /// The VM flavour.
    pub fn kind(&self) -> VmKind {
        match self {
            Self::Basic(_) => VmKind::Basic,
            Self::Networked(_) => VmKind::Networked,
        }
    }

    /// Whether this VM preloads networking support.
    pub fn is_networked(&self) -> bool {
        self.interpreter().is_networked()
    }

    /// Run code to completion in a fresh interpreter process.
    pub async fn execute(&self, code: &str, timeout: Option<Duration>) -> Result<ExecOutcome> {
        Ok(self.interpreter().execute(code, timeout).await?)
    }

    /// Command line for an interactive session backed by this VM.
    pub fn interactive_command(&self) -> CommandSpec {
        self.interpreter().interactive_command()
    }
}

/// Read-only snapshot of a tracked VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInfo {
    /// VM id.
    pub id: String,
    /// VM flavour.
    pub kind: VmKind,
    /// Whether an interactive session is registered under the same id.
    pub interactive: bool,
    /// When the VM was created.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_kind_display() {
        assert_eq!(VmKind::Basic.to_string(), "basic");
        assert_eq!(VmKind::Networked.to_string(), "networked");
    }

    #[test]
    fn test_vm_instance_dispatch() {
        let interpreter = InterpreterConfig::default();
        let network = NetworkConfig::default();

        let basic = VmInstance::new("a", false, &interpreter, &network);
        assert_eq!(basic.id(), "a");
        assert_eq!(basic.kind(), VmKind::Basic);
        assert!(!basic.is_networked());
        assert_eq!(basic.interactive_command().args, vec!["-i"]);

        let net = VmInstance::new("b", true, &interpreter, &network);
        assert_eq!(net.id(), "b");
        assert_eq!(net.kind(), VmKind::Networked);
        assert!(net.is_networked());
        assert_eq!(net.interactive_command().args, vec!["-l", "socket", "-i"]);
    }

    #[test]
    fn test_vm_kind_serializes_lowercase() {
        let json = serde_json::to_string(&VmKind::Networked).unwrap();
        assert_eq!(json, "\"networked\"");
    }
}
