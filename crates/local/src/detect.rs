// Runtime detection: pick the first available execution environment.

use std::sync::Arc;

use tracing::debug;

use crate::error::LocalError;
use crate::exec::CommandExecutor;
use crate::runtime::RuntimeKind;

pub struct RuntimeDetector {
    executor: Arc<dyn CommandExecutor>,
}

impl RuntimeDetector {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Probe tools in preference order. Falls back to `RawBinary`, never fails.
    pub fn detect(&self) -> RuntimeKind {
        for kind in RuntimeKind::PREFERENCE {
            let Some(tool) = kind.tool() else {
                break;
            };
            if self.executor.is_on_path(tool) {
                debug!(%kind, tool, "runtime detected");
                return kind;
            }
            debug!(%kind, tool, "runtime tool not found");
        }

        debug!("no runtime tool found, falling back to a raw binary");
        RuntimeKind::RawBinary
    }

    /// Honour an explicit runtime choice, verifying its tool exists; otherwise detect.
    pub fn detect_preferred(&self, preferred: Option<RuntimeKind>) -> Result<RuntimeKind, LocalError> {
        let Some(kind) = preferred else {
            return Ok(self.detect());
        };

        match kind.tool() {
            Some(tool) if !self.executor.is_on_path(tool) => {
                Err(LocalError::NoRuntimeAvailable { kind, tool })
            }
            _ => Ok(kind),
        }
    }
}
