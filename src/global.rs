//! Optional process-wide manager
//!
//! Convenience for callers that want singleton-style access. Nothing in the
//! workspace reads it; the manager works the same without it.

use batchlog_engine::BatchlogManager;
use once_cell::sync::OnceCell;
use std::sync::Arc;

static GLOBAL: OnceCell<Arc<BatchlogManager>> = OnceCell::new();

/// Install the process-wide manager.
///
/// Can only be done once; a second call hands back the rejected manager.
pub fn install_global(manager: Arc<BatchlogManager>) -> Result<(), Arc<BatchlogManager>> {
    GLOBAL.set(manager)
}

/// The process-wide manager, if one was installed
pub fn global() -> Option<Arc<BatchlogManager>> {
    GLOBAL.get().cloned()
}
