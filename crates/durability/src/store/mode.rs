//! Sync mode configuration
//!
//! Controls when the file store fsyncs its log.

use std::fmt;
use std::str::FromStr;

/// When the batch log file is fsynced.
///
/// Either way every record reaches the OS before `put`/`delete` returns, so
/// a process crash loses nothing. The modes differ on a machine crash:
///
/// | Mode | fsync | Data loss window on machine crash |
/// |------|-------|-----------------------------------|
/// | Always | Every put/delete | Zero |
/// | Batched | Every `sync_interval` and on `flush()` | At most one sync interval |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// fsync after every record
    Always,
    /// fsync in the background and on `flush()` (the default)
    #[default]
    Batched,
}

impl SyncMode {
    /// Whether every record is fsynced before `put`/`delete` returns
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, SyncMode::Always)
    }

    /// Name used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Always => "always",
            SyncMode::Batched => "batched",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(SyncMode::Always),
            "batched" => Ok(SyncMode::Batched),
            other => Err(format!(
                "invalid sync mode '{}', expected \"always\" or \"batched\"",
                other
            )),
        }
    }
}
