use super::canonical::CanonicalPath;
use super::table::PermissionTable;
use super::types::{AccessMode, Decision, Rights};

/// Answers access checks for every process in a supervised tree.
///
/// The engine owns an immutable [`PermissionTable`] and performs no I/O, so one
/// instance behind an `Arc` serves concurrent callers without locking.
#[derive(Debug, Clone)]
pub struct AccessControlEngine {
    table: PermissionTable,
}

impl AccessControlEngine {
    pub fn new(table: PermissionTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PermissionTable {
        &self.table
    }

    pub fn check_access(&self, pid: u32, path: &CanonicalPath, mode: AccessMode) -> Decision {
        let decision = match mode {
            AccessMode::Enumerate => Decision::Allow,
            AccessMode::Read => self.table.resolve_for(path, mode).allows_read().into(),
            AccessMode::Write => self.table.resolve_for(path, mode).allows_write().into(),
        };
        tracing::trace!(
            "pid {} {:?} {} -> {:?}",
            pid,
            mode,
            path.display(),
            decision
        );
        decision
    }

    /// Read and write rights for `path`, as [`Self::check_access`] would decide them.
    pub fn rights(&self, path: &CanonicalPath) -> Rights {
        Rights {
            read: self
                .table
                .resolve_for(path, AccessMode::Read)
                .allows_read(),
            write: self
                .table
                .resolve_for(path, AccessMode::Write)
                .allows_write(),
        }
    }
}
