//! The boundary between trapped file operations and the access-control engine.
//!
//! Two adapter families decode their own request shapes into a [`FileOperation`]:
//! [`SyscallAdapter`] for raw system calls made by native code, and
//! [`StdioAdapter`] for the buffered stdio/dirent calls foreign runtimes use.
//! Both end up in [`InterceptionLayer::report_file_operation`], which
//! canonicalises once and asks the single shared [`AccessControlEngine`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::fcntl::OFlag;

use super::canonical::PathCanonicalizer;
use super::engine::AccessControlEngine;
use super::error::SandboxError;
use super::table::PermissionTable;
use super::types::{AccessMode, Decision, ReparsePolicy};
use crate::supervisor::process_tree::ProcessTree;

/// Which API surface a request was trapped on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFamily {
    Native,
    Foreign,
}

/// A decoded file operation, independent of the API it arrived through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOperation {
    pub path: PathBuf,
    pub mode: AccessMode,
    pub family: ApiFamily,
}

/// Decodes one API family's requests into [`FileOperation`]s.
pub trait InterceptionAdapter {
    type Request;

    fn family(&self) -> ApiFamily;

    fn decode(&self, request: &Self::Request) -> FileOperation;
}

/// Raw system calls issued by native code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Syscall {
    Open { path: PathBuf, flags: OFlag },
    Mkdir { path: PathBuf },
    Unlink { path: PathBuf },
    Rmdir { path: PathBuf },
    Getdents { path: PathBuf },
}

/// Adapter for the native system-call surface.
#[derive(Debug, Clone)]
pub struct SyscallAdapter {
    cwd: PathBuf,
}

impl SyscallAdapter {
    /// Relative request paths are resolved against `cwd`.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

impl InterceptionAdapter for SyscallAdapter {
    type Request = Syscall;

    fn family(&self) -> ApiFamily {
        ApiFamily::Native
    }

    fn decode(&self, request: &Syscall) -> FileOperation {
        let (path, mode) = match request {
            Syscall::Open { path, flags } => (path, open_mode(*flags)),
            Syscall::Mkdir { path } | Syscall::Unlink { path } | Syscall::Rmdir { path } => {
                (path, AccessMode::Write)
            }
            Syscall::Getdents { path } => (path, AccessMode::Enumerate),
        };
        FileOperation {
            path: absolutize(&self.cwd, path),
            mode,
            family: self.family(),
        }
    }
}

fn open_mode(flags: OFlag) -> AccessMode {
    let writes = OFlag::O_WRONLY | OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_TRUNC | OFlag::O_APPEND;
    if flags.intersects(writes) {
        AccessMode::Write
    } else if flags.contains(OFlag::O_DIRECTORY) {
        AccessMode::Enumerate
    } else {
        AccessMode::Read
    }
}

/// Buffered stdio and dirent calls made by foreign language runtimes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdioCall {
    Fopen { path: PathBuf, mode: String },
    Opendir { path: PathBuf },
}

/// Adapter for the foreign-runtime stdio surface.
#[derive(Debug, Clone)]
pub struct StdioAdapter {
    cwd: PathBuf,
}

impl StdioAdapter {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

impl InterceptionAdapter for StdioAdapter {
    type Request = StdioCall;

    fn family(&self) -> ApiFamily {
        ApiFamily::Foreign
    }

    fn decode(&self, request: &StdioCall) -> FileOperation {
        let (path, mode) = match request {
            StdioCall::Fopen { path, mode } => {
                let writes = mode.contains(['w', 'a', '+']);
                (path, if writes { AccessMode::Write } else { AccessMode::Read })
            }
            StdioCall::Opendir { path } => (path, AccessMode::Enumerate),
        };
        FileOperation {
            path: absolutize(&self.cwd, path),
            mode,
            family: self.family(),
        }
    }
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Registration point for one supervised tree.
///
/// Clones share the engine and the process arena, so every descendant is
/// answered by the same policy without re-registration.
#[derive(Debug, Clone)]
pub struct InterceptionLayer {
    engine: Arc<AccessControlEngine>,
    canonicalizer: PathCanonicalizer,
    tree: ProcessTree,
}

impl InterceptionLayer {
    /// Installs `table` and the reparse policy for the tree. Rule paths become
    /// the roots inside which [`ReparsePolicy::Refuse`] applies.
    pub fn install(table: PermissionTable, reparse_policy: ReparsePolicy, tree: ProcessTree) -> Self {
        Self::install_with_roots(table, reparse_policy, tree, Vec::new())
    }

    /// Like [`Self::install`], with extra declared roots such as the working directory.
    pub fn install_with_roots(
        table: PermissionTable,
        reparse_policy: ReparsePolicy,
        tree: ProcessTree,
        extra_roots: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        let roots = table
            .declared_roots()
            .into_iter()
            .chain(extra_roots)
            .collect::<Vec<_>>();
        tracing::debug!(
            "installing {} rule(s), reparse policy {:?}",
            table.len(),
            reparse_policy
        );
        Self {
            engine: Arc::new(AccessControlEngine::new(table)),
            canonicalizer: PathCanonicalizer::new(reparse_policy, roots),
            tree,
        }
    }

    pub fn engine(&self) -> &Arc<AccessControlEngine> {
        &self.engine
    }

    pub fn canonicalizer(&self) -> &PathCanonicalizer {
        &self.canonicalizer
    }

    pub fn tree(&self) -> &ProcessTree {
        &self.tree
    }

    /// The single entry point every adapter funnels into.
    pub fn report_file_operation(&self, pid: u32, operation: &FileOperation) -> Decision {
        match self.canonicalizer.canonicalize(&operation.path) {
            Ok(canonical) => self.engine.check_access(pid, &canonical, operation.mode),
            Err(SandboxError::ReparsePointRefused { link, .. })
                if operation.mode == AccessMode::Enumerate =>
            {
                tracing::trace!(
                    "pid {} enumerates through refused link {}",
                    pid,
                    link.display()
                );
                Decision::Allow
            }
            Err(e) => {
                tracing::debug!("pid {} {:?} denied: {}", pid, operation.family, e);
                Decision::Deny
            }
        }
    }

    /// Decodes `request` with `adapter` and reports it.
    pub fn intercept<A: InterceptionAdapter>(
        &self,
        adapter: &A,
        pid: u32,
        request: &A::Request,
    ) -> Decision {
        self.report_file_operation(pid, &adapter.decode(request))
    }

    /// Process-creation notification; the child inherits the installed policy.
    pub fn report_process_created(&self, parent: u32, child: u32) {
        if self.tree.track(parent, child) {
            tracing::debug!("pid {} spawned {}", parent, child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags_decode() {
        assert_eq!(open_mode(OFlag::O_RDONLY), AccessMode::Read);
        assert_eq!(open_mode(OFlag::O_WRONLY | OFlag::O_CREAT), AccessMode::Write);
        assert_eq!(open_mode(OFlag::O_RDONLY | OFlag::O_APPEND), AccessMode::Write);
        assert_eq!(
            open_mode(OFlag::O_RDONLY | OFlag::O_DIRECTORY),
            AccessMode::Enumerate
        );
        assert_eq!(
            open_mode(OFlag::O_RDWR | OFlag::O_DIRECTORY),
            AccessMode::Write
        );
    }

    #[test]
    fn test_fopen_modes_decode() {
        let adapter = StdioAdapter::new("/work");
        for (mode, expected) in [
            ("r", AccessMode::Read),
            ("rb", AccessMode::Read),
            ("r+", AccessMode::Write),
            ("w", AccessMode::Write),
            ("ab", AccessMode::Write),
        ] {
            let op = adapter.decode(&StdioCall::Fopen {
                path: PathBuf::from("a.txt"),
                mode: mode.to_string(),
            });
            assert_eq!(op.mode, expected, "mode {mode}");
            assert_eq!(op.path, PathBuf::from("/work/a.txt"));
            assert_eq!(op.family, ApiFamily::Foreign);
        }
    }

    #[test]
    fn test_process_created_feeds_the_tree() {
        let tree = ProcessTree::new();
        let layer = InterceptionLayer::install(PermissionTable::new(), ReparsePolicy::Follow, tree.clone());
        layer.report_process_created(10, 11);
        assert!(tree.contains(11));
    }
}
