//! # Path-Based Access Control
//!
//! Everything that decides whether a supervised process may touch a path.
//!
//! ## Layers
//!
//! - [`PathCanonicalizer`] turns a raw absolute path into a [`CanonicalPath`],
//!   following or refusing symbolic links per [`ReparsePolicy`].
//! - [`PermissionTable`] holds the ordered `-r`/`-w`/`-b` rules and resolves a
//!   canonical path by longest component prefix.
//! - [`AccessControlEngine`] turns a resolved level into an allow/deny decision.
//! - [`InterceptionLayer`] is the registration point for a process tree; the
//!   native ([`SyscallAdapter`]) and foreign-runtime ([`StdioAdapter`]) adapters
//!   both report through it.
//! - On Linux the same table is compiled into a Landlock ruleset
//!   ([`EnforcementPlan`]) so the kernel denies what the engine would deny.

mod canonical;
mod engine;
mod error;
mod interception;
mod landlock;
mod prerequisites;
mod table;
mod types;

pub use canonical::{CanonicalPath, PathCanonicalizer, normalize_path_lexically};
pub use engine::AccessControlEngine;
pub use error::SandboxError;
pub use interception::{
    ApiFamily, FileOperation, InterceptionAdapter, InterceptionLayer, StdioAdapter, StdioCall,
    Syscall, SyscallAdapter,
};
#[cfg(target_os = "linux")]
pub use landlock::PreparedRuleset;
pub use landlock::{EnforcementPlan, Grant, PlanGap};
pub use prerequisites::{check_landlock_prerequisites, kernel_release_supports_landlock};
pub use table::{PathRule, PermissionTable};
pub use types::{AccessLevel, AccessMode, Decision, Precedence, ReparsePolicy, Rights};
