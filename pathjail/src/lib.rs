//! # pathjail
//!
//! Runs an arbitrary command under a path-based file-access policy, a wall-clock
//! timeout and the host's process-launch semantics.
//!
//! The crate is organised leaves first:
//!
//! - **`sandbox`**: path canonicalisation, the permission table, the access
//!   control engine, the interception adapters and the Landlock enforcement
//!   backend.
//! - **`cmdline`**: byte-exact command-line serialisation and its inverse.
//! - **`params`**: `@file` expansion and the `--` boundary.
//! - **`config`**: configuration errors, all of which exit 1 before launch.
//! - **`supervisor`**: invocation assembly, the process-tree arena and the run
//!   loop that launches, times and reaps the command tree.
//! - **`shell`**: the `pathjail` binary's CLI surface and exit-code mapping.

pub mod cmdline;
pub mod config;
pub mod params;
pub mod sandbox;
pub mod shell;
pub mod supervisor;
pub mod utils;
