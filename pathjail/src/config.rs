use std::path::PathBuf;

use crate::sandbox::SandboxError;

/// Invalid input detected before any child is launched. Always exits 1.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Rejected flag, flag value or flag repetition; the message comes from clap
    /// and names the flag and the raw value.
    #[error("{0}")]
    InvalidArguments(String),

    #[error("Cannot read parameter file '{}': {source}", .path.display())]
    ParamFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parameter file '{}' includes itself", .path.display())]
    ParamFileCycle { path: PathBuf },

    #[error("Command to run in the sandbox not specified")]
    MissingCommand,

    #[error("Cannot determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("Invalid path for '{flag}': {source}")]
    Path {
        flag: &'static str,
        #[source]
        source: SandboxError,
    },
}
