use std::path::PathBuf;

/// Errors specific to sandbox setup and path resolution.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Cannot create absolute path from '{}'", .path.display())]
    RelativePath { path: PathBuf },

    #[error(
        "Path '{}' traverses the symbolic link '{}' and reparse-point traversal is disabled",
        .path.display(),
        .link.display()
    )]
    ReparsePointRefused { path: PathBuf, link: PathBuf },

    #[error(
        "Path '{}' cannot be resolved past the symbolic link '{}'",
        .path.display(),
        .link.display()
    )]
    UnresolvableLink { path: PathBuf, link: PathBuf },

    #[error("Landlock is not available on this system (requires Linux kernel 5.13+)")]
    LandlockNotAvailable,

    #[error("Unsupported operating system: {0}")]
    UnsupportedOs(String),

    #[error("Sandbox prerequisite check failed: {0}")]
    PrerequisiteFailed(String),

    #[error("Failed to build the Landlock ruleset: {0}")]
    Enforcement(String),
}
