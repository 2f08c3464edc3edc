use super::error::SandboxError;

/// Checks whether the kernel can enforce Landlock rulesets.
pub fn check_landlock_prerequisites() -> Result<(), SandboxError> {
    #[cfg(target_os = "linux")]
    {
        landlock_in_lsm_list().unwrap_or_else(landlock_kernel_release)
    }

    #[cfg(not(target_os = "linux"))]
    {
        Err(SandboxError::UnsupportedOs(
            std::env::consts::OS.to_string(),
        ))
    }
}

/// `None` when securityfs is not mounted and the LSM list cannot be read.
#[cfg(target_os = "linux")]
fn landlock_in_lsm_list() -> Option<Result<(), SandboxError>> {
    let lsms = std::fs::read_to_string("/sys/kernel/security/lsm").ok()?;
    if lsms.split(',').any(|lsm| lsm.trim() == "landlock") {
        Some(Ok(()))
    } else {
        Some(Err(SandboxError::LandlockNotAvailable))
    }
}

#[cfg(target_os = "linux")]
fn landlock_kernel_release() -> Result<(), SandboxError> {
    let release = std::fs::read_to_string("/proc/sys/kernel/osrelease").map_err(|e| {
        SandboxError::PrerequisiteFailed(format!("Cannot read the kernel release: {e}"))
    })?;
    if kernel_release_supports_landlock(&release) {
        Ok(())
    } else {
        Err(SandboxError::PrerequisiteFailed(format!(
            "Landlock requires Linux kernel 5.13 or newer. Current: {}.",
            release.trim()
        )))
    }
}

/// True for kernel releases of 5.13 or newer (`6.1.0-13-amd64`, `5.15.0`, ...).
pub fn kernel_release_supports_landlock(release: &str) -> bool {
    let mut numbers = release
        .trim()
        .split(['.', '-'])
        .map(|part| part.parse::<u32>().unwrap_or(0));
    let major = numbers.next().unwrap_or(0);
    let minor = numbers.next().unwrap_or(0);
    (major, minor) >= (5, 13)
}
