#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::OnceLock;

use tempfile::TempDir;

/// Path to the compiled `pathjail` binary.
pub fn pathjail_bin() -> &'static str {
    env!("CARGO_BIN_EXE_pathjail")
}

/// Runs the binary with `args`, logging to stderr so nothing lands in the
/// user's cache directory.
pub fn run_pathjail<S: AsRef<std::ffi::OsStr>>(args: &[S]) -> Output {
    Command::new(pathjail_bin())
        .args(args)
        .env("PATHJAIL_LOG_TO_STDERR", "1")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run pathjail")
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// A scratch directory holding `a.txt` ("Sherlock Holmes") and `b.txt`.
///
/// The returned path is canonical, so it matches what the sandbox resolves.
pub fn scenario_dir() -> (TempDir, PathBuf) {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = std::fs::canonicalize(temp.path()).expect("canonical tempdir");
    std::fs::write(root.join("a.txt"), "Sherlock Holmes").expect("write a.txt");
    std::fs::write(root.join("b.txt"), "Moriarty").expect("write b.txt");
    (temp, root)
}

pub fn arg(path: &Path) -> String {
    path.display().to_string()
}

/// True when a read outside every rule is actually refused by the kernel.
pub fn landlock_enforced() -> bool {
    static ENFORCED: OnceLock<bool> = OnceLock::new();
    *ENFORCED.get_or_init(|| {
        let (_temp, root) = scenario_dir();
        let read = |rules: &[String]| {
            let mut args = vec!["-W".to_string(), arg(&root)];
            args.extend_from_slice(rules);
            args.extend(["--".to_string(), "/bin/cat".to_string(), arg(&root.join("a.txt"))]);
            let output = run_pathjail(&args);
            output.status.success() && stdout_of(&output).contains("Sherlock Holmes")
        };
        !read(&[]) && read(&["-r".to_string(), arg(&root)])
    })
}

#[allow(unused_macros)]
macro_rules! skip_unless_landlock {
    () => {
        if !common::landlock_enforced() {
            eprintln!("SKIPPED: Landlock is not enforced on this host.");
            return;
        }
    };
}
