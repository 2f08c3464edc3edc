//! Everything one supervised run needs, assembled before launch.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sandbox::{AccessLevel, PermissionTable, ReparsePolicy, SandboxError};

/// Read-only system trees every sandboxed program needs to start.
pub const READ_ONLY_ALLOWANCES: &[&str] = &[
    "/usr", "/bin", "/sbin", "/lib", "/lib32", "/lib64", "/etc", "/proc", "/sys", "/dev",
];

/// Device files that stay writable.
pub const READ_WRITE_ALLOWANCES: &[&str] = &["/dev/null", "/dev/zero", "/dev/tty"];

/// Where a standard stream of the child goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Redirect {
    #[default]
    Inherit,
    /// Created or truncated by the supervisor before launch.
    File(PathBuf),
}

/// A validated, immutable description of one run.
#[derive(Debug, Clone)]
pub struct SandboxInvocation {
    pub working_directory: PathBuf,
    /// User rules in declaration order, without platform allowances.
    pub table: PermissionTable,
    pub timeout: Option<Duration>,
    pub hard_timeout: Option<Duration>,
    pub reparse_policy: ReparsePolicy,
    pub stdout: Redirect,
    pub stderr: Redirect,
    /// Applied in order over the inherited environment; an empty value unsets.
    pub env_overrides: Vec<(String, String)>,
    pub command: Vec<String>,
}

impl SandboxInvocation {
    pub fn new(working_directory: impl Into<PathBuf>, command: Vec<String>) -> Self {
        Self {
            working_directory: working_directory.into(),
            table: PermissionTable::new(),
            timeout: None,
            hard_timeout: None,
            reparse_policy: ReparsePolicy::default(),
            stdout: Redirect::Inherit,
            stderr: Redirect::Inherit,
            env_overrides: Vec::new(),
            command,
        }
    }

    pub fn with_table(mut self, table: PermissionTable) -> Self {
        self.table = table;
        self
    }

    /// `0` disables the timeout.
    pub fn with_timeout_secs(mut self, seconds: u64) -> Self {
        self.timeout = non_zero_secs(seconds);
        self
    }

    /// `0` disables the timeout.
    pub fn with_hard_timeout_secs(mut self, seconds: u64) -> Self {
        self.hard_timeout = non_zero_secs(seconds);
        self
    }

    pub fn with_reparse_policy(mut self, policy: ReparsePolicy) -> Self {
        self.reparse_policy = policy;
        self
    }

    pub fn with_stdout(mut self, redirect: Redirect) -> Self {
        self.stdout = redirect;
        self
    }

    pub fn with_stderr(mut self, redirect: Redirect) -> Self {
        self.stderr = redirect;
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.push((name.into(), value.into()));
        self
    }

    /// The child's environment: the supervisor's own, with overrides applied.
    pub fn child_environment(&self) -> BTreeMap<OsString, OsString> {
        merge_environment(std::env::vars_os(), &self.env_overrides)
    }

    /// Platform allowances, read access to `program`, write access to the
    /// redirect targets, then the user rules.
    ///
    /// User rules come last so they win any equal-length tie. Redirect targets
    /// are write-only: the child may reopen its own output (`/dev/stdout`) but
    /// gains no read access through them.
    pub fn effective_table(&self, program: &Path) -> Result<PermissionTable, SandboxError> {
        let mut table = PermissionTable::new().with_precedence(self.table.precedence());
        for path in READ_ONLY_ALLOWANCES {
            if Path::new(path).exists() {
                table.add_rule(path, AccessLevel::ReadOnly)?;
            }
        }
        for path in READ_WRITE_ALLOWANCES {
            if Path::new(path).exists() {
                table.add_rule(path, AccessLevel::ReadWrite)?;
            }
        }
        table.add_rule(program, AccessLevel::ReadOnly)?;
        for redirect in [&self.stdout, &self.stderr] {
            if let Redirect::File(path) = redirect {
                table.add_write_rule(path, AccessLevel::ReadWrite)?;
            }
        }
        table.extend_from(&self.table);
        Ok(table)
    }
}

fn non_zero_secs(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

/// Applies `overrides` in order over `inherited`. An empty value, inherited or
/// overridden, removes the variable rather than setting it to the empty string.
pub fn merge_environment(
    inherited: impl IntoIterator<Item = (OsString, OsString)>,
    overrides: &[(String, String)],
) -> BTreeMap<OsString, OsString> {
    let mut env: BTreeMap<OsString, OsString> = inherited
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect();
    for (name, value) in overrides {
        if value.is_empty() {
            env.remove(OsStr::new(name));
        } else {
            env.insert(name.into(), value.into());
        }
    }
    env
}

/// Finds the executable for `program` the way `execvp` would: names containing
/// a slash are taken relative to `cwd`, bare names are searched on `path_var`.
pub fn resolve_program(program: &str, path_var: Option<&OsStr>, cwd: &Path) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    if program.contains('/') {
        let candidate = cwd.join(program);
        return is_executable(&candidate).then_some(candidate);
    }
    std::env::split_paths(path_var?)
        .map(|dir| {
            if dir.is_absolute() {
                dir.join(program)
            } else {
                cwd.join(dir).join(program)
            }
        })
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{AccessMode, CanonicalPath};

    #[test]
    fn test_empty_override_removes_variable() {
        let inherited = vec![
            (OsString::from("KEEP"), OsString::from("1")),
            (OsString::from("DROP"), OsString::from("2")),
        ];
        let env = merge_environment(
            inherited,
            &[
                ("DROP".to_string(), String::new()),
                ("NEW".to_string(), "3".to_string()),
            ],
        );
        assert_eq!(env.get(OsStr::new("KEEP")), Some(&OsString::from("1")));
        assert_eq!(env.get(OsStr::new("NEW")), Some(&OsString::from("3")));
        assert!(!env.contains_key(OsStr::new("DROP")));
    }

    #[test]
    fn test_empty_inherited_variable_is_dropped() {
        let inherited = vec![
            (OsString::from("APPDATA"), OsString::new()),
            (OsString::from("HOME"), OsString::from("/home/watson")),
        ];
        let env = merge_environment(inherited, &[]);
        assert!(!env.contains_key(OsStr::new("APPDATA")));
        assert_eq!(env.get(OsStr::new("HOME")), Some(&OsString::from("/home/watson")));
    }

    #[test]
    fn test_later_override_wins() {
        let env = merge_environment(
            Vec::new(),
            &[
                ("A".to_string(), "first".to_string()),
                ("A".to_string(), "second".to_string()),
            ],
        );
        assert_eq!(env.get(OsStr::new("A")), Some(&OsString::from("second")));
    }

    #[test]
    fn test_resolve_program_on_path() {
        let found = resolve_program("sh", Some(OsStr::new("/nonexistent:/bin")), Path::new("/"));
        assert_eq!(found, Some(PathBuf::from("/bin/sh")));
        assert_eq!(
            resolve_program("definitely-not-a-program", Some(OsStr::new("/bin")), Path::new("/")),
            None
        );
    }

    #[test]
    fn test_redirect_targets_are_write_only_rules() {
        let mut table = PermissionTable::new();
        table.add_rule("/pathjail-test/logs", AccessLevel::Blocked).unwrap();
        let invocation = SandboxInvocation::new("/", vec!["sh".into()])
            .with_table(table)
            .with_stdout(Redirect::File(PathBuf::from("/pathjail-test/out.log")))
            .with_stderr(Redirect::File(PathBuf::from("/pathjail-test/logs/err.log")));

        let effective = invocation.effective_table(Path::new("/bin/sh")).unwrap();
        let out = CanonicalPath::lexical("/pathjail-test/out.log").unwrap();
        let err = CanonicalPath::lexical("/pathjail-test/logs/err.log").unwrap();
        assert_eq!(effective.resolve_for(&out, AccessMode::Write), AccessLevel::ReadWrite);
        assert_eq!(effective.resolve_for(&out, AccessMode::Read), AccessLevel::Blocked);
        // The redirect is deeper than the block, so it governs its own file.
        assert_eq!(effective.resolve_for(&err, AccessMode::Write), AccessLevel::ReadWrite);
        assert_eq!(effective.resolve_for(&err, AccessMode::Read), AccessLevel::Blocked);
    }

    #[test]
    fn test_zero_timeout_disables() {
        let invocation = SandboxInvocation::new("/", vec!["true".into()])
            .with_timeout_secs(0)
            .with_hard_timeout_secs(5);
        assert_eq!(invocation.timeout, None);
        assert_eq!(invocation.hard_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_user_rules_follow_allowances() {
        let mut table = PermissionTable::new();
        table.add_rule("/etc", AccessLevel::Blocked).unwrap();
        let invocation = SandboxInvocation::new("/", vec!["sh".into()]).with_table(table);

        let effective = invocation.effective_table(Path::new("/bin/sh")).unwrap();
        let last = effective.rules().last().unwrap();
        assert_eq!(last.declared, PathBuf::from("/etc"));
        assert_eq!(last.access, AccessLevel::Blocked);
    }
}
