//! # Process Supervision
//!
//! Launches the command of a [`SandboxInvocation`] under its access policy,
//! enforces the timeouts and tears the whole process tree down when the run
//! ends, whichever way it ends.
//!
//! The lifecycle is published through a [`SupervisorStateMachine`]:
//! `Configuring -> Launching -> Running -> {Completed, TimedOut, LaunchFailed}`.

pub mod invocation;
pub mod process_tree;

use std::fs::File;
use std::future::pending;
use std::io::IsTerminal;
use std::os::fd::BorrowedFd;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{SigHandler, Signal};
use nix::unistd::Pid;
use pathjail_common::supervisor_state::SupervisorStateMachine;
use tokio::process::Command;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::{Instant, sleep_until};

use crate::cmdline;
use crate::sandbox::{InterceptionLayer, ReparsePolicy, SandboxError};
use invocation::{Redirect, SandboxInvocation, resolve_program};
use process_tree::ProcessTree;

/// Exit code reported when a timeout killed the tree. A Unix parent only sees
/// the low eight bits of it (153).
pub const TIMEOUT_EXIT_CODE: i32 = 27_021_977;

/// How long a soft timeout waits for `SIGTERM` before escalating.
pub const SOFT_TIMEOUT_GRACE: Duration = Duration::from_secs(2);

/// How often the process arena is rescanned while the child runs.
pub const TREE_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The top-level process exited with this code.
    Exited(i32),
    /// The top-level process died from this signal.
    Signaled(i32),
    /// A timeout expired and the tree was killed.
    TimedOut,
    /// The supervisor itself received this signal and killed the tree.
    Interrupted(i32),
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Exited(code) => code,
            RunOutcome::Signaled(signal) | RunOutcome::Interrupted(signal) => 128 + signal,
            RunOutcome::TimedOut => TIMEOUT_EXIT_CODE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Cannot open log file '{}': {source}", .path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Executable '{program}' not found")]
    ProgramNotFound { program: String },

    #[error("Failed to launch '{}': {source}", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Enforcement(#[from] SandboxError),

    #[error("Failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error("Failed to wait for the child: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Command line does not round-trip: {line}")]
    CommandLineMismatch { line: String },
}

/// Runs one invocation to completion.
#[derive(Debug)]
pub struct Supervisor {
    invocation: SandboxInvocation,
    state: SupervisorStateMachine,
    tree: ProcessTree,
}

impl Supervisor {
    pub fn new(invocation: SandboxInvocation) -> Self {
        Self {
            invocation,
            state: SupervisorStateMachine::new(),
            tree: ProcessTree::new(),
        }
    }

    pub fn state(&self) -> &SupervisorStateMachine {
        &self.state
    }

    pub fn tree(&self) -> &ProcessTree {
        &self.tree
    }

    pub async fn run(&self) -> Result<RunOutcome, SupervisorError> {
        let _ = self.state.transition_to_launching();
        let result = self.launch_and_wait().await;
        if let Err(e) = &result {
            tracing::error!("launch failed: {}", e);
            let _ = self.state.transition_to_launch_failed(e.to_string());
        }
        result
    }

    async fn launch_and_wait(&self) -> Result<RunOutcome, SupervisorError> {
        let invocation = &self.invocation;

        let line = cmdline::build(&invocation.command);
        tracing::info!("launching: {}", line);
        let argv = cmdline::split(&line);
        if argv != invocation.command {
            return Err(SupervisorError::CommandLineMismatch { line });
        }

        let Some(program_name) = argv.first() else {
            return Err(SupervisorError::ProgramNotFound {
                program: String::new(),
            });
        };
        let env = invocation.child_environment();
        let program = resolve_program(
            program_name,
            env.get(std::ffi::OsStr::new("PATH")).map(|p| p.as_os_str()),
            &invocation.working_directory,
        )
        .ok_or_else(|| SupervisorError::ProgramNotFound {
            program: program_name.clone(),
        })?;

        // Redirect targets exist before the kernel plan is compiled, so their
        // write-only rules become grants.
        let stdout = open_redirect(&invocation.stdout)?;
        let stderr = open_redirect(&invocation.stderr)?;
        let layer = InterceptionLayer::install_with_roots(
            invocation.effective_table(&program)?,
            invocation.reparse_policy,
            self.tree.clone(),
            [invocation.working_directory.clone()],
        );
        // Links are only audited where the user asked for them to be refused.
        let link_roots = (invocation.reparse_policy == ReparsePolicy::Refuse).then(|| {
            let mut roots = invocation.table.declared_roots();
            roots.push(invocation.working_directory.clone());
            roots.sort();
            roots.dedup();
            roots
        });
        let ruleset = kernel_ruleset(&layer, link_roots.as_deref());

        #[cfg(target_os = "linux")]
        if let Err(e) = nix::sys::prctl::set_child_subreaper(true) {
            tracing::warn!("cannot become a child subreaper: {}", e);
        }

        let mut command = Command::new(&program);
        command
            .arg0(program_name)
            .args(&argv[1..])
            .current_dir(&invocation.working_directory)
            .env_clear()
            .envs(env)
            .stdin(Stdio::inherit())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .kill_on_drop(true);

        let supervisor_pid = nix::unistd::getpid();
        // The child runs in its own group, so it must be the foreground group to
        // read the terminal. Only a supervisor in the foreground hands it over.
        let stdin = std::io::stdin();
        let hand_over_terminal = stdin.is_terminal()
            && nix::unistd::tcgetpgrp(&stdin).is_ok_and(|fg| fg == nix::unistd::getpgrp());
        // SAFETY: the hook only issues prctl, getppid, raise, sigaction,
        // tcsetpgrp and the Landlock syscalls, none of which allocate or take
        // locks held by other threads.
        unsafe {
            command.pre_exec(move || {
                #[cfg(target_os = "linux")]
                nix::sys::prctl::set_pdeathsig(Signal::SIGKILL)?;
                if nix::unistd::getppid() != supervisor_pid {
                    nix::sys::signal::raise(Signal::SIGKILL)?;
                }
                if hand_over_terminal {
                    let _ = set_foreground_group(nix::unistd::getpgrp());
                }
                if let Some(ruleset) = &ruleset {
                    ruleset.restrict_self()?;
                }
                Ok(())
            });
        }

        let mut sigint = signal(SignalKind::interrupt()).map_err(SupervisorError::Signals)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(SupervisorError::Signals)?;

        let mut child = command.spawn().map_err(|source| SupervisorError::Launch {
            program: program.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();
        self.tree.set_root(pid);
        let _ = self.state.transition_to_running(pid);
        tracing::info!("started pid {} ({})", pid, program.display());

        let monitor = tokio::spawn(monitor_tree(self.tree.clone()));

        let started = Instant::now();
        let mut term_at = invocation.timeout.map(|t| started + t);
        let mut kill_at = invocation.hard_timeout.map(|t| started + t);
        let mut timed_out = false;
        let mut interrupted = None;

        let status: ExitStatus = loop {
            tokio::select! {
                status = child.wait() => break status.map_err(SupervisorError::Wait)?,
                _ = sleep_until_some(term_at) => {
                    tracing::warn!("soft timeout expired, sending SIGTERM to the tree");
                    timed_out = true;
                    term_at = None;
                    self.tree.terminate(Signal::SIGTERM);
                    kill_at = Some(kill_at.unwrap_or_else(|| Instant::now() + SOFT_TIMEOUT_GRACE));
                }
                _ = sleep_until_some(kill_at) => {
                    tracing::warn!("hard timeout expired, killing the tree");
                    timed_out = true;
                    term_at = None;
                    kill_at = None;
                    self.tree.terminate(Signal::SIGKILL);
                }
                _ = sigint.recv(), if interrupted.is_none() => {
                    interrupted = Some(Signal::SIGINT as i32);
                    self.tree.terminate(Signal::SIGKILL);
                }
                _ = sigterm.recv(), if interrupted.is_none() => {
                    interrupted = Some(Signal::SIGTERM as i32);
                    self.tree.terminate(Signal::SIGKILL);
                }
            }
        };

        monitor.abort();
        self.kill_leftovers().await;
        if hand_over_terminal && let Err(e) = set_foreground_group(nix::unistd::getpgrp()) {
            tracing::warn!("cannot take the terminal back: {}", e);
        }

        let outcome = if let Some(signal) = interrupted {
            RunOutcome::Interrupted(signal)
        } else if timed_out {
            RunOutcome::TimedOut
        } else if let Some(code) = status.code() {
            RunOutcome::Exited(code)
        } else {
            RunOutcome::Signaled(status.signal().unwrap_or_default())
        };

        match outcome {
            RunOutcome::TimedOut => {
                let _ = self.state.transition_to_timed_out();
            }
            other => {
                let _ = self.state.transition_to_completed(other.exit_code());
            }
        }
        tracing::info!(
            "pid {} finished after {:?}: {:?}",
            pid,
            started.elapsed(),
            outcome
        );
        Ok(outcome)
    }

    /// Kills descendants that outlived the top-level process and reaps them.
    async fn kill_leftovers(&self) {
        let tree = self.tree.clone();
        let signalled = tokio::task::spawn_blocking(move || tree.terminate(Signal::SIGKILL))
            .await
            .unwrap_or_default();
        if signalled > 0 {
            tracing::info!("killed {} leftover process(es)", signalled);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.tree.reap_orphans();
        }
    }
}

async fn monitor_tree(tree: ProcessTree) {
    let mut interval = tokio::time::interval(TREE_REFRESH_INTERVAL);
    loop {
        interval.tick().await;
        let tree = tree.clone();
        let _ = tokio::task::spawn_blocking(move || {
            tree.refresh();
            tree.reap_orphans();
        })
        .await;
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Makes `group` the foreground process group of the terminal on stdin.
///
/// `SIGTTOU` is ignored around the call, since a background group is otherwise
/// stopped for trying.
fn set_foreground_group(group: Pid) -> nix::Result<()> {
    // SAFETY: descriptor 0 stays open for the whole call.
    let stdin = unsafe { BorrowedFd::borrow_raw(0) };
    // SAFETY: SigIgn installs no handler; the previous disposition is restored.
    let previous = unsafe { nix::sys::signal::signal(Signal::SIGTTOU, SigHandler::SigIgn) }?;
    let result = nix::unistd::tcsetpgrp(stdin, group);
    // SAFETY: as above.
    unsafe { nix::sys::signal::signal(Signal::SIGTTOU, previous) }?;
    result
}

fn open_redirect(redirect: &Redirect) -> Result<Stdio, SupervisorError> {
    match redirect {
        Redirect::Inherit => Ok(Stdio::inherit()),
        Redirect::File(path) => File::create(path)
            .map(Stdio::from)
            .map_err(|source| SupervisorError::LogFile {
                path: path.clone(),
                source,
            }),
    }
}

#[cfg(target_os = "linux")]
fn kernel_ruleset(
    layer: &InterceptionLayer,
    link_roots: Option<&[PathBuf]>,
) -> Option<Arc<crate::sandbox::PreparedRuleset>> {
    use crate::sandbox::{EnforcementPlan, PreparedRuleset, check_landlock_prerequisites};

    if let Err(e) = check_landlock_prerequisites() {
        tracing::warn!("{}; running without kernel enforcement", e);
        return None;
    }
    let mut plan = EnforcementPlan::compile(layer.engine());
    if let Some(roots) = link_roots {
        plan.audit_links(roots);
    }
    for gap in plan.gaps() {
        tracing::warn!("{}", gap);
    }
    match PreparedRuleset::prepare(&plan) {
        Ok(ruleset) => Some(Arc::new(ruleset)),
        Err(e) => {
            tracing::warn!("{}; running without kernel enforcement", e);
            None
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn kernel_ruleset(
    _layer: &InterceptionLayer,
    _link_roots: Option<&[PathBuf]>,
) -> Option<Arc<NoKernelRuleset>> {
    tracing::warn!("no kernel enforcement on this platform");
    None
}

#[cfg(not(target_os = "linux"))]
#[derive(Debug)]
struct NoKernelRuleset;

#[cfg(not(target_os = "linux"))]
impl NoKernelRuleset {
    fn restrict_self(&self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Exited(3).exit_code(), 3);
        assert_eq!(RunOutcome::Signaled(9).exit_code(), 137);
        assert_eq!(RunOutcome::Interrupted(2).exit_code(), 130);
        assert_eq!(RunOutcome::TimedOut.exit_code(), 27_021_977);
    }
}
