//! Pid-indexed arena of every process in a supervised tree.
//!
//! Descendants are discovered from `/proc/<pid>/stat` and from explicit spawn
//! reports; termination walks the arena instead of a live parent/child graph, so
//! processes whose parent already exited are still reached.

use std::collections::HashMap;
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;
use pathjail_common::state_machine::StateMachine;

/// One member of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedProcess {
    pub pid: u32,
    pub parent: u32,
}

/// The fields of `/proc/<pid>/stat` the arena cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcStat {
    pub state: char,
    pub ppid: u32,
}

#[derive(Debug, Default)]
struct Arena {
    root: Option<u32>,
    processes: HashMap<u32, TrackedProcess>,
}

/// Shared handle to the arena. Clones observe the same processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessTree {
    arena: Arc<StateMachine<Arena>>,
}

impl ProcessTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the top-level child. Its process group is signalled on termination.
    pub fn set_root(&self, pid: u32) {
        let parent = std::process::id();
        self.arena.transition(|arena| {
            arena.root = Some(pid);
            arena
                .processes
                .insert(pid, TrackedProcess { pid, parent });
        });
    }

    pub fn root(&self) -> Option<u32> {
        self.arena.lock().root
    }

    /// Records `child` as spawned by `parent`. Returns false when `child` was
    /// already tracked.
    pub fn track(&self, parent: u32, child: u32) -> bool {
        self.arena.transition(|arena| {
            arena
                .processes
                .insert(child, TrackedProcess { pid: child, parent })
                .is_none()
        })
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.arena.lock().processes.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.arena.lock().processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.arena.lock().processes.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Tracked processes other than the root.
    pub fn descendants(&self) -> Vec<TrackedProcess> {
        let arena = self.arena.lock();
        let mut descendants: Vec<TrackedProcess> = arena
            .processes
            .values()
            .filter(|process| Some(process.pid) != arena.root)
            .copied()
            .collect();
        descendants.sort_unstable_by_key(|process| process.pid);
        descendants
    }

    /// Rescans `/proc`: adopts every process whose parent is tracked and drops
    /// tracked processes that no longer exist. Returns the number adopted.
    pub fn refresh(&self) -> usize {
        let Some(snapshot) = proc_snapshot() else {
            return 0;
        };

        self.arena.transition(|arena| {
            arena
                .processes
                .retain(|pid, _| snapshot.contains_key(pid));

            let mut adopted = 0;
            loop {
                let before = adopted;
                for (&pid, stat) in &snapshot {
                    if !arena.processes.contains_key(&pid)
                        && arena.processes.contains_key(&stat.ppid)
                    {
                        arena.processes.insert(
                            pid,
                            TrackedProcess {
                                pid,
                                parent: stat.ppid,
                            },
                        );
                        adopted += 1;
                    }
                }
                if adopted == before {
                    break;
                }
            }
            if adopted > 0 {
                tracing::debug!("adopted {} new process(es) into the tree", adopted);
            }
            adopted
        })
    }

    /// Reaps zombie descendants that were re-parented to the supervisor.
    ///
    /// The root is left alone; its status belongs to whoever spawned it.
    pub fn reap_orphans(&self) -> usize {
        let me = std::process::id();
        let root = self.root();
        let mut reaped = 0;

        for process in self.descendants() {
            if Some(process.pid) == root {
                continue;
            }
            let Some(stat) = read_stat(process.pid) else {
                continue;
            };
            if stat.state == 'Z'
                && stat.ppid == me
                && waitpid(Pid::from_raw(process.pid as i32), Some(WaitPidFlag::WNOHANG)).is_ok()
            {
                reaped += 1;
            }
        }
        reaped
    }

    /// Sends `signal` to every tracked process and to the root's process group.
    ///
    /// Processes that are already gone are skipped silently, so calling this on
    /// a finished tree is a no-op.
    pub fn terminate(&self, signal: Signal) -> usize {
        self.refresh();
        let pids = self.pids();
        let mut signalled = 0;

        for pid in &pids {
            match kill(Pid::from_raw(*pid as i32), signal) {
                Ok(()) => signalled += 1,
                Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!("failed to send {} to pid {}: {}", signal, pid, e),
            }
        }

        if let Some(root) = self.root() {
            match killpg(Pid::from_raw(root as i32), signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!("failed to send {} to group {}: {}", signal, root, e),
            }
        }

        tracing::info!("sent {} to {} process(es) in the tree", signal, signalled);
        signalled
    }
}

/// Parses the state and parent pid out of a `/proc/<pid>/stat` line.
///
/// The command name may itself contain spaces and parentheses, so fields are
/// counted from the last `)`.
pub fn parse_stat(contents: &str) -> Option<ProcStat> {
    let after_name = &contents[contents.rfind(')')? + 1..];
    let mut fields = after_name.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    Some(ProcStat { state, ppid })
}

fn read_stat(pid: u32) -> Option<ProcStat> {
    let contents = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_stat(&contents)
}

fn proc_snapshot() -> Option<HashMap<u32, ProcStat>> {
    let entries = std::fs::read_dir("/proc").ok()?;
    let mut snapshot = HashMap::new();
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        if let Some(stat) = read_stat(pid) {
            snapshot.insert(pid, stat);
        }
    }
    Some(snapshot)
}
