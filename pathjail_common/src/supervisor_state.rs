//! Observable lifecycle of one supervised run.
//!
//! A run moves `Configuring -> Launching -> Running` and ends in exactly one of
//! `Completed`, `TimedOut` or `LaunchFailed`. The current state lives in a
//! `tokio::sync::watch` channel so the timer, the signal handler and any
//! embedding code see transitions as they happen instead of polling.
//!
//! # Example
//!
//! ```rust,ignore
//! use pathjail_common::supervisor_state::{SupervisorState, SupervisorStateMachine};
//!
//! let sm = SupervisorStateMachine::new();
//! sm.transition_to_launching().unwrap();
//! sm.transition_to_running(4242).unwrap();
//! sm.transition_to_completed(0).unwrap();
//!
//! let finished = sm.wait_for_terminal().await;
//! assert_eq!(finished, SupervisorState::Completed { exit_code: 0 });
//! ```

use std::sync::Arc;
use tokio::sync::watch;

/// Supervisor lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    /// Flags are being expanded and validated; nothing has been spawned.
    Configuring,

    /// Configuration is valid and the child is being created.
    Launching,

    /// The top-level child is alive.
    Running { pid: u32 },

    /// The top-level child exited on its own (or was interrupted by a signal
    /// delivered to the supervisor). `exit_code` is what the supervisor reports.
    Completed { exit_code: i32 },

    /// The supervisor terminated the tree because a timeout expired.
    TimedOut,

    /// Configuration or process creation failed; no child is running.
    LaunchFailed { error: String },
}

impl SupervisorState {
    /// Returns true once the run has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SupervisorState::Completed { .. }
                | SupervisorState::TimedOut
                | SupervisorState::LaunchFailed { .. }
        )
    }

    /// Returns the pid of the top-level child while it is running.
    pub fn running_pid(&self) -> Option<u32> {
        match self {
            SupervisorState::Running { pid } => Some(*pid),
            _ => None,
        }
    }
}

/// Observable supervisor state machine backed by a watch channel.
#[derive(Clone)]
pub struct SupervisorStateMachine {
    sender: Arc<watch::Sender<SupervisorState>>,
    // Keep a receiver so the channel never closes while the machine is alive
    _receiver: watch::Receiver<SupervisorState>,
}

impl std::fmt::Debug for SupervisorStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorStateMachine")
            .field("state", &*self.sender.borrow())
            .finish()
    }
}

impl SupervisorStateMachine {
    /// Create a new state machine in the `Configuring` state.
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(SupervisorState::Configuring);
        Self {
            sender: Arc::new(sender),
            _receiver: receiver,
        }
    }

    /// Get the current state without blocking.
    pub fn current(&self) -> SupervisorState {
        self.sender.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.sender.subscribe()
    }

    /// Applies `next` when `allowed` accepts the current state.
    fn transition(
        &self,
        allowed: impl Fn(&SupervisorState) -> bool,
        next: SupervisorState,
        refusal: &'static str,
    ) -> Result<(), &'static str> {
        let mut transitioned = false;
        self.sender.send_if_modified(|state| {
            if allowed(state) {
                *state = next.clone();
                transitioned = true;
                true
            } else {
                false
            }
        });
        if transitioned { Ok(()) } else { Err(refusal) }
    }

    /// Configuring -> Launching
    pub fn transition_to_launching(&self) -> Result<(), &'static str> {
        self.transition(
            |s| matches!(s, SupervisorState::Configuring),
            SupervisorState::Launching,
            "Can only start launching from Configuring",
        )
    }

    /// Launching -> Running
    pub fn transition_to_running(&self, pid: u32) -> Result<(), &'static str> {
        self.transition(
            |s| matches!(s, SupervisorState::Launching),
            SupervisorState::Running { pid },
            "Can only start running from Launching",
        )
    }

    /// Running -> Completed
    pub fn transition_to_completed(&self, exit_code: i32) -> Result<(), &'static str> {
        self.transition(
            |s| matches!(s, SupervisorState::Running { .. }),
            SupervisorState::Completed { exit_code },
            "Can only complete from Running",
        )
    }

    /// Running -> TimedOut
    pub fn transition_to_timed_out(&self) -> Result<(), &'static str> {
        self.transition(
            |s| matches!(s, SupervisorState::Running { .. }),
            SupervisorState::TimedOut,
            "Can only time out from Running",
        )
    }

    /// Configuring | Launching -> LaunchFailed
    pub fn transition_to_launch_failed(&self, error: String) -> Result<(), &'static str> {
        self.transition(
            |s| matches!(s, SupervisorState::Configuring | SupervisorState::Launching),
            SupervisorState::LaunchFailed { error },
            "Can only fail to launch before the child is running",
        )
    }

    /// Wait until the run reaches a terminal state and return it.
    pub async fn wait_for_terminal(&self) -> SupervisorState {
        let mut rx = self.sender.subscribe();
        loop {
            {
                let state = rx.borrow_and_update();
                if state.is_terminal() {
                    return state.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.current();
            }
        }
    }
}

impl Default for SupervisorStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
