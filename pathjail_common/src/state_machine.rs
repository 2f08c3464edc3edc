use std::sync::{Mutex, MutexGuard, PoisonError};

/// A mutex-guarded value whose updates happen as atomic transitions.
///
/// The supervisor keeps its process arena behind one of these: the monitoring
/// loop inserts newly discovered processes while the termination path walks the
/// same arena, and neither may observe a half-applied update.
///
/// # Example
///
/// ```rust
/// use pathjail_common::state_machine::StateMachine;
/// use std::collections::BTreeSet;
///
/// let tracked = StateMachine::new(BTreeSet::new());
///
/// let newly_added = tracked.transition(|pids| pids.insert(42u32));
/// assert!(newly_added);
///
/// let again = tracked.transition(|pids| pids.insert(42u32));
/// assert!(!again);
/// ```
#[derive(Debug, Default)]
pub struct StateMachine<S> {
    state: Mutex<S>,
}

impl<S> StateMachine<S> {
    /// Creates a new `StateMachine` holding `initial_state`.
    pub fn new(initial_state: S) -> Self {
        Self {
            state: Mutex::new(initial_state),
        }
    }

    /// Access the underlying state directly.
    ///
    /// A poisoned lock is recovered rather than propagated: the guarded values
    /// are plain collections that stay consistent after a panicking reader.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Perform an atomic transition on the state and return the closure's result.
    pub fn transition<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = self.lock();
        f(&mut *state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_transitions() {
        let machine = Arc::new(StateMachine::new(HashMap::<u32, u32>::new()));
        let mut handles = vec![];

        for worker in 0..10u32 {
            let machine = machine.clone();
            handles.push(thread::spawn(move || {
                for pid in 0..100u32 {
                    machine.transition(|arena| {
                        arena.insert(worker * 1000 + pid, worker);
                    });
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(machine.lock().len(), 1000);
    }

    #[test]
    fn test_transition_returns_closure_result() {
        enum Phase {
            Tracking,
            Draining,
        }

        let machine = StateMachine::new(Phase::Tracking);

        let result = machine.transition(|phase| match phase {
            Phase::Tracking => {
                *phase = Phase::Draining;
                "draining"
            }
            Phase::Draining => "already draining",
        });

        assert_eq!(result, "draining");
        assert!(matches!(*machine.lock(), Phase::Draining));
    }

    #[test]
    fn test_lock_survives_poisoning() {
        let machine = Arc::new(StateMachine::new(vec![1u32]));
        let poisoner = machine.clone();
        let _ = thread::spawn(move || {
            poisoner.transition(|_| panic!("boom"));
        })
        .join();

        assert_eq!(*machine.lock(), vec![1]);
    }
}
