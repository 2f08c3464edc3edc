//! Lifecycle primitives shared by the pathjail supervisor.

pub mod state_machine;
pub mod supervisor_state;
