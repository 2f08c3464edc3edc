//! # Shell Module
//!
//! Entry point and argument handling for the `pathjail` binary.

pub mod cli;

pub use cli::{Cli, exit_code_for, parse_request, run, run_with_args};
