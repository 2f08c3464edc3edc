//! # pathjail CLI
//!
//! Argument handling for the `pathjail` binary: `@file` expansion, the `--`
//! split, flag validation and the mapping from run outcome to exit code.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, FromArgMatches, Parser, error::ErrorKind};

use crate::config::ConfigError;
use crate::params::{COMMAND_SEPARATOR, expand_param_files, split_command};
use crate::sandbox::{AccessLevel, PermissionTable, Precedence, ReparsePolicy};
use crate::supervisor::invocation::{Redirect, SandboxInvocation};
use crate::supervisor::{RunOutcome, Supervisor, SupervisorError};
use crate::utils::logging::init_logging;

/// Stable prefix of every configuration error printed to standard output.
pub const CONFIG_ERROR_PREFIX: &str = "pathjail: configuration error: ";

/// Prefix of launch failures printed to standard error.
pub const LAUNCH_ERROR_PREFIX: &str = "pathjail: launch failure: ";

/// Run a command with path-based file access control.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pathjail",
    version,
    about,
    override_usage = "pathjail [OPTIONS] -- <COMMAND> [ARGS]...",
    long_about = "pathjail runs COMMAND with file access limited to the declared paths.

Paths must be absolute. Rules apply to the path and everything beneath it; the
longest matching rule wins, and among rules on the same path the one declared
last wins (or a block, with --block-wins). Listing directories is always allowed.

Any argument of the form @FILE is replaced by the lines of FILE, one argument
per line, up to the first --.

Example:
  pathjail -W /work -w /work -b /work/secrets.txt -t 60 -- make test"
)]
pub struct Cli {
    /// Working directory of the command (defaults to the current directory)
    #[arg(short = 'W', value_name = "DIR", value_parser = parse_absolute_path)]
    pub working_directory: Option<PathBuf>,

    /// Grant read access beneath PATH
    #[arg(short = 'r', value_name = "PATH", value_parser = parse_absolute_path)]
    pub read: Vec<PathBuf>,

    /// Grant read and write access beneath PATH
    #[arg(short = 'w', value_name = "PATH", value_parser = parse_absolute_path)]
    pub read_write: Vec<PathBuf>,

    /// Block all access beneath PATH
    #[arg(short = 'b', value_name = "PATH", value_parser = parse_absolute_path)]
    pub block: Vec<PathBuf>,

    /// Redirect the command's standard output to FILE
    #[arg(short = 'l', value_name = "FILE", value_parser = parse_absolute_path)]
    pub stdout_log: Option<PathBuf>,

    /// Redirect the command's standard error to FILE
    #[arg(short = 'L', value_name = "FILE", value_parser = parse_absolute_path)]
    pub stderr_log: Option<PathBuf>,

    /// Soft timeout in seconds: SIGTERM, then SIGKILL (0 disables)
    #[arg(
        short = 't',
        value_name = "SECONDS",
        value_parser = parse_timeout,
        allow_hyphen_values = true
    )]
    pub timeout: Option<u64>,

    /// Hard timeout in seconds: SIGKILL (0 disables)
    #[arg(
        short = 'T',
        value_name = "SECONDS",
        value_parser = parse_timeout,
        allow_hyphen_values = true
    )]
    pub hard_timeout: Option<u64>,

    /// Refuse to traverse symbolic links inside declared paths
    #[arg(short = 'D')]
    pub disable_reparse_traversal: bool,

    /// Set NAME to VALUE in the command's environment; an empty VALUE unsets it
    #[arg(short = 'E', value_name = "NAME=VALUE", value_parser = parse_env_override)]
    pub env: Vec<(String, String)>,

    /// A block wins over a grant declared on the same path, whatever the order
    #[arg(long)]
    pub block_wins: bool,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Rejects relative paths with the message the rest of the sandbox uses.
pub fn parse_absolute_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        Ok(path)
    } else {
        Err(format!("Cannot create absolute path from '{value}'"))
    }
}

/// Accepts only plain decimal digits: no sign, quotes or whitespace.
pub fn parse_timeout(value: &str) -> Result<u64, String> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!(
            "'{value}' is not a non-negative whole number of seconds"
        ));
    }
    value
        .parse()
        .map_err(|e| format!("'{value}' is not a valid timeout: {e}"))
}

pub fn parse_env_override(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, val)) if !name.is_empty() => Ok((name.to_string(), val.to_string())),
        _ => Err(format!("'{value}' is not of the form NAME=VALUE")),
    }
}

/// What the parsed arguments ask for.
#[derive(Debug)]
pub enum Request {
    /// Help or version text; printed to stdout, exit 0.
    Info(String),
    Run {
        cli: Box<Cli>,
        invocation: Box<SandboxInvocation>,
    },
}

/// Turns the raw arguments (without the program name) into a [`Request`].
pub fn parse_request(raw: Vec<String>) -> Result<Request, ConfigError> {
    let expanded = expand_param_files(raw)?;
    let separator = expanded
        .iter()
        .position(|arg| arg == COMMAND_SEPARATOR)
        .unwrap_or(expanded.len());

    let argv = std::iter::once("pathjail".to_string()).chain(expanded[..separator].iter().cloned());
    let matches = match Cli::command().try_get_matches_from(argv) {
        Ok(matches) => matches,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            return Ok(Request::Info(e.render().to_string()));
        }
        Err(e)
            if separator == expanded.len()
                && !matches!(e.kind(), ErrorKind::ValueValidation | ErrorKind::InvalidValue) =>
        {
            return Err(ConfigError::MissingCommand);
        }
        Err(e) => return Err(ConfigError::InvalidArguments(first_line(&e))),
    };
    let cli = Cli::from_arg_matches(&matches)
        .map_err(|e| ConfigError::InvalidArguments(first_line(&e)))?;

    let (_, command) = split_command(expanded)?;
    let table = rules_in_declaration_order(&matches, cli.block_wins)?;

    let working_directory = match &cli.working_directory {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().map_err(ConfigError::CurrentDir)?,
    };

    let mut invocation = SandboxInvocation::new(working_directory, command)
        .with_table(table)
        .with_timeout_secs(cli.timeout.unwrap_or(0))
        .with_hard_timeout_secs(cli.hard_timeout.unwrap_or(0))
        .with_reparse_policy(if cli.disable_reparse_traversal {
            ReparsePolicy::Refuse
        } else {
            ReparsePolicy::Follow
        })
        .with_stdout(redirect_to(cli.stdout_log.as_deref()))
        .with_stderr(redirect_to(cli.stderr_log.as_deref()));
    for (name, value) in &cli.env {
        invocation = invocation.with_env(name, value);
    }

    Ok(Request::Run {
        cli: Box::new(cli),
        invocation: Box::new(invocation),
    })
}

/// Builds the table from `-r`, `-w` and `-b` in the order they were given,
/// interleaved across the three flags.
fn rules_in_declaration_order(
    matches: &clap::ArgMatches,
    block_wins: bool,
) -> Result<PermissionTable, ConfigError> {
    let mut declared: Vec<(usize, &'static str, &PathBuf, AccessLevel)> = Vec::new();
    for (id, flag, access) in [
        ("read", "-r", AccessLevel::ReadOnly),
        ("read_write", "-w", AccessLevel::ReadWrite),
        ("block", "-b", AccessLevel::Blocked),
    ] {
        if let (Some(indices), Some(paths)) =
            (matches.indices_of(id), matches.get_many::<PathBuf>(id))
        {
            declared.extend(indices.zip(paths).map(|(index, path)| (index, flag, path, access)));
        }
    }
    declared.sort_by_key(|(index, ..)| *index);

    let precedence = if block_wins {
        Precedence::BlockWins
    } else {
        Precedence::LastDeclared
    };
    let mut table = PermissionTable::new().with_precedence(precedence);
    for (_, flag, path, access) in declared {
        table
            .add_rule(path, access)
            .map_err(|source| ConfigError::Path { flag, source })?;
    }
    Ok(table)
}

fn redirect_to(path: Option<&Path>) -> Redirect {
    path.map_or(Redirect::Inherit, |path| Redirect::File(path.to_path_buf()))
}

fn first_line(error: &clap::Error) -> String {
    let rendered = error.render().to_string();
    let line = rendered.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).to_string()
}

/// Why a run produced no child outcome.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// The process exit code for a finished run.
pub fn exit_code_for(result: &Result<RunOutcome, CliError>) -> i32 {
    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(_) => 1,
    }
}

/// Entry point of the `pathjail` binary. Returns the process exit code.
pub async fn run() -> i32 {
    run_with_args(std::env::args_os().skip(1)).await
}

pub async fn run_with_args(args: impl IntoIterator<Item = OsString>) -> i32 {
    let result = run_inner(args).await;
    match &result {
        Err(CliError::Config(e)) => {
            println!("{CONFIG_ERROR_PREFIX}{e}");
            println!("{}", Cli::command().render_usage());
        }
        Err(CliError::Supervisor(e)) => eprintln!("{LAUNCH_ERROR_PREFIX}{e}"),
        Ok(_) => {}
    }
    exit_code_for(&result)
}

async fn run_inner(args: impl IntoIterator<Item = OsString>) -> Result<RunOutcome, CliError> {
    let raw = args
        .into_iter()
        .map(|arg| {
            arg.into_string().map_err(|arg| {
                ConfigError::InvalidArguments(format!("argument {arg:?} is not valid UTF-8"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (cli, invocation) = match parse_request(raw)? {
        Request::Info(text) => {
            print!("{text}");
            return Ok(RunOutcome::Exited(0));
        }
        Request::Run { cli, invocation } => (cli, invocation),
    };

    let log_level = if cli.verbose { "debug" } else { "info" };
    let log_to_file = !env_flag_enabled("PATHJAIL_LOG_TO_STDERR");
    if let Err(e) = init_logging(log_level, log_to_file) {
        eprintln!("pathjail: failed to initialise logging: {e:#}");
    }

    tracing::debug!("invocation: {:?}", invocation);
    let supervisor = Supervisor::new(*invocation);
    Ok(supervisor.run().await?)
}

pub fn env_flag_enabled(name: &str) -> bool {
    std::env::var(name)
        .map(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return false;
            }

            matches!(
                trimmed.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}
