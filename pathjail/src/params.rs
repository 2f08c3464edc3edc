//! `@file` expansion and the `--` boundary.
//!
//! A token `@name` is replaced by the lines of the file `name`, one argument
//! per line, recursively. Expansion stops at the first `--`, wherever it came
//! from: everything after it is the command and is passed through verbatim.

use std::path::PathBuf;

use crate::config::ConfigError;

/// Separates sandbox flags from the command.
pub const COMMAND_SEPARATOR: &str = "--";

/// Expands every `@file` token that precedes the first `--`.
pub fn expand_param_files<I, S>(args: I) -> Result<Vec<String>, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut expansion = Expansion::default();
    expansion.expand(args.into_iter().map(Into::into))?;
    Ok(expansion.out)
}

#[derive(Default)]
struct Expansion {
    out: Vec<String>,
    open_files: Vec<PathBuf>,
    past_separator: bool,
}

impl Expansion {
    fn expand(&mut self, tokens: impl IntoIterator<Item = String>) -> Result<(), ConfigError> {
        for token in tokens {
            if self.past_separator {
                self.out.push(token);
                continue;
            }
            if token == COMMAND_SEPARATOR {
                self.past_separator = true;
                self.out.push(token);
                continue;
            }
            match token.strip_prefix('@') {
                Some(name) if !name.is_empty() => self.expand_file(PathBuf::from(name))?,
                _ => self.out.push(token),
            }
        }
        Ok(())
    }

    fn expand_file(&mut self, path: PathBuf) -> Result<(), ConfigError> {
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::ParamFile {
            path: path.clone(),
            source,
        })?;
        let identity = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if self.open_files.contains(&identity) {
            return Err(ConfigError::ParamFileCycle { path });
        }

        tracing::debug!("expanding parameter file {}", path.display());
        self.open_files.push(identity);
        self.expand(param_file_lines(&contents))?;
        self.open_files.pop();
        Ok(())
    }
}

/// One argument per line; `\n` and `\r\n` both end a line.
pub fn param_file_lines(contents: &str) -> Vec<String> {
    contents.lines().map(str::to_owned).collect()
}

/// Splits the expanded arguments at the first `--` into sandbox flags and the
/// command to run.
pub fn split_command(mut args: Vec<String>) -> Result<(Vec<String>, Vec<String>), ConfigError> {
    let separator = args
        .iter()
        .position(|arg| arg == COMMAND_SEPARATOR)
        .ok_or(ConfigError::MissingCommand)?;
    let command = args.split_off(separator + 1);
    args.pop();
    if command.is_empty() {
        return Err(ConfigError::MissingCommand);
    }
    Ok((args, command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_keep_interior_blanks() {
        assert_eq!(
            param_file_lines("--\r\n/bin/echo\n\nHello World\n"),
            vec!["--", "/bin/echo", "", "Hello World"]
        );
    }

    #[test]
    fn test_lone_at_is_literal() {
        let args = expand_param_files(["-r", "@", "--", "x"]).unwrap();
        assert_eq!(args, vec!["-r", "@", "--", "x"]);
    }

    #[test]
    fn test_split_command() {
        let (flags, command) =
            split_command(vec!["-r".into(), "/a".into(), "--".into(), "ls".into(), "--".into()])
                .unwrap();
        assert_eq!(flags, vec!["-r", "/a"]);
        assert_eq!(command, vec!["ls", "--"]);
    }

    #[test]
    fn test_missing_separator_or_command() {
        assert!(matches!(
            split_command(vec!["-r".into(), "/a".into()]),
            Err(ConfigError::MissingCommand)
        ));
        assert!(matches!(
            split_command(vec!["--".into()]),
            Err(ConfigError::MissingCommand)
        ));
    }
}
