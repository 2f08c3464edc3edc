//! # Command-Line Serialisation
//!
//! Converts between an argument vector and the single command-line string a
//! native process launcher consumes, using the Microsoft C runtime quoting
//! rules (the post-2008 variant):
//!
//! - an argument is wrapped in double quotes when it is empty or contains a
//!   space, tab, newline, vertical tab or double quote;
//! - inside quotes, `n` backslashes followed by a double quote become `2n`
//!   backslashes plus `\"`, and `n` backslashes before the closing quote become
//!   `2n` backslashes;
//! - every other character, carets included, is copied unchanged.
//!
//! [`split`] is the exact inverse, so `split(&build(args)) == args` for every
//! vector of strings.

/// Serialises `args` into one command line. An empty vector gives `""`.
pub fn build<S: AsRef<str>>(args: &[S]) -> String {
    let mut line = String::new();
    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            line.push(' ');
        }
        append_quoted(&mut line, arg.as_ref());
    }
    line
}

fn needs_quotes(arg: &str) -> bool {
    arg.is_empty() || arg.contains([' ', '\t', '\n', '\x0b', '"'])
}

fn append_quoted(line: &mut String, arg: &str) {
    if !needs_quotes(arg) {
        line.push_str(arg);
        return;
    }

    line.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                push_backslashes(line, backslashes * 2 + 1);
                line.push('"');
                backslashes = 0;
            }
            _ => {
                push_backslashes(line, backslashes);
                line.push(c);
                backslashes = 0;
            }
        }
    }
    push_backslashes(line, backslashes * 2);
    line.push('"');
}

fn push_backslashes(line: &mut String, count: usize) {
    line.extend(std::iter::repeat_n('\\', count));
}

/// Parses a command line into its argument vector.
pub fn split(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| matches!(c, ' ' | '\t')).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut arg = String::new();
        let mut in_quotes = false;
        while let Some(&c) = chars.peek() {
            match c {
                ' ' | '\t' if !in_quotes => break,
                '\\' => {
                    let mut backslashes = 0usize;
                    while chars.next_if_eq(&'\\').is_some() {
                        backslashes += 1;
                    }
                    if chars.peek() == Some(&'"') {
                        push_backslashes(&mut arg, backslashes / 2);
                        if backslashes % 2 == 1 {
                            chars.next();
                            arg.push('"');
                        }
                    } else {
                        push_backslashes(&mut arg, backslashes);
                    }
                }
                '"' => {
                    chars.next();
                    if in_quotes && chars.next_if_eq(&'"').is_some() {
                        arg.push('"');
                    } else {
                        in_quotes = !in_quotes;
                    }
                }
                _ => {
                    chars.next();
                    arg.push(c);
                }
            }
        }
        args.push(arg);
    }

    args
}
