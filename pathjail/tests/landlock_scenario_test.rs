//! Scenarios enforced by the kernel. Skipped where Landlock is unavailable.

#[macro_use]
mod common;

use common::{arg, run_pathjail, scenario_dir, stderr_of, stdout_of};

fn sandboxed(rules: &[String], command: &[&str]) -> std::process::Output {
    let mut args = rules.to_vec();
    args.push("--".to_string());
    args.extend(command.iter().map(|part| part.to_string()));
    run_pathjail(&args)
}

#[test]
fn test_read_only_directory() {
    skip_unless_landlock!();
    let (_temp, root) = scenario_dir();
    let rules = ["-W".to_string(), arg(&root), "-r".to_string(), arg(&root)];

    let read = sandboxed(&rules, &["/bin/cat", "a.txt"]);
    assert_eq!(read.status.code(), Some(0));
    assert_eq!(stdout_of(&read), "Sherlock Holmes");

    let write = sandboxed(&rules, &["/bin/sh", "-c", "echo Watson > b.txt"]);
    assert_ne!(write.status.code(), Some(0));
    assert_eq!(std::fs::read_to_string(root.join("b.txt")).unwrap(), "Moriarty");
}

#[test]
fn test_blocked_file_inside_writable_directory() {
    skip_unless_landlock!();
    let (_temp, root) = scenario_dir();
    let rules = [
        "-W".to_string(),
        arg(&root),
        "-w".to_string(),
        arg(&root),
        "-b".to_string(),
        arg(&root.join("b.txt")),
    ];

    let allowed = sandboxed(&rules, &["/bin/cat", "a.txt"]);
    assert_eq!(stdout_of(&allowed), "Sherlock Holmes");

    let blocked = sandboxed(&rules, &["/bin/cat", "b.txt"]);
    assert_ne!(blocked.status.code(), Some(0));
    assert!(!stdout_of(&blocked).contains("Moriarty"));

    let rewritten = sandboxed(&rules, &["/bin/sh", "-c", "echo Watson > a.txt"]);
    assert_eq!(rewritten.status.code(), Some(0));
    assert_eq!(
        std::fs::read_to_string(root.join("a.txt")).unwrap(),
        "Watson\n"
    );

    // Landlock has no deny rules, so a new c.txt beside the blocked file
    // cannot be granted. The launch says so instead of failing silently.
    let created = sandboxed(&rules, &["/bin/sh", "-c", "echo Watson > c.txt"]);
    let warnings = stderr_of(&created);
    assert!(warnings.contains("cannot allow new entries"), "{warnings}");
    assert!(warnings.contains(&arg(&root)), "{warnings}");
}

#[test]
fn test_link_out_of_the_jail_is_not_followed() {
    skip_unless_landlock!();
    let (_temp, root) = scenario_dir();
    let (_outside_temp, outside) = scenario_dir();
    std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();
    let rules = [
        "-W".to_string(),
        arg(&root),
        "-r".to_string(),
        arg(&root),
        "-D".to_string(),
    ];

    let native = sandboxed(&rules, &["/bin/cat", "link/a.txt"]);
    assert_ne!(native.status.code(), Some(0));
    assert!(!stdout_of(&native).contains("Sherlock Holmes"));

    let shell = sandboxed(&rules, &["/bin/sh", "-c", "read line < link/a.txt; echo \"$line\""]);
    assert!(!stdout_of(&shell).contains("Sherlock Holmes"));
    assert!(!stderr_of(&native).contains("follows the link"));
}

#[test]
fn test_refused_link_to_granted_target_is_reported() {
    skip_unless_landlock!();
    let (_temp, root) = scenario_dir();
    let (_outside_temp, outside) = scenario_dir();
    let link = root.join("link");
    std::os::unix::fs::symlink(&outside, &link).unwrap();
    let mut rules = vec![
        "-W".to_string(),
        arg(&root),
        "-r".to_string(),
        arg(&root),
        "-r".to_string(),
        arg(&outside),
    ];

    // Without -D the link is an ordinary way in.
    let followed = sandboxed(&rules, &["/bin/cat", "link/a.txt"]);
    assert_eq!(stdout_of(&followed), "Sherlock Holmes");
    assert!(!stderr_of(&followed).contains("follows the link"));

    rules.push("-D".to_string());
    let refused = sandboxed(&rules, &["/bin/cat", "link/a.txt"]);
    let warnings = stderr_of(&refused);
    assert!(warnings.contains("follows the link"), "{warnings}");
    assert!(warnings.contains(&arg(&link)), "{warnings}");
}

#[test]
fn test_command_can_reopen_its_redirected_stdout() {
    skip_unless_landlock!();
    let (_temp, root) = scenario_dir();
    let log = root.join("out.log");
    let rules = [
        "-W".to_string(),
        arg(&root),
        "-r".to_string(),
        arg(&root),
        "-l".to_string(),
        arg(&log),
    ];

    let reopened = sandboxed(&rules, &["/bin/sh", "-c", "echo Watson > /dev/stdout"]);
    assert_eq!(reopened.status.code(), Some(0));
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "Watson\n");

    let unrelated = sandboxed(&rules, &["/bin/sh", "-c", "echo Watson > b.txt"]);
    assert_ne!(unrelated.status.code(), Some(0));
}

#[test]
fn test_unlisted_paths_stay_listable() {
    skip_unless_landlock!();
    let (_temp, root) = scenario_dir();
    let rules = ["-W".to_string(), arg(&root)];

    let listing = sandboxed(&rules, &["/bin/ls", &arg(&root)]);
    assert_eq!(listing.status.code(), Some(0));
    assert!(stdout_of(&listing).contains("a.txt"));

    let read = sandboxed(&rules, &["/bin/cat", "a.txt"]);
    assert_ne!(read.status.code(), Some(0));
}
