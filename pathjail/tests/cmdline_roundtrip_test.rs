//! Round-trip properties of the command-line serialiser.

use pathjail::cmdline::{build, split};
use proptest::prelude::*;

fn adversarial_arg() -> impl Strategy<Value = String> {
    prop_oneof![
        "[ \t\"\\\\^a]{0,12}",
        "[\\\\]{1,6}",
        "[\"]{1,4}",
        "[\n\x0b a-z]{0,6}",
        any::<String>(),
    ]
}

proptest! {
    #[test]
    fn split_inverts_build(args in prop::collection::vec(adversarial_arg(), 0..8)) {
        let line = build(&args);
        prop_assert_eq!(split(&line), args);
    }

    #[test]
    fn plain_arguments_are_not_quoted(args in prop::collection::vec("[a-zA-Z0-9_./^-]{1,10}", 1..6)) {
        prop_assert_eq!(build(&args), args.join(" "));
    }
}

#[test]
fn test_known_lines() {
    let cases: &[(&[&str], &str)] = &[
        (&["echo", "Hello World"], r#"echo "Hello World""#),
        (&["a\tb"], "\"a\tb\""),
        (&[r"\\server\share\"], r"\\server\share\"),
        (&[r"with space\\"], r#""with space\\\\""#),
        (&["\"", ""], r#""\"" """#),
        (&["^^"], "^^"),
    ];
    for (args, expected) in cases {
        assert_eq!(build(*args), *expected, "building {args:?}");
        assert_eq!(split(expected), *args, "splitting {expected}");
    }
}
