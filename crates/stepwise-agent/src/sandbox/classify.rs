use serde::{Deserialize, Serialize};

use super::parse::{CommandName, Invocation, ParsedScript};

/// Programs that cannot change the working tree on their own.
pub const READ_ONLY_WHITELIST: &[&str] = &[
    "ls", "cat", "grep", "pwd", "find", "head", "tail", "wc", "du", "df", "ps", "whoami", "file",
    "stat", "cd", "rg",
];

const FIND_WRITING_ACTIONS: &[&str] = &[
    "-delete", "-exec", "-execdir", "-ok", "-okdir", "-fprint", "-fprint0", "-fprintf", "-fls",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Run as-is, no change tracking.
    Direct,
    /// Run between two snapshots of an isolated git index.
    DiffTracked,
}

/// Decides how a parsed command must run. Anything not provably read-only is diff-tracked.
pub fn classify(script: &ParsedScript) -> RunMode {
    let writes_file = script.redirects.iter().any(|redirect| {
        redirect.kind.writes_target()
            && match redirect.target.literal.as_deref() {
                Some("/dev/null") => false,
                Some(target) if redirect.kind == super::parse::RedirectKind::DupOutput => {
                    !(target == "-" || target.chars().all(|c| c.is_ascii_digit()))
                }
                _ => true,
            }
    });
    if writes_file {
        return RunMode::DiffTracked;
    }

    if script.invocations.iter().all(invocation_is_read_only) {
        RunMode::Direct
    } else {
        RunMode::DiffTracked
    }
}

fn invocation_is_read_only(invocation: &Invocation) -> bool {
    let CommandName::Literal(name) = &invocation.name else {
        return false;
    };
    if !READ_ONLY_WHITELIST.contains(&name.as_str()) {
        return false;
    }
    match name.as_str() {
        "find" => invocation.args.iter().all(|arg| match arg.literal.as_deref() {
            Some(value) => !FIND_WRITING_ACTIONS.contains(&value),
            None => false,
        }),
        "rg" => !invocation.args.iter().any(|arg| {
            arg.literal
                .as_deref()
                .is_none_or(|value| value == "--pre" || value.starts_with("--pre="))
        }),
        "file" => !invocation.args.iter().any(|arg| {
            arg.literal
                .as_deref()
                .is_some_and(|value| value == "-C" || value == "--compile")
        }),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::parse_command;

    fn mode(source: &str) -> RunMode {
        classify(&parse_command(source).unwrap())
    }

    #[test]
    fn whitelisted_pipelines_run_direct() {
        for source in [
            "ls -la",
            "cd src && grep -rn TODO . | head -20",
            "find . -name '*.rs' | wc -l",
            "cat Cargo.toml 2>/dev/null",
            "rg foo 2>&1 | tail",
            "",
        ] {
            assert_eq!(mode(source), RunMode::Direct, "{source:?}");
        }
    }

    #[test]
    fn anything_else_is_diff_tracked() {
        for source in [
            "echo hi",
            "ls > out.txt",
            "cat a >> b",
            "ls &> log",
            "find . -name '*.tmp' -delete",
            "find . -exec rm {} \\;",
            "ls $(touch x)",
            "$CMD",
            "/bin/ls",
            "rg --pre ./script foo",
            "find . $ACTION",
            "ls >& listing",
            "ls $(( $(touch pwned) ))",
            "(( $(touch pwned) ))",
            "ls $(( `touch x` ))",
        ] {
            assert_eq!(mode(source), RunMode::DiffTracked, "{source:?}");
        }
    }
}
