use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use super::types::{DiffSummary, HunkHeader};
use crate::PatchError;

static FILE_HEADER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?m)^\+\+\+ (?:b/)?([^\s]+)"));
static HUNK_HEADER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?m)^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@"));

fn compiled(regex: &'static LazyLock<Result<Regex, regex::Error>>) -> Result<&'static Regex, PatchError> {
    regex
        .as_ref()
        .map_err(|error| PatchError::Parse(format!("invalid header pattern: {error}")))
}

/// Collects `+++` targets and hunk headers. Fails when the diff names no target at all.
pub fn summarize_diff(diff: &str) -> Result<DiffSummary, PatchError> {
    let targets: Vec<String> = compiled(&FILE_HEADER)?
        .captures_iter(diff)
        .filter_map(|captures| captures.get(1))
        .map(|target| target.as_str().to_string())
        .collect();
    if targets.is_empty() {
        return Err(PatchError::Parse(
            "no file headers (+++) found in diff".to_string(),
        ));
    }

    let mut hunks = Vec::new();
    for captures in compiled(&HUNK_HEADER)?.captures_iter(diff) {
        let number = |index: usize| -> Result<Option<u64>, PatchError> {
            captures
                .get(index)
                .map(|value| {
                    value.as_str().parse::<u64>().map_err(|error| {
                        PatchError::Parse(format!("invalid hunk header number: {error}"))
                    })
                })
                .transpose()
        };
        hunks.push(HunkHeader {
            old_start: number(1)?.unwrap_or_default(),
            old_len: number(2)?.unwrap_or(1),
            new_start: number(3)?.unwrap_or_default(),
            new_len: number(4)?.unwrap_or(1),
        });
    }
    Ok(DiffSummary { targets, hunks })
}

/// Checks that every header names `target` and that hunks are in ascending order.
pub fn validate_diff(summary: &DiffSummary, root: &Path, target: &str) -> Result<(), PatchError> {
    let expected = normalize(root, target);
    for found in &summary.targets {
        if normalize(root, found) != expected {
            return Err(PatchError::CrossFile {
                found: found.clone(),
                expected: target.to_string(),
            });
        }
    }

    let mut previous: Option<u64> = None;
    for hunk in &summary.hunks {
        if let Some(previous) = previous.filter(|previous| hunk.old_start < *previous) {
            return Err(PatchError::HunkOrder {
                previous,
                current: hunk.old_start,
            });
        }
        previous = Some(hunk.old_start);
    }
    Ok(())
}

/// Lexical normalization against the project root; the file need not exist.
pub(crate) fn normalize(root: &Path, path: &str) -> PathBuf {
    let joined = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        root.join(path)
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+TWO\n@@ -50,3 +50,3 @@\n x\n";

    #[test]
    fn headers_and_hunks_are_collected() {
        let summary = summarize_diff(DIFF).unwrap();
        assert_eq!(summary.targets, vec!["a.txt"]);
        assert_eq!(summary.hunks.len(), 2);
        assert_eq!(summary.hunks[1].old_start, 50);
        assert_eq!(summary.hunks[1].new_len, 3);
    }

    #[test]
    fn missing_headers_are_a_parse_error() {
        let error = summarize_diff("@@ -1,1 +1,1 @@\n-a\n+b\n").unwrap_err();
        assert!(matches!(error, PatchError::Parse(message) if message == "no file headers (+++) found in diff"));
    }

    #[test]
    fn other_file_is_a_security_violation() {
        let summary = summarize_diff("--- a/other.txt\n+++ b/other.txt\n@@ -1,1 +1,1 @@\n-a\n+b\n").unwrap();
        let error = validate_diff(&summary, Path::new("/repo"), "a.txt").unwrap_err();
        assert_eq!(
            error.to_string(),
            "security violation: diff attempts to modify other.txt, but only a.txt is allowed"
        );
    }

    #[test]
    fn equivalent_spellings_of_the_target_are_accepted() {
        let summary = summarize_diff("--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1 +1 @@\n-a\n+b\n").unwrap();
        validate_diff(&summary, Path::new("/repo"), "./src/lib.rs").unwrap();
        validate_diff(&summary, Path::new("/repo"), "/repo/src/lib.rs").unwrap();
    }

    #[test]
    fn descending_hunks_are_rejected() {
        let diff = "+++ a.txt\n@@ -50,2 +50,2 @@\n x\n@@ -10,2 +10,2 @@\n y\n";
        let summary = summarize_diff(diff).unwrap();
        let error = validate_diff(&summary, Path::new("/repo"), "a.txt").unwrap_err();
        assert!(matches!(error, PatchError::HunkOrder { previous: 50, current: 10 }));
    }
}
