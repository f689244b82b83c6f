use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::parser::{normalize, summarize_diff, validate_diff};
use super::types::AppliedPatch;
use crate::PatchError;

/// Applies model-authored unified diffs to single files with the system `patch` program.
///
/// A diff is validated, then dry-run, and only written when the dry run succeeds, so a context
/// mismatch leaves the file untouched.
#[derive(Clone, Debug)]
pub struct PatchApplier {
    root: PathBuf,
    timeout: Duration,
}

impl PatchApplier {
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn apply(&self, file: &str, diff: &str) -> Result<AppliedPatch, PatchError> {
        let summary = summarize_diff(diff)?;
        validate_diff(&summary, &self.root, file)?;
        let path = normalize(&self.root, file);

        self.run_patch(&path, diff, true)
            .await?
            .map_err(PatchError::DryRun)?;
        self.run_patch(&path, diff, false)
            .await?
            .map_err(PatchError::Apply)?;

        tracing::debug!(path = %path.display(), hunks = summary.hunks.len(), "applied patch");
        Ok(AppliedPatch {
            path,
            hunks: summary.hunks.len(),
        })
    }

    /// Outer error: the process could not be run. Inner error: `patch` rejected the diff.
    async fn run_patch(
        &self,
        path: &Path,
        diff: &str,
        dry_run: bool,
    ) -> Result<Result<(), String>, PatchError> {
        let mut command = Command::new("patch");
        if dry_run {
            command.arg("--dry-run");
        }
        command
            .arg("--force")
            .arg(path)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(PatchError::Spawn)?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PatchError::Spawn(std::io::Error::other("patch stdin not captured")))?;
        let input = diff.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| PatchError::Timeout(self.timeout))?
            .map_err(PatchError::Spawn)?;
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) if error.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(error)) => return Err(PatchError::Spawn(error)),
            Err(error) => return Err(PatchError::Spawn(std::io::Error::other(error))),
        }

        if output.status.success() {
            return Ok(Ok(()));
        }
        let mut message = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(stderr.trim());
        }
        if message.is_empty() {
            message = format!("patch exited with {}", output.status);
        }
        Ok(Err(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn patch_available() -> bool {
        std::process::Command::new("patch")
            .arg("--version")
            .output()
            .is_ok_and(|output| output.status.success())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn clean_diff_is_applied() {
        if !patch_available() {
            return;
        }
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let applier = PatchApplier::new(dir.path(), Duration::from_secs(10));

        let diff = "--- a/a.txt\n+++ b/a.txt\n@@ -1,3 +1,3 @@\n one\n-two\n+TWO\n three\n";
        let applied = applier.apply("a.txt", diff).await.unwrap();
        assert_eq!(applied.hunks, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "one\nTWO\nthree\n"
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn context_mismatch_fails_dry_run_and_leaves_file_untouched() {
        if !patch_available() {
            return;
        }
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let applier = PatchApplier::new(dir.path(), Duration::from_secs(10));

        let diff = "--- a/a.txt\n+++ b/a.txt\n@@ -1,3 +1,3 @@\n uno\n-dos\n+DOS\n tres\n";
        let error = applier.apply("a.txt", diff).await.unwrap_err();
        assert!(matches!(error, PatchError::DryRun(_)));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "one\ntwo\nthree\n"
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cross_file_diff_is_rejected_before_any_process_runs() {
        let dir = tempdir().unwrap();
        let applier = PatchApplier::new(dir.path(), Duration::from_secs(10));
        let diff = "--- a/other.txt\n+++ b/other.txt\n@@ -1,1 +1,1 @@\n-a\n+b\n";
        let error = applier.apply("a.txt", diff).await.unwrap_err();
        assert!(matches!(error, PatchError::CrossFile { .. }));
    }
}
