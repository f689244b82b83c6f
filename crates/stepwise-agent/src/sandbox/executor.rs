use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::{RunMode, classify, parse_command};
use crate::SandboxError;

/// Files whose staged content differs between the snapshots taken around a diff-tracked run.
/// Paths are relative to the repository top level, sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChanges {
    pub modified: Vec<String>,
    pub created: Vec<String>,
    pub deleted: Vec<String>,
}

impl FileChanges {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.created.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub mode: RunMode,
    pub exit_code: i32,
    /// Interleaved stdout and stderr.
    pub output: String,
    pub timed_out: bool,
    pub changes: FileChanges,
}

/// A private index file; the repository's own staging area is never touched.
struct IsolatedIndex {
    _dir: TempDir,
    path: PathBuf,
}

/// Runs model-authored shell commands inside a project checkout.
///
/// Commands that are provably read-only run directly. Everything else runs between two snapshots
/// of an isolated git index, and the difference becomes the reported change set. Diff-tracked
/// runs are serialized since they share that index.
pub struct SandboxedExecutor {
    repo_root: PathBuf,
    command_timeout: Duration,
    shell: String,
    index: Mutex<Option<IsolatedIndex>>,
}

impl SandboxedExecutor {
    pub fn new(repo_root: impl Into<PathBuf>, command_timeout: Duration) -> Self {
        Self {
            repo_root: repo_root.into(),
            command_timeout,
            shell: crate::DEFAULT_SHELL.to_string(),
            index: Mutex::new(None),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Parses, classifies and runs `command` with `dir` (default: the repository root) as the
    /// working directory. A non-zero exit or a timeout is reported in the outcome, not as an error.
    pub async fn run(&self, command: &str, dir: Option<&Path>) -> Result<ExecOutcome, SandboxError> {
        let script = parse_command(command)?;
        let mode = classify(&script);
        let workdir = match dir {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => self.repo_root.join(dir),
            None => self.repo_root.clone(),
        };
        tracing::debug!(?mode, programs = ?script.program_names(), "running shell command");

        match mode {
            RunMode::Direct => {
                let raw = self.spawn_shell(command, &workdir).await?;
                Ok(raw.into_outcome(mode, FileChanges::default()))
            }
            RunMode::DiffTracked => {
                let mut slot = self.index.lock().await;
                let index_path = self.ensure_index(&mut slot).await?;
                self.git(&index_path, &["add", "--all"]).await?;
                let baseline = self.git(&index_path, &["write-tree"]).await?;
                let baseline = baseline.trim().to_string();

                let raw = self.spawn_shell(command, &workdir).await?;

                self.git(&index_path, &["add", "--all"]).await?;
                let diff = self
                    .git(
                        &index_path,
                        &[
                            "diff-index",
                            "--cached",
                            "--name-status",
                            "--no-renames",
                            "-z",
                            &baseline,
                        ],
                    )
                    .await?;
                let changes = parse_name_status(&diff);
                tracing::debug!(
                    modified = changes.modified.len(),
                    created = changes.created.len(),
                    deleted = changes.deleted.len(),
                    "tracked command changes"
                );
                Ok(raw.into_outcome(mode, changes))
            }
        }
    }

    async fn ensure_index(
        &self,
        slot: &mut Option<IsolatedIndex>,
    ) -> Result<PathBuf, SandboxError> {
        if let Some(index) = slot.as_ref() {
            return Ok(index.path.clone());
        }
        let dir = tempfile::Builder::new()
            .prefix("stepwise-index-")
            .tempdir()
            .map_err(SandboxError::Index)?;
        let path = dir.path().join("index");
        if self.git(&path, &["read-tree", "HEAD"]).await.is_err() {
            self.git(&path, &["read-tree", "--empty"]).await?;
        }
        tracing::debug!(index = %path.display(), "created isolated index");
        *slot = Some(IsolatedIndex {
            _dir: dir,
            path: path.clone(),
        });
        Ok(path)
    }

    async fn git(&self, index_path: &Path, args: &[&str]) -> Result<String, SandboxError> {
        let command_label = args.first().copied().unwrap_or_default().to_string();
        let output = tokio::time::timeout(
            self.command_timeout,
            Command::new("git")
                .args(args)
                .current_dir(&self.repo_root)
                .env("GIT_INDEX_FILE", index_path)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| SandboxError::Git {
            command: command_label.clone(),
            message: format!("timed out after {:?}", self.command_timeout),
        })?
        .map_err(|source| SandboxError::Spawn {
            program: "git".to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(SandboxError::Git {
                command: command_label,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn spawn_shell(&self, command: &str, workdir: &Path) -> Result<RawRun, SandboxError> {
        // stderr is folded into stdout inside the shell so both keep their relative order.
        let mut shell = Command::new(&self.shell);
        shell
            .arg("-c")
            .arg(format!("exec 2>&1\n{command}"))
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        shell.process_group(0);

        let mut child = shell.spawn().map_err(|source| SandboxError::Spawn {
            program: self.shell.clone(),
            source,
        })?;
        let pid = child.id();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Io(std::io::Error::other("shell stdout not captured")))?;

        let mut buffer = Vec::new();
        let finished = tokio::time::timeout(self.command_timeout, async {
            stdout.read_to_end(&mut buffer).await?;
            child.wait().await
        })
        .await;

        match finished {
            Ok(status) => Ok(RawRun {
                exit_code: exit_code(status?),
                output: String::from_utf8_lossy(&buffer).into_owned(),
                timed_out: false,
            }),
            Err(_) => {
                tracing::warn!(timeout = ?self.command_timeout, "shell command timed out");
                kill_process_group(pid);
                let _ = child.kill().await;
                Ok(RawRun {
                    exit_code: -1,
                    output: String::from_utf8_lossy(&buffer).into_owned(),
                    timed_out: true,
                })
            }
        }
    }
}

struct RawRun {
    exit_code: i32,
    output: String,
    timed_out: bool,
}

impl RawRun {
    fn into_outcome(self, mode: RunMode, changes: FileChanges) -> ExecOutcome {
        ExecOutcome {
            mode,
            exit_code: self.exit_code,
            output: self.output,
            timed_out: self.timed_out,
            changes,
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) {
        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Reads `git diff-index --name-status -z` output into change buckets.
fn parse_name_status(raw: &str) -> FileChanges {
    let mut changes = FileChanges::default();
    let mut fields = raw.split('\0').filter(|field| !field.is_empty());
    while let (Some(status), Some(path)) = (fields.next(), fields.next()) {
        let bucket = match status.chars().next() {
            Some('A') => &mut changes.created,
            Some('D') => &mut changes.deleted,
            Some('M' | 'T') => &mut changes.modified,
            _ => continue,
        };
        bucket.push(path.to_string());
    }
    changes.modified.sort();
    changes.created.sort();
    changes.deleted.sort();
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|output| output.status.success())
    }

    fn init_repo(dir: &Path) {
        let status = std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[test]
    fn name_status_output_is_bucketed() {
        let changes = parse_name_status("M\0src/b.rs\0A\0new.txt\0D\0old.txt\0T\0link\0M\0src/a.rs\0");
        assert_eq!(changes.modified, vec!["link", "src/a.rs", "src/b.rs"]);
        assert_eq!(changes.created, vec!["new.txt"]);
        assert_eq!(changes.deleted, vec!["old.txt"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn read_only_command_runs_direct() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha\n").unwrap();
        let executor = SandboxedExecutor::new(dir.path(), Duration::from_secs(10));

        let outcome = executor.run("ls -la", None).await.unwrap();
        assert_eq!(outcome.mode, RunMode::Direct);
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.output.contains("a.txt"));
        assert!(outcome.changes.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn redirected_write_is_tracked_as_created() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("existing.txt"), "one\n").unwrap();
        std::fs::write(dir.path().join("doomed.txt"), "bye\n").unwrap();
        let executor = SandboxedExecutor::new(dir.path(), Duration::from_secs(30));

        let outcome = executor.run("echo hi > newfile.txt", None).await.unwrap();
        assert_eq!(outcome.mode, RunMode::DiffTracked);
        assert_eq!(outcome.changes.created, vec!["newfile.txt"]);
        assert!(outcome.changes.modified.is_empty());

        let outcome = executor
            .run("echo two >> existing.txt && rm doomed.txt", None)
            .await
            .unwrap();
        assert_eq!(outcome.changes.modified, vec!["existing.txt"]);
        assert_eq!(outcome.changes.deleted, vec!["doomed.txt"]);
        assert!(outcome.changes.created.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn repository_index_is_untouched() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let executor = SandboxedExecutor::new(dir.path(), Duration::from_secs(30));
        executor.run("touch staged-elsewhere.txt", None).await.unwrap();

        let status = std::process::Command::new("git")
            .args(["diff", "--cached", "--name-only"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        assert!(String::from_utf8_lossy(&status.stdout).trim().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn exit_status_and_stderr_are_reported() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let executor = SandboxedExecutor::new(dir.path(), Duration::from_secs(30));

        let outcome = executor.run("echo oops >&2; exit 3", None).await.unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.output.contains("oops"));
        assert!(!outcome.timed_out);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slow_command_is_killed_and_flagged() {
        let dir = tempdir().unwrap();
        let executor = SandboxedExecutor::new(dir.path(), Duration::from_millis(300));
        let outcome = executor.run("tail -f /dev/null", None).await.unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.mode, RunMode::Direct);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_tracked_runs_each_see_only_their_own_changes() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let executor = std::sync::Arc::new(SandboxedExecutor::new(dir.path(), Duration::from_secs(30)));
        let first = executor.clone();
        let second = executor.clone();

        let (one, two) = tokio::join!(
            async move { first.run("sleep 0.2; echo a > one.txt", None).await },
            async move { second.run("echo b > two.txt", None).await },
        );
        let (one, two) = (one.unwrap(), two.unwrap());
        assert_eq!(one.mode, RunMode::DiffTracked);
        assert_eq!(one.changes.created, vec!["one.txt"]);
        assert_eq!(two.changes.created, vec!["two.txt"]);
        assert!(one.changes.modified.is_empty() && two.changes.modified.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_shell_is_a_spawn_error() {
        let dir = tempdir().unwrap();
        let executor = SandboxedExecutor::new(dir.path(), Duration::from_secs(5))
            .with_shell("/nonexistent/stepwise-shell");
        let error = executor.run("ls", None).await.unwrap_err();
        assert!(
            matches!(&error, SandboxError::Spawn { program, .. } if program == "/nonexistent/stepwise-shell")
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unparseable_command_is_rejected_before_running() {
        let dir = tempdir().unwrap();
        let executor = SandboxedExecutor::new(dir.path(), Duration::from_secs(5));
        let error = executor.run("echo 'open", None).await.unwrap_err();
        assert!(matches!(error, SandboxError::Parse(_)));
    }
}
