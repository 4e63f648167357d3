//! Playbook execution through the configured runner binary
//!
//! Runs are external processes: stage the inventory, spawn the runner,
//! capture output, and judge the result from the PLAY RECAP. The child
//! is killed when the run is cancelled or overruns its deadline.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gantry_core::{AdapterError, Result};

use crate::inventory::Inventory;
use crate::recap::{parse_recap, HostRecap};

/// Identifier correlating one playbook run to usage reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    /// Fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal judgment of one playbook run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Every host came through clean
    Succeeded,
    /// At least one host failed or was unreachable, or the runner
    /// died without producing a clean recap
    Failed,
}

impl ExecutionState {
    /// Judge a completed run.
    ///
    /// The recap is authoritative when present: any failed or
    /// unreachable host fails the run even on exit 0, and a clean
    /// recap passes it even on a nonzero exit. Only a missing recap
    /// falls back to the exit code.
    pub fn conclude(exit_code: Option<i32>, hosts: &[HostRecap]) -> Self {
        if hosts.iter().any(HostRecap::is_failed) {
            Self::Failed
        } else if !hosts.is_empty() {
            Self::Succeeded
        } else if exit_code == Some(0) {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }
}

/// Everything known about one finished playbook run
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Run identifier
    pub id: ExecutionId,
    /// Playbook file that ran
    pub playbook: String,
    /// Process exit code; None when the process was killed
    pub exit_code: Option<i32>,
    /// Per-host recap counts
    pub hosts: Vec<HostRecap>,
    /// Terminal judgment
    pub state: ExecutionState,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Whether the run failed
    pub fn failed(&self) -> bool {
        self.state == ExecutionState::Failed
    }

    /// Human-readable failure summary from the recap counts
    pub fn summary(&self) -> String {
        let failed: u32 = self.hosts.iter().map(|h| h.failed).sum();
        let unreachable: u32 = self.hosts.iter().map(|h| h.unreachable).sum();
        format!(
            "{} failed, {} unreachable across {} hosts (exit {:?})",
            failed,
            unreachable,
            self.hosts.len(),
            self.exit_code
        )
    }
}

/// Executes playbooks from a fixed directory through one runner binary
#[derive(Debug, Clone)]
pub struct PlaybookRunner {
    executable: PathBuf,
    playbook_dir: PathBuf,
}

impl PlaybookRunner {
    /// Create a runner
    pub fn new(executable: impl Into<PathBuf>, playbook_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            playbook_dir: playbook_dir.into(),
        }
    }

    /// Run one playbook against the inventory.
    ///
    /// Returns the judged result for every run that completed, whether
    /// it passed or not. Errors are reserved for runs that produced no
    /// result: bad configuration, spawn failures, cancellation, or
    /// overrunning `timeout` (the child is killed in the latter two).
    pub async fn run(
        &self,
        playbook: &str,
        inventory: &Inventory,
        extra_vars: &[(String, String)],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let id = ExecutionId::new();
        let started_at = Utc::now();

        let playbook_path = self.playbook_dir.join(playbook);
        if !playbook_path.is_file() {
            return Err(AdapterError::config(format!(
                "playbook {} not found in {}",
                playbook,
                self.playbook_dir.display()
            )));
        }

        // Staging directory lives until the run is over.
        let staging = tempfile::tempdir()
            .map_err(|e| AdapterError::transient(format!("failed to create staging dir: {e}")))?;
        let inventory_path = inventory.write_to(staging.path()).await?;

        info!(
            "Running playbook {} (execution {}, {} hosts, timeout {:?})",
            playbook,
            id,
            inventory.len(),
            timeout
        );

        let mut cmd = Command::new(&self.executable);
        cmd.arg("-i").arg(&inventory_path).arg(&playbook_path);
        for (key, value) in extra_vars {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AdapterError::config(format!(
                    "runner executable {} not found",
                    self.executable.display()
                ))
            } else {
                AdapterError::transient(format!("failed to spawn runner: {e}"))
            }
        })?;

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                // Dropping the wait future reaps the child via kill_on_drop.
                warn!("Playbook {} cancelled, killing runner", playbook);
                return Err(AdapterError::Cancelled);
            }
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Err(_) => {
                    warn!("Playbook {} exceeded {:?}, killing runner", playbook, timeout);
                    return Err(AdapterError::backend(format!(
                        "playbook {playbook} exceeded {timeout:?} and was killed"
                    )));
                }
                Ok(Err(e)) => {
                    return Err(AdapterError::transient(format!("runner I/O failure: {e}")));
                }
                Ok(Ok(output)) => output,
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let hosts = parse_recap(&stdout);
        let exit_code = output.status.code();
        let state = ExecutionState::conclude(exit_code, &hosts);

        if state == ExecutionState::Failed {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "Playbook {} failed (exit {:?}); stderr: {}",
                playbook,
                exit_code,
                stderr.trim()
            );
        } else {
            debug!("Playbook {} exit {:?}, {} hosts in recap", playbook, exit_code, hosts.len());
        }

        let result = ExecutionResult {
            id,
            playbook: playbook.to_string(),
            exit_code,
            hosts,
            state,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            "Playbook {} finished: execution={}, state={:?}",
            playbook, id, result.state
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const CLEAN_SCRIPT: &str = r#"#!/bin/sh
cat <<'EOF'
PLAY [all] *********************************************************************

PLAY RECAP *********************************************************************
web1                       : ok=5    changed=2    unreachable=0    failed=0    skipped=1    rescued=0    ignored=0
db1                        : ok=4    changed=1    unreachable=0    failed=0    skipped=0    rescued=0    ignored=0
EOF
exit 0
"#;

    const PARTIAL_FAILURE_SCRIPT: &str = r#"#!/bin/sh
cat <<'EOF'
PLAY RECAP *********************************************************************
web1                       : ok=3    changed=1    unreachable=0    failed=1    skipped=0    rescued=0    ignored=0
EOF
exit 0
"#;

    const CLEAN_RECAP_BAD_EXIT_SCRIPT: &str = r#"#!/bin/sh
cat <<'EOF'
PLAY RECAP *********************************************************************
web1                       : ok=3    changed=1    unreachable=0    failed=0    skipped=0    rescued=0    ignored=0
EOF
exit 2
"#;

    fn write_script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn setup(script: &str) -> (tempfile::TempDir, PlaybookRunner) {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_script(dir.path(), "fake-runner.sh", script);
        std::fs::write(dir.path().join("site.yml"), "---\n").unwrap();
        let runner = PlaybookRunner::new(exe, dir.path());
        (dir, runner)
    }

    fn inventory() -> Inventory {
        Inventory::new().with_host("web1", "10.0.0.5").with_host("db1", "10.0.0.6")
    }

    #[tokio::test]
    async fn test_clean_run_succeeds() {
        let (_dir, runner) = setup(CLEAN_SCRIPT);
        let cancel = CancellationToken::new();

        let result = runner
            .run("site.yml", &inventory(), &[], Duration::from_secs(10), &cancel)
            .await
            .unwrap();

        assert_eq!(result.state, ExecutionState::Succeeded);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.hosts.len(), 2);
        assert!(!result.failed());
    }

    #[tokio::test]
    async fn test_recap_failure_overrides_clean_exit() {
        let (_dir, runner) = setup(PARTIAL_FAILURE_SCRIPT);
        let cancel = CancellationToken::new();

        let result = runner
            .run("site.yml", &inventory(), &[], Duration::from_secs(10), &cancel)
            .await
            .unwrap();

        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.state, ExecutionState::Failed, "recap wins over exit 0");
    }

    #[tokio::test]
    async fn test_clean_recap_overrides_nonzero_exit() {
        let (_dir, runner) = setup(CLEAN_RECAP_BAD_EXIT_SCRIPT);
        let cancel = CancellationToken::new();

        let result = runner
            .run("site.yml", &inventory(), &[], Duration::from_secs(10), &cancel)
            .await
            .unwrap();

        assert_eq!(result.exit_code, Some(2));
        assert_eq!(result.state, ExecutionState::Succeeded, "recap wins over exit code");
    }

    #[tokio::test]
    async fn test_no_recap_falls_back_to_exit_code() {
        let (_dir, runner) = setup("#!/bin/sh\necho no recap here\nexit 0\n");
        let cancel = CancellationToken::new();
        let result = runner
            .run("site.yml", &inventory(), &[], Duration::from_secs(10), &cancel)
            .await
            .unwrap();
        assert_eq!(result.state, ExecutionState::Succeeded);

        let (_dir, runner) = setup("#!/bin/sh\necho boom >&2\nexit 1\n");
        let result = runner
            .run("site.yml", &inventory(), &[], Duration::from_secs(10), &cancel)
            .await
            .unwrap();
        assert_eq!(result.state, ExecutionState::Failed);
    }

    #[tokio::test]
    async fn test_missing_playbook_is_config_error() {
        let (_dir, runner) = setup(CLEAN_SCRIPT);
        let cancel = CancellationToken::new();

        let err = runner
            .run("nope.yml", &inventory(), &[], Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AdapterError::Config(_)), "got {err}");
    }

    #[tokio::test]
    async fn test_missing_executable_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("site.yml"), "---\n").unwrap();
        let runner = PlaybookRunner::new(dir.path().join("absent-runner"), dir.path());
        let cancel = CancellationToken::new();

        let err = runner
            .run("site.yml", &inventory(), &[], Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AdapterError::Config(_)), "got {err}");
    }

    #[tokio::test]
    async fn test_cancellation_kills_long_run() {
        let (_dir, runner) = setup("#!/bin/sh\nsleep 30\n");
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            child.cancel();
        });

        let start = Instant::now();
        let err = runner
            .run("site.yml", &inventory(), &[], Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AdapterError::Cancelled), "got {err}");
        assert!(start.elapsed() < Duration::from_secs(5), "runner must die promptly");
    }

    #[tokio::test]
    async fn test_deadline_kills_long_run() {
        let (_dir, runner) = setup("#!/bin/sh\nsleep 30\n");
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let err = runner
            .run("site.yml", &inventory(), &[], Duration::from_millis(100), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AdapterError::Backend(_)), "got {err}");
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
