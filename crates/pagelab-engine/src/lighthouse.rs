//! Lighthouse engine: one child process per audit.
//!
//! The command is invoked as
//! `<command> <url> --output=json --output-path=stdout --quiet [--config-path=<file>] --chrome-flags="<flags>"`
//! and its stdout is taken as the report document.

use async_trait::async_trait;
use chrono::Utc;
use pagelab_core::engine::{AuditEngine, AuditHandle, AuditOutput};
use pagelab_core::{Error, JobId, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::process;

/// Bytes of engine stderr kept in error messages.
const STDERR_TAIL: usize = 2048;

/// Runs the audit tool as a local child process.
pub struct LighthouseEngine {
    command: String,
    process_name: String,
    chrome_flags: Vec<String>,
    config_path: Option<PathBuf>,
    running: Mutex<HashMap<JobId, Child>>,
}

impl LighthouseEngine {
    /// `command` is the audit executable, `process_name` the browser process
    /// name swept by [`AuditEngine::terminate_all`].
    pub fn new(command: impl Into<String>, process_name: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            process_name: process_name.into(),
            chrome_flags: Vec::new(),
            config_path: None,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_chrome_flags(mut self, flags: Vec<String>) -> Self {
        self.chrome_flags = flags;
        self
    }

    /// Audit configuration (throttling profile, categories, custom audits).
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    fn audit_args(&self, url: &Url) -> Vec<String> {
        let mut args = vec![
            url.to_string(),
            "--output=json".to_string(),
            "--output-path=stdout".to_string(),
            "--quiet".to_string(),
        ];
        if let Some(path) = &self.config_path {
            args.push(format!("--config-path={}", path.display()));
        }
        if !self.chrome_flags.is_empty() {
            args.push(format!("--chrome-flags={}", self.chrome_flags.join(" ")));
        }
        args
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().rev().nth(STDERR_TAIL) {
        Some((idx, _)) => text[idx..].to_string(),
        None => text.to_string(),
    }
}

#[async_trait]
impl AuditEngine for LighthouseEngine {
    fn name(&self) -> &'static str {
        "lighthouse"
    }

    async fn launch(&self, job_id: JobId, url: &Url) -> Result<AuditHandle> {
        let child = Command::new(&self.command)
            .args(self.audit_args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::AuditEngine(format!("failed to start {}: {}", self.command, e)))?;

        let pid = child.id();
        info!(job_id = %job_id, url = %url, pid = ?pid, "Audit started");

        self.running.lock().await.insert(job_id, child);

        Ok(AuditHandle {
            job_id,
            pid,
            started_at: Utc::now(),
            engine_name: self.name().to_string(),
        })
    }

    async fn wait(&self, handle: &AuditHandle) -> Result<AuditOutput> {
        let child = self
            .running
            .lock()
            .await
            .remove(&handle.job_id)
            .ok_or_else(|| Error::NotFound(format!("audit {}", handle.job_id)))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::AuditEngine(format!("failed to wait for audit: {}", e)))?;

        if !output.status.success() {
            return Err(Error::AuditEngine(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            warn!(job_id = %handle.job_id, "Audit produced no report");
            return Ok(AuditOutput::default());
        }

        match serde_json::from_str(stdout) {
            Ok(report) => {
                debug!(job_id = %handle.job_id, bytes = stdout.len(), "Audit report parsed");
                Ok(AuditOutput {
                    report: Some(report),
                })
            }
            Err(e) => {
                warn!(job_id = %handle.job_id, error = %e, "Audit report is not JSON");
                Ok(AuditOutput::default())
            }
        }
    }

    async fn kill(&self, handle: &AuditHandle) -> Result<()> {
        let child = self.running.lock().await.remove(&handle.job_id);
        let Some(mut child) = child else {
            debug!(job_id = %handle.job_id, "Audit already finished");
            return Ok(());
        };

        info!(job_id = %handle.job_id, "Killing audit");
        child
            .kill()
            .await
            .map_err(|e| Error::AuditEngine(format!("failed to kill audit: {}", e)))
    }

    async fn terminate_process(&self, pid: u32) -> Result<()> {
        process::kill_pid(pid).await
    }

    async fn terminate_all(&self) -> Result<()> {
        info!(process = %self.process_name, "Terminating engine processes");
        process::kill_by_name(&self.process_name).await
    }
}


/// Tests that drive real child processes through stand-in commands.
#[cfg(all(test, unix))]
mod process_tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://www.example.com/").unwrap()
    }

    // `echo` prints its arguments, which is not JSON
    #[tokio::test]
    async fn test_non_json_stdout_yields_no_report() {
        let engine = LighthouseEngine::new("echo", "chrome");
        let handle = engine.launch(JobId::new(), &url()).await.unwrap();
        assert!(handle.pid.is_some());

        let output = engine.wait(&handle).await.unwrap();
        assert!(output.report.is_none());
    }

    #[tokio::test]
    async fn test_empty_stdout_yields_no_report() {
        let engine = LighthouseEngine::new("true", "chrome");
        let handle = engine.launch(JobId::new(), &url()).await.unwrap();
        let output = engine.wait(&handle).await.unwrap();
        assert!(output.report.is_none());
    }

    #[tokio::test]
    async fn test_failing_command_is_an_engine_error() {
        let engine = LighthouseEngine::new("false", "chrome");
        let handle = engine.launch(JobId::new(), &url()).await.unwrap();
        assert!(matches!(
            engine.wait(&handle).await,
            Err(Error::AuditEngine(_))
        ));
    }

    // `sleep` rejects the url argument, so run it through a wrapper that ignores it
    #[tokio::test]
    async fn test_kill_stops_running_audit() {
        let script = std::env::temp_dir().join(format!("pagelab-slow-{}.sh", JobId::new()));
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let engine = LighthouseEngine::new(script.to_string_lossy(), "chrome");
        let handle = engine.launch(JobId::new(), &url()).await.unwrap();
        engine.kill(&handle).await.unwrap();

        assert!(matches!(engine.wait(&handle).await, Err(Error::NotFound(_))));
        let _ = std::fs::remove_file(&script);
    }

    #[tokio::test]
    async fn test_json_stdout_becomes_report() {
        let script = std::env::temp_dir().join(format!("pagelab-report-{}.sh", JobId::new()));
        std::fs::write(
            &script,
            "#!/bin/sh\nprintf '{\"requestedUrl\":\"%s\"}' \"$1\"\n",
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let engine = LighthouseEngine::new(script.to_string_lossy(), "chrome");
        let handle = engine.launch(JobId::new(), &url()).await.unwrap();
        let output = engine.wait(&handle).await.unwrap();

        assert_eq!(
            output.report.unwrap()["requestedUrl"],
            "https://www.example.com/"
        );
        let _ = std::fs::remove_file(&script);
    }
}
