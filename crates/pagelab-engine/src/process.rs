//! Host-level process cleanup.

use pagelab_core::{Error, Result};
use tokio::process::Command;
use tracing::{debug, warn};

/// Send SIGKILL to `pid`.
pub async fn kill_pid(pid: u32) -> Result<()> {
    let status = Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .await
        .map_err(|e| Error::AuditEngine(format!("failed to run kill: {}", e)))?;

    if status.success() {
        debug!(pid, "Killed process");
        Ok(())
    } else {
        Err(Error::AuditEngine(format!(
            "kill -9 {} exited with {}",
            pid, status
        )))
    }
}

/// Send SIGKILL to every process whose name matches `name`.
///
/// Finding nothing to kill is not an error.
pub async fn kill_by_name(name: &str) -> Result<()> {
    let status = Command::new("pkill")
        .args(["-KILL", "-x", name])
        .status()
        .await
        .map_err(|e| Error::AuditEngine(format!("failed to run pkill: {}", e)))?;

    // pkill: 0 = signalled, 1 = nothing matched
    match status.code() {
        Some(0) => {
            debug!(name, "Killed matching processes");
            Ok(())
        }
        Some(1) => {
            debug!(name, "No matching processes");
            Ok(())
        }
        _ => {
            warn!(name, status = %status, "pkill failed");
            Err(Error::AuditEngine(format!(
                "pkill {} exited with {}",
                name, status
            )))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kill_pid_stops_process() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id().unwrap();

        kill_pid(pid).await.unwrap();

        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_kill_by_name_without_matches_is_ok() {
        kill_by_name("pgl-nomatch").await.unwrap();
    }
}
