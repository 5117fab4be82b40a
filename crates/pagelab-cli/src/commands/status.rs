//! Server status command.

use anyhow::{Context, Result, bail};
use pagelab_scheduler::ServerStatus;

pub async fn show(server: &str, raw: bool) -> Result<()> {
    let url = format!("{}/status", server.trim_end_matches('/'));
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    if !response.status().is_success() {
        bail!("{} returned {}", url, response.status());
    }
    let status: ServerStatus = response
        .json()
        .await
        .with_context(|| format!("Unexpected status document from {}", url))?;

    if raw {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render(&status));
    }
    Ok(())
}

fn render(status: &ServerStatus) -> String {
    let mut out = format!("PageLab {}\n", status.version);
    out.push_str(&format!(
        "  workers:      {}/{}\n",
        status.number_of_actual_workers, status.num_workers_configured
    ));
    out.push_str(&format!("  queue depth:  {}\n", status.current_q_length));
    out.push_str(&format!(
        "  runs:         {} ok / {} attempted (restart at {})\n",
        status.urls_processed_successfully, status.attempted_runs, status.max_runs_before_restart
    ));
    out.push_str(&format!("  uptime:       {:.0}s\n", status.elapsed_time_seconds));
    if let Some(avg) = status.average_run_time_seconds {
        out.push_str(&format!("  avg run:      {:.1}s\n", avg));
    }
    for record in &status.app_state.workers {
        out.push_str(&format!(
            "  worker {:>3}   {}\n",
            record.worker_id,
            record.url.as_deref().unwrap_or("-")
        ));
    }
    if !status.errors.is_empty() {
        out.push_str("  errors:\n");
        for error in &status.errors {
            out.push_str(&format!("    {}\n", error));
        }
    }
    out
}
