use anyhow::{Context, Result};
use tokio::process::Command;

/// Run a shell hook in the background, logging any failure
pub fn run_hook(label: &str, command: &str) {
    let label = label.to_owned();
    let command = command.to_owned();

    tokio::task::spawn(async move {
        if let Err(e) = run_hook_and_wait(&label, &command).await {
            tracing::warn!("[{}] {:#}", label, e);
        }
    });
}

/// Run a shell hook to completion; a non-zero exit is an error
pub async fn run_hook_and_wait(label: &str, command: &str) -> Result<()> {
    tracing::info!("[{}] Running hook: {}", label, command);

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .context("Failed to spawn hook")?;

    let output = child
        .wait_with_output()
        .await
        .context("Failed to wait on hook")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Hook exited with {}: {}", output.status, stderr.trim());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hook_runs_through_shell() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");

        run_hook_and_wait("test", &format!("echo done > '{}'", marker.display()))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "done");
    }

    #[tokio::test]
    async fn test_failing_hook_reports_stderr() {
        let err = run_hook_and_wait("test", "echo broken >&2; exit 3")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("broken"));
    }
}
