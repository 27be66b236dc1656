use crate::messages::UserCommand;
use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub const HELP: &str = "d = toggle detection, r = toggle recording, c = capture, s = status, q = quit";

pub fn parse_command(line: &str) -> Option<UserCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "d" | "detect" => Some(UserCommand::ToggleDetection),
        "r" | "record" => Some(UserCommand::ToggleRecording),
        "c" | "capture" => Some(UserCommand::CaptureStill),
        "s" | "status" => Some(UserCommand::Status),
        "q" | "quit" | "exit" => Some(UserCommand::Quit),
        _ => None,
    }
}

/// Read console commands from stdin and forward them to the orchestrator
pub async fn monitor_stdin(tx: mpsc::Sender<UserCommand>) -> Result<()> {
    monitor(BufReader::new(tokio::io::stdin()), tx).await
}

pub async fn monitor<R>(reader: R, tx: mpsc::Sender<UserCommand>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Some(command) => {
                tracing::debug!("Console command: {:?}", command);
                if tx.send(command).await.is_err() {
                    break;
                }
            }
            None => tracing::warn!("Unknown command {:?} ({})", line.trim(), HELP),
        }
    }

    tracing::debug!("Console input closed");
    Ok(())
}
