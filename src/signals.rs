//! File mailboxes between the orchestrator and a running worker
//!
//! Two plain-text files carry commands to a worker without restarting it:
//!
//! - the record-toggle file holds exactly `0` or `1`
//! - the capture-request file is empty (nothing pending) or holds a token
//!   meaning "capture now"; the worker clears it after acting
//!
//! Every write replaces the whole file atomically (temp file in the same
//! directory, then rename), so a worker polling at its own cadence never
//! sees a partial value. A new capture request overwrites an unconsumed one:
//! at most one command is pending per mailbox.

use crate::config::PathsConfig;
use crate::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Timestamp token convention for capture requests
pub fn capture_token() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// File name a worker uses for its n-th frame artifact
pub fn frame_artifact_name(n: u64) -> String {
    format!("frame2_{:04}.jpg", n)
}

fn replace_contents(path: &Path, contents: &str) -> Result<()> {
    let signal_err = |source: std::io::Error| Error::Signal {
        path: path.display().to_string(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".camctl-signal-")
        .tempfile_in(dir)
        .map_err(signal_err)?;
    tmp.write_all(contents.as_bytes()).map_err(signal_err)?;
    tmp.as_file().sync_all().map_err(signal_err)?;
    tmp.persist(path).map_err(|e| signal_err(e.error))?;

    Ok(())
}

/// Orchestrator side: write-only
#[derive(Debug, Clone)]
pub struct SignalChannel {
    record_flag: PathBuf,
    capture_flag: PathBuf,
}

impl SignalChannel {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            record_flag: paths.record_flag.clone(),
            capture_flag: paths.capture_flag.clone(),
        }
    }

    pub fn record_flag_path(&self) -> &Path {
        &self.record_flag
    }

    pub fn capture_flag_path(&self) -> &Path {
        &self.capture_flag
    }

    /// Neutral state: not recording, no capture pending
    pub fn reset(&self) -> Result<()> {
        replace_contents(&self.record_flag, "0")?;
        replace_contents(&self.capture_flag, "")?;
        tracing::debug!(
            "Reset signal files {:?}, {:?}",
            self.record_flag,
            self.capture_flag
        );
        Ok(())
    }

    pub fn set_recording(&self, recording: bool) -> Result<()> {
        replace_contents(&self.record_flag, if recording { "1" } else { "0" })?;
        tracing::info!(
            "Recording {} signal sent via {:?}",
            if recording { "start" } else { "stop" },
            self.record_flag
        );
        Ok(())
    }

    pub fn request_capture(&self, token: &str) -> Result<()> {
        replace_contents(&self.capture_flag, token)?;
        tracing::info!("Capture signal sent via {:?}", self.capture_flag);
        Ok(())
    }
}

/// Worker side: polls the same files
#[derive(Debug, Clone)]
pub struct WorkerMailbox {
    record_flag: PathBuf,
    capture_flag: PathBuf,
}

impl WorkerMailbox {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            record_flag: paths.record_flag.clone(),
            capture_flag: paths.capture_flag.clone(),
        }
    }

    /// Missing or unparsable content reads as "not recording"
    pub fn recording_requested(&self) -> bool {
        std::fs::read_to_string(&self.record_flag)
            .map(|s| s.trim() == "1")
            .unwrap_or(false)
    }

    /// Consume a pending capture request, clearing the mailbox
    pub fn take_capture_request(&self) -> Result<Option<String>> {
        let token = match std::fs::read_to_string(&self.capture_flag) {
            Ok(s) => s.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(Error::Signal {
                    path: self.capture_flag.display().to_string(),
                    source,
                });
            }
        };

        if token.is_empty() {
            return Ok(None);
        }

        replace_contents(&self.capture_flag, "")?;
        Ok(Some(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(dir: &Path) -> PathsConfig {
        PathsConfig {
            record_flag: dir.join("record_flag.txt"),
            capture_flag: dir.join("capture_flag.txt"),
            ..PathsConfig::default()
        }
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_reset_writes_neutral_values() {
        let dir = tempfile::tempdir().unwrap();
        let channel = SignalChannel::new(&paths(dir.path()));

        channel.set_recording(true).unwrap();
        channel.request_capture("20250101_120000").unwrap();
        channel.reset().unwrap();

        assert_eq!(read(channel.record_flag_path()), "0");
        assert_eq!(read(channel.capture_flag_path()), "");
    }

    #[test]
    fn test_record_toggle_is_exactly_zero_or_one() {
        let dir = tempfile::tempdir().unwrap();
        let channel = SignalChannel::new(&paths(dir.path()));

        channel.set_recording(true).unwrap();
        assert_eq!(read(channel.record_flag_path()), "1");
        channel.set_recording(false).unwrap();
        assert_eq!(read(channel.record_flag_path()), "0");

        // No temp files left behind
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_worker_reads_missing_or_garbage_as_not_recording() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        let mailbox = WorkerMailbox::new(&paths);

        assert!(!mailbox.recording_requested());

        std::fs::write(&paths.record_flag, "yes please").unwrap();
        assert!(!mailbox.recording_requested());

        SignalChannel::new(&paths).set_recording(true).unwrap();
        assert!(mailbox.recording_requested());
    }

    #[test]
    fn test_capture_request_is_consumed_once() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        let channel = SignalChannel::new(&paths);
        let mailbox = WorkerMailbox::new(&paths);

        assert_eq!(mailbox.take_capture_request().unwrap(), None);

        channel.request_capture("first").unwrap();
        channel.request_capture("second").unwrap();

        assert_eq!(
            mailbox.take_capture_request().unwrap().as_deref(),
            Some("second")
        );
        assert_eq!(mailbox.take_capture_request().unwrap(), None);
        assert_eq!(read(&paths.capture_flag), "");
    }

    #[test]
    fn test_naming_conventions() {
        assert_eq!(frame_artifact_name(7), "frame2_0007.jpg");
        assert_eq!(frame_artifact_name(12345), "frame2_12345.jpg");

        let token = capture_token();
        assert_eq!(token.len(), "20250101_120000".len());
        assert_eq!(token.as_bytes()[8], b'_');
    }
}
