//! Drives a physical actuator from debounced detections
//!
//! Input is one JSON record per processed frame, either a single detection
//! (`{"label": "person", "confidence": 0.91}`) or every detection of the frame
//! (`{"detections": [...]}`, possibly empty).

use crate::config::ActuatorConfig;
use crate::debounce::{ActuatorTransition, Debouncer, DetectionEvent};
use crate::hooks;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[async_trait]
pub trait Actuator: Send {
    async fn apply(&mut self, transition: ActuatorTransition) -> Result<()>;
}

/// Runs a shell command on each edge
pub struct CommandActuator {
    activate_command: Option<String>,
    deactivate_command: Option<String>,
}

impl CommandActuator {
    pub fn new(config: &ActuatorConfig) -> Self {
        Self {
            activate_command: config.activate_command.clone(),
            deactivate_command: config.deactivate_command.clone(),
        }
    }
}

#[async_trait]
impl Actuator for CommandActuator {
    async fn apply(&mut self, transition: ActuatorTransition) -> Result<()> {
        let (label, command) = match transition {
            ActuatorTransition::Activate => ("activate", &self.activate_command),
            ActuatorTransition::Deactivate => ("deactivate", &self.deactivate_command),
        };

        match command {
            Some(command) => hooks::run_hook_and_wait(label, command).await,
            None => {
                tracing::debug!("No {} command configured", label);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DetectionRecord {
    Frame { detections: Vec<DetectionEvent> },
    Single(DetectionEvent),
}

pub fn parse_frame(line: &str) -> Result<Vec<DetectionEvent>> {
    let record: DetectionRecord =
        serde_json::from_str(line).context("Invalid detection record")?;

    Ok(match record {
        DetectionRecord::Frame { detections } => detections,
        DetectionRecord::Single(event) => vec![event],
    })
}

/// Feed every record from `reader` through the debouncer until EOF
///
/// Malformed lines are logged and skipped. Returns the number of frames fed.
pub async fn drive<R, A>(reader: R, debouncer: &mut Debouncer, actuator: &mut A) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    A: Actuator + ?Sized,
{
    let mut lines = reader.lines();
    let mut frames = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read detections")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let detections = match parse_frame(line) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!("Skipping line: {:#}", e);
                continue;
            }
        };
        frames += 1;

        if let Some(transition) = debouncer.observe_frame(&detections) {
            match transition {
                ActuatorTransition::Activate => tracing::info!("Object detected"),
                ActuatorTransition::Deactivate => tracing::info!("Object gone"),
            }
            if let Err(e) = actuator.apply(transition).await {
                tracing::error!("Actuator failed: {:#}", e);
            }
        }
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DebounceConfig;

    #[derive(Default)]
    struct RecordingActuator {
        seen: Vec<ActuatorTransition>,
    }

    #[async_trait]
    impl Actuator for RecordingActuator {
        async fn apply(&mut self, transition: ActuatorTransition) -> Result<()> {
            self.seen.push(transition);
            Ok(())
        }
    }

    #[test]
    fn test_parse_both_record_shapes() {
        let single = parse_frame(r#"{"label": "person", "confidence": 0.9}"#).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].label, "person");

        let frame = parse_frame(
            r#"{"detections": [{"label": "dog", "confidence": 0.5},
                               {"label": "person", "confidence": 0.7}]}"#,
        )
        .unwrap();
        assert_eq!(frame.len(), 2);

        assert!(parse_frame(r#"{"detections": []}"#).unwrap().is_empty());
        assert!(parse_frame("not json").is_err());
    }

    #[tokio::test]
    async fn test_drive_fires_on_edges_only() {
        let person = r#"{"label": "person", "confidence": 0.9}"#;
        let empty = r#"{"detections": []}"#;

        let mut input = String::new();
        for line in std::iter::repeat_n(person, 6).chain(std::iter::repeat_n(empty, 5)) {
            input.push_str(line);
            input.push('\n');
        }
        input.push_str("garbage\n\n");

        let mut debouncer = Debouncer::new(&DebounceConfig::default());
        let mut actuator = RecordingActuator::default();

        let frames = drive(input.as_bytes(), &mut debouncer, &mut actuator)
            .await
            .unwrap();

        assert_eq!(frames, 11);
        assert_eq!(
            actuator.seen,
            vec![ActuatorTransition::Activate, ActuatorTransition::Deactivate]
        );
    }

    #[tokio::test]
    async fn test_command_actuator_runs_configured_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("servo");

        let mut actuator = CommandActuator::new(&ActuatorConfig {
            activate_command: Some(format!("echo 90 > '{}'", marker.display())),
            deactivate_command: None,
        });

        actuator.apply(ActuatorTransition::Activate).await.unwrap();
        actuator.apply(ActuatorTransition::Deactivate).await.unwrap();

        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "90");
    }
}
