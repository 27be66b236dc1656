use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub hooks: HooksConfig,

    #[serde(default)]
    pub debounce: DebounceConfig,

    #[serde(default)]
    pub actuator: ActuatorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraBackendKind {
    V4l,
    TestPattern,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraConfig {
    #[serde(default = "default_backend")]
    pub backend: CameraBackendKind,

    #[serde(default = "default_device_path")]
    pub device_path: String,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    #[serde(default = "default_max_read_errors")]
    pub max_consecutive_read_errors: u32,

    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Pause between closing the device and launching a worker
    #[serde(default = "default_release_settle_ms")]
    pub release_settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,

    #[serde(default = "default_captures_dir")]
    pub captures_dir: PathBuf,

    #[serde(default = "default_record_flag")]
    pub record_flag: PathBuf,

    #[serde(default = "default_capture_flag")]
    pub capture_flag: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingStrategy {
    /// Flip the record-toggle mailbox of the running detection worker
    Signal,
    /// Swap the detection worker for a recording worker
    DedicatedWorker,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkersConfig {
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the worker contract flags (usually the script)
    #[serde(default = "default_detection_args")]
    pub detection_args: Vec<String>,

    #[serde(default = "default_recording_args")]
    pub recording_args: Vec<String>,

    /// Value passed as `--input` when the worker should read the camera
    #[serde(default = "default_camera_input")]
    pub camera_input: String,

    /// Optional file to feed the workers instead of the camera
    #[serde(default)]
    pub input_file: Option<PathBuf>,

    #[serde(default = "default_model")]
    pub model: PathBuf,

    #[serde(default = "default_labels")]
    pub labels_json: PathBuf,

    #[serde(default = "default_show_fps")]
    pub show_fps: bool,

    #[serde(default = "default_recording_strategy")]
    pub recording_strategy: RecordingStrategy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    #[serde(default = "default_kill_settle_ms")]
    pub kill_settle_ms: u64,

    /// How long a fresh worker must survive to count as started
    #[serde(default = "default_startup_probe_ms")]
    pub startup_probe_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HooksConfig {
    /// Run after a dedicated recording worker has been stopped
    #[serde(default)]
    pub on_recording_finished: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DebounceConfig {
    #[serde(default = "default_activation_threshold")]
    pub activation_threshold: u32,

    #[serde(default = "default_deactivation_threshold")]
    pub deactivation_threshold: u32,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    #[serde(default = "default_watched_label")]
    pub watched_label: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ActuatorConfig {
    #[serde(default)]
    pub activate_command: Option<String>,

    #[serde(default)]
    pub deactivate_command: Option<String>,
}

fn default_backend() -> CameraBackendKind {
    if cfg!(feature = "v4l") {
        CameraBackendKind::V4l
    } else {
        CameraBackendKind::TestPattern
    }
}

fn default_device_path() -> String {
    "/dev/video0".to_string()
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_frame_interval_ms() -> u64 {
    30
}

fn default_max_read_errors() -> u32 {
    10
}

fn default_stop_timeout_ms() -> u64 {
    1000
}

fn default_release_settle_ms() -> u64 {
    1000
}

fn default_recordings_dir() -> PathBuf {
    PathBuf::from("./data/recordings")
}

fn default_captures_dir() -> PathBuf {
    PathBuf::from("./data/captures")
}

fn default_record_flag() -> PathBuf {
    PathBuf::from("record_flag.txt")
}

fn default_capture_flag() -> PathBuf {
    PathBuf::from("capture_flag.txt")
}

fn default_program() -> String {
    "python".to_string()
}

fn default_detection_args() -> Vec<String> {
    vec!["./basic_pipelines/detection.py".to_string()]
}

fn default_recording_args() -> Vec<String> {
    vec!["./basic_pipelines/recording_logging.py".to_string()]
}

fn default_camera_input() -> String {
    "rpi".to_string()
}

fn default_model() -> PathBuf {
    PathBuf::from("./resources/yolov8s.hef")
}

fn default_labels() -> PathBuf {
    PathBuf::from("./resources/labels.json")
}

fn default_show_fps() -> bool {
    true
}

fn default_recording_strategy() -> RecordingStrategy {
    RecordingStrategy::Signal
}

fn default_grace_period_ms() -> u64 {
    5000
}

fn default_kill_settle_ms() -> u64 {
    500
}

fn default_startup_probe_ms() -> u64 {
    1000
}

fn default_activation_threshold() -> u32 {
    4
}

fn default_deactivation_threshold() -> u32 {
    5
}

fn default_confidence_threshold() -> f32 {
    0.4
}

fn default_watched_label() -> String {
    "person".to_string()
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            device_path: default_device_path(),
            width: default_width(),
            height: default_height(),
            frame_interval_ms: default_frame_interval_ms(),
            max_consecutive_read_errors: default_max_read_errors(),
            stop_timeout_ms: default_stop_timeout_ms(),
            release_settle_ms: default_release_settle_ms(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            recordings_dir: default_recordings_dir(),
            captures_dir: default_captures_dir(),
            record_flag: default_record_flag(),
            capture_flag: default_capture_flag(),
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            detection_args: default_detection_args(),
            recording_args: default_recording_args(),
            camera_input: default_camera_input(),
            input_file: None,
            model: default_model(),
            labels_json: default_labels(),
            show_fps: default_show_fps(),
            recording_strategy: default_recording_strategy(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            kill_settle_ms: default_kill_settle_ms(),
            startup_probe_ms: default_startup_probe_ms(),
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            activation_threshold: default_activation_threshold(),
            deactivation_threshold: default_deactivation_threshold(),
            confidence_threshold: default_confidence_threshold(),
            watched_label: default_watched_label(),
        }
    }
}

impl CameraConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn release_settle(&self) -> Duration {
        Duration::from_millis(self.release_settle_ms)
    }
}

impl PathsConfig {
    /// Create the recordings and captures directories if absent
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.recordings_dir, &self.captures_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl SupervisorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn kill_settle(&self) -> Duration {
        Duration::from_millis(self.kill_settle_ms)
    }

    pub fn startup_probe(&self) -> Duration {
        Duration::from_millis(self.startup_probe_ms)
    }
}

impl Config {
    /// Load configuration from `$CAMCTL_CONFIG` or ~/.config/camctl/config.json
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        tracing::info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save_to(&self, config_path: &std::path::Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved config to {:?}", config_path);
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("CAMCTL_CONFIG") {
            return Ok(PathBuf::from(path));
        }

        let config_dir = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(dir)
        } else {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            PathBuf::from(home).join(".config")
        };

        Ok(config_dir.join("camctl").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow::anyhow!("camera resolution must be non-zero"));
        }

        if self.camera.frame_interval_ms == 0 {
            return Err(anyhow::anyhow!("camera.frame_interval_ms must be non-zero"));
        }

        if self.camera.max_consecutive_read_errors == 0 {
            return Err(anyhow::anyhow!(
                "camera.max_consecutive_read_errors must be at least 1"
            ));
        }

        if cfg!(not(feature = "v4l")) && self.camera.backend == CameraBackendKind::V4l {
            return Err(anyhow::anyhow!(
                "camera.backend is \"v4l\" but camctl was built without the v4l feature"
            ));
        }

        if self.workers.program.is_empty() {
            return Err(anyhow::anyhow!("workers.program cannot be empty"));
        }

        if self.paths.record_flag == self.paths.capture_flag {
            return Err(anyhow::anyhow!(
                "paths.record_flag and paths.capture_flag must differ"
            ));
        }

        if self.debounce.activation_threshold == 0 || self.debounce.deactivation_threshold == 0 {
            return Err(anyhow::anyhow!("debounce thresholds must be at least 1"));
        }

        if !(0.0..=1.0).contains(&self.debounce.confidence_threshold) {
            return Err(anyhow::anyhow!(
                "debounce.confidence_threshold must be between 0 and 1"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();

        assert_eq!(config.camera.width, 640);
        assert_eq!(config.camera.height, 480);
        assert_eq!(config.supervisor.grace_period(), Duration::from_secs(5));
        assert_eq!(config.debounce.activation_threshold, 4);
        assert_eq!(config.debounce.deactivation_threshold, 5);
        assert_eq!(config.workers.recording_strategy, RecordingStrategy::Signal);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"workers": {"program": "/usr/bin/env", "recording_strategy": "dedicated-worker"},
                "camera": {"backend": "test-pattern"}}"#,
        )
        .unwrap();

        assert_eq!(config.workers.program, "/usr/bin/env");
        assert_eq!(
            config.workers.recording_strategy,
            RecordingStrategy::DedicatedWorker
        );
        assert_eq!(config.workers.camera_input, "rpi");
        assert_eq!(config.camera.backend, CameraBackendKind::TestPattern);
        assert_eq!(config.paths.record_flag, PathBuf::from("record_flag.txt"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.debounce.activation_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.paths.capture_flag = config.paths.record_flag.clone();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.workers.program.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.hooks.on_recording_finished = Some("python pictovid.py".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(
            loaded.hooks.on_recording_finished.as_deref(),
            Some("python pictovid.py")
        );
    }

    #[test]
    fn test_ensure_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            recordings_dir: dir.path().join("data").join("recordings"),
            captures_dir: dir.path().join("data").join("captures"),
            ..PathsConfig::default()
        };

        paths.ensure().unwrap();
        paths.ensure().unwrap();
        assert!(paths.recordings_dir.is_dir());
        assert!(paths.captures_dir.is_dir());
    }
}
