//! Configuration for undistort-recorder.
//!
//! Settings are resolved in three layers: a [`Preset`] supplies the defaults,
//! the TOML config file (`~/.config/undistort-recorder/config.toml` or
//! `--config`) overrides them, and command-line flags override both.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calibration::DEFAULT_CALIBRATION_FILE;
use crate::camera::{CameraBackend, CameraSettings, Resolution};
use crate::display::DEFAULT_TITLE;
use crate::sink::Codec;

/// Named bundle of defaults for a known deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Jetson CSI camera, XVID in `video.avi`, 2 ms pause between frames
    #[default]
    JetsonAvi,
    /// Jetson CSI camera, H.264 in `video.mp4`
    JetsonMp4,
    /// USB webcam at 1280x720, XVID in `calibrated_output.avi`, no preview
    Usb,
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::JetsonAvi => write!(f, "jetson-avi"),
            Preset::JetsonMp4 => write!(f, "jetson-mp4"),
            Preset::Usb => write!(f, "usb"),
        }
    }
}

/// What a clean end of the camera stream means for the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndOfStreamPolicy {
    /// Save the video and exit 0
    #[default]
    Success,
    /// Save the video and exit with an error
    Failure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub path: PathBuf,
    pub codec: Codec,
    pub fps: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySettings {
    pub enabled: bool,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSettings {
    /// Bounded wait for a key press after every frame
    pub key_poll: Duration,
    /// Extra pause after every frame
    pub throttle: Option<Duration>,
    pub end_of_stream: EndOfStreamPolicy,
}

/// Fully resolved configuration handed to the capture loop.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub preset: Preset,
    pub calibration_path: PathBuf,
    /// Free scaling for the corrected image; `None` keeps the camera matrix
    pub alpha: Option<f64>,
    pub camera: CameraSettings,
    pub output: OutputSettings,
    pub display: DisplaySettings,
    pub recording: RecordingSettings,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::preset(Preset::default())
    }
}

impl RecorderConfig {
    /// Defaults for `preset`.
    pub fn preset(preset: Preset) -> Self {
        let jetson_camera = CameraSettings {
            backend: CameraBackend::Gstreamer,
            sensor_id: 0,
            resolution: Resolution::VGA,
            fps: 15,
            ..CameraSettings::default()
        };
        let base = Self {
            preset,
            calibration_path: PathBuf::from(DEFAULT_CALIBRATION_FILE),
            alpha: None,
            camera: jetson_camera,
            output: OutputSettings {
                path: PathBuf::from("video.avi"),
                codec: Codec::Xvid,
                fps: 15.0,
            },
            display: DisplaySettings {
                enabled: true,
                title: DEFAULT_TITLE.to_string(),
            },
            recording: RecordingSettings {
                key_poll: Duration::from_millis(1),
                throttle: Some(Duration::from_millis(2)),
                end_of_stream: EndOfStreamPolicy::Success,
            },
        };

        match preset {
            Preset::JetsonAvi => base,
            Preset::JetsonMp4 => Self {
                output: OutputSettings {
                    path: PathBuf::from("video.mp4"),
                    codec: Codec::Avc1,
                    fps: 15.0,
                },
                recording: RecordingSettings {
                    throttle: None,
                    ..base.recording
                },
                ..base
            },
            Preset::Usb => Self {
                alpha: Some(1.0),
                camera: CameraSettings {
                    backend: CameraBackend::V4l2,
                    device: "/dev/video0".to_string(),
                    resolution: Resolution::HD,
                    fps: 20,
                    ..base.camera
                },
                output: OutputSettings {
                    path: PathBuf::from("calibrated_output.avi"),
                    codec: Codec::Xvid,
                    fps: 20.0,
                },
                display: DisplaySettings {
                    enabled: false,
                    ..base.display
                },
                recording: RecordingSettings {
                    throttle: None,
                    ..base.recording
                },
                ..base
            },
        }
    }

    /// Overlay the values present in a config file.
    pub fn apply_file(&mut self, file: &FileConfig) {
        if let Some(path) = &file.calibration.path {
            self.calibration_path = path.clone();
        }
        if let Some(alpha) = file.calibration.alpha {
            self.alpha = Some(alpha);
        }

        let camera = &file.camera;
        if let Some(backend) = camera.backend {
            self.camera.backend = backend;
        }
        if let Some(sensor_id) = camera.sensor_id {
            self.camera.sensor_id = sensor_id;
        }
        if let Some(device) = &camera.device {
            self.camera.device = device.clone();
        }
        if let Some(width) = camera.width {
            self.camera.resolution.width = width;
        }
        if let Some(height) = camera.height {
            self.camera.resolution.height = height;
        }
        if let Some(fps) = camera.fps {
            self.camera.fps = fps;
        }
        if let Some(pipeline) = &camera.pipeline {
            self.camera.pipeline = Some(pipeline.clone());
        }

        if let Some(path) = &file.output.path {
            self.output.path = path.clone();
        }
        if let Some(codec) = file.output.codec {
            self.output.codec = codec;
        }
        if let Some(fps) = file.output.fps {
            self.output.fps = fps;
        }

        if let Some(enabled) = file.display.enabled {
            self.display.enabled = enabled;
        }
        if let Some(title) = &file.display.title {
            self.display.title = title.clone();
        }

        if let Some(ms) = file.recording.key_poll_ms {
            self.recording.key_poll = Duration::from_millis(ms);
        }
        if let Some(ms) = file.recording.throttle_ms {
            self.recording.throttle = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(policy) = file.recording.end_of_stream {
            self.recording.end_of_stream = policy;
        }
    }

    /// Preset, then config file.
    pub fn resolve(preset: Option<Preset>, file: &FileConfig) -> Self {
        let mut config = Self::preset(preset.or(file.preset).unwrap_or_default());
        config.apply_file(file);
        config
    }

    /// Reject values no run could succeed with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(alpha) = self.alpha {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(ConfigError::invalid(
                    "calibration.alpha",
                    format!("must be between 0.0 and 1.0, got {}", alpha),
                ));
            }
        }
        if self.camera.resolution.is_empty() {
            return Err(ConfigError::invalid(
                "camera.width/height",
                format!("capture size {} is empty", self.camera.resolution),
            ));
        }
        if self.camera.fps == 0 {
            return Err(ConfigError::invalid("camera.fps", "must be positive"));
        }
        if !self.output.fps.is_finite() || self.output.fps <= 0.0 {
            return Err(ConfigError::invalid("output.fps", "must be positive"));
        }
        let extension = self
            .output
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if !self.output.codec.supports_extension(extension) {
            return Err(ConfigError::invalid(
                "output.codec",
                format!(
                    "{} cannot be written to '{}' (use one of: {})",
                    self.output.codec,
                    self.output.path.display(),
                    self.output.codec.extensions().join(", ")
                ),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for RecorderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Preset: {}", self.preset)?;
        writeln!(f, "  Calibration: {}", self.calibration_path.display())?;
        match self.alpha {
            Some(alpha) => writeln!(f, "  Alpha: {}", alpha)?,
            None => writeln!(f, "  Alpha: (camera matrix)")?,
        }
        match self.camera.backend {
            CameraBackend::Gstreamer => writeln!(
                f,
                "  Camera: gstreamer sensor {} @ {} {} fps",
                self.camera.sensor_id, self.camera.resolution, self.camera.fps
            )?,
            CameraBackend::V4l2 => writeln!(
                f,
                "  Camera: v4l2 {} @ {} {} fps",
                self.camera.device, self.camera.resolution, self.camera.fps
            )?,
        }
        if let Some(pipeline) = &self.camera.pipeline {
            writeln!(f, "  Pipeline: {}", pipeline)?;
        }
        writeln!(
            f,
            "  Output: {} ({} @ {} fps)",
            self.output.path.display(),
            self.output.codec,
            self.output.fps
        )?;
        writeln!(
            f,
            "  Preview: {}",
            if self.display.enabled { "yes" } else { "no" }
        )?;
        match self.recording.throttle {
            Some(t) => writeln!(f, "  Throttle: {} ms", t.as_millis())?,
            None => writeln!(f, "  Throttle: none")?,
        }
        write!(
            f,
            "  End of stream: {}",
            match self.recording.end_of_stream {
                EndOfStreamPolicy::Success => "success",
                EndOfStreamPolicy::Failure => "failure",
            }
        )
    }
}

/// Configuration file structure.
/// Every value is optional; absent values keep the preset's default.
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub preset: Option<Preset>,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
}

#[derive(Debug, Deserialize, Default)]
pub struct CalibrationConfig {
    pub path: Option<PathBuf>,
    pub alpha: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CameraConfig {
    pub backend: Option<CameraBackend>,
    pub sensor_id: Option<u32>,
    pub device: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub pipeline: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct OutputConfig {
    pub path: Option<PathBuf>,
    pub codec: Option<Codec>,
    pub fps: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DisplayConfig {
    pub enabled: Option<bool>,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RecordingConfig {
    pub key_poll_ms: Option<u64>,
    pub throttle_ms: Option<u64>,
    pub end_of_stream: Option<EndOfStreamPolicy>,
}

impl FileConfig {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
                path: path.clone(),
                source: e,
            })?;
            let config: FileConfig =
                toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                    path: path.clone(),
                    source: e,
                })?;
            log::debug!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            Ok(FileConfig::default())
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid {}: {}", field, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } => None,
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("undistort-recorder").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/undistort-recorder/config.toml")
        })
}

/// Written by `config init`.
///
/// Only the preset is set; every other value is commented out so the preset
/// chosen here or with `--preset` decides it.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# undistort-recorder configuration
#
# Uncommented values override the preset.

# Defaults to start from: jetson-avi, jetson-mp4, usb
preset = "jetson-avi"

[calibration]
# OpenCV FileStorage file with CameraMatrix and DistCoeffs (.yml or .json)
# path = "calibration.yml"
# 0.0 keeps only valid pixels, 1.0 keeps every source pixel.
# Leave unset to reuse the camera matrix.
# alpha = 1.0

[camera]
# gstreamer (CSI sensor) or v4l2 (USB webcam)
# backend = "gstreamer"
# sensor_id = 0
# device = "/dev/video0"
# width = 640
# height = 480
# fps = 15
# Replace the CSI pipeline entirely (must end in appsink)
# pipeline = "nvarguscamerasrc sensor-id=0 ! video/x-raw(memory:NVMM), width=640, height=480, format=NV12, framerate=15/1 ! nvvidconv ! video/x-raw, format=BGRx ! videoconvert ! video/x-raw, format=BGR ! appsink"

[output]
# path = "video.avi"
# XVID, avc1 or MJPG
# codec = "XVID"
# fps = 15.0

[display]
# enabled = true
# title = "Undistorted Feed"

[recording]
# Wait for a key press after each frame
# key_poll_ms = 1
# Extra pause after each frame (0 disables)
# throttle_ms = 2
# Exit status when the camera stream ends on its own: success or failure
# end_of_stream = "success"
"#;
