//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use super::enums::{BackendArg, PresetArg};
use crate::camera::Resolution;
use crate::config::RecorderConfig;
use crate::sink::Codec;

/// Record lens-corrected video from a calibrated camera
#[derive(Parser, Debug)]
#[command(name = "undistort-recorder")]
#[command(version, about = "Record undistorted video from a calibrated camera", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Calibration file with CameraMatrix and DistCoeffs [default: calibration.yml]
    pub calibration: Option<PathBuf>,

    /// Deployment preset supplying the defaults
    #[arg(long, short)]
    pub preset: Option<PresetArg>,

    /// Output video file
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Codec fourcc: XVID, avc1 or MJPG
    #[arg(long)]
    pub codec: Option<Codec>,

    /// Output frame rate
    #[arg(long, value_parser = parse_fps)]
    pub fps: Option<f64>,

    /// Free scaling of the corrected image (0.0 crops to valid pixels, 1.0 keeps all)
    #[arg(long, value_parser = parse_alpha)]
    pub alpha: Option<f64>,

    /// Camera backend
    #[arg(long)]
    pub backend: Option<BackendArg>,

    /// V4L2 device node (v4l2 backend)
    #[arg(long)]
    pub device: Option<String>,

    /// CSI sensor index (gstreamer backend)
    #[arg(long)]
    pub sensor_id: Option<u32>,

    /// Capture resolution (WIDTHxHEIGHT)
    #[arg(long, value_parser = parse_resolution)]
    pub resolution: Option<Resolution>,

    /// Disable the preview window
    #[arg(long)]
    pub no_display: bool,

    /// Pause after every frame, in milliseconds (0 disables)
    #[arg(long)]
    pub throttle_ms: Option<u64>,

    /// Config file path
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a calibration file and print its matrices
    Calibration {
        /// Calibration file [default: calibration.yml]
        path: Option<PathBuf>,
    },
    /// Print the resolved camera capture command
    Pipeline,
    /// List V4L2 capture devices
    ListCameras,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Create default config file
    Init,
}

impl Args {
    /// Apply command-line overrides on top of the preset and config file.
    pub fn apply_to(&self, config: &mut RecorderConfig) {
        if let Some(path) = &self.calibration {
            config.calibration_path = path.clone();
        }
        if let Some(path) = &self.output {
            config.output.path = path.clone();
        }
        if let Some(codec) = self.codec {
            config.output.codec = codec;
        }
        if let Some(fps) = self.fps {
            config.output.fps = fps;
        }
        if let Some(alpha) = self.alpha {
            config.alpha = Some(alpha);
        }
        if let Some(backend) = self.backend {
            config.camera.backend = backend.into();
        }
        if let Some(device) = &self.device {
            config.camera.device = device.clone();
        }
        if let Some(sensor_id) = self.sensor_id {
            config.camera.sensor_id = sensor_id;
        }
        if let Some(resolution) = self.resolution {
            config.camera.resolution = resolution;
        }
        if self.no_display {
            config.display.enabled = false;
        }
        if let Some(ms) = self.throttle_ms {
            config.recording.throttle = (ms > 0).then(|| Duration::from_millis(ms));
        }
    }
}

/// Parse and validate alpha (0.0-1.0)
fn parse_alpha(s: &str) -> Result<f64, String> {
    let alpha: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if !(0.0..=1.0).contains(&alpha) {
        return Err(format!("Alpha must be between 0.0 and 1.0, got {}", alpha));
    }
    Ok(alpha)
}

/// Parse and validate an output frame rate (0-240 fps, exclusive of 0)
fn parse_fps(s: &str) -> Result<f64, String> {
    let fps: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid frame rate", s))?;
    if !(fps > 0.0 && fps <= 240.0) {
        return Err(format!("Frame rate must be between 0 and 240 fps, got {}", fps));
    }
    Ok(fps)
}

/// Parse and validate resolution (WIDTHxHEIGHT format)
fn parse_resolution(s: &str) -> Result<Resolution, String> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid resolution format '{}'. Use WIDTHxHEIGHT (e.g., 1280x720)",
            s
        ));
    }
    let width: u32 = parts[0]
        .parse()
        .map_err(|_| format!("Invalid width '{}' in resolution", parts[0]))?;
    let height: u32 = parts[1]
        .parse()
        .map_err(|_| format!("Invalid height '{}' in resolution", parts[1]))?;
    if width == 0 || height == 0 {
        return Err("Resolution width and height must be greater than 0".to_string());
    }
    if width > 7680 || height > 4320 {
        return Err("Resolution exceeds maximum supported (7680x4320)".to_string());
    }
    Ok(Resolution::new(width, height))
}
