//! CLI enum types for presets and camera backends.

use clap::ValueEnum;

use crate::camera::CameraBackend;
use crate::config::Preset;

/// Deployment preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PresetArg {
    /// CSI camera, XVID video.avi
    #[default]
    JetsonAvi,
    /// CSI camera, H.264 video.mp4
    JetsonMp4,
    /// USB webcam, calibrated_output.avi, no preview
    Usb,
}

impl From<PresetArg> for Preset {
    fn from(p: PresetArg) -> Self {
        match p {
            PresetArg::JetsonAvi => Preset::JetsonAvi,
            PresetArg::JetsonMp4 => Preset::JetsonMp4,
            PresetArg::Usb => Preset::Usb,
        }
    }
}

/// Camera acquisition backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    /// CSI sensor through gst-launch-1.0
    Gstreamer,
    /// V4L2 device through ffmpeg
    V4l2,
}

impl From<BackendArg> for CameraBackend {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Gstreamer => CameraBackend::Gstreamer,
            BackendArg::V4l2 => CameraBackend::V4l2,
        }
    }
}
