//! Opening the capture, output and preview devices.
//!
//! The capture loop never constructs collaborators itself; it asks a
//! [`DeviceFactory`]. [`SystemDevices`] opens the real child processes,
//! tests substitute scripted ones. Also lists V4L2 capture nodes for the
//! `list-cameras` subcommand.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::camera::{CameraCapture, CameraError, CameraSettings, FrameSource, Resolution};
use crate::config::DisplaySettings;
use crate::display::{DisplayError, FrameDisplay, MpvDisplay};
use crate::sink::{FrameSink, SinkError, SinkSpec, VideoWriter};

/// Constructs the collaborators of one recording.
pub trait DeviceFactory {
    /// Start the camera stream.
    fn open_camera(&mut self, settings: &CameraSettings)
        -> Result<Box<dyn FrameSource>, CameraError>;

    /// Start the video encoder.
    fn open_sink(&mut self, spec: SinkSpec) -> Result<Box<dyn FrameSink>, SinkError>;

    /// Open the preview window.
    fn open_display(
        &mut self,
        settings: &DisplaySettings,
        resolution: Resolution,
        fps: u32,
    ) -> Result<Box<dyn FrameDisplay>, DisplayError>;
}

/// Real devices: capture pipeline, ffmpeg encoder and mpv window.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDevices;

impl DeviceFactory for SystemDevices {
    fn open_camera(
        &mut self,
        settings: &CameraSettings,
    ) -> Result<Box<dyn FrameSource>, CameraError> {
        Ok(Box::new(CameraCapture::open(settings)?))
    }

    fn open_sink(&mut self, spec: SinkSpec) -> Result<Box<dyn FrameSink>, SinkError> {
        Ok(Box::new(VideoWriter::open(spec)?))
    }

    fn open_display(
        &mut self,
        settings: &DisplaySettings,
        resolution: Resolution,
        fps: u32,
    ) -> Result<Box<dyn FrameDisplay>, DisplayError> {
        Ok(Box::new(MpvDisplay::open(&settings.title, resolution, fps)?))
    }
}

/// A V4L2 capture node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDevice {
    pub index: u32,
    pub path: PathBuf,
    /// Driver-reported name, when sysfs has one
    pub name: Option<String>,
}

impl std::fmt::Display for VideoDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "[{}] {} ({})", self.index, self.path.display(), name),
            None => write!(f, "[{}] {}", self.index, self.path.display()),
        }
    }
}

/// Parse `videoN` into `N`.
fn parse_video_node(file_name: &str) -> Option<u32> {
    file_name.strip_prefix("video")?.parse().ok()
}

/// List `videoN` nodes in `dev_dir`, sorted by index.
///
/// Names are read from `<sys_dir>/videoN/name`.
pub fn list_video_devices(dev_dir: &Path, sys_dir: &Path) -> io::Result<Vec<VideoDevice>> {
    let mut devices = Vec::new();
    for entry in fs::read_dir(dev_dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(index) = parse_video_node(file_name) else {
            continue;
        };
        let name = fs::read_to_string(sys_dir.join(file_name).join("name"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        devices.push(VideoDevice {
            index,
            path: entry.path(),
            name,
        });
    }
    devices.sort_by_key(|d| d.index);
    Ok(devices)
}

/// List the V4L2 capture nodes of this machine.
pub fn list_system_video_devices() -> io::Result<Vec<VideoDevice>> {
    list_video_devices(Path::new("/dev"), Path::new("/sys/class/video4linux"))
}
