//! Capture pipeline descriptors and the commands that run them.

use std::fmt;

use super::types::{CameraBackend, CameraSettings, FrameFormat, Resolution};

/// Program used for the GStreamer backend.
pub const GST_LAUNCH: &str = "gst-launch-1.0";
/// Program used for the V4L2 backend (and for encoding, see `sink`).
pub const FFMPEG: &str = "ffmpeg";

/// Declarative description of a GStreamer acquisition chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescriptor(String);

impl PipelineDescriptor {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self(descriptor.into())
    }

    /// Jetson CSI chain: Argus sensor in NVMM memory, converted to packed BGR.
    pub fn csi(sensor_id: u32, resolution: Resolution, fps: u32) -> Self {
        Self(format!(
            "nvarguscamerasrc sensor-id={} ! \
             video/x-raw(memory:NVMM), width={}, height={}, format=NV12, framerate={}/1 ! \
             nvvidconv ! video/x-raw, format=BGRx ! \
             videoconvert ! video/x-raw, format=BGR ! \
             appsink",
            sensor_id, resolution.width, resolution.height, fps
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Elements of the chain, split on `!`.
    pub fn elements(&self) -> Vec<&str> {
        self.0.split('!').map(str::trim).filter(|e| !e.is_empty()).collect()
    }

    /// Rewrite the descriptor so that frames come out on stdout.
    ///
    /// An `appsink` terminal element is swapped for `fdsink fd=1`; a chain with
    /// any other terminal element gets `fdsink` appended.
    pub fn for_stdout(&self) -> String {
        let mut elements = self.elements();
        let ends_in_appsink = elements
            .last()
            .is_some_and(|last| last.split_whitespace().next() == Some("appsink"));
        if ends_in_appsink {
            elements.pop();
        }
        elements.push("fdsink fd=1 sync=false");
        elements.join(" ! ")
    }
}

impl fmt::Display for PipelineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully resolved capture command: program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl CaptureCommand {
    /// Build the capture command for the configured backend.
    pub fn for_camera(settings: &CameraSettings) -> Self {
        match settings.backend {
            CameraBackend::Gstreamer => Self::gstreamer(&descriptor_for(settings)),
            CameraBackend::V4l2 => Self::v4l2(&settings.device, settings.resolution, settings.fps),
        }
    }

    /// `gst-launch-1.0 -q -e <descriptor ! fdsink>`.
    ///
    /// `-q` keeps gst-launch's status messages off stdout, which carries the
    /// frames. gst-launch joins its arguments, so splitting on whitespace is
    /// lossless.
    pub fn gstreamer(descriptor: &PipelineDescriptor) -> Self {
        let mut args = vec!["-q".to_string(), "-e".to_string()];
        args.extend(descriptor.for_stdout().split_whitespace().map(String::from));
        Self {
            program: GST_LAUNCH,
            args,
        }
    }

    /// ffmpeg reading a V4L2 device and emitting raw BGR frames on stdout.
    pub fn v4l2(device: &str, resolution: Resolution, fps: u32) -> Self {
        let size = resolution.to_string();
        let args = vec![
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "v4l2",
            "-framerate",
            &fps.to_string(),
            "-video_size",
            &size,
            "-i",
            device,
            "-vf",
            &format!("scale={}:{}", resolution.width, resolution.height),
            "-f",
            "rawvideo",
            "-pix_fmt",
            FrameFormat::Bgr.raw_video_name(),
            "-",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        Self {
            program: FFMPEG,
            args,
        }
    }
}

impl fmt::Display for CaptureCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program, crate::pipeline::join_args(&self.args))
    }
}

/// Descriptor for the GStreamer backend: the configured one, or the CSI template.
pub fn descriptor_for(settings: &CameraSettings) -> PipelineDescriptor {
    match &settings.pipeline {
        Some(custom) => PipelineDescriptor::new(custom.clone()),
        None => PipelineDescriptor::csi(settings.sensor_id, settings.resolution, settings.fps),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csi_descriptor_matches_sensor_mode() {
        let d = PipelineDescriptor::csi(0, Resolution::VGA, 15);
        assert_eq!(
            d.as_str(),
            "nvarguscamerasrc sensor-id=0 ! \
             video/x-raw(memory:NVMM), width=640, height=480, format=NV12, framerate=15/1 ! \
             nvvidconv ! video/x-raw, format=BGRx ! \
             videoconvert ! video/x-raw, format=BGR ! \
             appsink"
        );
        assert_eq!(d.elements().len(), 6);
    }

    #[test]
    fn test_for_stdout_replaces_appsink() {
        let d = PipelineDescriptor::new("videotestsrc ! video/x-raw, format=BGR ! appsink drop=true");
        assert_eq!(
            d.for_stdout(),
            "videotestsrc ! video/x-raw, format=BGR ! fdsink fd=1 sync=false"
        );
    }

    #[test]
    fn test_for_stdout_appends_when_no_appsink() {
        let d = PipelineDescriptor::new("videotestsrc ! video/x-raw, format=BGR");
        assert_eq!(
            d.for_stdout(),
            "videotestsrc ! video/x-raw, format=BGR ! fdsink fd=1 sync=false"
        );
    }

    #[test]
    fn test_gstreamer_command() {
        let cmd = CaptureCommand::for_camera(&CameraSettings::default());
        assert_eq!(cmd.program, GST_LAUNCH);
        assert_eq!(&cmd.args[..3], &["-q", "-e", "nvarguscamerasrc"]);
        assert!(cmd.args.contains(&"video/x-raw(memory:NVMM),".to_string()));
        assert_eq!(cmd.args.last().map(String::as_str), Some("sync=false"));
        assert!(!cmd.args.iter().any(|a| a == "appsink"));
    }

    #[test]
    fn test_custom_pipeline_overrides_template() {
        let settings = CameraSettings {
            pipeline: Some("videotestsrc ! appsink".to_string()),
            ..CameraSettings::default()
        };
        assert_eq!(descriptor_for(&settings).as_str(), "videotestsrc ! appsink");
    }

    #[test]
    fn test_v4l2_command() {
        let settings = CameraSettings {
            backend: CameraBackend::V4l2,
            resolution: Resolution::HD,
            fps: 20,
            ..CameraSettings::default()
        };
        let cmd = CaptureCommand::for_camera(&settings);
        assert_eq!(cmd.program, FFMPEG);
        let line = cmd.to_string();
        assert!(line.contains("-f v4l2 -framerate 20 -video_size 1280x720 -i /dev/video0"));
        assert!(line.ends_with("-f rawvideo -pix_fmt bgr24 -"));
    }
}
