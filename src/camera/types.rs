//! Camera types and data structures.

use serde::Deserialize;
use std::fmt;
use std::time::Instant;

/// Camera resolution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// VGA (640x480) - the CSI sensor mode used on the Jetson
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };

    /// HD (1280x720) - USB webcams
    pub const HD: Resolution = Resolution {
        width: 1280,
        height: 720,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in one frame.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Number of bytes in one packed BGR frame.
    pub fn frame_len(&self) -> usize {
        self.pixel_count() * FrameFormat::Bgr.bytes_per_pixel()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::VGA
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel format of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Packed BGR, 8 bits per channel
    Bgr,
}

impl FrameFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            FrameFormat::Bgr => 3,
        }
    }

    /// Pixel format name understood by ffmpeg and mpv.
    pub fn raw_video_name(self) -> &'static str {
        match self {
            FrameFormat::Bgr => "bgr24",
        }
    }
}

/// A captured camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data, row-major
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format
    pub format: FrameFormat,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl Frame {
    /// Wrap packed BGR bytes. Returns `None` if the buffer length does not
    /// match the dimensions.
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != Resolution::new(width, height).frame_len() {
            return None;
        }
        Some(Self {
            data,
            width,
            height,
            format: FrameFormat::Bgr,
            timestamp: Instant::now(),
        })
    }

    /// All-black frame of the given size.
    pub fn black(resolution: Resolution) -> Self {
        Self {
            data: vec![0; resolution.frame_len()],
            width: resolution.width,
            height: resolution.height,
            format: FrameFormat::Bgr,
            timestamp: Instant::now(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Get the number of bytes per pixel (3 for BGR).
    pub fn bytes_per_pixel(&self) -> usize {
        self.format.bytes_per_pixel()
    }

    /// A frame with no pixels, or whose buffer is shorter than its dimensions.
    pub fn is_empty(&self) -> bool {
        self.resolution().is_empty() || self.data.len() < self.resolution().frame_len()
    }

    /// Pixel at (x, y) as `[b, g, r]`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        let px = self.data.get(offset..offset + 3)?;
        Some([px[0], px[1], px[2]])
    }
}

/// Acquisition backend for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    /// CSI sensor through a GStreamer pipeline (`gst-launch-1.0`)
    Gstreamer,
    /// V4L2 device through ffmpeg
    V4l2,
}

impl fmt::Display for CameraBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraBackend::Gstreamer => write!(f, "gstreamer"),
            CameraBackend::V4l2 => write!(f, "v4l2"),
        }
    }
}

/// Settings for camera capture.
#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Acquisition backend
    pub backend: CameraBackend,
    /// CSI sensor index (gstreamer backend)
    pub sensor_id: u32,
    /// Device node (v4l2 backend)
    pub device: String,
    /// Capture resolution; raw frames are read at exactly this size
    pub resolution: Resolution,
    /// Capture frame rate
    pub fps: u32,
    /// Custom pipeline descriptor replacing the CSI template
    pub pipeline: Option<String>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            backend: CameraBackend::Gstreamer,
            sensor_id: 0,
            device: "/dev/video0".to_string(),
            resolution: Resolution::VGA,
            fps: 15,
            pipeline: None,
        }
    }
}

/// Errors that can occur during camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// The capture process could not be started
    #[error(transparent)]
    OpenFailed(#[from] crate::pipeline::PipelineError),
    /// Capture process exited before delivering frames
    #[error("Camera stream closed during startup: {0}")]
    StreamFailed(String),
    /// Reading from the capture pipe failed
    #[error("Capture pipe: {0}")]
    ReadFailed(#[source] std::io::Error),
    /// Stream ended in the middle of a frame
    #[error("Truncated frame: got {got} of {expected} bytes")]
    TruncatedFrame { expected: usize, got: usize },
    /// Stopping the capture process failed
    #[error("Failed to release camera: {0}")]
    ReleaseFailed(#[source] crate::pipeline::PipelineError),
    /// Requested capture size is unusable
    #[error("Invalid capture resolution {0}")]
    InvalidResolution(Resolution),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_constants() {
        assert_eq!(Resolution::VGA.width, 640);
        assert_eq!(Resolution::VGA.height, 480);
        assert_eq!(Resolution::HD.width, 1280);
        assert_eq!(Resolution::HD.height, 720);
        assert_eq!(Resolution::default(), Resolution::VGA);
    }

    #[test]
    fn test_resolution_frame_len() {
        assert_eq!(Resolution::VGA.frame_len(), 640 * 480 * 3);
        assert!(Resolution::new(0, 480).is_empty());
        assert_eq!(Resolution::HD.to_string(), "1280x720");
    }

    #[test]
    fn test_frame_from_bgr_checks_length() {
        assert!(Frame::from_bgr(2, 1, vec![0; 6]).is_some());
        assert!(Frame::from_bgr(2, 1, vec![0; 5]).is_none());
    }

    #[test]
    fn test_frame_pixel_access() {
        let frame = Frame::from_bgr(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(frame.pixel(0, 0), Some([1, 2, 3]));
        assert_eq!(frame.pixel(1, 0), Some([4, 5, 6]));
        assert_eq!(frame.pixel(2, 0), None);
        assert_eq!(frame.bytes_per_pixel(), 3);
    }

    #[test]
    fn test_frame_is_empty() {
        assert!(Frame::black(Resolution::new(0, 0)).is_empty());
        assert!(!Frame::black(Resolution::new(4, 4)).is_empty());
    }

    #[test]
    fn test_camera_settings_default() {
        let settings = CameraSettings::default();
        assert_eq!(settings.backend, CameraBackend::Gstreamer);
        assert_eq!(settings.sensor_id, 0);
        assert_eq!(settings.resolution, Resolution::VGA);
        assert_eq!(settings.fps, 15);
        assert!(settings.pipeline.is_none());
    }

    #[test]
    fn test_camera_error_display() {
        let err = CameraError::TruncatedFrame {
            expected: 921600,
            got: 100,
        };
        assert_eq!(err.to_string(), "Truncated frame: got 100 of 921600 bytes");
        assert_eq!(
            CameraError::StreamFailed("eof".to_string()).to_string(),
            "Camera stream closed during startup: eof"
        );
    }
}
