//! Live preview window.
//!
//! The corrected feed is shown by an `mpv` child reading raw BGR frames from
//! its stdin. Closing the window ends the process, which shows up here as a
//! broken pipe on the next frame.

use std::fmt;
use std::io::{ErrorKind, Write};
use std::process::ChildStdin;

use crate::camera::{Frame, FrameFormat, Resolution};
use crate::pipeline::{PipeMode, Pipeline, PipelineError};

/// Player used for the preview window.
pub const MPV: &str = "mpv";

/// Window title of the preview.
pub const DEFAULT_TITLE: &str = "Undistorted Feed";

/// Errors that can occur while showing frames.
#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    /// The player could not be started
    #[error("Failed to open preview window: {0}")]
    Open(#[from] PipelineError),
    /// The window was closed by the user
    #[error("Preview window was closed")]
    Closed,
    /// Frame does not fit the window
    #[error("Frame size {actual} does not match preview size {expected}")]
    SizeMismatch {
        expected: Resolution,
        actual: Resolution,
    },
    /// Writing to the player failed
    #[error("Failed to send frame to preview: {0}")]
    Write(#[source] std::io::Error),
}

/// An on-screen consumer of frames.
pub trait FrameDisplay {
    /// Render one frame. Returns promptly; does not wait for input.
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError>;

    /// Close the window. Calling it again is a no-op.
    fn release(&mut self) -> Result<(), DisplayError>;
}

/// mpv player arguments for a raw BGR stream on stdin.
pub fn mpv_args(title: &str, resolution: Resolution, fps: u32) -> Vec<String> {
    vec![
        "--no-terminal".to_string(),
        "--really-quiet".to_string(),
        "--untimed".to_string(),
        "--no-cache".to_string(),
        "--demuxer=rawvideo".to_string(),
        format!("--demuxer-rawvideo-w={}", resolution.width),
        format!("--demuxer-rawvideo-h={}", resolution.height),
        format!(
            "--demuxer-rawvideo-mp-format={}",
            FrameFormat::Bgr.raw_video_name()
        ),
        format!("--demuxer-rawvideo-fps={}", fps.max(1)),
        format!("--title={}", title),
        "-".to_string(),
    ]
}

/// Preview window backed by mpv.
pub struct MpvDisplay {
    pipeline: Pipeline,
    stdin: Option<ChildStdin>,
    resolution: Resolution,
    released: bool,
}

impl fmt::Debug for MpvDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpvDisplay")
            .field("pipeline", &self.pipeline)
            .field("resolution", &self.resolution)
            .finish_non_exhaustive()
    }
}

impl MpvDisplay {
    /// Open a preview window sized for `resolution`.
    pub fn open(title: &str, resolution: Resolution, fps: u32) -> Result<Self, DisplayError> {
        log::info!("Opening preview window '{}' ({})", title, resolution);
        let mut pipeline = Pipeline::spawn(
            MPV,
            &mpv_args(title, resolution, fps),
            PipeMode::WriteStdin,
        )?;
        let stdin = pipeline.take_stdin();
        Ok(Self {
            pipeline,
            stdin,
            resolution,
            released: false,
        })
    }
}

impl FrameDisplay for MpvDisplay {
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        if frame.resolution() != self.resolution {
            return Err(DisplayError::SizeMismatch {
                expected: self.resolution,
                actual: frame.resolution(),
            });
        }
        let stdin = self.stdin.as_mut().ok_or(DisplayError::Closed)?;
        match stdin.write_all(&frame.data) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                self.stdin = None;
                Err(DisplayError::Closed)
            }
            Err(e) => Err(DisplayError::Write(e)),
        }
    }

    fn release(&mut self) -> Result<(), DisplayError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.stdin = None;
        self.pipeline.shutdown()?;
        log::debug!("Preview window closed");
        Ok(())
    }
}

impl Drop for MpvDisplay {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Error closing preview window: {}", e);
        }
    }
}
