//! Errors that end a recording.

use std::path::PathBuf;

use crate::calibration::CalibrationError;
use crate::camera::{CameraError, Resolution};
use crate::config::ConfigError;
use crate::sink::SinkError;
use crate::undistort::UndistortError;

/// Process exit code for every failed run.
pub const FAILURE_EXIT_CODE: i32 = -1;

/// Fatal errors of the capture loop. None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Could not open calibration file {}: {source}", .path.display())]
    CalibrationOpen {
        path: PathBuf,
        #[source]
        source: CalibrationError,
    },
    #[error("Could not open camera: {0}")]
    CameraOpen(#[source] CameraError),
    #[error("Blank frame grabbed: {detail}")]
    EmptyFrame { detail: String },
    #[error("Could not open the output video file {} for write: {source}", .path.display())]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: SinkError,
    },
    #[error("Failed to grab frame: {0}")]
    FrameRead(#[source] CameraError),
    #[error("Frame size {actual} does not match output size {expected}")]
    FrameSize {
        expected: Resolution,
        actual: Resolution,
    },
    #[error("Failed to write frame: {0}")]
    FrameWrite(#[source] SinkError),
    #[error("Undistortion failed: {0}")]
    Undistort(#[from] UndistortError),
    #[error("Camera stream ended after {frames_written} frames")]
    StreamEnded { frames_written: u64 },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RecorderError {
    /// Exit code for the process.
    pub fn exit_code(&self) -> i32 {
        FAILURE_EXIT_CODE
    }
}
