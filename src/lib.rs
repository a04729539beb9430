//! undistort-recorder library crate.
//!
//! Captures frames from a calibrated camera, removes lens distortion, and
//! records the corrected feed to a video file with an optional live preview.
//! [`recorder::CaptureLoop`] ties the modules together.

pub mod calibration;
pub mod camera;
pub mod cli;
pub mod config;
pub mod devices;
pub mod display;
pub mod error;
pub mod hotkeys;
pub mod pipeline;
pub mod recorder;
pub mod sink;
pub mod terminal;
pub mod undistort;

pub use calibration::CalibrationData;
pub use config::RecorderConfig;
pub use error::RecorderError;
pub use recorder::{CaptureLoop, LoopState, RunSummary, StopReason};
