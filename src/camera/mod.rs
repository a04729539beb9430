//! Camera capture module.
//!
//! This module provides a high-level API for camera capture operations:
//! - Frame acquisition via [`CameraCapture`] behind the [`FrameSource`] trait
//! - Pipeline descriptors via [`PipelineDescriptor`] and [`CaptureCommand`]
//! - Configuration via [`CameraSettings`] and [`Resolution`]

mod capture;
mod descriptor;
mod source;
mod types;

pub use capture::CameraCapture;
pub use descriptor::{descriptor_for, CaptureCommand, PipelineDescriptor, FFMPEG, GST_LAUNCH};
pub use source::FrameSource;
pub use types::{CameraBackend, CameraError, CameraSettings, Frame, FrameFormat, Resolution};
